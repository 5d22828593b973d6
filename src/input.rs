use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};

use crate::challenge::Keystroke;

/// What a key press means for the challenge.
#[derive(Debug, Clone, PartialEq)]
pub enum InputAction {
    Keystroke(Keystroke),
    /// Caret moved without editing.
    Caret(usize),
}

/// Controlled text input: edits are applied locally to build the keystroke
/// payload, then the field is re-synced from the engine's accepted state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputField {
    chars: Vec<char>,
    caret: usize,
}

impl InputField {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(&self) -> String {
        self.chars.iter().collect()
    }

    pub fn caret(&self) -> usize {
        self.caret
    }

    /// Replaces the contents with what the engine accepted.
    pub fn sync(&mut self, text: &str, caret: usize) {
        self.chars = text.chars().collect();
        self.caret = caret.min(self.chars.len());
    }

    pub fn apply(&mut self, key: &KeyEvent, occurred_at_ms: f64) -> Option<InputAction> {
        if key.kind == KeyEventKind::Release {
            return None;
        }
        if key.modifiers.intersects(KeyModifiers::CONTROL | KeyModifiers::ALT) {
            return None;
        }

        match key.code {
            KeyCode::Char(c) => {
                self.chars.insert(self.caret, c);
                self.caret += 1;
                Some(InputAction::Keystroke(Keystroke::char(
                    c,
                    self.text(),
                    self.caret,
                    occurred_at_ms,
                )))
            }
            KeyCode::Backspace if self.caret > 0 => {
                self.caret -= 1;
                self.chars.remove(self.caret);
                Some(InputAction::Keystroke(Keystroke::backspace(
                    self.text(),
                    self.caret,
                    occurred_at_ms,
                )))
            }
            KeyCode::Left if self.caret > 0 => {
                self.caret -= 1;
                Some(InputAction::Caret(self.caret))
            }
            KeyCode::Right if self.caret < self.chars.len() => {
                self.caret += 1;
                Some(InputAction::Caret(self.caret))
            }
            KeyCode::Home => {
                self.caret = 0;
                Some(InputAction::Caret(0))
            }
            KeyCode::End => {
                self.caret = self.chars.len();
                Some(InputAction::Caret(self.caret))
            }
            _ => None,
        }
    }
}
