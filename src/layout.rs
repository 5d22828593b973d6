use std::ops::Range;
use unicode_width::UnicodeWidthStr;

/// Greedy word wrapping of the challenge text at a fixed display width.
///
/// Words are laid out incrementally as batches arrive, so earlier words never
/// move to a different line.
#[derive(Debug, Clone)]
pub struct LineLayout {
    width: usize,
    line_of_word: Vec<usize>,
    column: usize,
}

impl LineLayout {
    pub fn new(width: u16) -> Self {
        Self {
            width: width.max(1) as usize,
            line_of_word: Vec::new(),
            column: 0,
        }
    }

    pub fn push_words<S: AsRef<str>>(&mut self, words: &[S]) {
        for word in words {
            let w = word.as_ref().width();
            let mut line = self.line_of_word.last().copied().unwrap_or(0);
            let needed = if self.column == 0 { w } else { self.column + 1 + w };

            if self.column > 0 && needed > self.width {
                line += 1;
                self.column = w;
            } else {
                self.column = needed;
            }
            self.line_of_word.push(line);
        }
    }

    pub fn word_count(&self) -> usize {
        self.line_of_word.len()
    }

    pub fn line_of(&self, word_idx: usize) -> Option<usize> {
        self.line_of_word.get(word_idx).copied()
    }

    /// Whether moving from `from` to the following word starts a new line.
    /// A word that is not laid out yet never counts as a crossing.
    pub fn crosses_line(&self, from: usize) -> bool {
        match (self.line_of(from), self.line_of(from + 1)) {
            (Some(a), Some(b)) => a != b,
            _ => false,
        }
    }

    /// Indices of the words on `line`.
    pub fn words_on_line(&self, line: usize) -> Range<usize> {
        let start = self.line_of_word.partition_point(|l| *l < line);
        let end = self.line_of_word.partition_point(|l| *l <= line);
        start..end
    }
}
