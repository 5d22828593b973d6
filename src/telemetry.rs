use serde::{Deserialize, Serialize};

/// One expected character of a loaded word and what happened when the
/// typist reached it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KeyTelemetry {
    pub char: char,
    /// `None` until a keystroke is attributed to this slot.
    pub correct: Option<bool>,
    pub response_time_ms: u64,
    /// Monotonic timestamp of the attributed keystroke.
    pub occurred_at_ms: Option<f64>,
}

impl KeyTelemetry {
    pub fn new(char: char) -> Self {
        Self {
            char,
            correct: None,
            response_time_ms: 0,
            occurred_at_ms: None,
        }
    }

    pub fn is_attributed(&self) -> bool {
        self.correct.is_some()
    }
}

/// Per-attempt record of expected and actual keystroke outcomes, indexed by
/// word then character.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetryLedger {
    words: Vec<Vec<KeyTelemetry>>,
    pub num_correct: u32,
    pub num_errors: u32,
}

impl TelemetryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends words at the next free indices. Every character of a word is
    /// populated at once. Returns the index of the first appended word.
    pub fn append_words<S: AsRef<str>>(&mut self, words: &[S]) -> usize {
        let first = self.words.len();
        self.words.extend(
            words
                .iter()
                .map(|w| w.as_ref().chars().map(KeyTelemetry::new).collect()),
        );
        first
    }

    pub fn word_count(&self) -> usize {
        self.words.len()
    }

    pub fn word(&self, word_idx: usize) -> Option<&[KeyTelemetry]> {
        self.words.get(word_idx).map(Vec::as_slice)
    }

    pub fn word_len(&self, word_idx: usize) -> Option<usize> {
        self.words.get(word_idx).map(Vec::len)
    }

    /// Expected text of a loaded word.
    pub fn word_text(&self, word_idx: usize) -> Option<String> {
        self.words
            .get(word_idx)
            .map(|w| w.iter().map(|k| k.char).collect())
    }

    pub fn slot(&self, word_idx: usize, char_idx: usize) -> Option<&KeyTelemetry> {
        self.words.get(word_idx).and_then(|w| w.get(char_idx))
    }

    /// Records a keystroke outcome on a slot. A slot that was already
    /// attributed is uncounted first so the counters only ever reflect the
    /// latest attribution. Returns `None` when the slot does not exist.
    pub fn attribute(
        &mut self,
        word_idx: usize,
        char_idx: usize,
        correct: bool,
        response_time_ms: u64,
        occurred_at_ms: f64,
    ) -> Option<KeyTelemetry> {
        let slot = self.words.get_mut(word_idx)?.get_mut(char_idx)?;
        let previous = slot.correct;
        slot.correct = Some(correct);
        slot.response_time_ms = response_time_ms;
        slot.occurred_at_ms = Some(occurred_at_ms);
        let updated = *slot;

        if let Some(was_correct) = previous {
            self.uncount(was_correct);
        }
        self.count(correct);
        Some(updated)
    }

    /// Exact undo of an attribution. Returns the outcome that was removed,
    /// or `None` if the slot is missing or was never attributed.
    pub fn clear(&mut self, word_idx: usize, char_idx: usize) -> Option<bool> {
        let slot = self.words.get_mut(word_idx)?.get_mut(char_idx)?;
        let previous = slot.correct.take()?;
        slot.response_time_ms = 0;
        slot.occurred_at_ms = None;
        self.uncount(previous);
        Some(previous)
    }

    /// Iterates every slot in insertion order with its coordinates.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, &KeyTelemetry)> {
        self.words
            .iter()
            .enumerate()
            .flat_map(|(w, chars)| chars.iter().enumerate().map(move |(c, k)| (w, c, k)))
    }

    pub fn attributed_count(&self) -> usize {
        self.iter().filter(|(_, _, k)| k.is_attributed()).count()
    }

    fn count(&mut self, correct: bool) {
        if correct {
            self.num_correct += 1;
        } else {
            self.num_errors += 1;
        }
    }

    fn uncount(&mut self, correct: bool) {
        if correct {
            self.num_correct = self.num_correct.saturating_sub(1);
        } else {
            self.num_errors = self.num_errors.saturating_sub(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_populates_every_char_unset() {
        let mut ledger = TelemetryLedger::new();
        let first = ledger.append_words(&["cat", "dog"]);
        assert_eq!(first, 0);
        let next = ledger.append_words(&["emu"]);
        assert_eq!(next, 2);

        assert_eq!(ledger.word_count(), 3);
        for (_, _, slot) in ledger.iter() {
            assert_eq!(slot.correct, None);
            assert_eq!(slot.response_time_ms, 0);
        }
        assert_eq!(ledger.word_text(1).as_deref(), Some("dog"));
        assert_eq!(ledger.slot(2, 0).map(|k| k.char), Some('e'));
    }

    #[test]
    fn attribute_counts_and_reattribute_replaces() {
        let mut ledger = TelemetryLedger::new();
        ledger.append_words(&["ab"]);

        ledger.attribute(0, 0, false, 120, 10.0);
        assert_eq!((ledger.num_correct, ledger.num_errors), (0, 1));

        ledger.attribute(0, 0, true, 90, 20.0);
        assert_eq!((ledger.num_correct, ledger.num_errors), (1, 0));
        assert_eq!(ledger.attributed_count(), 1);
    }

    #[test]
    fn clear_is_exact_undo() {
        let mut ledger = TelemetryLedger::new();
        ledger.append_words(&["cat"]);
        let before = ledger.clone();

        ledger.attribute(0, 1, true, 200, 400.0);
        assert_eq!(ledger.clear(0, 1), Some(true));
        assert_eq!(ledger, before);
    }

    #[test]
    fn missing_slots_are_ignored() {
        let mut ledger = TelemetryLedger::new();
        ledger.append_words(&["a"]);

        assert!(ledger.attribute(0, 3, true, 0, 0.0).is_none());
        assert!(ledger.attribute(5, 0, true, 0, 0.0).is_none());
        assert_eq!(ledger.clear(0, 0), None);
        assert_eq!(ledger.num_correct + ledger.num_errors, 0);
    }
}
