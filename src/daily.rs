use chrono::{DateTime, FixedOffset, Offset, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::summary::ChallengeSummary;
use crate::words::WordBank;

pub const DAILY_COLLECTION: &str = "daily";
pub const DAILY_WORD_COUNT: usize = 40;
/// US Eastern standard time.
pub const DEFAULT_REFERENCE_UTC_OFFSET_MINUTES: i32 = -300;

/// Calendar date of `now` in the reference zone, formatted `MM-dd-yyyy`.
pub fn date_key(now: DateTime<Utc>, utc_offset_minutes: i32) -> String {
    let offset = FixedOffset::east_opt(utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix());
    now.with_timezone(&offset).format("%m-%d-%Y").to_string()
}

/// Shared text of one day's challenge and the running totals over every
/// attempt made on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyChallenge {
    pub text: String,
    #[serde(rename = "sumWPM")]
    pub sum_wpm: f64,
    #[serde(rename = "sumAccuracy")]
    pub sum_accuracy: f64,
    #[serde(rename = "sumTime")]
    pub sum_time: f64,
    pub attempts: u32,
    /// Identities whose attempt is already in the totals.
    #[serde(rename = "countedBy", default, skip_serializing_if = "Vec::is_empty")]
    pub counted_by: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DailyAverages {
    pub wpm: f64,
    pub accuracy: f64,
    pub time_ms: f64,
}

impl DailyChallenge {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            sum_wpm: 0.0,
            sum_accuracy: 0.0,
            sum_time: 0.0,
            attempts: 0,
            counted_by: Vec::new(),
        }
    }

    /// Picks the day's text from a word bank.
    pub fn generate(bank: &WordBank, count: usize) -> Self {
        Self::new(bank.sample(count, bank.max_word_length).join(" "))
    }

    pub fn words(&self) -> Vec<String> {
        self.text
            .split(' ')
            .filter(|w| !w.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn shuffled_words<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<String> {
        let mut words = self.words();
        words.shuffle(rng);
        words
    }

    pub fn record_attempt(&mut self, summary: &ChallengeSummary) {
        self.sum_wpm += summary.wpm as f64;
        self.sum_accuracy += summary.accuracy().unwrap_or(0.0);
        self.sum_time += summary.time.elapsed_ms() as f64;
        self.attempts += 1;
    }

    /// Adds `identity`'s attempt to the totals unless it was counted
    /// before. Returns whether the totals changed.
    pub fn record_attempt_once(&mut self, identity: &str, summary: &ChallengeSummary) -> bool {
        if self.counted_by.iter().any(|id| id == identity) {
            return false;
        }
        self.counted_by.push(identity.to_string());
        self.record_attempt(summary);
        true
    }

    pub fn averages(&self) -> Option<DailyAverages> {
        if self.attempts == 0 {
            return None;
        }
        let n = self.attempts as f64;
        Some(DailyAverages {
            wpm: self.sum_wpm / n,
            accuracy: self.sum_accuracy / n,
            time_ms: self.sum_time / n,
        })
    }
}
