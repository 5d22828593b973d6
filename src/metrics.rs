use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::telemetry::TelemetryLedger;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResponseSample {
    pub response_time_ms: u64,
    pub occurred_at_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharResponse {
    pub average_response_time_ms: f64,
    pub history: Vec<ResponseSample>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    pub characters: usize,
    pub words: usize,
}

/// Statistics derived from a ledger. Never mutated directly; recompute with
/// [`derive_metrics`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub num_correct: u32,
    pub num_errors: u32,
    /// `None` until at least one keystroke is attributed.
    pub accuracy: Option<f64>,
    /// `None` until at least one measured (non-zero) response time exists.
    pub average_response_time_ms: Option<f64>,
    pub response_time_map: BTreeMap<char, CharResponse>,
    pub totals: Totals,
}

/// Derives metrics from the ledger without touching it, so it can be called
/// mid-challenge as often as needed.
///
/// Slots with a zero response time carry no measurement and are left out of
/// every response-time figure. The overall average is a global mean over
/// measured keystrokes, not a mean of the per-character means.
pub fn derive_metrics(ledger: &TelemetryLedger) -> Metrics {
    let mut sums: BTreeMap<char, (u64, Vec<ResponseSample>)> = BTreeMap::new();
    let mut measured = 0usize;
    let mut characters = 0usize;
    let mut last_attributed_word = None;
    let mut words = 0usize;

    for (word_idx, _, slot) in ledger.iter() {
        if slot.is_attributed() {
            characters += 1;
            if last_attributed_word != Some(word_idx) {
                last_attributed_word = Some(word_idx);
                words += 1;
            }
        }

        if slot.response_time_ms == 0 {
            continue;
        }
        measured += 1;
        let bucket = sums.entry(slot.char).or_default();
        bucket.0 += slot.response_time_ms;
        bucket.1.push(ResponseSample {
            response_time_ms: slot.response_time_ms,
            occurred_at_ms: slot.occurred_at_ms.unwrap_or_default(),
        });
    }

    let total_sum: u64 = sums.values().map(|(sum, _)| sum).sum();
    let average_response_time_ms = match measured {
        0 => None,
        n => Some(total_sum as f64 / n as f64),
    };

    let response_time_map = sums
        .into_iter()
        .map(|(c, (sum, history))| {
            let average_response_time_ms = sum as f64 / history.len() as f64;
            (
                c,
                CharResponse {
                    average_response_time_ms,
                    history,
                },
            )
        })
        .collect();

    Metrics {
        num_correct: ledger.num_correct,
        num_errors: ledger.num_errors,
        accuracy: accuracy(ledger.num_correct, ledger.num_errors),
        average_response_time_ms,
        response_time_map,
        totals: Totals { characters, words },
    }
}

pub fn accuracy(num_correct: u32, num_errors: u32) -> Option<f64> {
    match num_correct + num_errors {
        0 => None,
        total => Some(num_correct as f64 / total as f64),
    }
}

/// Words per minute counting five correct characters as a word, rounded to
/// the nearest whole number. Zero elapsed time yields zero.
pub fn words_per_minute(num_correct: u32, elapsed_ms: i64) -> u32 {
    if elapsed_ms <= 0 {
        return 0;
    }
    let minutes = elapsed_ms as f64 / 60_000.0;
    (num_correct as f64 / 5.0 / minutes).round() as u32
}
