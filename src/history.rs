use itertools::Itertools;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;

use crate::summary::ChallengeSummary;
use crate::util::{mean, std_dev};

#[derive(Debug, Clone, PartialEq)]
pub struct CharHistory {
    pub character: char,
    pub mean_response_time_ms: f64,
    pub samples: usize,
}

/// Comparative statistics over a set of past attempts.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HistoryReport {
    pub attempts: usize,
    pub best_wpm: Option<u32>,
    pub mean_wpm: Option<f64>,
    pub wpm_std_dev: Option<f64>,
    pub mean_accuracy: Option<f64>,
    /// Slowest characters first.
    pub characters: Vec<CharHistory>,
}

pub fn summarize(summaries: &[ChallengeSummary]) -> HistoryReport {
    let wpms: Vec<f64> = summaries.iter().map(|s| s.wpm as f64).collect();
    let accuracies: Vec<f64> = summaries.iter().filter_map(|s| s.accuracy()).collect();

    // every sample counts equally, however many attempts it came from
    let mut per_char: BTreeMap<char, (u64, usize)> = BTreeMap::new();
    for summary in summaries {
        for (c, response) in &summary.telemetry.metrics.response_time_map {
            let entry = per_char.entry(*c).or_default();
            entry.0 += response.history.iter().map(|s| s.response_time_ms).sum::<u64>();
            entry.1 += response.history.len();
        }
    }

    let characters = per_char
        .into_iter()
        .filter(|(_, (_, n))| *n > 0)
        .map(|(character, (sum, samples))| CharHistory {
            character,
            mean_response_time_ms: sum as f64 / samples as f64,
            samples,
        })
        .sorted_by(|a, b| {
            b.mean_response_time_ms
                .partial_cmp(&a.mean_response_time_ms)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.character.cmp(&b.character))
        })
        .collect();

    HistoryReport {
        attempts: summaries.len(),
        best_wpm: summaries.iter().map(|s| s.wpm).max(),
        mean_wpm: mean(&wpms),
        wpm_std_dev: std_dev(&wpms),
        mean_accuracy: mean(&accuracies),
        characters,
    }
}

#[derive(Serialize)]
struct CsvRow {
    started_at: String,
    mode: String,
    wpm: u32,
    accuracy: Option<f64>,
    average_response_time_ms: Option<f64>,
    challenge_duration_ms: i64,
    elapsed_ms: i64,
}

/// Writes one CSV row per attempt, with a header.
pub fn export_csv<W: Write>(summaries: &[ChallengeSummary], writer: W) -> Result<(), csv::Error> {
    let mut csv = csv::Writer::from_writer(writer);
    for s in summaries {
        csv.serialize(CsvRow {
            started_at: s.time.wall_clock.start.to_rfc3339(),
            mode: s.mode.to_string(),
            wpm: s.wpm,
            accuracy: s.accuracy(),
            average_response_time_ms: s.telemetry.metrics.average_response_time_ms,
            challenge_duration_ms: s.challenge_duration_ms,
            elapsed_ms: s.time.elapsed_ms(),
        })?;
    }
    csv.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::challenge::Mode;
    use crate::summary::{TimeWindows, Window};
    use crate::telemetry::TelemetryLedger;
    use chrono::{TimeZone, Utc};

    fn summary(wpm: u32, typed: &[(char, bool, u64)]) -> ChallengeSummary {
        let mut ledger = TelemetryLedger::new();
        let word: String = typed.iter().map(|(c, _, _)| *c).collect();
        ledger.append_words(&[word]);
        for (i, (_, correct, rt)) in typed.iter().enumerate() {
            ledger.attribute(0, i, *correct, *rt, i as f64 * 100.0);
        }
        let start = Utc.with_ymd_and_hms(2026, 5, 4, 9, 0, 0).unwrap();
        ChallengeSummary::new(
            Mode::Classic,
            wpm,
            Some(60_000),
            ledger,
            TimeWindows {
                wall_clock: Window {
                    start,
                    end: start + chrono::Duration::seconds(60),
                },
                monotonic: Window {
                    start: 0.0,
                    end: 60_000.0,
                },
            },
            Vec::new(),
        )
    }

    #[test]
    fn empty_history() {
        let report = summarize(&[]);
        assert_eq!(report.attempts, 0);
        assert_eq!(report.best_wpm, None);
        assert_eq!(report.mean_wpm, None);
        assert!(report.characters.is_empty());
    }

    #[test]
    fn wpm_and_accuracy_statistics() {
        let report = summarize(&[
            summary(40, &[('a', true, 0), ('b', false, 100)]),
            summary(60, &[('a', true, 0), ('b', true, 100)]),
        ]);

        assert_eq!(report.attempts, 2);
        assert_eq!(report.best_wpm, Some(60));
        assert_eq!(report.mean_wpm, Some(50.0));
        assert_eq!(report.wpm_std_dev, Some(10.0));
        assert_eq!(report.mean_accuracy, Some(0.75));
    }

    #[test]
    fn characters_merge_across_attempts_slowest_first() {
        let report = summarize(&[
            summary(40, &[('a', true, 0), ('b', true, 100), ('c', true, 300)]),
            summary(45, &[('x', true, 0), ('b', true, 300)]),
        ]);

        let order: Vec<char> = report.characters.iter().map(|c| c.character).collect();
        assert_eq!(order, vec!['c', 'b']);
        assert_eq!(report.characters[1].mean_response_time_ms, 200.0);
        assert_eq!(report.characters[1].samples, 2);
    }

    #[test]
    fn csv_export_has_header_and_rows() {
        let mut out = Vec::new();
        export_csv(&[summary(40, &[('a', true, 0), ('b', true, 120)])], &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();

        assert_eq!(
            lines.next(),
            Some("started_at,mode,wpm,accuracy,average_response_time_ms,challenge_duration_ms,elapsed_ms")
        );
        assert_eq!(
            lines.next(),
            Some("2026-05-04T09:00:00+00:00,Classic,40,1.0,120.0,60000,60000")
        );
        assert_eq!(lines.next(), None);
    }
}
