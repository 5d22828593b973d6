use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::challenge::Mode;
use crate::metrics::{derive_metrics, Metrics};
use crate::telemetry::TelemetryLedger;

/// Stored in place of a duration for challenges that run until the text is
/// exhausted.
pub const UNBOUNDED_DURATION_MS: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Window<T> {
    pub start: T,
    pub end: T,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeWindows {
    pub wall_clock: Window<DateTime<Utc>>,
    pub monotonic: Window<f64>,
}

impl TimeWindows {
    pub fn elapsed_ms(&self) -> i64 {
        (self.wall_clock.end - self.wall_clock.start).num_milliseconds()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryTelemetry {
    pub ledger: TelemetryLedger,
    pub metrics: Metrics,
}

/// Snapshot emitted once when a challenge ends. The engine hands it off and
/// never touches it again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChallengeSummary {
    pub mode: Mode,
    pub wpm: u32,
    pub challenge_duration_ms: i64,
    pub telemetry: SummaryTelemetry,
    pub time: TimeWindows,
    /// `(elapsed_secs, wpm)` sampled every tick.
    pub wpm_series: Vec<(f64, u32)>,
}

impl ChallengeSummary {
    pub fn new(
        mode: Mode,
        wpm: u32,
        duration_ms: Option<u64>,
        ledger: TelemetryLedger,
        time: TimeWindows,
        wpm_series: Vec<(f64, u32)>,
    ) -> Self {
        let metrics = derive_metrics(&ledger);
        Self {
            mode,
            wpm,
            challenge_duration_ms: duration_ms.map_or(UNBOUNDED_DURATION_MS, |d| d as i64),
            telemetry: SummaryTelemetry { ledger, metrics },
            time,
            wpm_series,
        }
    }

    pub fn accuracy(&self) -> Option<f64> {
        self.telemetry.metrics.accuracy
    }
}
