use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::{EngineError, WordSupplyError};
use crate::metrics::{derive_metrics, words_per_minute, Metrics};
use crate::summary::{ChallengeSummary, TimeWindows, Window};
use crate::telemetry::TelemetryLedger;

pub const TICK_MS: u64 = 1000;
pub const COUNTDOWN_TICKS: u32 = 3;
pub const DEFAULT_BATCH: usize = 50;
pub const DEFAULT_CLASSIC_DURATION_MS: u64 = 60_000;

/// Extra words requested per word consumed on the line just finished.
const LINE_WRAP_QUOTA_FACTOR: f64 = 1.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum_macros::Display)]
pub enum Mode {
    Classic,
    Daily,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
pub enum Lifecycle {
    NotStarted,
    CountingDown,
    Active,
    Ended,
}

/// Identity of one attempt. Bumped on every reset so results of work started
/// for an earlier attempt can be recognised and dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AttemptId(pub u64);

impl AttemptId {
    fn next(self) -> Self {
        AttemptId(self.0 + 1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Char(char),
    Backspace,
}

/// Payload of one user interaction with the text input.
#[derive(Debug, Clone, PartialEq)]
pub struct Keystroke {
    pub key: Key,
    /// Contents of the input after the keystroke was applied.
    pub input: String,
    /// Caret position after the keystroke, in characters.
    pub caret: usize,
    pub occurred_at_ms: f64,
    /// Set by the layout when the next word begins on a new visual line.
    pub crossed_line: bool,
}

impl Keystroke {
    pub fn char(c: char, input: impl Into<String>, caret: usize, occurred_at_ms: f64) -> Self {
        Self {
            key: Key::Char(c),
            input: input.into(),
            caret,
            occurred_at_ms,
            crossed_line: false,
        }
    }

    pub fn backspace(input: impl Into<String>, caret: usize, occurred_at_ms: f64) -> Self {
        Self {
            key: Key::Backspace,
            input: input.into(),
            caret,
            occurred_at_ms,
            crossed_line: false,
        }
    }

    pub fn crossing_line(mut self, crossed: bool) -> Self {
        self.crossed_line = crossed;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The target word or character has not been loaded yet.
    OutOfRange,
    /// The input would grow past the end of the current word.
    Overflow,
    /// A space was typed with nothing before it.
    EmptyWord,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeystrokeOutcome {
    /// The challenge is not accepting input.
    Ignored,
    Attributed {
        word: usize,
        char: usize,
        correct: bool,
    },
    Undone {
        word: usize,
        char: usize,
        was_correct: bool,
    },
    CaretMoved,
    WordCompleted {
        next_word: usize,
    },
    Rejected(RejectReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WordRequest {
    pub attempt: AttemptId,
    pub count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WordsApplied {
    Appended { first_word: usize, count: usize },
    /// The result belongs to an attempt that was reset or has ended.
    Stale,
}

/// Effects the engine asks its owner to carry out, drained after every
/// operation.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    LifecycleChanged(Lifecycle),
    WordsRequested(WordRequest),
    WordSupplyFailed { attempt: AttemptId, reason: String },
    WpmUpdated(u32),
    SummaryReady(Box<ChallengeSummary>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeConfig {
    pub mode: Mode,
    /// Fixed length of a Classic challenge; `None` runs until the text ends.
    pub duration_ms: Option<u64>,
    pub countdown_ticks: u32,
    pub initial_batch: usize,
}

impl ChallengeConfig {
    pub fn classic(duration_ms: u64) -> Self {
        Self {
            mode: Mode::Classic,
            duration_ms: Some(duration_ms),
            countdown_ticks: COUNTDOWN_TICKS,
            initial_batch: DEFAULT_BATCH,
        }
    }

    pub fn daily() -> Self {
        Self {
            mode: Mode::Daily,
            duration_ms: None,
            countdown_ticks: COUNTDOWN_TICKS,
            initial_batch: 0,
        }
    }

    pub fn with_countdown_ticks(mut self, ticks: u32) -> Self {
        self.countdown_ticks = ticks;
        self
    }

    pub fn with_initial_batch(mut self, batch: usize) -> Self {
        self.initial_batch = batch;
        self
    }
}

impl Default for ChallengeConfig {
    fn default() -> Self {
        Self::classic(DEFAULT_CLASSIC_DURATION_MS)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChallengeState {
    pub lifecycle: Lifecycle,
    pub mode: Mode,
    pub current_word_index: usize,
    pub current_char_index: usize,
    pub user_input_buffer: String,
    pub challenge_duration_ms: Option<u64>,
    pub remaining_ms: Option<u64>,
    pub countdown_remaining: u32,
    pub provisional_start: Option<(DateTime<Utc>, f64)>,
    pub start_time_wall_clock: Option<DateTime<Utc>>,
    pub start_time_monotonic: Option<f64>,
    pub end_time_wall_clock: Option<DateTime<Utc>>,
    pub end_time_monotonic: Option<f64>,
    pub last_keystroke_monotonic: Option<f64>,
    pub line_start_word_index: usize,
    pub wpm: u32,
}

impl ChallengeState {
    fn new(config: &ChallengeConfig) -> Self {
        Self {
            lifecycle: Lifecycle::NotStarted,
            mode: config.mode,
            current_word_index: 0,
            current_char_index: 0,
            user_input_buffer: String::new(),
            challenge_duration_ms: config.duration_ms,
            remaining_ms: config.duration_ms,
            countdown_remaining: config.countdown_ticks,
            provisional_start: None,
            start_time_wall_clock: None,
            start_time_monotonic: None,
            end_time_wall_clock: None,
            end_time_monotonic: None,
            last_keystroke_monotonic: None,
            line_start_word_index: 0,
            wpm: 0,
        }
    }
}

/// Owns one challenge attempt: its lifecycle, cursor and telemetry ledger.
///
/// All mutation goes through `&mut self`, so a single owner is the only
/// writer. I/O is never performed here; word fetches and the finished
/// summary are handed to the owner as [`EngineEvent`]s.
#[derive(Debug)]
pub struct ChallengeEngine<C: Clock> {
    config: ChallengeConfig,
    clock: C,
    attempt: AttemptId,
    state: ChallengeState,
    ledger: TelemetryLedger,
    wpm_series: Vec<(f64, u32)>,
    events: VecDeque<EngineEvent>,
}

impl<C: Clock> ChallengeEngine<C> {
    /// Builds an engine. Classic challenges immediately queue a request for
    /// the first batch of words.
    pub fn new(config: ChallengeConfig, clock: C) -> Self {
        let mut engine = Self {
            state: ChallengeState::new(&config),
            config,
            clock,
            attempt: AttemptId(0),
            ledger: TelemetryLedger::new(),
            wpm_series: Vec::new(),
            events: VecDeque::new(),
        };
        engine.request_initial_batch();
        engine
    }

    /// Builds a Daily engine over a fixed text.
    pub fn daily<S: AsRef<str>>(words: &[S], clock: C) -> Self {
        let mut engine = Self::new(ChallengeConfig::daily(), clock);
        engine.ledger.append_words(words);
        engine
    }

    pub fn config(&self) -> &ChallengeConfig {
        &self.config
    }

    pub fn attempt(&self) -> AttemptId {
        self.attempt
    }

    pub fn state(&self) -> &ChallengeState {
        &self.state
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.state.lifecycle
    }

    pub fn mode(&self) -> Mode {
        self.state.mode
    }

    pub fn ledger(&self) -> &TelemetryLedger {
        &self.ledger
    }

    pub fn wpm(&self) -> u32 {
        self.state.wpm
    }

    pub fn wpm_series(&self) -> &[(f64, u32)] {
        &self.wpm_series
    }

    pub fn metrics(&self) -> Metrics {
        derive_metrics(&self.ledger)
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Takes every queued event, oldest first.
    pub fn drain_events(&mut self) -> Vec<EngineEvent> {
        self.events.drain(..).collect()
    }

    pub fn begin(&mut self) -> Result<(), EngineError> {
        if self.state.lifecycle != Lifecycle::NotStarted {
            return Err(self.illegal("begin"));
        }
        self.state.provisional_start = Some((self.clock.wall(), self.clock.monotonic_ms()));
        self.state.countdown_remaining = self.config.countdown_ticks;
        self.transition(Lifecycle::CountingDown);

        if self.state.countdown_remaining == 0 {
            self.activate();
        }
        Ok(())
    }

    /// Advances timers by one tick. Drives the countdown, refreshes live WPM
    /// and ends Classic challenges when their time runs out. Late ticks
    /// before start or after the end are no-ops.
    pub fn tick(&mut self) {
        match self.state.lifecycle {
            Lifecycle::NotStarted | Lifecycle::Ended => {}
            Lifecycle::CountingDown => {
                self.state.countdown_remaining = self.state.countdown_remaining.saturating_sub(1);
                debug!(remaining = self.state.countdown_remaining, "countdown tick");
                if self.state.countdown_remaining == 0 {
                    self.activate();
                }
            }
            Lifecycle::Active => {
                let wpm = self.refresh_wpm();
                let elapsed_secs = self.elapsed_wall_ms() as f64 / 1000.0;
                self.wpm_series.push((elapsed_secs, wpm));
                self.events.push_back(EngineEvent::WpmUpdated(wpm));

                if let Some(remaining) = self.state.remaining_ms {
                    let remaining = remaining.saturating_sub(TICK_MS);
                    self.state.remaining_ms = Some(remaining);
                    if remaining == 0 {
                        self.finish();
                    }
                }
            }
        }
    }

    /// Ends the attempt and emits its summary. Calling it again once ended
    /// does nothing.
    pub fn end(&mut self) -> Result<(), EngineError> {
        match self.state.lifecycle {
            Lifecycle::Active => {
                self.finish();
                Ok(())
            }
            Lifecycle::Ended => Ok(()),
            Lifecycle::NotStarted | Lifecycle::CountingDown => Err(self.illegal("end")),
        }
    }

    /// Starts a fresh attempt. Work still in flight for the previous attempt
    /// is invalidated by the new attempt id. Daily challenges cannot be
    /// restarted once begun.
    pub fn reset(&mut self) -> Result<(), EngineError> {
        if self.state.mode == Mode::Daily {
            if self.state.lifecycle != Lifecycle::NotStarted {
                return Err(self.illegal("reset"));
            }
            return Ok(());
        }

        self.attempt = self.attempt.next();
        self.state = ChallengeState::new(&self.config);
        self.ledger = TelemetryLedger::new();
        self.wpm_series.clear();
        self.events
            .retain(|e| !matches!(e, EngineEvent::WordsRequested(_)));
        info!(attempt = self.attempt.0, "challenge reset");
        self.events
            .push_back(EngineEvent::LifecycleChanged(Lifecycle::NotStarted));
        self.request_initial_batch();
        Ok(())
    }

    /// Queues a request for more words for the current attempt.
    pub fn request_more_words(&mut self, count: usize) {
        if count == 0 {
            return;
        }
        debug!(attempt = self.attempt.0, count, "requesting words");
        self.events.push_back(EngineEvent::WordsRequested(WordRequest {
            attempt: self.attempt,
            count,
        }));
    }

    /// Applies a completed word fetch, unless it belongs to another attempt
    /// or the attempt is already over.
    pub fn apply_words<S: AsRef<str>>(&mut self, attempt: AttemptId, words: &[S]) -> WordsApplied {
        if attempt != self.attempt || self.state.lifecycle == Lifecycle::Ended {
            debug!(
                stale = attempt.0,
                current = self.attempt.0,
                "dropping stale word batch"
            );
            return WordsApplied::Stale;
        }
        let first_word = self.ledger.append_words(words);
        debug!(first_word, count = words.len(), "words appended");
        WordsApplied::Appended {
            first_word,
            count: words.len(),
        }
    }

    /// Records a failed fetch. The ledger and lifecycle are left alone; the
    /// owner may retry with [`request_more_words`](Self::request_more_words).
    pub fn word_supply_failed(&mut self, attempt: AttemptId, error: &WordSupplyError) {
        if attempt != self.attempt {
            return;
        }
        warn!(attempt = attempt.0, %error, "word supply failed");
        self.events.push_back(EngineEvent::WordSupplyFailed {
            attempt,
            reason: error.to_string(),
        });
    }

    /// Moves the caret without typing.
    pub fn move_caret(&mut self, caret: usize) -> Result<(), EngineError> {
        if self.state.lifecycle != Lifecycle::Active {
            return Err(self.illegal("move_caret"));
        }
        let len = self.state.user_input_buffer.chars().count();
        if caret > len {
            return Err(EngineError::InvalidArgument(format!(
                "caret {caret} is past the end of a {len} character input"
            )));
        }
        self.state.current_char_index = caret;
        Ok(())
    }

    pub fn on_keystroke(&mut self, keystroke: &Keystroke) -> Result<KeystrokeOutcome, EngineError> {
        let input_len = keystroke.input.chars().count();
        if keystroke.caret > input_len {
            return Err(EngineError::InvalidArgument(format!(
                "caret {} is past the end of a {input_len} character input",
                keystroke.caret
            )));
        }
        if self.state.lifecycle != Lifecycle::Active {
            return Ok(KeystrokeOutcome::Ignored);
        }

        if keystroke.input.ends_with(' ') {
            if keystroke.input.trim().is_empty() {
                return Ok(KeystrokeOutcome::Rejected(RejectReason::EmptyWord));
            }
            return Ok(self.complete_word(keystroke.crossed_line));
        }

        let word_idx = self.state.current_word_index;
        let Some(word_len) = self.ledger.word_len(word_idx) else {
            return Ok(KeystrokeOutcome::Rejected(RejectReason::OutOfRange));
        };
        if input_len > word_len {
            return Ok(KeystrokeOutcome::Rejected(RejectReason::Overflow));
        }

        let outcome = match keystroke.key {
            Key::Backspace => match self.ledger.clear(word_idx, keystroke.caret) {
                Some(was_correct) => KeystrokeOutcome::Undone {
                    word: word_idx,
                    char: keystroke.caret,
                    was_correct,
                },
                None => KeystrokeOutcome::CaretMoved,
            },
            Key::Char(c) => {
                let char_idx = self.state.current_char_index;
                let Some(expected) = self.ledger.slot(word_idx, char_idx).map(|k| k.char) else {
                    return Ok(KeystrokeOutcome::Rejected(RejectReason::OutOfRange));
                };
                let correct = c == expected;
                let response_time_ms = self
                    .state
                    .last_keystroke_monotonic
                    .map(|last| (keystroke.occurred_at_ms - last).round().max(0.0) as u64)
                    .unwrap_or(0);
                self.ledger.attribute(
                    word_idx,
                    char_idx,
                    correct,
                    response_time_ms,
                    keystroke.occurred_at_ms,
                );
                self.state.last_keystroke_monotonic = Some(keystroke.occurred_at_ms);
                debug!(word_idx, char_idx, %c, %expected, correct, response_time_ms, "attributed");
                KeystrokeOutcome::Attributed {
                    word: word_idx,
                    char: char_idx,
                    correct,
                }
            }
        };

        self.state.user_input_buffer = keystroke.input.clone();
        self.state.current_char_index = keystroke.caret;

        if matches!(outcome, KeystrokeOutcome::Attributed { .. })
            && self.state.mode == Mode::Daily
            && word_idx + 1 == self.ledger.word_count()
            && keystroke.caret >= word_len
        {
            self.finish();
        }

        Ok(outcome)
    }

    fn complete_word(&mut self, crossed_line: bool) -> KeystrokeOutcome {
        self.state.current_word_index += 1;
        self.state.current_char_index = 0;
        self.state.user_input_buffer.clear();
        let next_word = self.state.current_word_index;

        if crossed_line {
            let consumed = next_word - self.state.line_start_word_index;
            self.state.line_start_word_index = next_word;
            if self.state.mode == Mode::Classic {
                let quota = (LINE_WRAP_QUOTA_FACTOR * consumed as f64).floor() as usize;
                self.request_more_words(quota);
            }
        }
        // the daily text is fixed, so there is nothing left to type
        if self.state.mode == Mode::Daily && next_word >= self.ledger.word_count() {
            self.finish();
        }
        KeystrokeOutcome::WordCompleted { next_word }
    }

    fn request_initial_batch(&mut self) {
        if self.config.mode == Mode::Classic {
            self.request_more_words(self.config.initial_batch);
        }
    }

    fn activate(&mut self) {
        self.state.start_time_wall_clock = Some(self.clock.wall());
        self.state.start_time_monotonic = Some(self.clock.monotonic_ms());
        self.state.last_keystroke_monotonic = None;
        self.state.remaining_ms = self.state.challenge_duration_ms;
        info!(attempt = self.attempt.0, mode = %self.state.mode, "challenge started");
        self.transition(Lifecycle::Active);
    }

    fn finish(&mut self) {
        let end_wall = self.clock.wall();
        let end_mono = self.clock.monotonic_ms();
        self.state.end_time_wall_clock = Some(end_wall);
        self.state.end_time_monotonic = Some(end_mono);
        let wpm = self.refresh_wpm();
        self.state.user_input_buffer.clear();
        self.transition(Lifecycle::Ended);

        let start_wall = self.state.start_time_wall_clock.unwrap_or(end_wall);
        let start_mono = self.state.start_time_monotonic.unwrap_or(end_mono);
        let summary = ChallengeSummary::new(
            self.state.mode,
            wpm,
            self.state.challenge_duration_ms,
            self.ledger.clone(),
            TimeWindows {
                wall_clock: Window {
                    start: start_wall,
                    end: end_wall,
                },
                monotonic: Window {
                    start: start_mono,
                    end: end_mono,
                },
            },
            self.wpm_series.clone(),
        );
        info!(
            attempt = self.attempt.0,
            wpm,
            accuracy = ?summary.accuracy(),
            "challenge ended"
        );
        self.events
            .push_back(EngineEvent::SummaryReady(Box::new(summary)));
    }

    fn refresh_wpm(&mut self) -> u32 {
        let wpm = words_per_minute(self.ledger.num_correct, self.elapsed_wall_ms());
        self.state.wpm = wpm;
        wpm
    }

    /// Elapsed wall-clock time since the effective start, up to the end if
    /// the attempt is over.
    fn elapsed_wall_ms(&self) -> i64 {
        match self.state.start_time_wall_clock {
            Some(start) => {
                let until = self.state.end_time_wall_clock.unwrap_or_else(|| self.clock.wall());
                (until - start).num_milliseconds()
            }
            None => 0,
        }
    }

    fn transition(&mut self, to: Lifecycle) {
        debug!(from = %self.state.lifecycle, %to, "lifecycle transition");
        self.state.lifecycle = to;
        self.events.push_back(EngineEvent::LifecycleChanged(to));
    }

    fn illegal(&self, operation: &'static str) -> EngineError {
        warn!(operation, lifecycle = %self.state.lifecycle, "illegal transition");
        EngineError::IllegalTransition {
            operation,
            lifecycle: self.state.lifecycle,
        }
    }
}
