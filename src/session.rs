use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, warn};

use crate::challenge::{
    AttemptId, ChallengeEngine, EngineEvent, KeystrokeOutcome, Lifecycle, WordsApplied,
};
use crate::clock::Clock;
use crate::error::EngineError;
use crate::gateway::{PersistenceGateway, SavedAt};
use crate::input::{InputAction, InputField};
use crate::layout::LineLayout;
use crate::runtime::SessionEvent;
use crate::summary::ChallengeSummary;
use crate::words::WordSupply;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Continue,
    Quit,
}

/// Outcome of the most recent save, for display.
#[derive(Debug, Clone, PartialEq)]
pub enum SaveStatus {
    Pending,
    Saved(SavedAt),
    Failed(String),
}

/// Sole owner of a challenge engine. Every state change happens in
/// [`handle`](Self::handle) on the owning thread; word fetches and saves run
/// on worker threads and report back through the session channel.
pub struct Session<C: Clock> {
    engine: ChallengeEngine<C>,
    layout: LineLayout,
    input: InputField,
    line_width: u16,
    words: Arc<dyn WordSupply>,
    gateway: Arc<dyn PersistenceGateway>,
    events_tx: Sender<SessionEvent>,
    last_summary: Option<(AttemptId, ChallengeSummary)>,
    save_status: Option<SaveStatus>,
    last_error: Option<String>,
}

impl<C: Clock> Session<C> {
    pub fn new(
        engine: ChallengeEngine<C>,
        words: Arc<dyn WordSupply>,
        gateway: Arc<dyn PersistenceGateway>,
        events_tx: Sender<SessionEvent>,
        line_width: u16,
    ) -> Self {
        let layout = layout_ledger(&engine, line_width);
        let mut session = Self {
            engine,
            layout,
            input: InputField::new(),
            line_width,
            words,
            gateway,
            events_tx,
            last_summary: None,
            save_status: None,
            last_error: None,
        };
        session.pump();
        session
    }

    pub fn engine(&self) -> &ChallengeEngine<C> {
        &self.engine
    }

    pub fn input(&self) -> &InputField {
        &self.input
    }

    pub fn layout(&self) -> &LineLayout {
        &self.layout
    }

    pub fn last_summary(&self) -> Option<&ChallengeSummary> {
        self.last_summary.as_ref().map(|(_, s)| s)
    }

    pub fn save_status(&self) -> Option<&SaveStatus> {
        self.save_status.as_ref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Words on the line the typist is currently on, and the position of
    /// the current word among them.
    pub fn current_line(&self) -> (Vec<String>, usize) {
        let word = self.engine.state().current_word_index;
        let Some(line) = self.layout.line_of(word) else {
            return (Vec::new(), 0);
        };
        let range = self.layout.words_on_line(line);
        let offset = word - range.start;
        let words = range
            .filter_map(|w| self.engine.ledger().word_text(w))
            .collect();
        (words, offset)
    }

    pub fn handle(&mut self, event: SessionEvent) -> Control {
        let control = match event {
            SessionEvent::Key(key) => self.on_key(key),
            SessionEvent::Resize => Control::Continue,
            SessionEvent::Tick => {
                self.engine.tick();
                Control::Continue
            }
            SessionEvent::WordsArrived { attempt, result } => {
                match result {
                    Ok(words) => {
                        let applied = self.engine.apply_words(attempt, &words);
                        if let WordsApplied::Appended { .. } = applied {
                            self.layout.push_words(&words);
                        }
                    }
                    Err(e) => self.engine.word_supply_failed(attempt, &e),
                }
                Control::Continue
            }
            SessionEvent::SummarySaved { attempt, result } => {
                self.on_saved(attempt, result.map_err(|e| e.to_string()));
                Control::Continue
            }
        };
        self.pump();
        control
    }

    pub fn begin(&mut self) -> Result<(), EngineError> {
        let result = self.engine.begin();
        self.pump();
        result
    }

    /// Starts over with a fresh attempt. Fetches and saves still in flight
    /// for the old attempt are ignored when they report back.
    pub fn reset(&mut self) -> Result<(), EngineError> {
        self.engine.reset()?;
        self.layout = layout_ledger(&self.engine, self.line_width);
        self.input = InputField::new();
        self.last_error = None;
        self.pump();
        Ok(())
    }

    /// Retries saving the last summary after a failure.
    pub fn retry_save(&mut self) {
        if let Some((attempt, summary)) = self.last_summary.clone() {
            self.persist(attempt, summary);
        }
    }

    fn on_key(&mut self, key: KeyEvent) -> Control {
        if key.kind == KeyEventKind::Release {
            return Control::Continue;
        }
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        match key.code {
            KeyCode::Esc => return Control::Quit,
            KeyCode::Char('c') if ctrl => return Control::Quit,
            KeyCode::Tab => {
                if let Err(e) = self.reset() {
                    self.last_error = Some(e.to_string());
                }
                return Control::Continue;
            }
            KeyCode::Enter => {
                if self.engine.lifecycle() == Lifecycle::NotStarted {
                    if let Err(e) = self.begin() {
                        self.last_error = Some(e.to_string());
                    }
                }
                return Control::Continue;
            }
            _ => {}
        }

        if self.engine.lifecycle() == Lifecycle::Ended {
            if key.code == KeyCode::Char('r') && matches!(self.save_status, Some(SaveStatus::Failed(_))) {
                self.retry_save();
            }
            return Control::Continue;
        }
        if self.engine.lifecycle() != Lifecycle::Active {
            return Control::Continue;
        }
        let occurred_at_ms = self.engine.clock().monotonic_ms();
        match self.input.apply(&key, occurred_at_ms) {
            Some(InputAction::Keystroke(keystroke)) => {
                let word = self.engine.state().current_word_index;
                let keystroke = keystroke.crossing_line(self.layout.crosses_line(word));
                match self.engine.on_keystroke(&keystroke) {
                    Ok(KeystrokeOutcome::Rejected(reason)) => {
                        debug!(?reason, "keystroke rejected");
                    }
                    Ok(_) => {}
                    Err(e) => self.last_error = Some(e.to_string()),
                }
            }
            Some(InputAction::Caret(caret)) => {
                if let Err(e) = self.engine.move_caret(caret) {
                    self.last_error = Some(e.to_string());
                }
            }
            None => {}
        }
        let state = self.engine.state();
        self.input.sync(&state.user_input_buffer, state.current_char_index);
        Control::Continue
    }

    /// Carries out everything the engine queued.
    fn pump(&mut self) {
        for event in self.engine.drain_events() {
            match event {
                EngineEvent::WordsRequested(request) => {
                    let words = Arc::clone(&self.words);
                    let tx = self.events_tx.clone();
                    thread::spawn(move || {
                        let result = words.request_words(request.count);
                        let _ = tx.send(SessionEvent::WordsArrived {
                            attempt: request.attempt,
                            result,
                        });
                    });
                }
                EngineEvent::WordSupplyFailed { reason, .. } => {
                    self.last_error = Some(reason);
                }
                EngineEvent::SummaryReady(summary) => {
                    let attempt = self.engine.attempt();
                    self.last_summary = Some((attempt, (*summary).clone()));
                    self.persist(attempt, *summary);
                }
                EngineEvent::LifecycleChanged(lifecycle) => {
                    debug!(%lifecycle, "session saw lifecycle change");
                }
                EngineEvent::WpmUpdated(_) => {}
            }
        }
    }

    fn persist(&mut self, attempt: AttemptId, summary: ChallengeSummary) {
        self.save_status = Some(SaveStatus::Pending);
        let gateway = Arc::clone(&self.gateway);
        let tx = self.events_tx.clone();
        thread::spawn(move || {
            let result = gateway.save_summary(&summary);
            let _ = tx.send(SessionEvent::SummarySaved { attempt, result });
        });
    }

    fn on_saved(&mut self, attempt: AttemptId, result: Result<SavedAt, String>) {
        let current = self.last_summary.as_ref().map(|(a, _)| *a);
        if current != Some(attempt) {
            return;
        }
        self.save_status = Some(match result {
            Ok(saved) => {
                info!(collection = %saved.collection, key = %saved.key, "summary persisted");
                SaveStatus::Saved(saved)
            }
            Err(reason) => {
                warn!(%reason, "summary could not be persisted");
                SaveStatus::Failed(reason)
            }
        });
    }
}

fn layout_ledger<C: Clock>(engine: &ChallengeEngine<C>, line_width: u16) -> LineLayout {
    let ledger = engine.ledger();
    let words: Vec<String> = (0..ledger.word_count())
        .filter_map(|w| ledger.word_text(w))
        .collect();
    let mut layout = LineLayout::new(line_width);
    layout.push_words(&words);
    layout
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::challenge::ChallengeConfig;
    use crate::clock::ManualClock;
    use crate::error::WordSupplyError;
    use crate::gateway::DocumentGateway;
    use crate::store::MemoryDocumentStore;
    use crate::words::WordBank;
    use assert_matches::assert_matches;
    use std::rc::Rc;
    use std::sync::mpsc::{self, Receiver};
    use std::time::Duration;

    struct Harness {
        session: Session<Rc<ManualClock>>,
        rx: Receiver<SessionEvent>,
        clock: Rc<ManualClock>,
    }

    impl Harness {
        fn classic(words: &[&str], batch: usize) -> Self {
            let clock = Rc::new(ManualClock::default());
            let config = ChallengeConfig::classic(60_000)
                .with_countdown_ticks(0)
                .with_initial_batch(batch);
            let engine = ChallengeEngine::new(config, clock.clone());
            Self::with_engine(engine, words, clock)
        }

        fn with_engine(
            engine: ChallengeEngine<Rc<ManualClock>>,
            words: &[&str],
            clock: Rc<ManualClock>,
        ) -> Self {
            let (tx, rx) = mpsc::channel();
            let bank = WordBank::from_words("test", words.iter().copied());
            let gateway = DocumentGateway::new(Arc::new(MemoryDocumentStore::new()), None, 0);
            let session = Session::new(engine, Arc::new(bank), Arc::new(gateway), tx, 20);
            Self { session, rx, clock }
        }

        /// Feeds the next worker result back into the session.
        fn deliver(&mut self) {
            let event = self
                .rx
                .recv_timeout(Duration::from_secs(5))
                .expect("worker result");
            self.session.handle(event);
        }

        fn press(&mut self, code: KeyCode) -> Control {
            self.session.handle(SessionEvent::Key(KeyEvent::new(code, KeyModifiers::NONE)))
        }

        fn type_str(&mut self, text: &str) {
            for c in text.chars() {
                self.clock.advance_ms(100);
                self.press(KeyCode::Char(c));
            }
        }
    }

    #[test]
    fn first_batch_is_fetched_and_laid_out() {
        let mut h = Harness::classic(&["cat"], 4);
        assert_eq!(h.session.engine().ledger().word_count(), 0);

        h.deliver();
        assert_eq!(h.session.engine().ledger().word_count(), 4);
        assert_eq!(h.session.layout().word_count(), 4);
        let (line, current) = h.session.current_line();
        assert_eq!(line, vec!["cat", "cat", "cat", "cat"]);
        assert_eq!(current, 0);
    }

    #[test]
    fn typing_flows_through_to_the_ledger() {
        let mut h = Harness::classic(&["cat"], 4);
        h.deliver();
        h.press(KeyCode::Enter);
        assert_eq!(h.session.engine().lifecycle(), Lifecycle::Active);

        h.type_str("cxt");
        h.press(KeyCode::Left);
        h.press(KeyCode::Left);
        assert_eq!(h.session.input().caret(), 1);
        h.press(KeyCode::Right);
        h.press(KeyCode::Backspace);
        h.type_str("a");
        assert_eq!(h.session.input().text(), "cat");
        h.press(KeyCode::End);

        let ledger = h.session.engine().ledger();
        assert_eq!(ledger.num_correct, 3);
        assert_eq!(ledger.num_errors, 0);

        h.type_str(" ");
        assert_eq!(h.session.engine().state().current_word_index, 1);
        assert_eq!(h.session.input().text(), "");
    }

    #[test]
    fn crossing_a_line_fetches_more_words() {
        // width 20 fits five "cat"s per line
        let mut h = Harness::classic(&["cat"], 8);
        h.deliver();
        h.press(KeyCode::Enter);

        for _ in 0..5 {
            h.type_str("cat ");
        }
        h.deliver();
        assert_eq!(h.session.engine().ledger().word_count(), 8 + 7);
        assert_eq!(h.session.layout().word_count(), 15);
    }

    #[test]
    fn reset_discards_in_flight_words() {
        let mut h = Harness::classic(&["cat"], 3);
        h.session.reset().unwrap();

        // the fetch for the first attempt and the one for the reset
        h.deliver();
        h.deliver();
        assert_eq!(h.session.engine().ledger().word_count(), 3);
        assert_eq!(h.session.layout().word_count(), 3);
    }

    #[test]
    fn failed_fetch_is_reported() {
        let mut h = Harness::classic(&["cat"], 3);
        let attempt = h.session.engine().attempt();
        h.session.handle(SessionEvent::WordsArrived {
            attempt,
            result: Err(WordSupplyError::Status(503)),
        });

        assert!(h.session.last_error().is_some_and(|e| e.contains("503")));
        assert_eq!(h.session.engine().ledger().word_count(), 0);
    }

    #[test]
    fn finished_challenge_is_saved() {
        let clock = Rc::new(ManualClock::default());
        let engine = ChallengeEngine::new(
            ChallengeConfig::daily().with_countdown_ticks(0),
            clock.clone(),
        );
        let mut h = Harness::with_engine(engine, &[], clock);
        h.session.engine.apply_words(AttemptId(0), &["go"]);
        h.press(KeyCode::Enter);
        h.type_str("go");

        assert_eq!(h.session.engine().lifecycle(), Lifecycle::Ended);
        assert!(h.session.last_summary().is_some());
        assert_eq!(h.session.save_status(), Some(&SaveStatus::Pending));

        h.deliver();
        assert_matches!(h.session.save_status(), Some(SaveStatus::Saved(saved)) if saved.collection == "users/local/daily");
    }

    #[test]
    fn daily_reset_after_start_is_refused() {
        let clock = Rc::new(ManualClock::default());
        let engine = ChallengeEngine::daily(&["go", "on"], clock.clone());
        let mut h = Harness::with_engine(engine, &[], clock);
        assert_eq!(h.session.layout().word_count(), 2);

        h.press(KeyCode::Enter);
        h.press(KeyCode::Tab);
        assert!(h.session.last_error().is_some());
        assert_eq!(h.session.engine().lifecycle(), Lifecycle::CountingDown);
    }

    #[test]
    fn escape_quits() {
        let mut h = Harness::classic(&["cat"], 1);
        assert_eq!(h.press(KeyCode::Esc), Control::Quit);
    }
}
