use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::challenge::Mode;
use crate::daily::{date_key, DailyChallenge, DAILY_COLLECTION};
use crate::error::{PersistenceError, StoreError};
use crate::store::DocumentStore;
use crate::summary::ChallengeSummary;
use crate::words::WordBank;

/// Identity used when results are only kept on this machine.
pub const LOCAL_IDENTITY: &str = "local";

/// Where a summary ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedAt {
    pub collection: String,
    pub key: String,
}

/// Receives finished challenge summaries. Retrying a failed save is the
/// caller's decision; the summary stays valid either way.
pub trait PersistenceGateway: Send + Sync {
    fn save_summary(&self, summary: &ChallengeSummary) -> Result<SavedAt, PersistenceError>;

    /// Stored summaries of one mode, oldest first.
    fn summaries(&self, mode: Mode) -> Result<Vec<ChallengeSummary>, PersistenceError>;
}

/// Writes each summary as one document: Classic attempts keyed by start
/// timestamp, Daily attempts keyed by calendar date with at most one per
/// identity and date.
#[derive(Clone)]
pub struct DocumentGateway {
    store: Arc<dyn DocumentStore>,
    identity: String,
    utc_offset_minutes: i32,
}

impl DocumentGateway {
    pub fn new(store: Arc<dyn DocumentStore>, identity: Option<String>, utc_offset_minutes: i32) -> Self {
        Self {
            store,
            identity: identity.unwrap_or_else(|| LOCAL_IDENTITY.to_string()),
            utc_offset_minutes,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn collection(&self, mode: Mode) -> String {
        let mode = match mode {
            Mode::Classic => "classic",
            Mode::Daily => "daily",
        };
        format!("users/{}/{mode}", self.identity)
    }

    /// Today's shared text, creating it from `bank` if nobody has yet.
    pub fn daily_challenge(&self, date: &str, bank: &WordBank, word_count: usize) -> Result<DailyChallenge, PersistenceError> {
        let fresh = serde_json::to_value(DailyChallenge::generate(bank, word_count)).map_err(StoreError::from)?;
        if self.store.create(DAILY_COLLECTION, date, &fresh)? {
            info!(date, "created daily challenge");
        }
        let doc = self
            .store
            .get(DAILY_COLLECTION, date)?
            .ok_or_else(|| StoreError::Missing {
                collection: DAILY_COLLECTION.to_string(),
                key: date.to_string(),
            })?;
        Ok(serde_json::from_value(doc).map_err(StoreError::from)?)
    }

    pub fn has_daily_attempt(&self, date: &str) -> Result<bool, PersistenceError> {
        Ok(self.store.get(&self.collection(Mode::Daily), date)?.is_some())
    }

    /// Whether the document under `key` holds this very attempt, as it does
    /// when an earlier save stopped before updating the daily totals.
    fn is_stored_attempt(
        &self,
        collection: &str,
        key: &str,
        summary: &ChallengeSummary,
    ) -> Result<bool, StoreError> {
        let Some(doc) = self.store.get(collection, key)? else {
            return Ok(false);
        };
        Ok(serde_json::from_value::<ChallengeSummary>(doc)
            .map(|stored| stored.time.wall_clock == summary.time.wall_clock)
            .unwrap_or(false))
    }

    fn record_daily_aggregate(&self, date: &str, summary: &ChallengeSummary) -> Result<(), StoreError> {
        self.store.transact(DAILY_COLLECTION, date, &mut |current| {
            let mut daily = match current {
                Some(doc) => match serde_json::from_value::<DailyChallenge>(doc.clone()) {
                    Ok(daily) => daily,
                    Err(e) => {
                        warn!(date, error = %e, "daily document is malformed; aggregates not updated");
                        return None;
                    }
                },
                None => DailyChallenge::new(ledger_text(summary)),
            };
            if !daily.record_attempt_once(&self.identity, summary) {
                debug!(identity = %self.identity, date, "attempt already in the daily totals");
                return None;
            }
            serde_json::to_value(daily).ok()
        })?;
        Ok(())
    }
}

fn ledger_text(summary: &ChallengeSummary) -> String {
    let ledger = &summary.telemetry.ledger;
    (0..ledger.word_count())
        .filter_map(|w| ledger.word_text(w))
        .collect::<Vec<_>>()
        .join(" ")
}

impl PersistenceGateway for DocumentGateway {
    fn save_summary(&self, summary: &ChallengeSummary) -> Result<SavedAt, PersistenceError> {
        let collection = self.collection(summary.mode);
        let doc = serde_json::to_value(summary).map_err(StoreError::from)?;

        let key = match summary.mode {
            Mode::Classic => {
                let key = format!("{:016}", summary.time.wall_clock.start.timestamp_millis());
                self.store.set(&collection, &key, &doc)?;
                key
            }
            Mode::Daily => {
                let date = date_key(summary.time.wall_clock.start, self.utc_offset_minutes);
                if !self.store.create(&collection, &date, &doc)?
                    && !self.is_stored_attempt(&collection, &date, summary)?
                {
                    warn!(identity = %self.identity, %date, "daily attempt already recorded");
                    return Err(PersistenceError::AlreadyRecorded { date });
                }
                self.record_daily_aggregate(&date, summary)?;
                date
            }
        };

        debug!(%collection, %key, "summary saved");
        Ok(SavedAt { collection, key })
    }

    fn summaries(&self, mode: Mode) -> Result<Vec<ChallengeSummary>, PersistenceError> {
        self.store
            .list(&self.collection(mode))?
            .into_iter()
            .map(|(_, doc): (String, Value)| {
                serde_json::from_value(doc).map_err(|e| PersistenceError::Store(e.into()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::challenge::{ChallengeConfig, ChallengeEngine, EngineEvent, Keystroke};
    use crate::clock::ManualClock;
    use crate::store::{MemoryDocumentStore, Transaction};
    use assert_matches::assert_matches;
    use chrono::{TimeZone, Utc};
    use std::io;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn finished(mode: Mode, start_secs: i64) -> ChallengeSummary {
        let clock = ManualClock::new(Utc.timestamp_opt(start_secs, 0).unwrap());
        let config = match mode {
            Mode::Classic => ChallengeConfig::classic(5_000),
            Mode::Daily => ChallengeConfig::daily(),
        }
        .with_countdown_ticks(0);
        let mut engine = ChallengeEngine::new(config, clock);
        let attempt = engine.attempt();
        engine.apply_words(attempt, &["ok"]);
        engine.begin().unwrap();
        engine.on_keystroke(&Keystroke::char('o', "o", 1, 100.0)).unwrap();
        engine.on_keystroke(&Keystroke::char('k', "ok", 2, 300.0)).unwrap();
        engine.end().unwrap();
        engine
            .drain_events()
            .into_iter()
            .find_map(|e| match e {
                EngineEvent::SummaryReady(s) => Some(*s),
                _ => None,
            })
            .unwrap()
    }

    fn gateway() -> (DocumentGateway, Arc<MemoryDocumentStore>) {
        let store = Arc::new(MemoryDocumentStore::new());
        (DocumentGateway::new(store.clone(), None, 0), store)
    }

    #[test]
    fn classic_summaries_are_keyed_by_start_time() {
        let (gateway, _) = gateway();
        let saved = gateway.save_summary(&finished(Mode::Classic, 1_700_000_000)).unwrap();

        assert_eq!(saved.collection, "users/local/classic");
        assert_eq!(saved.key, "0001700000000000");

        gateway.save_summary(&finished(Mode::Classic, 1_700_000_100)).unwrap();
        let stored = gateway.summaries(Mode::Classic).unwrap();
        assert_eq!(stored.len(), 2);
        assert!(stored[0].time.wall_clock.start < stored[1].time.wall_clock.start);
    }

    #[test]
    fn second_daily_attempt_is_refused() {
        let (gateway, _) = gateway();
        let summary = finished(Mode::Daily, 1_700_000_000);

        let saved = gateway.save_summary(&summary).unwrap();
        assert_eq!(saved.key, "11-14-2023");
        assert!(gateway.has_daily_attempt("11-14-2023").unwrap());

        // a later attempt on the same day
        let later = finished(Mode::Daily, 1_700_000_060);
        assert_matches!(
            gateway.save_summary(&later),
            Err(PersistenceError::AlreadyRecorded { date }) if date == "11-14-2023"
        );
    }

    /// Fails every write to the daily totals while `fail_daily` is set.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryDocumentStore,
        fail_daily: AtomicBool,
    }

    impl DocumentStore for FlakyStore {
        fn get(&self, collection: &str, key: &str) -> Result<Option<Value>, StoreError> {
            self.inner.get(collection, key)
        }

        fn transact(
            &self,
            collection: &str,
            key: &str,
            f: &mut Transaction<'_>,
        ) -> Result<Option<Value>, StoreError> {
            if collection == DAILY_COLLECTION && self.fail_daily.load(Ordering::SeqCst) {
                return Err(io::Error::other("daily totals unavailable").into());
            }
            self.inner.transact(collection, key, f)
        }

        fn list(&self, collection: &str) -> Result<Vec<(String, Value)>, StoreError> {
            self.inner.list(collection)
        }
    }

    fn attempts(store: &FlakyStore, date: &str) -> u32 {
        let doc = store.get(DAILY_COLLECTION, date).unwrap().expect("daily document");
        serde_json::from_value::<DailyChallenge>(doc).unwrap().attempts
    }

    #[test]
    fn daily_save_is_retried_after_the_totals_fail() {
        let store = Arc::new(FlakyStore::default());
        let gateway = DocumentGateway::new(store.clone(), None, 0);
        let summary = finished(Mode::Daily, 1_700_000_000);

        store.fail_daily.store(true, Ordering::SeqCst);
        assert_matches!(gateway.save_summary(&summary), Err(PersistenceError::Store(_)));
        assert!(gateway.has_daily_attempt("11-14-2023").unwrap());
        assert!(store.get(DAILY_COLLECTION, "11-14-2023").unwrap().is_none());

        store.fail_daily.store(false, Ordering::SeqCst);
        let saved = gateway.save_summary(&summary).unwrap();
        assert_eq!(saved.key, "11-14-2023");
        assert_eq!(attempts(&store, "11-14-2023"), 1);

        // saving the same attempt again leaves the totals alone
        gateway.save_summary(&summary).unwrap();
        assert_eq!(attempts(&store, "11-14-2023"), 1);

        assert_matches!(
            gateway.save_summary(&finished(Mode::Daily, 1_700_000_060)),
            Err(PersistenceError::AlreadyRecorded { .. })
        );
        assert_eq!(attempts(&store, "11-14-2023"), 1);
    }

    #[test]
    fn daily_attempts_feed_the_shared_aggregate() {
        let store = Arc::new(MemoryDocumentStore::new());
        let alice = DocumentGateway::new(store.clone(), Some("alice".into()), 0);
        let bob = DocumentGateway::new(store.clone(), Some("bob".into()), 0);

        let bank = WordBank::from_words("t", ["ok"]);
        let daily = alice.daily_challenge("11-14-2023", &bank, 1).unwrap();
        assert_eq!(daily.text, "ok");

        let summary = finished(Mode::Daily, 1_700_000_000);
        alice.save_summary(&summary).unwrap();
        bob.save_summary(&summary).unwrap();

        let daily = bob.daily_challenge("11-14-2023", &bank, 1).unwrap();
        assert_eq!(daily.attempts, 2);
        assert_eq!(daily.sum_wpm, 2.0 * summary.wpm as f64);
    }

    #[test]
    fn daily_text_is_created_once() {
        let (gateway, _) = gateway();
        let first = gateway
            .daily_challenge("01-01-2026", &WordBank::from_words("a", ["first"]), 1)
            .unwrap();
        let second = gateway
            .daily_challenge("01-01-2026", &WordBank::from_words("b", ["second"]), 1)
            .unwrap();

        assert_eq!(first.text, "first");
        assert_eq!(second.text, "first");
    }
}
