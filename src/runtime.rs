use std::cell::Cell;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossterm::event::{self, Event as CtEvent, KeyEvent};

use crate::challenge::AttemptId;
use crate::error::{PersistenceError, WordSupplyError};
use crate::gateway::SavedAt;

/// Everything the session reacts to, funnelled through one channel so a
/// single thread applies it all.
#[derive(Debug)]
pub enum SessionEvent {
    Key(KeyEvent),
    Resize,
    Tick,
    WordsArrived {
        attempt: AttemptId,
        result: Result<Vec<String>, WordSupplyError>,
    },
    SummarySaved {
        attempt: AttemptId,
        result: Result<SavedAt, PersistenceError>,
    },
}

/// Source of session events.
pub trait SessionEventSource: Send + 'static {
    /// Block for up to `timeout` waiting for an event.
    /// Returns Ok(event) if an event arrives before the timeout, or Err(Timeout) if it expires.
    fn recv_timeout(&self, timeout: Duration) -> Result<SessionEvent, RecvTimeoutError>;
}

/// Channel-backed event source. Producers (terminal reader, word fetches,
/// persistence) hold clones of the sender.
pub struct ChannelEventSource {
    rx: Receiver<SessionEvent>,
}

impl ChannelEventSource {
    pub fn new(rx: Receiver<SessionEvent>) -> Self {
        Self { rx }
    }

    pub fn channel() -> (Sender<SessionEvent>, Self) {
        let (tx, rx) = mpsc::channel();
        (tx, Self::new(rx))
    }
}

impl SessionEventSource for ChannelEventSource {
    fn recv_timeout(&self, timeout: Duration) -> Result<SessionEvent, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }
}

/// Forwards terminal key and resize events into the session channel until
/// either side goes away.
pub fn spawn_terminal_reader(tx: Sender<SessionEvent>) -> JoinHandle<()> {
    thread::spawn(move || loop {
        let forwarded = match event::read() {
            Ok(CtEvent::Key(key)) => tx.send(SessionEvent::Key(key)),
            Ok(CtEvent::Resize(_, _)) => tx.send(SessionEvent::Resize),
            Ok(_) => Ok(()),
            Err(_) => break,
        };
        if forwarded.is_err() {
            break;
        }
    })
}

/// Configurable ticker interface
pub trait Ticker: Send + Sync + 'static {
    fn interval(&self) -> Duration;
}

/// Fixed interval ticker
#[derive(Clone, Copy, Debug)]
pub struct FixedTicker {
    interval: Duration,
}

impl FixedTicker {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl Ticker for FixedTicker {
    fn interval(&self) -> Duration {
        self.interval
    }
}

/// Runner that hands out one event at a time and interleaves ticks on a
/// fixed cadence, however busy the event stream is.
pub struct Runner<E: SessionEventSource, T: Ticker> {
    event_source: E,
    ticker: T,
    next_tick: Cell<Instant>,
}

impl<E: SessionEventSource, T: Ticker> Runner<E, T> {
    pub fn new(event_source: E, ticker: T) -> Self {
        let next_tick = Cell::new(Instant::now() + ticker.interval());
        Self {
            event_source,
            ticker,
            next_tick,
        }
    }

    /// Restarts the tick cadence from now.
    pub fn rearm(&self) {
        self.next_tick.set(Instant::now() + self.ticker.interval());
    }

    /// Blocks until the next event or the next tick, whichever comes first.
    pub fn step(&self) -> SessionEvent {
        let now = Instant::now();
        let deadline = self.next_tick.get();
        if now >= deadline {
            return self.fire_tick(deadline);
        }

        match self.event_source.recv_timeout(deadline - now) {
            Ok(ev) => ev,
            Err(RecvTimeoutError::Timeout) => self.fire_tick(deadline),
            Err(RecvTimeoutError::Disconnected) => {
                thread::sleep(deadline.saturating_duration_since(Instant::now()));
                self.fire_tick(deadline)
            }
        }
    }

    fn fire_tick(&self, deadline: Instant) -> SessionEvent {
        let interval = self.ticker.interval();
        let mut next = deadline + interval;
        // skip ticks missed while blocked elsewhere instead of bursting
        let now = Instant::now();
        if next <= now {
            next = now + interval;
        }
        self.next_tick.set(next);
        SessionEvent::Tick
    }
}
