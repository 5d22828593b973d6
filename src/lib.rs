// Library surface for the terminal driver and headless integration tests.
pub mod app_dirs;
pub mod challenge;
pub mod clock;
pub mod config;
pub mod daily;
pub mod error;
pub mod gateway;
pub mod history;
pub mod input;
pub mod layout;
pub mod metrics;
pub mod runtime;
pub mod session;
pub mod store;
pub mod summary;
pub mod telemetry;
pub mod util;
pub mod words;

pub use challenge::{ChallengeConfig, ChallengeEngine, Lifecycle, Mode};
pub use summary::ChallengeSummary;
