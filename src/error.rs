use thiserror::Error;

use crate::challenge::Lifecycle;

/// Errors surfaced by the challenge engine. Expected conditions (keystrokes
/// racing ahead of a word fetch, stale fetch results) are reported through
/// outcome values instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("{operation} is not allowed while the challenge is {lifecycle}")]
    IllegalTransition {
        operation: &'static str,
        lifecycle: Lifecycle,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

#[derive(Error, Debug)]
pub enum WordSupplyError {
    #[error("word supply responded with status {0}")]
    Status(u16),

    #[error("word supply request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("word supply returned malformed data: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("word bank {0} not found")]
    UnknownBank(String),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("document {collection}/{key} does not exist")]
    Missing { collection: String, key: String },
}

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("a daily attempt for {date} is already recorded")]
    AlreadyRecorded { date: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}
