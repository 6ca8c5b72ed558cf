//! error taxonomy for the ingestion path.
//!
//! none of these are fatal: fetch errors leave history unchanged, decode
//! errors drop a single unit, connection errors feed the reconnect loop.

use thiserror::Error;

/// historical log (or refresh) retrieval failed
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("history request returned HTTP {0}")]
    Status(u16),

    #[error("history request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// a stream message or a log line could not be turned into a reading
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("payload missing field `{0}`")]
    MissingField(&'static str),

    #[error("temperature is not a finite number: {0:?}")]
    NonFiniteTemperature(String),

    #[error("empty timestamp")]
    EmptyTimestamp,

    #[error("invalid log line: {0:?}")]
    InvalidLine(String),
}

/// transport-level failure or close
#[derive(Error, Debug, Clone)]
pub enum ConnectionError {
    #[error("invalid stream url: {0}")]
    InvalidUrl(String),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("transport error: {0}")]
    Transport(String),
}
