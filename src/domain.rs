//! ==============================================================================
//! domain.rs - readings and connection state
//! ==============================================================================
//!
//! purpose:
//!     the small vocabulary shared by every other module: a validated
//!     temperature reading and the four-state connection lifecycle.
//!
//! relationships:
//!     - used by: series.rs, history.rs, stream.rs, sink.rs, ingest.rs
//!
//! ==============================================================================

use chrono::{DateTime, NaiveDateTime};
use serde::Serialize;

use crate::error::DecodeError;

/// one timestamped temperature sample
///
/// the constructor is the only way in, so a stored reading always has a
/// finite temperature and a non-empty timestamp.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Reading {
    timestamp: String,
    temperature: f64,
}

impl Reading {
    pub fn new(timestamp: impl Into<String>, temperature: f64) -> Result<Self, DecodeError> {
        let timestamp = timestamp.into();
        let timestamp = timestamp.trim();
        if timestamp.is_empty() {
            return Err(DecodeError::EmptyTimestamp);
        }
        if !temperature.is_finite() {
            return Err(DecodeError::NonFiniteTemperature(temperature.to_string()));
        }
        Ok(Self {
            timestamp: timestamp.to_string(),
            temperature,
        })
    }

    /// build from the textual temperature the device writes ("21.50")
    pub fn parse(timestamp: &str, temperature: &str) -> Result<Self, DecodeError> {
        let text = temperature.trim();
        let value: f64 = text
            .parse()
            .map_err(|_| DecodeError::NonFiniteTemperature(text.to_string()))?;
        Self::new(timestamp, value)
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    /// the device clock formats as `%Y-%m-%d %H:%M:%S`; iso-8601 is accepted too
    pub fn parsed_time(&self) -> Option<NaiveDateTime> {
        parse_timestamp(&self.timestamp)
    }
}

pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    const FORMATS: [&str; 4] = [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
    ];

    let raw = raw.trim();
    FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.naive_local()))
}

// ==============================================================================
// connection lifecycle
// ==============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// things that move the connection between states
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkEvent {
    Open,
    TransportOpened,
    TransportError,
    TransportClosed,
    RetryElapsed,
    Close,
}

impl ConnectionState {
    /// transition table; `None` means the event is not valid in this state
    pub fn next(self, event: LinkEvent) -> Option<ConnectionState> {
        use ConnectionState::*;
        use LinkEvent::*;

        match (self, event) {
            (_, Close) => Some(Disconnected),
            (Disconnected, Open) => Some(Connecting),
            (Connecting, TransportOpened) => Some(Connected),
            (Connecting, TransportError) => Some(Reconnecting),
            (Connected, TransportClosed | TransportError) => Some(Reconnecting),
            (Reconnecting, RetryElapsed) => Some(Connecting),
            _ => None,
        }
    }
}

/// what the status indicator shows
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum StatusLabel {
    Connecting,
    Connected,
    Disconnected,
    Error,
}

impl StatusLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            StatusLabel::Connecting => "Connecting",
            StatusLabel::Connected => "Connected",
            StatusLabel::Disconnected => "Disconnected",
            StatusLabel::Error => "Error",
        }
    }
}

impl std::fmt::Display for StatusLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// a state transition as reported to the render sink
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Status {
    pub state: ConnectionState,
    pub label: StatusLabel,
}

impl Status {
    /// label for entering `state`; `cause` only matters for `Reconnecting`
    pub fn entering(state: ConnectionState, cause: LinkEvent) -> Self {
        let label = match state {
            ConnectionState::Connecting => StatusLabel::Connecting,
            ConnectionState::Connected => StatusLabel::Connected,
            ConnectionState::Disconnected => StatusLabel::Disconnected,
            ConnectionState::Reconnecting if cause == LinkEvent::TransportError => StatusLabel::Error,
            ConnectionState::Reconnecting => StatusLabel::Disconnected,
        };
        Self { state, label }
    }
}
