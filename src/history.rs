//! ==============================================================================
//! history.rs - historical log bootstrap
//! ==============================================================================
//!
//! purpose:
//!     retrieves the device's append-only csv log (`timestamp,temperature`
//!     per line, optional header) and turns it into readings, oldest first.
//!
//! relationships:
//!     - used by: ingest.rs (initial seed and fallback refresh)
//!     - uses: reqwest (HttpHistory)
//!
//! tolerance:
//!     a malformed line is skipped, never fatal. an empty log is an empty
//!     history, not an error. only the transport can fail a load.
//!
//! ==============================================================================

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;
use url::Url;

use crate::domain::Reading;
use crate::error::{DecodeError, FetchError};

/// where the raw log text comes from
#[async_trait]
pub trait HistorySource: Send + Sync {
    async fn fetch(&self) -> Result<String, FetchError>;
}

/// fetches the log over http from the device
#[derive(Clone)]
pub struct HttpHistory {
    client: reqwest::Client,
    url: Url,
}

impl HttpHistory {
    /// every fetch, body included, is abandoned after `timeout`
    pub fn new(url: Url, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl HistorySource for HttpHistory {
    async fn fetch(&self) -> Result<String, FetchError> {
        let response = self.client.get(self.url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        Ok(response.text().await?)
    }
}

pub struct HistoryLoader<S> {
    source: S,
}

impl<S: HistorySource> HistoryLoader<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    /// fetch and parse the whole log
    pub async fn load(&self) -> Result<Vec<Reading>, FetchError> {
        let text = self.source.fetch().await?;
        let readings = parse_log(&text);
        debug!(count = readings.len(), "history loaded");
        Ok(readings)
    }
}

/// parse log text into readings, in file order
pub fn parse_log(text: &str) -> Vec<Reading> {
    let mut lines = text
        .split('\n')
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.trim().is_empty())
        .peekable();

    if lines.peek().is_some_and(|first| is_header(first)) {
        lines.next();
    }

    lines
        .filter_map(|line| match parse_line(line) {
            Ok(reading) => Some(reading),
            Err(e) => {
                debug!(error = %e, "skipping log line");
                None
            }
        })
        .collect()
}

/// the first line is a header when its second field is not a number
fn is_header(line: &str) -> bool {
    match line.split_once(',') {
        Some((_, second)) => second.trim().parse::<f64>().is_err(),
        None => true,
    }
}

fn parse_line(line: &str) -> Result<Reading, DecodeError> {
    let (timestamp, temperature) = line
        .split_once(',')
        .ok_or_else(|| DecodeError::InvalidLine(line.to_string()))?;
    Reading::parse(timestamp, temperature)
}
