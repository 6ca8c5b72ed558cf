//! ==============================================================================
//! ingest.rs - the single ingestion loop
//! ==============================================================================
//!
//! purpose:
//!     owns the BoundedSeries and is the only code that mutates it. history
//!     seed, live stream readings and fallback refreshes are all applied here,
//!     one at a time, so nothing else needs a lock.
//!
//! control flow:
//!
//! ```text
//!     bootstrap (once)        history -> series -> sink.on_seed
//!     stream event            reading -> series -> sink.on_append
//!                             status  -> sink.on_status
//!     refresh tick (stale)    start history fetch in the background
//!     refresh fetch done      history suffix -> series -> sink.on_append
//! ```
//!
//! readings reach the sink in exactly the order the series received them.
//! a refresh fetch in flight never holds up stream events.
//!
//! relationships:
//!     - uses: history.rs, series.rs, sink.rs
//!     - consumes: StreamEvent from stream.rs
//!
//! ==============================================================================

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::domain::Reading;
use crate::error::FetchError;
use crate::history::{HistoryLoader, HistorySource};
use crate::series::BoundedSeries;
use crate::sink::RenderSink;
use crate::stream::StreamEvent;

/// shortest tick `run` will use; smaller intervals are raised to this
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_millis(1000);

#[derive(Clone, Debug, PartialEq)]
pub struct RefreshSchedule {
    /// clamped to `MIN_REFRESH_INTERVAL`
    pub interval: Duration,
    /// a refresh only runs when no live reading arrived for this long
    pub stale_after: Duration,
}

impl Default for RefreshSchedule {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(30_000),
            stale_after: Duration::from_millis(30_000),
        }
    }
}

type PendingFetch = Pin<Box<dyn Future<Output = Result<Vec<Reading>, FetchError>> + Send>>;

pub struct Ingestor<S, K> {
    loader: Arc<HistoryLoader<S>>,
    series: BoundedSeries,
    sink: K,
    schedule: RefreshSchedule,
    seeded: bool,
    last_live: Option<Instant>,
}

impl<S: HistorySource + 'static, K: RenderSink> Ingestor<S, K> {
    pub fn new(loader: HistoryLoader<S>, series: BoundedSeries, sink: K, schedule: RefreshSchedule) -> Self {
        Self {
            loader: Arc::new(loader),
            series,
            sink,
            schedule,
            seeded: false,
            last_live: None,
        }
    }

    pub fn series(&self) -> &BoundedSeries {
        &self.series
    }

    /// seed the buffer from history; only the first call does anything
    pub async fn bootstrap(&mut self) -> bool {
        if self.seeded {
            debug!("history already seeded");
            return false;
        }
        self.seeded = true;

        let history = match self.loader.load().await {
            Ok(history) => history,
            Err(e) => {
                warn!(error = %e, "no history available");
                Vec::new()
            }
        };

        let loaded = history.len();
        for reading in keep_latest(history, self.series.capacity()) {
            self.series.push(reading);
        }
        info!(loaded, kept = self.series.len(), "seeded from history");

        self.sink.on_seed(&self.series.all());
        true
    }

    pub fn handle(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Status(status) => self.sink.on_status(status),
            StreamEvent::Reading(reading) => {
                self.last_live = Some(Instant::now());
                self.ingest(reading);
            }
        }
    }

    /// reload history and append whatever the buffer has not seen yet;
    /// returns how many readings were appended
    pub async fn refresh(&mut self) -> usize {
        let result = self.loader.load().await;
        self.apply_refresh(result)
    }

    fn apply_refresh(&mut self, result: Result<Vec<Reading>, FetchError>) -> usize {
        let log = match result {
            Ok(log) => log,
            Err(e) => {
                warn!(error = %e, "history refresh failed, keeping current data");
                return 0;
            }
        };

        let fresh = keep_latest(unseen_suffix(&self.series, log), self.series.capacity());
        let appended = fresh.into_iter().filter(|r| self.ingest(r.clone())).count();
        if appended > 0 {
            info!(appended, "history refresh caught up");
        }
        appended
    }

    fn is_stale(&self, now: Instant) -> bool {
        self.last_live
            .map_or(true, |at| now.duration_since(at) >= self.schedule.stale_after)
    }

    /// push one reading and tell the sink; duplicates of buffered readings are dropped
    fn ingest(&mut self, reading: Reading) -> bool {
        if self.series.contains(&reading) {
            debug!(timestamp = reading.timestamp(), "duplicate reading dropped");
            return false;
        }
        debug!(timestamp = reading.timestamp(), temperature = reading.temperature(), "reading");
        let evicted = self.series.push(reading.clone());
        self.sink.on_append(&reading, evicted.as_ref());
        true
    }

    /// seed, then apply stream events and refresh ticks until the stream side hangs up.
    /// at most one refresh fetch is in flight; stream events keep flowing while it runs
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<StreamEvent>) -> Self {
        self.bootstrap().await;

        let period = self.schedule.interval.max(MIN_REFRESH_INTERVAL);
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut fetch: PendingFetch = Box::pin(std::future::pending());
        let mut fetching = false;

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.handle(event),
                    None => {
                        info!("stream events closed, ingestion stopped");
                        break;
                    }
                },
                result = &mut fetch, if fetching => {
                    fetching = false;
                    self.apply_refresh(result);
                }
                _ = ticker.tick() => {
                    if fetching {
                        debug!("previous refresh still running, skipping tick");
                    } else if self.is_stale(Instant::now()) {
                        let loader = Arc::clone(&self.loader);
                        fetch = Box::pin(async move { loader.load().await });
                        fetching = true;
                    }
                }
            }
        }
        self
    }
}

fn keep_latest(mut readings: Vec<Reading>, n: usize) -> Vec<Reading> {
    if readings.len() > n {
        readings.drain(..readings.len() - n);
    }
    readings
}

/// the part of `log` that comes after the newest buffered reading
fn unseen_suffix(series: &BoundedSeries, mut log: Vec<Reading>) -> Vec<Reading> {
    let Some(latest) = series.latest() else {
        return log;
    };
    if let Some(pos) = log.iter().rposition(|r| r == latest) {
        return log.split_off(pos + 1);
    }

    // not in the log verbatim; fall back to comparing device time
    match latest.parsed_time() {
        Some(cutoff) => log
            .into_iter()
            .filter(|r| r.parsed_time().is_some_and(|t| t > cutoff))
            .collect(),
        None => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ConnectionState, LinkEvent, Status};
    use crate::error::FetchError;
    use crate::sink::{ChannelSink, SinkEvent};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct SharedLog {
        text: Arc<Mutex<Option<String>>>,
        fetches: Arc<AtomicUsize>,
        stalled: Arc<AtomicBool>,
    }

    impl SharedLog {
        fn with(text: &str) -> Self {
            let log = Self::default();
            log.set(text);
            log
        }

        fn set(&self, text: &str) {
            *self.text.lock().unwrap() = Some(text.to_string());
        }

        fn fail(&self) {
            *self.text.lock().unwrap() = None;
        }

        /// later fetches never complete
        fn stall(&self) {
            self.stalled.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl HistorySource for SharedLog {
        async fn fetch(&self) -> Result<String, FetchError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.stalled.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            self.text.lock().unwrap().clone().ok_or(FetchError::Status(503))
        }
    }

    fn reading(ts: &str, t: f64) -> Reading {
        Reading::new(ts, t).unwrap()
    }

    fn log_of(n: usize) -> String {
        let mut text = String::from("timestamp,temperature\n");
        for i in 0..n {
            text.push_str(&format!("2024-01-01 00:00:{:02},{}.0\n", i, 20 + i));
        }
        text
    }

    type Harness = (Ingestor<SharedLog, ChannelSink>, mpsc::UnboundedReceiver<SinkEvent>);

    fn ingestor(log: &SharedLog, capacity: usize) -> Harness {
        scheduled(log, capacity, RefreshSchedule::default())
    }

    fn scheduled(log: &SharedLog, capacity: usize, schedule: RefreshSchedule) -> Harness {
        let (sink, rx) = ChannelSink::new();
        let ingestor = Ingestor::new(HistoryLoader::new(log.clone()), BoundedSeries::new(capacity), sink, schedule);
        (ingestor, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<SinkEvent>) -> Vec<SinkEvent> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    #[tokio::test]
    async fn bootstrap_keeps_most_recent_and_seeds_once() {
        let log = SharedLog::with(&log_of(8));
        let (mut ingestor, mut rx) = ingestor(&log, 5);

        assert!(ingestor.bootstrap().await);
        assert!(!ingestor.bootstrap().await);
        assert_eq!(log.fetches.load(Ordering::SeqCst), 1);

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        let SinkEvent::Seed(seeded) = &events[0] else {
            panic!("expected seed, got {events:?}");
        };
        let temps: Vec<f64> = seeded.iter().map(Reading::temperature).collect();
        assert_eq!(temps, vec![23.0, 24.0, 25.0, 26.0, 27.0]);
        assert_eq!(ingestor.series().all(), *seeded);
    }

    #[tokio::test]
    async fn failed_bootstrap_seeds_empty() {
        let log = SharedLog::default();
        let (mut ingestor, mut rx) = ingestor(&log, 5);

        assert!(ingestor.bootstrap().await);
        assert_eq!(drain(&mut rx), vec![SinkEvent::Seed(Vec::new())]);
        assert!(ingestor.series().is_empty());
    }

    #[tokio::test]
    async fn live_readings_append_with_eviction_in_order() {
        let log = SharedLog::with(&log_of(3));
        let (mut ingestor, mut rx) = ingestor(&log, 3);
        ingestor.bootstrap().await;
        drain(&mut rx);

        let status = Status::entering(ConnectionState::Connected, LinkEvent::TransportOpened);
        ingestor.handle(StreamEvent::Status(status));
        ingestor.handle(StreamEvent::Reading(reading("2024-01-01 00:00:03", 30.0)));
        ingestor.handle(StreamEvent::Reading(reading("2024-01-01 00:00:04", 31.0)));

        assert_eq!(
            drain(&mut rx),
            vec![
                SinkEvent::Status(status),
                SinkEvent::Append {
                    reading: reading("2024-01-01 00:00:03", 30.0),
                    evicted: Some(reading("2024-01-01 00:00:00", 20.0)),
                },
                SinkEvent::Append {
                    reading: reading("2024-01-01 00:00:04", 31.0),
                    evicted: Some(reading("2024-01-01 00:00:01", 21.0)),
                },
            ]
        );
        assert_eq!(ingestor.series().latest().unwrap().temperature(), 31.0);
    }

    #[tokio::test]
    async fn live_reading_already_in_history_is_stored_once() {
        let log = SharedLog::with(&log_of(3));
        let (mut ingestor, mut rx) = ingestor(&log, 10);
        ingestor.bootstrap().await;
        drain(&mut rx);

        ingestor.handle(StreamEvent::Reading(reading("2024-01-01 00:00:02", 22.0)));
        assert!(drain(&mut rx).is_empty());
        assert_eq!(ingestor.series().len(), 3);
    }

    #[tokio::test]
    async fn refresh_appends_only_unseen_suffix() {
        let log = SharedLog::with(&log_of(3));
        let (mut ingestor, mut rx) = ingestor(&log, 10);
        ingestor.bootstrap().await;
        drain(&mut rx);

        log.set(&log_of(5));
        assert_eq!(ingestor.refresh().await, 2);
        assert_eq!(ingestor.refresh().await, 0);

        let appended: Vec<f64> = drain(&mut rx)
            .into_iter()
            .map(|e| match e {
                SinkEvent::Append { reading, .. } => reading.temperature(),
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(appended, vec![23.0, 24.0]);
    }

    #[tokio::test]
    async fn refresh_falls_back_to_device_time() {
        let log = SharedLog::with("");
        let (mut ingestor, _rx) = ingestor(&log, 10);
        ingestor.bootstrap().await;
        // a live reading that never made it into the log
        ingestor.handle(StreamEvent::Reading(reading("2024-01-01 00:00:01", 99.0)));

        log.set(&log_of(4));
        assert_eq!(ingestor.refresh().await, 2);
        let temps: Vec<f64> = ingestor.series().iter().map(Reading::temperature).collect();
        assert_eq!(temps, vec![99.0, 22.0, 23.0]);
    }

    #[tokio::test]
    async fn refresh_failure_leaves_series_alone() {
        let log = SharedLog::with(&log_of(3));
        let (mut ingestor, mut rx) = ingestor(&log, 10);
        ingestor.bootstrap().await;
        drain(&mut rx);

        log.fail();
        assert_eq!(ingestor.refresh().await, 0);
        assert_eq!(ingestor.series().len(), 3);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn run_refreshes_only_when_stream_is_stale() {
        let log = SharedLog::with(&log_of(2));
        let (ingestor, mut sink_rx) = ingestor(&log, 10);
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(ingestor.run(rx));

        tokio::time::sleep(Duration::from_secs(29)).await;
        tx.send(StreamEvent::Reading(reading("2024-01-01 00:00:02", 22.0))).unwrap();

        // tick at 30s: last live reading 1s old, no refresh
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(log.fetches.load(Ordering::SeqCst), 1);

        // tick at 60s: 31s without a live reading
        log.set(&log_of(4));
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(log.fetches.load(Ordering::SeqCst), 2);

        drop(tx);
        let ingestor = task.await.unwrap();
        let temps: Vec<f64> = ingestor.series().iter().map(Reading::temperature).collect();
        assert_eq!(temps, vec![20.0, 21.0, 22.0, 23.0]);

        let events = drain(&mut sink_rx);
        assert!(matches!(events[0], SinkEvent::Seed(_)));
        assert_eq!(events.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_refresh_does_not_hold_up_live_readings() {
        let log = SharedLog::with(&log_of(2));
        let (ingestor, mut sink_rx) = ingestor(&log, 10);
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(ingestor.run(rx));

        tokio::time::sleep(Duration::from_secs(1)).await;
        log.stall();

        // tick at 30s starts a refresh that never finishes; later ticks must not pile up
        tokio::time::sleep(Duration::from_secs(100)).await;
        assert_eq!(log.fetches.load(Ordering::SeqCst), 2);

        tx.send(StreamEvent::Reading(reading("2024-01-01 00:00:05", 25.0))).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let events = drain(&mut sink_rx);
        assert!(matches!(events[0], SinkEvent::Seed(_)));
        assert_eq!(
            events[1..].to_vec(),
            vec![SinkEvent::Append {
                reading: reading("2024-01-01 00:00:05", 25.0),
                evicted: None,
            }]
        );

        drop(tx);
        let ingestor = task.await.unwrap();
        assert_eq!(ingestor.series().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_is_raised_to_minimum() {
        let log = SharedLog::with(&log_of(2));
        let schedule = RefreshSchedule {
            interval: Duration::ZERO,
            stale_after: Duration::ZERO,
        };
        let (ingestor, _sink_rx) = scheduled(&log, 10, schedule);
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(ingestor.run(rx));

        tokio::time::sleep(MIN_REFRESH_INTERVAL * 5 + Duration::from_millis(500)).await;
        // bootstrap plus one fetch per tick
        assert_eq!(log.fetches.load(Ordering::SeqCst), 6);

        drop(tx);
        task.await.unwrap();
    }
}
