//! ==============================================================================
//! sink.rs - the render-side contract
//! ==============================================================================
//!
//! purpose:
//!     everything the ingestion core tells the outside world goes through
//!     `RenderSink`. calls are fire-and-forget: implementations must return
//!     immediately and never hold up ingestion.
//!
//! implementations:
//!     - ChannelSink: forwards every call as a `SinkEvent` (tests, adapters)
//!     - ViewSink: keeps a chart-ready `DashboardView` behind a watch channel,
//!       read by the web server in server.rs
//!
//! ==============================================================================

use std::collections::VecDeque;

use serde::Serialize;
use tokio::sync::{mpsc, watch};

use crate::domain::{parse_timestamp, ConnectionState, Reading, Status, StatusLabel};

pub trait RenderSink: Send {
    /// once, after the initial history load, with the whole seeded buffer
    fn on_seed(&mut self, readings: &[Reading]);

    /// once per live or refresh-driven reading; `evicted` is what the buffer
    /// dropped to make room, so parallel views can drop it too
    fn on_append(&mut self, reading: &Reading, evicted: Option<&Reading>);

    /// on every connection state transition
    fn on_status(&mut self, status: Status);
}

#[derive(Clone, Debug, PartialEq)]
pub enum SinkEvent {
    Seed(Vec<Reading>),
    Append {
        reading: Reading,
        evicted: Option<Reading>,
    },
    Status(Status),
}

/// forwards sink calls over an unbounded channel; a closed receiver is ignored
#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<SinkEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SinkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl RenderSink for ChannelSink {
    fn on_seed(&mut self, readings: &[Reading]) {
        let _ = self.tx.send(SinkEvent::Seed(readings.to_vec()));
    }

    fn on_append(&mut self, reading: &Reading, evicted: Option<&Reading>) {
        let _ = self.tx.send(SinkEvent::Append {
            reading: reading.clone(),
            evicted: evicted.cloned(),
        });
    }

    fn on_status(&mut self, status: Status) {
        let _ = self.tx.send(SinkEvent::Status(status));
    }
}

// ==============================================================================
// dashboard view
// ==============================================================================

/// what a chart plus the summary fields need to draw
#[derive(Clone, Debug, Serialize)]
pub struct DashboardView {
    pub state: ConnectionState,
    pub status: StatusLabel,
    pub readings: VecDeque<Reading>,
    /// x-axis labels, index-aligned with `readings`
    pub labels: VecDeque<String>,
    pub current: Option<f64>,
    pub average: Option<f64>,
    pub last_update: Option<String>,
}

impl Default for DashboardView {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            status: StatusLabel::Disconnected,
            readings: VecDeque::new(),
            labels: VecDeque::new(),
            current: None,
            average: None,
            last_update: None,
        }
    }
}

impl DashboardView {
    fn push(&mut self, reading: &Reading) {
        self.labels.push_back(chart_label(reading));
        self.readings.push_back(reading.clone());
    }

    fn refresh_summary(&mut self) {
        let latest = self.readings.back();
        self.current = latest.map(Reading::temperature);
        self.last_update = latest.map(|r| r.timestamp().to_string());
        self.average = if self.readings.is_empty() {
            None
        } else {
            let sum: f64 = self.readings.iter().map(Reading::temperature).sum();
            Some(sum / self.readings.len() as f64)
        };
    }
}

/// time of day for the x-axis, or the raw timestamp if it does not parse
pub fn chart_label(reading: &Reading) -> String {
    match parse_timestamp(reading.timestamp()) {
        Some(time) => time.format("%H:%M:%S").to_string(),
        None => reading.timestamp().to_string(),
    }
}

pub struct ViewSink {
    tx: watch::Sender<DashboardView>,
}

impl ViewSink {
    pub fn new() -> (Self, watch::Receiver<DashboardView>) {
        let (tx, rx) = watch::channel(DashboardView::default());
        (Self { tx }, rx)
    }
}

impl RenderSink for ViewSink {
    fn on_seed(&mut self, readings: &[Reading]) {
        self.tx.send_modify(|view| {
            view.readings.clear();
            view.labels.clear();
            for reading in readings {
                view.push(reading);
            }
            view.refresh_summary();
        });
    }

    fn on_append(&mut self, reading: &Reading, evicted: Option<&Reading>) {
        self.tx.send_modify(|view| {
            if evicted.is_some() {
                view.readings.pop_front();
                view.labels.pop_front();
            }
            view.push(reading);
            view.refresh_summary();
        });
    }

    fn on_status(&mut self, status: Status) {
        self.tx.send_modify(|view| {
            view.state = status.state;
            view.status = status.label;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::LinkEvent;

    fn reading(ts: &str, t: f64) -> Reading {
        Reading::new(ts, t).unwrap()
    }

    #[test]
    fn view_tracks_evictions_and_summary() {
        let (mut sink, rx) = ViewSink::new();
        sink.on_seed(&[
            reading("2024-01-01 10:00:00", 20.0),
            reading("2024-01-01 10:00:03", 22.0),
        ]);

        let first = reading("2024-01-01 10:00:00", 20.0);
        sink.on_append(&reading("2024-01-01T10:00:06", 24.0), Some(&first));

        let view = rx.borrow().clone();
        assert_eq!(view.readings.len(), 2);
        assert_eq!(view.labels, vec!["10:00:03".to_string(), "10:00:06".to_string()]);
        assert_eq!(view.current, Some(24.0));
        assert_eq!(view.average, Some(23.0));
        assert_eq!(view.last_update.as_deref(), Some("2024-01-01T10:00:06"));
    }

    #[test]
    fn view_reflects_status() {
        let (mut sink, rx) = ViewSink::new();
        assert_eq!(rx.borrow().status, StatusLabel::Disconnected);
        assert_eq!(rx.borrow().average, None);

        sink.on_status(Status::entering(ConnectionState::Connected, LinkEvent::TransportOpened));
        assert_eq!(rx.borrow().status, StatusLabel::Connected);
        assert_eq!(rx.borrow().state, ConnectionState::Connected);
    }

    #[test]
    fn unparseable_timestamp_is_its_own_label() {
        assert_eq!(chart_label(&reading("Time not available", 1.0)), "Time not available");
    }

    #[test]
    fn channel_sink_ignores_closed_receiver() {
        let (mut sink, rx) = ChannelSink::new();
        drop(rx);
        sink.on_append(&reading("a", 1.0), None);
    }
}
