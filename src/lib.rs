//! live temperature feed from a single sensor device.
//!
//! the device keeps an append-only csv log and pushes each new reading over a
//! websocket. this crate seeds a bounded buffer from the log, follows the
//! socket (reconnecting forever), and hands every change to a `RenderSink`.

pub mod config;
pub mod domain;
pub mod error;
pub mod history;
pub mod ingest;
pub mod series;
pub mod server;
pub mod sink;
pub mod stream;

pub use domain::{ConnectionState, Reading, Status, StatusLabel};
pub use error::{ConnectionError, DecodeError, FetchError};
pub use history::{HistoryLoader, HistorySource, HttpHistory};
pub use ingest::{Ingestor, RefreshSchedule, MIN_REFRESH_INTERVAL};
pub use series::BoundedSeries;
pub use sink::{ChannelSink, DashboardView, RenderSink, SinkEvent, ViewSink};
pub use stream::{Connector, ReconnectPolicy, StreamClient, StreamEvent, Transport, WsConnector};
