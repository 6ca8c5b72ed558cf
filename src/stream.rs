//! ==============================================================================
//! stream.rs - persistent websocket client with reconnect
//! ==============================================================================
//!
//! purpose:
//!     owns the live connection to the device's /ws endpoint, decodes each
//!     text frame into a reading and keeps the connection alive forever.
//!
//! state machine:
//!
//! ```text
//!     Disconnected --open--> Connecting --opened--> Connected
//!                                 │                     │
//!                               error            closed / error
//!                                 ▼                     │
//!                            Reconnecting <─────────────┘
//!                                 │
//!                          delay elapsed ──> Connecting
//! ```
//!
//! no retry limit. the delay comes from `ReconnectPolicy` (fixed 5s by
//! default, optionally capped exponential). a handshake that does not finish
//! within the connector's timeout counts as a failed attempt.
//!
//! relationships:
//!     - emits: StreamEvent into an unbounded channel drained by ingest.rs
//!     - uses: tokio-tungstenite (WsConnector), or any `Connector` in tests
//!
//! ==============================================================================

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use crate::domain::{ConnectionState, LinkEvent, Reading, Status};
use crate::error::{ConnectionError, DecodeError};

/// what the client hands to the ingestion loop
#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent {
    Status(Status),
    Reading(Reading),
}

// ==============================================================================
// transport seam
// ==============================================================================

/// one open connection; yields inbound text frames until the peer closes
#[async_trait]
pub trait Transport: Send {
    /// `None` once the connection is closed
    async fn recv(&mut self) -> Option<Result<String, ConnectionError>>;
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &Url) -> Result<Box<dyn Transport>, ConnectionError>;
}

/// opens tungstenite sockets; a handshake slower than `connect_timeout` fails
#[derive(Clone, Copy, Debug)]
pub struct WsConnector {
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new(Duration::from_millis(10_000))
    }
}

pub struct WsTransport {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &Url) -> Result<Box<dyn Transport>, ConnectionError> {
        let handshake = tokio_tungstenite::connect_async(url.as_str());
        let (socket, _response) = tokio::time::timeout(self.connect_timeout, handshake)
            .await
            .map_err(|_| ConnectionError::Handshake(format!("timed out after {:?}", self.connect_timeout)))?
            .map_err(|e| ConnectionError::Handshake(e.to_string()))?;
        Ok(Box::new(WsTransport { socket }))
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn recv(&mut self) -> Option<Result<String, ConnectionError>> {
        loop {
            match self.socket.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "peer closed stream");
                    return None;
                }
                // pings are answered by tungstenite; binary frames carry nothing for us
                Ok(_) => continue,
                Err(e) => return Some(Err(ConnectionError::Transport(e.to_string()))),
            }
        }
    }
}

/// socket url for the device: same host, `http` -> `ws`, `https` -> `wss`
pub fn socket_url(base: &Url, path: &str) -> Result<Url, ConnectionError> {
    let scheme = match base.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(ConnectionError::InvalidUrl(format!("unsupported scheme {other:?}"))),
    };
    let mut url = base
        .join(path)
        .map_err(|e| ConnectionError::InvalidUrl(e.to_string()))?;
    url.set_scheme(scheme)
        .map_err(|_| ConnectionError::InvalidUrl(format!("cannot use scheme {scheme} for {base}")))?;
    Ok(url)
}

// ==============================================================================
// message decoding
// ==============================================================================

#[derive(Deserialize)]
struct Payload {
    temperature: Option<TemperatureField>,
    timestamp: Option<String>,
}

/// the device sends the temperature as a string ("21.50", or "Error")
#[derive(Deserialize)]
#[serde(untagged)]
enum TemperatureField {
    Number(f64),
    Text(String),
}

pub fn decode_message(text: &str) -> Result<Reading, DecodeError> {
    let payload: Payload = serde_json::from_str(text)?;
    let timestamp = payload.timestamp.ok_or(DecodeError::MissingField("timestamp"))?;
    match payload.temperature.ok_or(DecodeError::MissingField("temperature"))? {
        TemperatureField::Number(value) => Reading::new(timestamp, value),
        TemperatureField::Text(text) => Reading::parse(&timestamp, &text),
    }
}

// ==============================================================================
// reconnect policy
// ==============================================================================

#[derive(Clone, Debug, PartialEq)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    /// 1.0 keeps the delay fixed
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    /// fixed 5s, retry forever
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(5000),
            multiplier: 1.0,
            max_delay: Duration::from_millis(5000),
        }
    }
}

impl ReconnectPolicy {
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            multiplier: 1.0,
            max_delay: delay,
        }
    }

    /// grows by `multiplier`, saturating at `max_delay`
    pub fn next_delay(&self, current: Duration) -> Duration {
        let cap = self.max_delay.max(self.initial_delay);
        Duration::try_from_secs_f64(current.as_secs_f64() * self.multiplier.max(1.0))
            .unwrap_or(cap)
            .min(cap)
    }
}

// ==============================================================================
// client
// ==============================================================================

/// the receiving side of the event channel went away
struct ConsumerGone;

pub struct StreamClient<C> {
    url: Url,
    connector: C,
    policy: ReconnectPolicy,
    state: ConnectionState,
    events: mpsc::UnboundedSender<StreamEvent>,
}

impl<C: Connector> StreamClient<C> {
    pub fn new(
        url: Url,
        connector: C,
        policy: ReconnectPolicy,
        events: mpsc::UnboundedSender<StreamEvent>,
    ) -> Self {
        Self {
            url,
            connector,
            policy,
            state: ConnectionState::Disconnected,
            events,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// open the connection and keep it open; returns only once the event
    /// consumer has been dropped, leaving the client `Disconnected`
    pub async fn run(mut self) {
        if self.drive().await.is_err() {
            self.state = ConnectionState::Disconnected;
            info!(url = %self.url, "event consumer dropped, stream client stopped");
        }
    }

    async fn drive(&mut self) -> Result<(), ConsumerGone> {
        let mut delay = self.policy.initial_delay;
        self.advance(LinkEvent::Open)?;

        loop {
            // the previous transport, if any, was dropped when its pump returned
            let cause = match self.connector.connect(&self.url).await {
                Ok(transport) => {
                    self.advance(LinkEvent::TransportOpened)?;
                    delay = self.policy.initial_delay;
                    self.pump(transport).await?
                }
                Err(e) => {
                    warn!(url = %self.url, error = %e, "stream connect failed");
                    LinkEvent::TransportError
                }
            };

            self.advance(cause)?;
            debug!(?delay, "reconnect scheduled");
            tokio::time::sleep(delay).await;
            delay = self.policy.next_delay(delay);
            self.advance(LinkEvent::RetryElapsed)?;
        }
    }

    /// deliver frames until the transport closes or fails
    async fn pump(&mut self, mut transport: Box<dyn Transport>) -> Result<LinkEvent, ConsumerGone> {
        while let Some(frame) = transport.recv().await {
            let text = match frame {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "stream transport error");
                    return Ok(LinkEvent::TransportError);
                }
            };

            match decode_message(&text) {
                Ok(reading) => self.emit(StreamEvent::Reading(reading))?,
                Err(DecodeError::MissingField(_)) => {}
                Err(e @ DecodeError::Malformed(_)) => warn!(error = %e, "dropping stream message"),
                Err(e) => debug!(error = %e, "dropping stream message"),
            }
        }
        info!("stream closed by peer");
        Ok(LinkEvent::TransportClosed)
    }

    fn advance(&mut self, event: LinkEvent) -> Result<(), ConsumerGone> {
        let Some(next) = self.state.next(event) else {
            warn!(state = ?self.state, ?event, "ignoring invalid transition");
            return Ok(());
        };
        self.state = next;

        let status = Status::entering(next, event);
        match next {
            ConnectionState::Connected => info!(url = %self.url, "stream connected"),
            ConnectionState::Reconnecting => info!(label = %status.label, "stream down, will reconnect"),
            _ => debug!(state = ?next, "stream state"),
        }
        self.emit(StreamEvent::Status(status))
    }

    fn emit(&self, event: StreamEvent) -> Result<(), ConsumerGone> {
        self.events.send(event).map_err(|_| ConsumerGone)
    }
}
