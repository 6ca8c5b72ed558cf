//! ==============================================================================
//! main.rs - thermo-stream entry point
//! ==============================================================================
//!
//! purpose:
//!     wires the ingestion core to a real device and a small web dashboard.
//!
//! responsibilities:
//!     - load configuration (config/thermo.toml or defaults)
//!     - install the tracing subscriber
//!     - seed the buffer from the device's csv log
//!     - follow the device websocket, reconnecting forever
//!     - serve the dashboard view on the configured address
//!
//! architecture:
//!
//! ```text
//!     ┌──────────────────────────────────────────────────────────────┐
//!     │                      thermo-stream host                      │
//!     │  ┌──────────────┐  events   ┌──────────────┐   ┌──────────┐  │
//!     │  │ StreamClient │ ────────> │   Ingestor   │──>│ ViewSink │  │
//!     │  │  (ws + retry)│           │ (series, 30s │   └────┬─────┘  │
//!     │  └──────┬───────┘           │   refresh)   │        │ watch  │
//!     │         │                   └──────┬───────┘   ┌────┴─────┐  │
//!     │         │                          │           │  axum    │  │
//!     │         │                          │           │ / , /api │  │
//!     └─────────┼──────────────────────────┼───────────┴──────────┴──┘
//!               │ /ws                      │ /temperature_log.csv
//!               ▼                          ▼
//!        ┌──────────────────────────────────────────┐
//!        │              sensor device               │
//!        └──────────────────────────────────────────┘
//! ```
//!
//! ==============================================================================

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use thermo_stream::config::AppConfig;
use thermo_stream::{
    server, BoundedSeries, HistoryLoader, HttpHistory, Ingestor, StreamClient, ViewSink, WsConnector,
};

#[tokio::main]
async fn main() -> Result<()> {
    // startup banner
    println!("===========================================================");
    println!("  thermo-stream - live temperature dashboard");
    println!("===========================================================");

    // step 1: load configuration
    let config = AppConfig::load_or_default();
    config.print_summary();

    // step 2: logging; RUST_LOG wins over the config file
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .context("invalid logging.level")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let history_url = config.history_url()?;
    let stream_url = config.stream_url()?;

    // step 3: dashboard view and web server
    let (sink, view) = ViewSink::new();
    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind))?;
    tracing::info!("dashboard live at http://{}", config.server.bind);
    tokio::spawn(async move {
        if let Err(e) = server::serve(listener, view).await {
            tracing::error!(error = %e, "web server stopped");
        }
    });

    // step 4: seed from history before the stream opens
    tracing::info!(url = %history_url, "loading history");
    let mut ingestor = Ingestor::new(
        HistoryLoader::new(HttpHistory::new(history_url, config.request_timeout())?),
        BoundedSeries::new(config.series.capacity),
        sink,
        config.refresh_schedule(),
    );
    ingestor.bootstrap().await;

    // step 5: live stream
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let connector = WsConnector::new(config.connect_timeout());
    let client = StreamClient::new(stream_url, connector, config.reconnect_policy(), events_tx);
    tokio::spawn(client.run());

    // step 6: ingestion loop; runs for the life of the process
    ingestor.run(events_rx).await;
    Ok(())
}
