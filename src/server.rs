//! ==============================================================================
//! server.rs - dashboard http surface
//! ==============================================================================
//!
//! purpose:
//!     exposes the latest `DashboardView` published by ViewSink. the handlers
//!     only borrow the watch channel, so a slow client never touches ingestion.
//!
//! routes:
//!     GET /      minimal html summary
//!     GET /api   the full view as json (readings, labels, summary, status)
//!
//! ==============================================================================

use axum::{
    extract::State,
    response::{Html, Json},
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;

use crate::sink::DashboardView;

pub fn router(view: watch::Receiver<DashboardView>) -> Router {
    Router::new()
        .route("/", get(dashboard_handler))
        .route("/api", get(api_handler))
        .layer(CorsLayer::permissive())
        .with_state(view)
}

pub async fn serve(listener: TcpListener, view: watch::Receiver<DashboardView>) -> std::io::Result<()> {
    axum::serve(listener, router(view)).await
}

/// json api endpoint for programmatic access
async fn api_handler(State(view): State<watch::Receiver<DashboardView>>) -> Json<DashboardView> {
    let snapshot = view.borrow().clone();
    Json(snapshot)
}

async fn dashboard_handler(State(view): State<watch::Receiver<DashboardView>>) -> Html<String> {
    let view = view.borrow().clone();
    Html(render_summary(&view))
}

fn render_summary(view: &DashboardView) -> String {
    let fmt = |value: Option<f64>| value.map_or_else(|| "--".to_string(), |v| format!("{v:.2}"));

    let rows: String = view
        .readings
        .iter()
        .rev()
        .map(|r| {
            format!(
                "<tr><td>{}</td><td>{:.2}</td></tr>",
                html_escape(r.timestamp()),
                r.temperature()
            )
        })
        .collect();

    format!(
        r#"<!doctype html>
<html>
<head><title>temperature</title><meta http-equiv="refresh" content="5"></head>
<body style="font-family: system-ui; padding: 2rem;">
    <p>Stream: <strong>{status}</strong></p>
    <p>Current: {current} °C &middot; Average: {average} °C &middot; Last update: {last}</p>
    <table>{rows}</table>
</body>
</html>"#,
        status = view.status,
        current = fmt(view.current),
        average = fmt(view.average),
        last = html_escape(view.last_update.as_deref().unwrap_or("--")),
        rows = rows,
    )
}

/// escape html special characters to prevent xss
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}
