//! Geolockr - lock to a geographic zone and get notified on enter or exit.
//!
//! # Configuration
//!
//! - `GEOLOCKR_PORT` - listen port (default 3000)
//! - `GEOLOCKR_DATABASE_URL` - SQLite URL (default `sqlite:geolockr.db?mode=rwc`)
//! - `GEOLOCKR_WEBHOOK_URL` - if set, notifications are POSTed here instead
//!   of being written to the log
//!
//! # API Endpoints
//!
//! - `POST /regions`, `GET /regions`, `DELETE /regions`, `DELETE /regions/:id`
//! - `POST /fix` - Evaluate a position fix
//! - `POST /lock` - Engage a lock mode
//! - `GET /events/recent` - Transition history
//! - `GET /health` - Health check

use std::env;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use geolockr::api::{AppState, router};
use geolockr::dispatch::{Dispatcher, LogSink, WebhookSink};
use geolockr::monitor::GeofenceMonitor;
use geolockr::storage::Storage;

/// Default port if not specified via environment variable.
const DEFAULT_PORT: u16 = 3000;

/// Default database path if not specified via environment variable.
const DEFAULT_DB_PATH: &str = "sqlite:geolockr.db?mode=rwc";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("geolockr=info".parse()?))
        .init();

    // Load configuration from environment
    let port: u16 = env::var("GEOLOCKR_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_PORT);

    let db_url = env::var("GEOLOCKR_DATABASE_URL").unwrap_or_else(|_| DEFAULT_DB_PATH.to_string());
    let webhook_url = env::var("GEOLOCKR_WEBHOOK_URL").ok();

    info!(port, db_url = %db_url, "Starting Geolockr server");

    let storage = Storage::new(&db_url).await?;
    info!("Database initialized");

    let dispatcher = match &webhook_url {
        Some(url) => {
            info!(url = %url, "Delivering notifications by webhook");
            Dispatcher::with_sink(WebhookSink::new(url))
        }
        None => Dispatcher::with_sink(LogSink),
    };
    let monitor = Arc::new(GeofenceMonitor::new(dispatcher));

    // Containment is not restored, so each region starts UNKNOWN
    monitor.restore(&storage).await?;

    let state = AppState::new(monitor, storage);
    let app = router(state).layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;

    info!(%addr, "Geolockr is listening");

    axum::serve(listener, app).await?;

    Ok(())
}
