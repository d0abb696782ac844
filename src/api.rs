//! HTTP API handlers for Geolockr.
//!
//! This is the surface a UI layer drives: it registers regions when a lock
//! screen opens, clears them when it closes, and forwards position fixes
//! from the platform location service.
//!
//! - `POST /regions`, `GET /regions`, `DELETE /regions`, `DELETE /regions/:id`
//! - `POST /fix` - evaluate a position fix
//! - `POST /lock` - engage a lock mode
//! - `GET /events/recent` - transition history
//! - `GET /health` - health check with delivery counters

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post},
};
use chrono::Utc;
use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{info, instrument, warn};

use crate::error::GeofenceError;
use crate::model::{
    EventsQuery, EventsResponse, FixRequest, FixResponse, GeofenceRegion, HealthResponse,
    LockRequest,
};
use crate::monitor::GeofenceMonitor;
use crate::storage::Storage;

/// Application state shared across handlers.
///
/// Handlers that change regions persist the change first and apply it to
/// the monitor only once storage succeeded, holding `writes` for the whole
/// sequence so the database and the monitor change in the same order.
#[derive(Clone)]
pub struct AppState {
    pub monitor: Arc<GeofenceMonitor>,
    pub storage: Storage,
    writes: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(monitor: Arc<GeofenceMonitor>, storage: Storage) -> Self {
        Self {
            monitor,
            storage,
            writes: Arc::new(Mutex::new(())),
        }
    }
}

/// JSON body returned with every error status.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

fn geofence_error(e: &GeofenceError) -> ApiError {
    let status = match e {
        GeofenceError::NoLocation => StatusCode::CONFLICT,
        _ => StatusCode::UNPROCESSABLE_ENTITY,
    };
    api_error(status, e.to_string())
}

fn storage_error(e: anyhow::Error, what: &str) -> ApiError {
    warn!(error = %e, "Storage failure: {what}");
    api_error(StatusCode::INTERNAL_SERVER_ERROR, format!("failed to {what}"))
}

/// Delete the rows of regions the monitor has pruned for expiry.
///
/// Runs under the write gate so a region re-registered under an expired id
/// is never deleted. Best effort: a row that fails to delete here is
/// dropped on the next restore instead.
async fn forget_expired(state: &AppState, _writes: &MutexGuard<'_, ()>) {
    for id in state.monitor.prune_expired(Utc::now()) {
        if let Err(e) = state.storage.delete_region(&id).await {
            warn!(region_id = %id, error = %e, "Failed to delete expired region");
        }
    }
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/regions", post(post_region).get(get_regions).delete(delete_regions))
        .route("/regions/:id", delete(delete_region))
        .route("/fix", post(post_fix))
        .route("/lock", post(post_lock))
        .route("/events/recent", get(get_recent_events))
        .route("/health", get(health_check))
        .with_state(state)
}

/// POST /regions - Register or replace a region.
///
/// # Request Body
///
/// ```json
/// {
///     "id": "home",
///     "latitude": 33.9965,
///     "longitude": -81.0271,
///     "radius_meters": 100.0,
///     "watch": ["exit"],
///     "expires_at": null
/// }
/// ```
///
/// `watch` defaults to both transitions and `expires_at` to never.
///
/// # Response
///
/// `201 Created` with the region, `422` if the region is invalid.
#[instrument(skip(state, region), fields(region_id = %region.id))]
pub async fn post_region(
    State(state): State<AppState>,
    Json(region): Json<GeofenceRegion>,
) -> Result<(StatusCode, Json<GeofenceRegion>), ApiError> {
    if let Err(e) = region.validate() {
        warn!(error = %e, "Rejected region");
        return Err(geofence_error(&e));
    }

    let _writes = state.writes.lock().await;
    state
        .storage
        .save_region(&region)
        .await
        .map_err(|e| storage_error(e, "save region"))?;

    let replaced = state
        .monitor
        .register(region.clone())
        .map_err(|e| geofence_error(&e))?;
    info!(replaced = replaced.is_some(), "Region accepted");

    Ok((StatusCode::CREATED, Json(region)))
}

/// GET /regions - List the active (non-expired) regions.
pub async fn get_regions(State(state): State<AppState>) -> Json<Vec<GeofenceRegion>> {
    let regions = state.monitor.active_regions(Utc::now());
    let writes = state.writes.lock().await;
    forget_expired(&state, &writes).await;
    Json(regions)
}

/// DELETE /regions - Stop monitoring everything.
#[instrument(skip(state))]
pub async fn delete_regions(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    let _writes = state.writes.lock().await;
    state
        .storage
        .delete_all_regions()
        .await
        .map_err(|e| storage_error(e, "delete regions"))?;
    state.monitor.unregister_all();

    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /regions/:id - Stop monitoring one region.
#[instrument(skip(state))]
pub async fn delete_region(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let writes = state.writes.lock().await;
    forget_expired(&state, &writes).await;

    let stored = state
        .storage
        .delete_region(&id)
        .await
        .map_err(|e| storage_error(e, "delete region"))?;
    let removed = state.monitor.unregister(&id).is_some();

    if removed || stored {
        info!(region_id = %id, "Region unregistered");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(api_error(
            StatusCode::NOT_FOUND,
            format!("region '{id}' is not registered"),
        ))
    }
}

/// POST /fix - Evaluate a position fix.
///
/// # Request Body
///
/// ```json
/// { "latitude": 33.9965, "longitude": -81.0271, "timestamp": "2024-01-15T10:30:00Z" }
/// ```
///
/// Coordinates may be null; the fix is then discarded. `timestamp` is
/// optional and defaults to server time.
///
/// # Response
///
/// ```json
/// { "events": [{ "region_id": "home", "transition": "exit", ... }], "discarded": false }
/// ```
///
/// Detected events are dispatched to the notification sink and recorded in
/// the history on a best-effort basis.
#[instrument(skip(state, request))]
pub async fn post_fix(
    State(state): State<AppState>,
    Json(request): Json<FixRequest>,
) -> Json<FixResponse> {
    let Some(fix) = request.into_fix(Utc::now()) else {
        return Json(FixResponse {
            events: vec![],
            discarded: true,
        });
    };
    let discarded = fix.validate().is_err();

    let events = state.monitor.evaluate(&fix);

    for event in &events {
        if let Err(e) = state.storage.insert_event(event).await {
            warn!(region_id = %event.region_id, error = %e, "Failed to record transition");
        }
    }

    let writes = state.writes.lock().await;
    forget_expired(&state, &writes).await;

    Json(FixResponse { events, discarded })
}

/// POST /lock - Engage a lock mode, replacing every region.
///
/// # Request Body
///
/// ```json
/// { "mode": "current_location", "latitude": 40.0, "longitude": -74.0 }
/// ```
///
/// Coordinates are optional: a current-location lock falls back to the last
/// known location (`409` if there is none) and a destination lock to the
/// default destination. `driving` is rejected with `422`.
#[instrument(skip(state, request), fields(mode = request.mode.as_str()))]
pub async fn post_lock(
    State(state): State<AppState>,
    Json(request): Json<LockRequest>,
) -> Result<(StatusCode, Json<GeofenceRegion>), ApiError> {
    let position = request.latitude.zip(request.longitude);
    let rejected = |e: GeofenceError| {
        warn!(error = %e, "Lock rejected");
        geofence_error(&e)
    };

    let _writes = state.writes.lock().await;
    let region = state
        .monitor
        .lock_region(request.mode, position)
        .map_err(rejected)?;

    state
        .storage
        .replace_all_regions(&region)
        .await
        .map_err(|e| storage_error(e, "store lock region"))?;
    state.monitor.apply_lock(region.clone()).map_err(rejected)?;
    info!(region_id = %region.id, "Lock engaged");

    Ok((StatusCode::CREATED, Json(region)))
}

/// GET /events/recent - Transition history.
///
/// # Query Parameters
///
/// - `minutes` (optional): Lookback window in minutes (default: 60)
#[instrument(skip(state))]
pub async fn get_recent_events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<EventsResponse>, ApiError> {
    let events = state
        .storage
        .recent_events(query.minutes, Utc::now())
        .await
        .map_err(|e| storage_error(e, "load events"))?;

    info!(
        event_count = events.len(),
        lookback_minutes = query.minutes,
        "Events queried"
    );
    Ok(Json(EventsResponse {
        events,
        lookback_minutes: query.minutes,
    }))
}

/// GET /health - Health check.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let stats = state.monitor.dispatch_stats();
    Json(HealthResponse {
        status: "ok",
        active_regions: state.monitor.region_count(),
        delivered: stats.delivered,
        dropped: stats.dropped,
    })
}
