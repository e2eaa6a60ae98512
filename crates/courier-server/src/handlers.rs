//! REST surface for Courier.
//!
//! Thin glue over `courier-core`: every endpoint resolves an application by
//! credential, verifies the request signature, and delegates to the core
//! engine. Routing mirrors the Pusher HTTP API:
//!
//! - `POST /apps/{app_id}/events` — trigger an event on one or more channels
//! - `GET  /apps/{app_id}/channels` — list occupied channels
//! - `GET  /apps/{app_id}/channels/{channel}` — single channel info
//! - `GET  /apps/{app_id}/channels/{channel}/users` — presence members

use crate::config::Config;
use crate::metrics;
use crate::ws;
use anyhow::Result;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use courier_core::{auth, dispatch, App, AppStore, ChannelKind, Error, MemoryAppStore};
use serde::Deserialize;
use serde_json::{json, value::RawValue, Value};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Shared server state.
pub struct AppState {
    /// Registered applications.
    pub store: MemoryAppStore,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state, loading applications from the configuration.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let store = MemoryAppStore::new();
        for app in &config.apps {
            info!(app = %app.app_id, enabled = app.enabled, "Registered application");
            store.insert(App::new(&app.app_id, &app.secret, app.enabled));
        }
        Self { store, config }
    }
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            warn!("Failed to start metrics server: {}", e);
        }
    }

    let app = router(state);

    let addr = config.bind_addr();
    let listener = TcpListener::bind(addr).await?;

    info!("Courier server listening on {}", addr);
    info!("WebSocket endpoint: ws://{}/app/{{app_id}}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the request router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/app/:app_id", get(ws::ws_handler))
        .route("/apps/:app_id/events", post(post_events))
        .route("/apps/:app_id/channels", get(get_channels))
        .route("/apps/:app_id/channels/:channel_name", get(get_channel))
        .route(
            "/apps/:app_id/channels/:channel_name/users",
            get(get_channel_users),
        )
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// API error response carrying the core taxonomy to the right status code.
#[derive(Debug)]
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::NotAuthorized => StatusCode::UNAUTHORIZED,
            Error::ApplicationDisabled => StatusCode::FORBIDDEN,
            Error::EventDataTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Error::AppNotFound(_)
            | Error::ChannelNotFound(_)
            | Error::EmptyChannelName
            | Error::UserCountRestricted
            | Error::PresenceOnly
            | Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        };
        metrics::record_error("api");
        (status, self.0.to_string()).into_response()
    }
}

/// Resolve and authorize an application for a signed REST request.
///
/// The signature covers the uppercase method, the raw path and the
/// canonical query string; the disabled check happens after the signature
/// is verified, mirroring the middleware chain of the upstream API.
fn authorize(
    state: &AppState,
    method: &str,
    path: &str,
    params: &[(String, String)],
    app_id: &str,
) -> Result<Arc<App>, ApiError> {
    let app = state
        .store
        .app_by_id(app_id)
        .map_err(|_| Error::NotAuthorized)?;

    let signature = params
        .iter()
        .find(|(key, _)| key == "auth_signature")
        .map(|(_, value)| value.as_str())
        .ok_or(Error::NotAuthorized)?;

    if !auth::verify_request(signature, method, path, params, app.secret()) {
        return Err(Error::NotAuthorized.into());
    }

    if !app.is_enabled() {
        return Err(Error::ApplicationDisabled.into());
    }

    Ok(app)
}

/// Requested `info` attributes, parsed from the comma-separated list.
#[derive(Debug, Default, PartialEq, Eq)]
struct InfoAttributes {
    user_count: bool,
    subscription_count: bool,
}

fn parse_attributes(info: Option<&str>) -> InfoAttributes {
    let mut attributes = InfoAttributes::default();
    for attribute in info.unwrap_or_default().split(',') {
        match attribute.trim() {
            "user_count" => attributes.user_count = true,
            "subscription_count" => attributes.subscription_count = true,
            _ => {}
        }
    }
    attributes
}

fn param<'a>(params: &'a [(String, String)], name: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

/// Trigger request body.
///
/// `data` stays raw so the size limit applies to the bytes as received.
/// The singular `channel` is a convenience alias, read only when
/// `channels` is absent.
#[derive(Debug, Deserialize)]
struct TriggerEvent {
    name: String,
    data: Box<RawValue>,
    #[serde(default)]
    channels: Vec<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    socket_id: Option<String>,
}

/// `POST /apps/{app_id}/events`
///
/// Publishes the event to every named channel. Per-channel dispatch
/// failures are logged and do not fail the request; the response body is
/// an empty JSON hash.
async fn post_events(
    State(state): State<Arc<AppState>>,
    Path(app_id): Path<String>,
    Query(params): Query<Vec<(String, String)>>,
    Json(input): Json<TriggerEvent>,
) -> Result<Json<Value>, ApiError> {
    let path = format!("/apps/{app_id}/events");
    let app = authorize(&state, "POST", &path, &params, &app_id)?;

    // The event data should not be larger than 10 kB.
    if input.data.get().len() > dispatch::MAX_EVENT_BYTES {
        return Err(Error::EventDataTooLarge(input.data.get().len()).into());
    }

    let data: Value = serde_json::from_str(input.data.get())
        .map_err(|e| Error::InvalidRequest(e.to_string()))?;

    let mut channels = input.channels;
    if channels.is_empty() {
        channels.extend(input.channel);
    }

    for channel in &channels {
        match app.publish(channel, &input.name, data.clone(), input.socket_id.as_deref()) {
            Ok(delivery) => metrics::record_delivery_failures(delivery.failed),
            // One channel failing must not prevent attempts on the rest.
            Err(e) => {
                warn!(app = %app_id, channel = %channel, error = %e, "Publish failed");
                metrics::record_error("publish");
            }
        }
    }

    Ok(Json(json!({})))
}

/// `GET /apps/{app_id}/channels`
///
/// Returns a hash of occupied channels, optionally filtered by prefix.
/// `user_count` may only be requested when the filter is exactly
/// `presence-`.
async fn get_channels(
    State(state): State<Arc<AppState>>,
    Path(app_id): Path<String>,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Json<Value>, ApiError> {
    let path = format!("/apps/{app_id}/channels");
    let app = authorize(&state, "GET", &path, &params, &app_id)?;

    let filter = param(&params, "filter_by_prefix");
    let attributes = parse_attributes(param(&params, "info"));

    if attributes.user_count && filter != Some("presence-") {
        return Err(Error::UserCountRestricted.into());
    }

    let infos = match filter {
        Some("presence-") => app.channels_of_kind(ChannelKind::Presence),
        Some("private-") => app.channels_of_kind(ChannelKind::Private),
        Some("public-") => app.channels_of_kind(ChannelKind::Public),
        _ => app.channels(),
    };

    let mut channels = serde_json::Map::new();
    for info in infos {
        let body = if attributes.user_count {
            json!({ "user_count": info.user_count.unwrap_or(0) })
        } else {
            json!({})
        };
        channels.insert(info.name, body);
    }

    Ok(Json(json!({ "channels": channels })))
}

/// `GET /apps/{app_id}/channels/{channel_name}`
async fn get_channel(
    State(state): State<Arc<AppState>>,
    Path((app_id, channel_name)): Path<(String, String)>,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Json<Value>, ApiError> {
    let path = format!("/apps/{app_id}/channels/{channel_name}");
    let app = authorize(&state, "GET", &path, &params, &app_id)?;

    let attributes = parse_attributes(param(&params, "info"));
    let info = app.channel_info(&channel_name)?;

    if attributes.user_count && !info.kind.is_presence() {
        return Err(Error::UserCountRestricted.into());
    }

    let mut body = json!({ "occupied": info.occupied });
    if attributes.user_count {
        body["user_count"] = json!(info.user_count.unwrap_or(0));
    }
    if attributes.subscription_count {
        body["subscription_count"] = json!(info.subscription_count);
    }

    Ok(Json(body))
}

/// `GET /apps/{app_id}/channels/{channel_name}/users`
///
/// Allowed only for presence channels.
async fn get_channel_users(
    State(state): State<Arc<AppState>>,
    Path((app_id, channel_name)): Path<(String, String)>,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Json<Value>, ApiError> {
    let path = format!("/apps/{app_id}/channels/{channel_name}/users");
    let app = authorize(&state, "GET", &path, &params, &app_id)?;

    let users: Vec<Value> = app
        .channel_members(&channel_name)?
        .into_iter()
        .map(|id| json!({ "id": id }))
        .collect();

    Ok(Json(json!({ "users": users })))
}
