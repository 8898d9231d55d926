use axum::{
    extract::{rejection::JsonRejection, Path, Query, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::error;
use uuid::Uuid;

use crate::authz;
use crate::devices;
use crate::errors::Error;
use crate::metrics::HTTP_REQUEST_DURATION_SECONDS;
use crate::model::{
    Actor, CreateDevice, CreatePreset, DevicePatch, DeviceStatePatch, DeviceView, ListResponse,
    Preset, PresetPatch, Role, StateUpdateResponse,
};
use crate::presets;
use crate::store::{DeviceStore, Page, PresetStore};

#[derive(Clone)]
pub struct AppState {
    pub devices: Arc<dyn DeviceStore>,
    pub presets: Arc<dyn PresetStore>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    limit: Option<usize>,
    offset: Option<usize>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/devices", post(create_device).get(list_devices))
        .route(
            "/api/v1/devices/:id",
            get(get_device).patch(update_device).delete(delete_device),
        )
        .route("/api/v1/devices/:id/state", post(push_device_state))
        .route("/api/v1/presets", post(create_preset).get(list_presets))
        .route(
            "/api/v1/presets/:id",
            get(get_preset).patch(update_preset).delete(delete_preset),
        )
        .route("/health", get(health))
        .layer(middleware::from_fn(track_latency))
        .with_state(state)
}

async fn track_latency(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let response = next.run(req).await;
    HTTP_REQUEST_DURATION_SECONDS.observe(start.elapsed().as_secs_f64());
    response
}

/// Reads the identity established by the upstream gateway. No `x-user-id`
/// header means an anonymous caller; the headers are trusted as-is.
fn actor_from_headers(headers: &HeaderMap) -> Option<Actor> {
    let user_id = header_value(headers, "x-user-id")?;
    let email = header_value(headers, "x-user-email").unwrap_or_default();
    let role = Role::parse(&header_value(headers, "x-user-role").unwrap_or_default());
    Some(Actor {
        user_id,
        email,
        role,
    })
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .filter(|s| !s.is_empty())
}

fn require_actor(headers: &HeaderMap) -> Result<Actor, Error> {
    actor_from_headers(headers).ok_or_else(authz::unauthenticated)
}

/// Unwraps a request body, turning parse failures into the same wire shape
/// as validation failures instead of the framework's plain-text rejection.
fn body_json<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, Error> {
    match payload {
        Ok(Json(value)) => Ok(value),
        Err(rejection) => Err(Error::Validation(rejection.body_text())),
    }
}

/// Route ids are UUIDs; anything else reads as a missing entity, matching
/// the upstream router which never matched malformed ids.
fn parse_id(raw: &str) -> Result<Uuid, Error> {
    Uuid::parse_str(raw).map_err(|_| Error::NotFound(Uuid::nil()))
}

fn page_from(params: &ListQuery) -> Page {
    Page {
        limit: params.limit.unwrap_or(100).min(1000),
        offset: params.offset.unwrap_or(0),
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

async fn create_device(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<CreateDevice>, JsonRejection>,
) -> Result<(StatusCode, Json<DeviceView>), ApiError> {
    let actor = require_actor(&headers)?;
    let req = body_json(payload)?;
    let view = devices::create(state.devices.as_ref(), &actor, req).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

async fn list_devices(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<ListQuery>,
) -> Result<Json<ListResponse<DeviceView>>, ApiError> {
    let actor = actor_from_headers(&headers);
    let page = page_from(&params);
    let data = devices::list(state.devices.as_ref(), actor.as_ref(), page).await?;
    Ok(Json(ListResponse {
        total: data.len(),
        data,
        limit: page.limit,
        offset: page.offset,
    }))
}

async fn get_device(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<DeviceView>, ApiError> {
    let actor = actor_from_headers(&headers);
    let id = parse_id(&id)?;
    let view = devices::get(state.devices.as_ref(), actor.as_ref(), id).await?;
    Ok(Json(view))
}

async fn update_device(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    payload: Result<Json<DevicePatch>, JsonRejection>,
) -> Result<Json<DeviceView>, ApiError> {
    let actor = require_actor(&headers)?;
    let id = parse_id(&id)?;
    let patch = body_json(payload)?;
    let view = devices::update(state.devices.as_ref(), &actor, id, patch).await?;
    Ok(Json(view))
}

async fn delete_device(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let actor = require_actor(&headers)?;
    let id = parse_id(&id)?;
    let previous = devices::delete(state.devices.as_ref(), &actor, id).await?;
    Ok(Json(json!({"deleted": true, "previous": previous})))
}

async fn push_device_state(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    payload: Result<Json<DeviceStatePatch>, JsonRejection>,
) -> Result<Json<StateUpdateResponse>, ApiError> {
    let actor = actor_from_headers(&headers);
    let id = parse_id(&id)?;
    let patch = body_json(payload)?;
    let response = devices::apply_state(state.devices.as_ref(), actor.as_ref(), id, patch).await?;
    Ok(Json(response))
}

async fn create_preset(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<CreatePreset>, JsonRejection>,
) -> Result<(StatusCode, Json<Preset>), ApiError> {
    let actor = require_actor(&headers)?;
    let req = body_json(payload)?;
    let preset = presets::create(state.presets.as_ref(), &actor, req).await?;
    Ok((StatusCode::CREATED, Json(preset)))
}

async fn list_presets(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<ListQuery>,
) -> Result<Json<ListResponse<Preset>>, ApiError> {
    let actor = actor_from_headers(&headers);
    let page = page_from(&params);
    let data = presets::list(state.presets.as_ref(), actor.as_ref(), page).await?;
    Ok(Json(ListResponse {
        total: data.len(),
        data,
        limit: page.limit,
        offset: page.offset,
    }))
}

async fn get_preset(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Preset>, ApiError> {
    let actor = actor_from_headers(&headers);
    let id = parse_id(&id)?;
    let preset = presets::get(state.presets.as_ref(), actor.as_ref(), id).await?;
    Ok(Json(preset))
}

async fn update_preset(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    payload: Result<Json<PresetPatch>, JsonRejection>,
) -> Result<Json<Preset>, ApiError> {
    let actor = require_actor(&headers)?;
    let id = parse_id(&id)?;
    let patch = body_json(payload)?;
    let preset = presets::update(state.presets.as_ref(), &actor, id, patch).await?;
    Ok(Json(preset))
}

async fn delete_preset(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let actor = require_actor(&headers)?;
    let id = parse_id(&id)?;
    let previous = presets::delete(state.presets.as_ref(), &actor, id).await?;
    Ok(Json(json!({"deleted": true, "previous": previous})))
}

/// Maps domain errors onto the legacy wire shape:
/// `{"code", "message", "data": {"status"}}`.
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self.0 {
            Error::MissingClientId => (
                StatusCode::BAD_REQUEST,
                "missing_mqtt_client_id",
                self.0.to_string(),
            ),
            Error::DuplicateClientId(_) => (
                StatusCode::BAD_REQUEST,
                "duplicate_mqtt_client_id",
                self.0.to_string(),
            ),
            Error::Validation(_) => (
                StatusCode::BAD_REQUEST,
                "rest_invalid_param",
                self.0.to_string(),
            ),
            Error::NotFound(_) => (
                StatusCode::NOT_FOUND,
                "rest_post_invalid_id",
                "Invalid entity ID.".to_string(),
            ),
            Error::Unauthenticated => (
                StatusCode::UNAUTHORIZED,
                "rest_forbidden",
                "Sorry, you are not allowed to do that.".to_string(),
            ),
            Error::Forbidden(_) => (
                StatusCode::FORBIDDEN,
                "rest_forbidden",
                "Sorry, you are not allowed to do that.".to_string(),
            ),
            _ => {
                error!("API error: {}", self.0);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "Internal server error".to_string(),
                )
            }
        };

        let body = json!({
            "code": code,
            "message": message,
            "data": { "status": status.as_u16() }
        });
        (status, Json(body)).into_response()
    }
}
