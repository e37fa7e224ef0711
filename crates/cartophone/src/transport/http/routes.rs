//! HTTP route handlers.

use std::sync::Arc;

use axum::{
    Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, patch, post, put},
};
use serde::{Deserialize, Serialize};

use crate::alarms::is_valid_hour;
use crate::arbiter::ArbiterState;
use crate::handshake::HandshakeOutcome;
use crate::mode::Mode;
use crate::service::{CartophoneService, HealthSnapshot};
use crate::store::{AlarmUpdate, CollaboratorError, NewAlarm};
use crate::version::VersionInfo;

#[derive(Debug, Serialize)]
pub struct HealthCheckResponse {
    pub status: &'static str,
    pub mode: Mode,
    pub handshake_active: bool,
    pub version: VersionInfo,
    pub arbiter: ArbiterState,
}

impl From<HealthSnapshot> for HealthCheckResponse {
    fn from(snapshot: HealthSnapshot) -> Self {
        Self {
            status: "ok",
            mode: snapshot.mode,
            handshake_active: snapshot.handshake_active,
            version: snapshot.version,
            arbiter: snapshot.arbiter,
        }
    }
}

/// Body of `POST /associate`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssociateRequest {
    #[serde(default)]
    pub playlist_id: Option<String>,
    #[serde(default)]
    pub replace_card: bool,
}

/// Body of `PATCH /alarms/{id}`; at least one field must be set.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlarmPatchRequest {
    #[serde(default)]
    pub hour: Option<String>,
    #[serde(default)]
    pub activated: Option<bool>,
    #[serde(default)]
    pub playlist_id: Option<String>,
}

/// Body of `POST /queue/add`.
#[derive(Debug, Deserialize)]
pub struct QueueAddRequest {
    #[serde(default)]
    pub uris: Vec<String>,
}

fn error_body(status: StatusCode, message: &str) -> (StatusCode, Json<serde_json::Value>) {
    (status, Json(serde_json::json!({ "error": message })))
}

/// A record PocketBase does not know is a 404; anything else is ours to report.
fn collaborator_error(context: &str, e: CollaboratorError) -> Response {
    if let CollaboratorError::Status { status: 404, .. } = e {
        return error_body(StatusCode::NOT_FOUND, &format!("{context}: not found")).into_response();
    }
    tracing::warn!(error = %e, "{context} failed");
    error_body(StatusCode::INTERNAL_SERVER_ERROR, &format!("{context}: {e}")).into_response()
}

/// Map a handshake outcome onto the wire.
fn outcome_response(outcome: HandshakeOutcome) -> (StatusCode, Json<serde_json::Value>) {
    match outcome {
        HandshakeOutcome::Success {
            card_id,
            playlist_id,
        } => (
            StatusCode::OK,
            Json(serde_json::json!({
                "cardId": card_id,
                "playlistId": playlist_id,
            })),
        ),
        HandshakeOutcome::AlreadyBoundSame => error_body(
            StatusCode::CONFLICT,
            "card already associated with this playlist",
        ),
        HandshakeOutcome::AlreadyBoundOther {
            card_id,
            playlist_id,
        } => (
            StatusCode::CONFLICT,
            Json(serde_json::json!({
                "error": "card already associated with another playlist",
                "cardId": card_id,
                "playlistId": playlist_id,
            })),
        ),
        HandshakeOutcome::Conflict => {
            error_body(StatusCode::CONFLICT, "handshake already in progress")
        }
        HandshakeOutcome::NoCardDetected => {
            error_body(StatusCode::REQUEST_TIMEOUT, "no card detected")
        }
        HandshakeOutcome::Error(detail) => error_body(StatusCode::INTERNAL_SERVER_ERROR, &detail),
    }
}

async fn health_check(
    State(service): State<Arc<CartophoneService>>,
) -> Json<HealthCheckResponse> {
    Json(service.health().into())
}

async fn associate(
    State(service): State<Arc<CartophoneService>>,
    body: Result<Json<AssociateRequest>, JsonRejection>,
) -> impl IntoResponse {
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => {
            return error_body(StatusCode::BAD_REQUEST, &rejection.body_text());
        }
    };
    let Some(playlist_id) = request.playlist_id.filter(|id| !id.trim().is_empty()) else {
        return error_body(StatusCode::BAD_REQUEST, "playlistId is required");
    };

    outcome_response(service.associate(playlist_id, request.replace_card).await)
}

async fn register(State(service): State<Arc<CartophoneService>>) -> impl IntoResponse {
    outcome_response(service.register().await)
}

async fn player_status(State(service): State<Arc<CartophoneService>>) -> impl IntoResponse {
    match service.player().player_status().await {
        Ok(status) => (StatusCode::OK, Json(serde_json::json!(status))),
        Err(e) => {
            tracing::warn!(error = %e, "Player status failed");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
        }
    }
}

async fn player_play(State(service): State<Arc<CartophoneService>>) -> impl IntoResponse {
    match service.player().play().await {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({}))),
        Err(e) => error_body(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

async fn player_pause(State(service): State<Arc<CartophoneService>>) -> impl IntoResponse {
    match service.player().pause().await {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({}))),
        Err(e) => error_body(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

async fn queue_list(State(service): State<Arc<CartophoneService>>) -> Response {
    match service.player().queue().await {
        Ok(items) => Json(items).into_response(),
        Err(e) => collaborator_error("fetch queue", e),
    }
}

async fn queue_clear(State(service): State<Arc<CartophoneService>>) -> Response {
    match service.player().clear_queue().await {
        Ok(()) => Json(serde_json::json!({})).into_response(),
        Err(e) => collaborator_error("clear queue", e),
    }
}

async fn queue_add(
    State(service): State<Arc<CartophoneService>>,
    body: Result<Json<QueueAddRequest>, JsonRejection>,
) -> Response {
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => {
            return error_body(StatusCode::BAD_REQUEST, &rejection.body_text()).into_response();
        }
    };
    if request.uris.is_empty() || request.uris.iter().any(|uri| uri.trim().is_empty()) {
        return error_body(StatusCode::BAD_REQUEST, "uris must be a non-empty list").into_response();
    }

    match service.player().add_to_queue(&request.uris).await {
        Ok(()) => Json(serde_json::json!({ "added": request.uris.len() })).into_response(),
        Err(e) => collaborator_error("add to queue", e),
    }
}

async fn alarm_list(State(service): State<Arc<CartophoneService>>) -> Response {
    match service.alarms().list_alarms().await {
        Ok(alarms) => Json(alarms).into_response(),
        Err(e) => collaborator_error("list alarms", e),
    }
}

async fn alarm_create(
    State(service): State<Arc<CartophoneService>>,
    body: Result<Json<NewAlarm>, JsonRejection>,
) -> Response {
    let alarm = match body {
        Ok(Json(alarm)) => alarm,
        Err(rejection) => {
            return error_body(StatusCode::BAD_REQUEST, &rejection.body_text()).into_response();
        }
    };
    if !is_valid_hour(&alarm.hour) {
        return error_body(StatusCode::BAD_REQUEST, "hour must be HH:MM").into_response();
    }
    if alarm.playlist_id.trim().is_empty() {
        return error_body(StatusCode::BAD_REQUEST, "playlistId is required").into_response();
    }

    match service.alarms().create_alarm(alarm).await {
        Ok(created) => (StatusCode::CREATED, Json(created)).into_response(),
        Err(e) => collaborator_error("create alarm", e),
    }
}

async fn alarm_update(
    State(service): State<Arc<CartophoneService>>,
    Path(id): Path<String>,
    body: Result<Json<AlarmPatchRequest>, JsonRejection>,
) -> Response {
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => {
            return error_body(StatusCode::BAD_REQUEST, &rejection.body_text()).into_response();
        }
    };
    if request.hour.is_none() && request.activated.is_none() && request.playlist_id.is_none() {
        return error_body(StatusCode::BAD_REQUEST, "nothing to update").into_response();
    }
    if request.hour.as_deref().is_some_and(|hour| !is_valid_hour(hour)) {
        return error_body(StatusCode::BAD_REQUEST, "hour must be HH:MM").into_response();
    }
    if request.playlist_id.as_deref().is_some_and(|id| id.trim().is_empty()) {
        return error_body(StatusCode::BAD_REQUEST, "playlistId is required").into_response();
    }

    let update = AlarmUpdate {
        hour: request.hour,
        activated: request.activated,
        playlist_id: request.playlist_id,
    };
    match service.alarms().update_alarm(&id, &update).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => collaborator_error("update alarm", e),
    }
}

async fn alarm_delete(
    State(service): State<Arc<CartophoneService>>,
    Path(id): Path<String>,
) -> Response {
    match service.alarms().delete_alarm(&id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => collaborator_error("delete alarm", e),
    }
}

pub fn routes(service: Arc<CartophoneService>) -> Router {
    Router::new()
        .route("/health-check", get(health_check))
        .route("/associate", post(associate))
        .route("/register", post(register))
        .route("/player", get(player_status))
        .route("/player/play", post(player_play))
        .route("/player/pause", post(player_pause))
        .route("/queue", get(queue_list))
        .route("/queue/clear", put(queue_clear))
        .route("/queue/add", post(queue_add))
        .route("/alarms", get(alarm_list).post(alarm_create))
        .route("/alarms/{id}", patch(alarm_update).delete(alarm_delete))
        .with_state(service)
}
