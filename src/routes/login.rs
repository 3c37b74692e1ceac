use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};

use crate::error::{AppError, AppResult};
use crate::services::tado::{DeviceAuthorization, DevicePollOutcome};
use crate::state::AppState;

pub(crate) async fn start_login(
    State(state): State<AppState>,
) -> AppResult<Json<DeviceAuthorization>> {
    let authorization = state.tado.start_device_authorization().await?;
    Ok(Json(authorization))
}

#[derive(Debug, Deserialize)]
pub(crate) struct PollQuery {
    code: Option<String>,
}

pub(crate) async fn poll_login(
    State(state): State<AppState>,
    Query(query): Query<PollQuery>,
) -> AppResult<Json<JsonValue>> {
    let Some(code) = query.code.filter(|c| !c.is_empty()) else {
        return Err(AppError::bad_request("Missing code"));
    };
    match state.tado.poll_device_token(&code).await? {
        DevicePollOutcome::Pending => Ok(Json(json!({ "error": "authorization_pending" }))),
        DevicePollOutcome::Authorized(token) => {
            let body = serde_json::to_value(&token)
                .map_err(|err| AppError::internal(err.to_string()))?;
            Ok(Json(body))
        }
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/login/start", post(start_login))
        .route("/login/poll", get(poll_login))
}
