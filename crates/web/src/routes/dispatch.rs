//! Internal email dispatch endpoint
//!
//! Flow handlers call this over loopback HTTP instead of talking to the
//! provider directly, mirroring deployments where dispatch runs on its own
//! instance. Callers prove themselves twice: the request origin must be
//! ours, and the payload's api token must verify for the same account the
//! payload names.

use crate::{
    email::{EmailInfo, EmailTask},
    error::{ApiError, ApiResult},
    state::AppState,
};
use axum::{extract::State, http::header, http::HeaderMap, Json};
use launchkit_auth::{is_well_formed, TokenPurpose};
use serde::Deserialize;
use serde_json::{json, Value};

const MSG_INVALID: &str = "Invalid request.";

#[derive(Debug, Deserialize)]
pub struct SendEmailRequest {
    pub task: String,
    pub info: EmailInfo,
}

pub async fn send_email(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<SendEmailRequest>,
) -> ApiResult<Json<Value>> {
    let site_origin = state.config.public_origin.trim_end_matches('/');
    let caller_origin = headers
        .get(header::ORIGIN)
        .or_else(|| headers.get(header::REFERER))
        .and_then(|value| value.to_str().ok());
    if !caller_origin.is_some_and(|origin| origin.starts_with(site_origin)) {
        tracing::warn!(origin = ?caller_origin, "email dispatch from foreign origin");
        return Err(ApiError::Unauthorized(MSG_INVALID.into()));
    }

    let Some(task) = EmailTask::parse(&body.task) else {
        return Err(ApiError::validation(MSG_INVALID, &["task"]));
    };

    if !is_well_formed(&body.info.api_token) {
        return Err(ApiError::Unauthorized(MSG_INVALID.into()));
    }
    let claims = state
        .tokens
        .verify(TokenPurpose::InternalApi, &body.info.api_token)
        .map_err(|error| {
            tracing::warn!(%error, "email dispatch token rejected");
            ApiError::Unauthorized(MSG_INVALID.to_string())
        })?;
    // The token subject must be the account the payload claims to act for
    if claims.uuid != Some(body.info.uuid) {
        tracing::warn!("email dispatch token subject mismatch");
        return Err(ApiError::Unauthorized(MSG_INVALID.into()));
    }

    state.sender.send_task(task, &body.info).await?;
    Ok(Json(json!({ "sent": true })))
}
