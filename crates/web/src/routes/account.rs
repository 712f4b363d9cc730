//! Signed-in account surface
//!
//! Everything here runs behind the gate and trusts the `Identity`
//! extension it inserted. Password re-verification still happens for the
//! destructive operations.

use super::{capture_meta, insert_activity};
use crate::{
    cookies,
    email::EmailTask,
    error::{ApiError, ApiResult},
    gate::Identity,
    state::AppState,
    validate,
};
use axum::{
    extract::State,
    http::{header, HeaderMap},
    response::{IntoResponse, Redirect, Response},
    Extension, Json,
};
use launchkit_auth::{hash_password, verify_password, SessionError, SessionPatch};
use launchkit_shared::{mask_email, mask_ip};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

const MSG_WRONG_CURRENT_PASSWORD: &str = "Current password is incorrect. If you forgot it, \
     sign out then use 'forgot password' on the sign in page to reset it.";
const MSG_PASSWORD_CHANGED: &str = "Password changed successfully.";

#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    pub nickname: String,
    #[serde(default)]
    pub organization: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePasswordRequest {
    pub current_password: String,
    pub password: String,
    pub confirm_password: String,
}

#[derive(Debug, Deserialize)]
pub struct DeleteAccountRequest {
    pub password: String,
}

/// One live session as shown on the sessions page
#[derive(Debug, Serialize)]
pub struct SessionView {
    pub created_at: i64,
    pub expire_at: i64,
    pub ip: String,
    pub country: String,
    pub device: String,
    pub current: bool,
}

#[derive(Debug, Serialize)]
pub struct ActivityView {
    pub action: String,
    pub ip: String,
    pub country: String,
    pub device: String,
    pub created_at: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct ActivityRow {
    action: String,
    ip: String,
    ip_country: String,
    os: String,
    browser: String,
    created_at: time::OffsetDateTime,
}

/// Human label from the parsed user-agent parts
fn format_device(browser: &str, os: &str) -> String {
    match (browser != "unknown", os != "unknown") {
        (true, true) => format!("{browser} - {os}"),
        (true, false) => format!("{browser} Browser"),
        (false, true) => format!("{os} OS"),
        (false, false) => "Unknown Device".to_string(),
    }
}

pub async fn dashboard(Extension(identity): Extension<Identity>) -> Json<Identity> {
    Json(identity)
}

pub async fn create_profile(Extension(identity): Extension<Identity>) -> Json<Identity> {
    Json(identity)
}

/// Live sessions plus the recent activity trail
pub async fn sessions(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> ApiResult<Json<Value>> {
    let live = state.sessions.live_for_account(identity.uuid).await?;
    let sessions: Vec<SessionView> = live
        .into_iter()
        .map(|record| SessionView {
            created_at: record.created_at.unix_timestamp(),
            expire_at: record.expire_at.unix_timestamp(),
            ip: mask_ip(&record.ip),
            country: record.ip_country.clone(),
            device: format_device(&record.browser, &record.os),
            current: record.session_id == identity.session_token,
        })
        .collect();

    let activity: Vec<ActivityRow> = sqlx::query_as(
        "SELECT action, ip, ip_country, os, browser, created_at \
         FROM activity_record WHERE account_uuid = $1 \
         ORDER BY created_at DESC LIMIT 20",
    )
    .bind(identity.uuid)
    .fetch_all(&state.pool)
    .await?;
    let activity: Vec<ActivityView> = activity
        .into_iter()
        .map(|row| ActivityView {
            action: row.action,
            ip: mask_ip(&row.ip),
            country: row.ip_country,
            device: format_device(&row.browser, &row.os),
            created_at: row.created_at.unix_timestamp(),
        })
        .collect();

    Ok(Json(json!({ "sessions": sessions, "activity": activity })))
}

/// Nickname and organization update, fanned out to every live session so
/// open tabs render the new values without a fresh sign-in
pub async fn update_profile(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(body): Json<UpdateProfileRequest>,
) -> ApiResult<Json<Value>> {
    let nickname = validate::nickname(&body.nickname)?;
    let organization = validate::organization(body.organization.as_deref())?;

    sqlx::query("UPDATE user_account SET nickname = $1, organization = $2 WHERE uuid = $3")
        .bind(&nickname)
        .bind(&organization)
        .bind(identity.uuid)
        .execute(&state.pool)
        .await?;

    let patch = SessionPatch {
        nickname: Some(nickname.clone()),
        organization: Some(organization.clone()),
        ..SessionPatch::default()
    };
    match state
        .sessions
        .update_all_for_account(identity.uuid, &patch)
        .await
    {
        Ok(_) => {}
        // The caller's own session exists, so this only happens when it
        // expired mid-request
        Err(SessionError::NoLiveSessions) => {
            tracing::warn!(account_uuid = %identity.uuid, "profile update found no live sessions");
        }
        Err(error) => return Err(error.into()),
    }

    Ok(Json(json!({
        "success": true,
        "nickname": nickname,
        "organization": organization,
    })))
}

pub async fn update_password(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    headers: HeaderMap,
    Json(body): Json<UpdatePasswordRequest>,
) -> ApiResult<Json<Value>> {
    validate::password_pair(&body.password, &body.confirm_password)?;

    let stored: Option<(String,)> =
        sqlx::query_as("SELECT password_hash FROM user_account WHERE uuid = $1")
            .bind(identity.uuid)
            .fetch_optional(&state.pool)
            .await?;
    let Some((password_hash,)) = stored else {
        return Err(ApiError::NotFound);
    };
    if !verify_password(&body.current_password, &password_hash)? {
        return Err(ApiError::Unauthorized(MSG_WRONG_CURRENT_PASSWORD.into()));
    }

    let meta = capture_meta(&headers);
    let new_hash = hash_password(&body.password)?;
    let mut tx = state.pool.begin().await?;
    sqlx::query("UPDATE user_account SET password_hash = $1 WHERE uuid = $2")
        .bind(&new_hash)
        .bind(identity.uuid)
        .execute(&mut *tx)
        .await?;
    insert_activity(&mut *tx, identity.uuid, "Change password", &meta).await?;
    tx.commit().await?;

    tracing::info!(email = %mask_email(&identity.email), "password changed");
    Ok(Json(json!({ "success": true, "message": MSG_PASSWORD_CHANGED })))
}

/// Account deletion. The row delete cascades to sessions, link tokens,
/// activity, and the billing row; cache mirrors lapse on their own TTL.
pub async fn delete_account(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(body): Json<DeleteAccountRequest>,
) -> ApiResult<Response> {
    let stored: Option<(String,)> =
        sqlx::query_as("SELECT password_hash FROM user_account WHERE uuid = $1")
            .bind(identity.uuid)
            .fetch_optional(&state.pool)
            .await?;
    let Some((password_hash,)) = stored else {
        return Err(ApiError::NotFound);
    };
    if !verify_password(&body.password, &password_hash)? {
        return Err(ApiError::Unauthorized(MSG_WRONG_CURRENT_PASSWORD.into()));
    }

    sqlx::query("DELETE FROM user_account WHERE uuid = $1")
        .bind(identity.uuid)
        .execute(&state.pool)
        .await?;

    state.email.dispatch_detached(
        EmailTask::AccountDeletedNotification,
        identity.uuid,
        &identity.email,
        &identity.nickname,
        None,
    );

    tracing::info!(email = %mask_email(&identity.email), "account deleted");
    let cookie = cookies::clear(cookies::LOGIN_COOKIE, state.config.app_env)?;
    let mut response = Redirect::to("/sign-up").into_response();
    response.headers_mut().append(header::SET_COOKIE, cookie);
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_device_combinations() {
        assert_eq!(format_device("Chrome", "macOS"), "Chrome - macOS");
        assert_eq!(format_device("Firefox", "unknown"), "Firefox Browser");
        assert_eq!(format_device("unknown", "Linux"), "Linux OS");
        assert_eq!(format_device("unknown", "unknown"), "Unknown Device");
    }
}
