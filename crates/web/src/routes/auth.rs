//! Account entry flows
//!
//! Sign-up, both sign-in styles, email verification, and password reset.
//! Every handler runs the same ladder: shape validation, CAPTCHA where the
//! endpoint is bot-facing, quota check, store work, response. Negative
//! paths on enumeration-sensitive endpoints answer with the same
//! success-shaped body as the positive path.

use super::{account_by_email, account_by_uuid, capture_meta, insert_activity, AccountRow};
use crate::{
    cookies,
    email::EmailTask,
    error::{ApiError, ApiResult},
    gate::{Identity, DASHBOARD_PATH, SIGN_IN_PATH},
    state::AppState,
    validate,
};
use axum::{
    extract::{Query, State},
    http::{header, HeaderMap},
    response::{IntoResponse, Redirect, Response},
    Extension, Json,
};
use launchkit_auth::{
    hash_password, is_well_formed, validate_password, verify_password, Claims, LimitPurpose,
    SessionRecord, TokenCodec, TokenPurpose,
};
use launchkit_shared::{mask_email, RequestMeta};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use time::OffsetDateTime;
use uuid::Uuid;

// User-facing copy. The sign-in and passwordless messages say nothing
// about whether the email is registered.
const MSG_INVALID_CREDENTIALS: &str =
    "Invalid email or password, please re-enter and try again.";
const MSG_SIGN_IN_LIMIT: &str = "Login attempts reach limit, please retry after 2 hours.";
const MSG_MAGIC_REQUEST_LIMIT: &str = "Login attempts reach limit, please retry after 2 hours, \
     or you can try to click the magic link in the email if you have requested one recently.";
const MSG_UNVERIFIED: &str = "Your account has not been activated, please check your email \
     inbox for the verification link to activate your account.";
const MSG_SIGN_UP_LIMIT: &str =
    "Too many registration from your IP, please retry after 24 hours.";
const MSG_EMAIL_TAKEN: &str =
    "Email is invalid or has already been taken, please try another one.";
const MSG_CAPTCHA_REQUIRED: &str = "Please complete the CAPTCHA human verification.";
const MSG_MAGIC_INVALID: &str = "Invalid or expired magic link. Please check your email for \
     the correct link or request a new one.";
const MSG_VERIFY_INVALID: &str = "Invalid or expired verification link. Please check your \
     email for the correct link or try to sign in.";
const MSG_ALREADY_VERIFIED: &str = "Your email is already verified. Please try to sign in.";
const MSG_RESET_INVALID: &str = "Invalid or expired password reset link. Please check your \
     email for the correct link or request a new one.";
const MSG_FORGOT_LIMIT: &str = "Attempts reach limit, please retry after 24 hours.";
const MSG_TOO_MANY_FROM_IP: &str =
    "Too many requests from your IP. Please try again later or contact support.";
const MSG_RESET_DONE: &str =
    "Password reset successfully, you can sign in with the new password now.";
const MSG_SIGN_UP_DONE: &str = "sign up successfully.";

/// Floor for sign-in and forgot-password responses so wall-clock time does
/// not reveal which branch ran
const MIN_RESPONSE_TIME: Duration = Duration::from_millis(500);

/// Extra hold before success-shaped replies on negative enumeration paths,
/// roughly matching a real token issue plus email dispatch
const ENUMERATION_DELAY: Duration = Duration::from_secs(1);

const MAGIC_LINK_FAILURE_TARGET: &str = "/sign-in?error=invalid-magic-link";

#[derive(Debug, Deserialize)]
pub struct SignUpRequest {
    pub email: String,
    pub password: String,
    pub confirm_password: String,
    #[serde(default)]
    pub referral_code: Option<String>,
    #[serde(default)]
    pub captcha_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SignInRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub captcha_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EmailOnlyRequest {
    pub email: String,
    #[serde(default)]
    pub captcha_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct NewPasswordRequest {
    pub password: String,
    pub confirm_password: String,
}

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    pub token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SignInPageQuery {
    pub error: Option<String>,
}

fn success(message: impl Into<String>) -> Json<Value> {
    Json(json!({ "success": true, "message": message.into() }))
}

async fn pad_response_time(started: Instant) {
    let elapsed = started.elapsed();
    if elapsed < MIN_RESPONSE_TIME {
        tokio::time::sleep(MIN_RESPONSE_TIME - elapsed).await;
    }
}

/// Full validation ladder for emailed link tokens. Expiry is checked on the
/// unverified payload first so expired links never cost a signature check
/// or a database lookup.
fn validate_link_token(codec: &TokenCodec, purpose: TokenPurpose, token: &str) -> Option<Uuid> {
    if !is_well_formed(token) {
        tracing::info!(purpose = purpose.as_str(), "link token malformed");
        return None;
    }
    let peek = match TokenCodec::decode_insecure(token) {
        Ok(claims) => claims,
        Err(error) => {
            tracing::info!(purpose = purpose.as_str(), %error, "link token undecodable");
            return None;
        }
    };
    if peek.is_expired() {
        tracing::info!(purpose = purpose.as_str(), "link token expired");
        return None;
    }
    match codec.verify(purpose, token) {
        Ok(claims) => claims.uuid,
        Err(error) => {
            tracing::info!(purpose = purpose.as_str(), %error, "link token rejected");
            None
        }
    }
}

fn claims_expiry(claims: &Claims) -> Result<OffsetDateTime, ApiError> {
    OffsetDateTime::from_unix_timestamp(claims.exp).map_err(|error| {
        tracing::error!(%error, "token expiry out of range");
        ApiError::Internal
    })
}

/// Set the login cookie and send the browser to its landing page
fn login_redirect(state: &AppState, token: &str, landing: &str) -> ApiResult<Response> {
    let max_age = state.tokens.ttl(TokenPurpose::Login).whole_seconds();
    let cookie = cookies::build(cookies::LOGIN_COOKIE, token, max_age, state.config.app_env)?;
    let mut response = Redirect::to(landing).into_response();
    response.headers_mut().append(header::SET_COOKIE, cookie);
    Ok(response)
}

/// Issue a login token, persist the session, and answer with the cookie.
/// The session row expires exactly when the token does.
async fn establish_session(
    state: &AppState,
    account: &AccountRow,
    meta: &RequestMeta,
    landing: &str,
) -> ApiResult<Response> {
    let (token, claims) = state.tokens.issue(TokenPurpose::Login, Some(account.uuid))?;
    let expire_at = claims_expiry(&claims)?;
    let record = SessionRecord::new(
        token.clone(),
        account.uuid,
        account.nickname.clone(),
        account.email.clone(),
        account.organization.clone(),
        account.billing_snapshot(),
        meta,
        expire_at,
    );
    state.sessions.create(&record, "Sign in").await?;
    login_redirect(state, &token, landing)
}

// =============================================================================
// Registration
// =============================================================================

pub async fn sign_up(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<SignUpRequest>,
) -> ApiResult<Json<Value>> {
    let email = validate::email(&body.email)?;
    validate::password_pair(&body.password, &body.confirm_password)?;
    let referral_code = validate::referral_code(body.referral_code.as_deref())?;

    if !state.captcha.verify(body.captcha_token.as_deref()).await {
        return Err(ApiError::validation(MSG_CAPTCHA_REQUIRED, &["captcha_token"]));
    }

    let meta = capture_meta(&headers);
    if state
        .limiter
        .check_and_increment(LimitPurpose::SignUp, Some(&meta.ip), None)
        .await
        .is_blocked()
    {
        return Err(ApiError::RateLimited(MSG_SIGN_UP_LIMIT.into()));
    }

    let password_hash = hash_password(&body.password)?;
    let account_uuid = Uuid::new_v4();
    // Mailbox name as the starting nickname; onboarding lets the user
    // change it.
    let nickname = email.split('@').next().unwrap_or(&email).to_string();

    let mut tx = state.pool.begin().await?;
    let inserted = sqlx::query(
        "INSERT INTO user_account (uuid, email, nickname, password_hash, email_verified, referral_code) \
         VALUES ($1, $2, $3, $4, FALSE, $5)",
    )
    .bind(account_uuid)
    .bind(&email)
    .bind(&nickname)
    .bind(&password_hash)
    .bind(&referral_code)
    .execute(&mut *tx)
    .await;
    if let Err(error) = inserted {
        if launchkit_shared::is_unique_violation(&error) {
            return Err(ApiError::Conflict(MSG_EMAIL_TAKEN.into()));
        }
        return Err(error.into());
    }
    sqlx::query(
        "INSERT INTO register_record (account_uuid, email, referral_code, ip, ip_country, device, os, browser) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
    )
    .bind(account_uuid)
    .bind(&email)
    .bind(&referral_code)
    .bind(&meta.ip)
    .bind(&meta.ip_country)
    .bind(&meta.device)
    .bind(&meta.os)
    .bind(&meta.browser)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    // The account exists even if this dispatch fails; sign-in resends the
    // verification email on demand.
    let (verify_token, _) = state.tokens.issue(TokenPurpose::EmailVerify, Some(account_uuid))?;
    state.email.dispatch_detached(
        EmailTask::VerifyEmail,
        account_uuid,
        &email,
        &nickname,
        Some(verify_token),
    );

    tracing::info!(email = %mask_email(&email), "account registered");
    Ok(success(MSG_SIGN_UP_DONE))
}

// =============================================================================
// Password sign-in
// =============================================================================

pub async fn sign_in(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<SignInRequest>,
) -> ApiResult<Response> {
    let started = Instant::now();
    let result = sign_in_flow(&state, &headers, body).await;
    pad_response_time(started).await;
    result
}

async fn sign_in_flow(
    state: &AppState,
    headers: &HeaderMap,
    body: SignInRequest,
) -> ApiResult<Response> {
    // Shape failures get the same message as wrong credentials
    let Ok(email) = validate::email(&body.email) else {
        return Err(ApiError::Unauthorized(MSG_INVALID_CREDENTIALS.into()));
    };
    if validate_password(&body.password).is_err() {
        return Err(ApiError::Unauthorized(MSG_INVALID_CREDENTIALS.into()));
    }
    if !state.captcha.verify(body.captcha_token.as_deref()).await {
        return Err(ApiError::validation(MSG_CAPTCHA_REQUIRED, &["captcha_token"]));
    }

    let meta = capture_meta(headers);
    if state
        .limiter
        .check_only(LimitPurpose::SignIn, Some(&meta.ip), Some(&email))
        .await
        .is_blocked()
    {
        return Err(ApiError::RateLimited(MSG_SIGN_IN_LIMIT.into()));
    }

    let Some(account) = account_by_email(&state.pool, &email).await? else {
        state
            .limiter
            .record_failure(LimitPurpose::SignIn, Some(&meta.ip), None)
            .await;
        return Err(ApiError::Unauthorized(MSG_INVALID_CREDENTIALS.into()));
    };
    if !verify_password(&body.password, &account.password_hash)? {
        state
            .limiter
            .record_failure(LimitPurpose::SignIn, Some(&meta.ip), Some(&email))
            .await;
        return Err(ApiError::Unauthorized(MSG_INVALID_CREDENTIALS.into()));
    }

    if !account.email_verified {
        let (verify_token, _) = state.tokens.issue(TokenPurpose::EmailVerify, Some(account.uuid))?;
        state.email.dispatch_detached(
            EmailTask::VerifyEmail,
            account.uuid,
            &account.email,
            &account.nickname,
            Some(verify_token),
        );
        return Err(ApiError::Unauthorized(MSG_UNVERIFIED.into()));
    }

    establish_session(state, &account, &meta, DASHBOARD_PATH).await
}

/// Page shell for the sign-in route. Carries the message for error codes
/// the magic-link flow redirects back with.
pub async fn sign_in_page(Query(query): Query<SignInPageQuery>) -> Json<Value> {
    let error_message = match query.error.as_deref() {
        Some("invalid-magic-link") => Some(MSG_MAGIC_INVALID),
        _ => None,
    };
    Json(json!({ "page": "sign-in", "error_message": error_message }))
}

// =============================================================================
// Passwordless sign-in
// =============================================================================

/// Magic-link request. Shares the sign-in counters so password and
/// passwordless attempts drain the same quota.
pub async fn passwordless_sign_in(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<EmailOnlyRequest>,
) -> ApiResult<Json<Value>> {
    let email = validate::email(&body.email)?;
    if !state.captcha.verify(body.captcha_token.as_deref()).await {
        return Err(ApiError::validation(MSG_CAPTCHA_REQUIRED, &["captcha_token"]));
    }

    let meta = capture_meta(&headers);
    if state
        .limiter
        .check_only(LimitPurpose::SignIn, Some(&meta.ip), Some(&email))
        .await
        .is_blocked()
    {
        return Err(ApiError::RateLimited(MSG_MAGIC_REQUEST_LIMIT.into()));
    }

    let fake_reply = success(format!(
        "If {email} is registered, you will receive a magic link at your email shortly."
    ));

    let Some(account) = account_by_email(&state.pool, &email).await? else {
        state
            .limiter
            .record_failure(LimitPurpose::SignIn, Some(&meta.ip), None)
            .await;
        tokio::time::sleep(ENUMERATION_DELAY).await;
        return Ok(fake_reply);
    };

    // Unverified accounts get the verification email instead; the reply
    // does not tell them apart from the verified case.
    if !account.email_verified {
        let (verify_token, _) = state.tokens.issue(TokenPurpose::EmailVerify, Some(account.uuid))?;
        state.email.dispatch_detached(
            EmailTask::VerifyEmail,
            account.uuid,
            &account.email,
            &account.nickname,
            Some(verify_token),
        );
        state
            .limiter
            .record_failure(LimitPurpose::SignIn, Some(&meta.ip), Some(&email))
            .await;
        tokio::time::sleep(ENUMERATION_DELAY).await;
        return Ok(fake_reply);
    }

    let (magic_token, claims) = state.tokens.issue(TokenPurpose::MagicLink, Some(account.uuid))?;
    let expire_at = claims_expiry(&claims)?;
    // One active link per account; a new request replaces the old link
    sqlx::query(
        "INSERT INTO magic_link_token (account_uuid, token, expire_at) VALUES ($1, $2, $3) \
         ON CONFLICT (account_uuid) DO UPDATE \
         SET token = EXCLUDED.token, created_at = NOW(), expire_at = EXCLUDED.expire_at",
    )
    .bind(account.uuid)
    .bind(&magic_token)
    .bind(expire_at)
    .execute(&state.pool)
    .await?;

    state
        .email
        .dispatch(
            EmailTask::MagicLinkSignIn,
            account.uuid,
            &account.email,
            &account.nickname,
            Some(magic_token),
        )
        .await?;

    // Successful requests count against the quota too; this caps link
    // volume per address.
    state
        .limiter
        .record_failure(LimitPurpose::SignIn, Some(&meta.ip), Some(&email))
        .await;
    Ok(fake_reply)
}

/// Magic-link consumption. Failures never say which step broke; the
/// browser lands back on the sign-in page with one generic code.
pub async fn magic_link(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<TokenQuery>,
) -> ApiResult<Response> {
    let meta = capture_meta(&headers);
    if state
        .limiter
        .check_only(LimitPurpose::MagicLink, Some(&meta.ip), None)
        .await
        .is_blocked()
    {
        return Err(ApiError::RateLimited(MSG_TOO_MANY_FROM_IP.into()));
    }

    let token = query.token.unwrap_or_default();
    let Some(subject) = validate_link_token(&state.tokens, TokenPurpose::MagicLink, &token) else {
        return Ok(magic_link_failure(&state, &meta).await);
    };

    // Claim-by-delete: exactly one request can consume a stored link
    let claimed = sqlx::query(
        "DELETE FROM magic_link_token WHERE account_uuid = $1 AND token = $2 RETURNING account_uuid",
    )
    .bind(subject)
    .bind(&token)
    .fetch_optional(&state.pool)
    .await?;
    if claimed.is_none() {
        return Ok(magic_link_failure(&state, &meta).await);
    }

    let Some(account) = account_by_uuid(&state.pool, subject).await? else {
        return Ok(magic_link_failure(&state, &meta).await);
    };
    if !account.email_verified {
        return Ok(magic_link_failure(&state, &meta).await);
    }

    establish_session(&state, &account, &meta, DASHBOARD_PATH).await
}

async fn magic_link_failure(state: &AppState, meta: &RequestMeta) -> Response {
    state
        .limiter
        .record_failure(LimitPurpose::MagicLink, Some(&meta.ip), None)
        .await;
    Redirect::to(MAGIC_LINK_FAILURE_TARGET).into_response()
}

// =============================================================================
// Email verification
// =============================================================================

/// Verification link consumption. Doubles as the account's first sign-in:
/// the flag flip and the session land in one transaction.
pub async fn verify_email(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<TokenQuery>,
) -> ApiResult<Response> {
    let meta = capture_meta(&headers);
    if state
        .limiter
        .check_only(LimitPurpose::VerifyEmail, Some(&meta.ip), None)
        .await
        .is_blocked()
    {
        return Err(ApiError::RateLimited(MSG_TOO_MANY_FROM_IP.into()));
    }

    let token = query.token.unwrap_or_default();
    let Some(subject) = validate_link_token(&state.tokens, TokenPurpose::EmailVerify, &token)
    else {
        return Err(verify_link_failure(&state, &meta).await);
    };
    let Some(account) = account_by_uuid(&state.pool, subject).await? else {
        return Err(verify_link_failure(&state, &meta).await);
    };
    if account.email_verified {
        return Err(ApiError::Conflict(MSG_ALREADY_VERIFIED.into()));
    }

    let (login_token, claims) = state.tokens.issue(TokenPurpose::Login, Some(account.uuid))?;
    let expire_at = claims_expiry(&claims)?;
    let record = SessionRecord::new(
        login_token.clone(),
        account.uuid,
        account.nickname.clone(),
        account.email.clone(),
        account.organization.clone(),
        account.billing_snapshot(),
        &meta,
        expire_at,
    );

    let mut tx = state.pool.begin().await?;
    sqlx::query("UPDATE user_account SET email_verified = TRUE WHERE uuid = $1")
        .bind(account.uuid)
        .execute(&mut *tx)
        .await?;
    state.sessions.create_in(&mut tx, &record, "Sign in").await?;
    tx.commit().await?;
    state.sessions.mirror_created(&record).await;

    tracing::info!(email = %mask_email(&account.email), "email verified");
    login_redirect(&state, &login_token, "/dashboard/create-profile")
}

async fn verify_link_failure(state: &AppState, meta: &RequestMeta) -> ApiError {
    state
        .limiter
        .record_failure(LimitPurpose::VerifyEmail, Some(&meta.ip), None)
        .await;
    ApiError::Unauthorized(MSG_VERIFY_INVALID.into())
}

// =============================================================================
// Password reset
// =============================================================================

pub async fn forgot_password(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<EmailOnlyRequest>,
) -> ApiResult<Json<Value>> {
    let started = Instant::now();
    let result = forgot_password_flow(&state, &headers, body).await;
    pad_response_time(started).await;
    result
}

async fn forgot_password_flow(
    state: &AppState,
    headers: &HeaderMap,
    body: EmailOnlyRequest,
) -> ApiResult<Json<Value>> {
    let email = validate::email(&body.email)?;
    if !state.captcha.verify(body.captcha_token.as_deref()).await {
        return Err(ApiError::validation(MSG_CAPTCHA_REQUIRED, &["captcha_token"]));
    }

    let meta = capture_meta(headers);
    // Every request counts, sent or not, so the endpoint cannot be used to
    // flood a mailbox
    if state
        .limiter
        .check_and_increment(LimitPurpose::ForgotPassword, Some(&meta.ip), Some(&email))
        .await
        .is_blocked()
    {
        return Err(ApiError::RateLimited(MSG_FORGOT_LIMIT.into()));
    }

    let fake_reply = success(format!(
        "If {email} is registered, you will receive a password reset link at your email shortly."
    ));

    let Some(account) = account_by_email(&state.pool, &email).await? else {
        tokio::time::sleep(ENUMERATION_DELAY).await;
        return Ok(fake_reply);
    };

    let (reset_token, claims) = state.tokens.issue(TokenPurpose::PasswordReset, Some(account.uuid))?;
    let expire_at = claims_expiry(&claims)?;
    sqlx::query(
        "INSERT INTO password_reset_token (account_uuid, token, expire_at) VALUES ($1, $2, $3) \
         ON CONFLICT (account_uuid) DO UPDATE \
         SET token = EXCLUDED.token, created_at = NOW(), expire_at = EXCLUDED.expire_at",
    )
    .bind(account.uuid)
    .bind(&reset_token)
    .bind(expire_at)
    .execute(&state.pool)
    .await?;

    state
        .email
        .dispatch(
            EmailTask::ResetPwdEmail,
            account.uuid,
            &account.email,
            &account.nickname,
            Some(reset_token),
        )
        .await?;

    Ok(fake_reply)
}

/// Read-only reset-link check for rendering the form. The durable row is
/// peeked, not claimed; only the POST consumes it.
pub async fn new_password_peek(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<TokenQuery>,
) -> ApiResult<Json<Value>> {
    let meta = capture_meta(&headers);
    if state
        .limiter
        .check_only(LimitPurpose::NewPassword, Some(&meta.ip), None)
        .await
        .is_blocked()
    {
        return Err(ApiError::RateLimited(MSG_TOO_MANY_FROM_IP.into()));
    }

    let token = query.token.unwrap_or_default();
    let Some(subject) = validate_link_token(&state.tokens, TokenPurpose::PasswordReset, &token)
    else {
        return Err(reset_link_failure(&state, &meta).await);
    };
    let peeked =
        sqlx::query("SELECT account_uuid FROM password_reset_token WHERE account_uuid = $1 AND token = $2")
            .bind(subject)
            .bind(&token)
            .fetch_optional(&state.pool)
            .await?;
    if peeked.is_none() {
        return Err(reset_link_failure(&state, &meta).await);
    }
    let Some(account) = account_by_uuid(&state.pool, subject).await? else {
        return Err(reset_link_failure(&state, &meta).await);
    };

    Ok(Json(json!({ "valid": true, "email": mask_email(&account.email) })))
}

pub async fn new_password(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<TokenQuery>,
    Json(body): Json<NewPasswordRequest>,
) -> ApiResult<Json<Value>> {
    let meta = capture_meta(&headers);
    if state
        .limiter
        .check_only(LimitPurpose::NewPassword, Some(&meta.ip), None)
        .await
        .is_blocked()
    {
        return Err(ApiError::RateLimited(MSG_TOO_MANY_FROM_IP.into()));
    }

    validate::password_pair(&body.password, &body.confirm_password)?;

    // The GET peek proves nothing about this request; the ladder runs again
    let token = query.token.unwrap_or_default();
    let Some(subject) = validate_link_token(&state.tokens, TokenPurpose::PasswordReset, &token)
    else {
        return Err(reset_link_failure(&state, &meta).await);
    };
    let claimed = sqlx::query(
        "DELETE FROM password_reset_token WHERE account_uuid = $1 AND token = $2 RETURNING account_uuid",
    )
    .bind(subject)
    .bind(&token)
    .fetch_optional(&state.pool)
    .await?;
    if claimed.is_none() {
        return Err(reset_link_failure(&state, &meta).await);
    }
    let Some(account) = account_by_uuid(&state.pool, subject).await? else {
        return Err(reset_link_failure(&state, &meta).await);
    };

    let password_hash = hash_password(&body.password)?;
    let mut tx = state.pool.begin().await?;
    sqlx::query("UPDATE user_account SET password_hash = $1 WHERE uuid = $2")
        .bind(&password_hash)
        .bind(account.uuid)
        .execute(&mut *tx)
        .await?;
    insert_activity(&mut *tx, account.uuid, "Change password", &meta).await?;
    tx.commit().await?;

    state.email.dispatch_detached(
        EmailTask::ResetPwdSuccessNotification,
        account.uuid,
        &account.email,
        &account.nickname,
        None,
    );

    tracing::info!(email = %mask_email(&account.email), "password reset");
    Ok(success(MSG_RESET_DONE))
}

async fn reset_link_failure(state: &AppState, meta: &RequestMeta) -> ApiError {
    state
        .limiter
        .record_failure(LimitPurpose::NewPassword, Some(&meta.ip), None)
        .await;
    ApiError::Unauthorized(MSG_RESET_INVALID.into())
}

// =============================================================================
// Sign-out
// =============================================================================

pub async fn sign_out(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let meta = capture_meta(&headers);
    if let Err(error) = insert_activity(&state.pool, identity.uuid, "Sign out", &meta).await {
        tracing::warn!(%error, "sign-out activity record failed");
    }
    state.sessions.delete(&identity.session_token).await?;

    let cookie = cookies::clear(cookies::LOGIN_COOKIE, state.config.app_env)?;
    let mut response = Redirect::to(SIGN_IN_PATH).into_response();
    response.headers_mut().append(header::SET_COOKIE, cookie);
    Ok(response)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]  // Allow unwrap() in tests for cleaner test code
mod tests {
    use super::*;
    use crate::{routes::create_router, state::AppState};
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_validate_link_token_accepts_fresh_token() {
        let state = AppState::for_tests();
        let uuid = Uuid::new_v4();
        let (token, _) = state
            .tokens
            .issue(TokenPurpose::MagicLink, Some(uuid))
            .unwrap();

        let subject = validate_link_token(&state.tokens, TokenPurpose::MagicLink, &token);
        assert_eq!(subject, Some(uuid));
    }

    #[tokio::test]
    async fn test_validate_link_token_rejects_expired_token() {
        let state = AppState::for_tests();
        let claims = Claims {
            uuid: Some(Uuid::new_v4()),
            exp: OffsetDateTime::now_utc().unix_timestamp() - 7200,
        };
        let token = state.tokens.sign(TokenPurpose::MagicLink, &claims).unwrap();

        assert_eq!(
            validate_link_token(&state.tokens, TokenPurpose::MagicLink, &token),
            None
        );
    }

    #[tokio::test]
    async fn test_validate_link_token_rejects_wrong_purpose() {
        let state = AppState::for_tests();
        let (token, _) = state
            .tokens
            .issue(TokenPurpose::MagicLink, Some(Uuid::new_v4()))
            .unwrap();

        assert_eq!(
            validate_link_token(&state.tokens, TokenPurpose::EmailVerify, &token),
            None
        );
    }

    #[tokio::test]
    async fn test_validate_link_token_rejects_garbage() {
        let state = AppState::for_tests();
        assert_eq!(
            validate_link_token(&state.tokens, TokenPurpose::PasswordReset, "not-a-token"),
            None
        );
    }

    #[tokio::test]
    async fn test_sign_in_page_maps_magic_link_error_code() {
        let Json(body) = sign_in_page(Query(SignInPageQuery {
            error: Some("invalid-magic-link".to_string()),
        }))
        .await;
        assert_eq!(body["error_message"], MSG_MAGIC_INVALID);

        let Json(body) = sign_in_page(Query(SignInPageQuery {
            error: Some("unknown-code".to_string()),
        }))
        .await;
        assert!(body["error_message"].is_null());
    }

    #[tokio::test]
    async fn test_magic_link_without_token_redirects_to_sign_in() {
        let app = create_router(AppState::for_tests());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/magic-link")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            MAGIC_LINK_FAILURE_TARGET
        );
    }

    #[tokio::test]
    async fn test_verify_email_with_garbage_token_is_unauthorized() {
        let app = create_router(AppState::for_tests());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/verify-email?token=garbage")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_new_password_peek_rejects_expired_token() {
        let state = AppState::for_tests();
        let claims = Claims {
            uuid: Some(Uuid::new_v4()),
            exp: OffsetDateTime::now_utc().unix_timestamp() - 60,
        };
        let token = state
            .tokens
            .sign(TokenPurpose::PasswordReset, &claims)
            .unwrap();

        let app = create_router(state);
        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/new-password?token={token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
