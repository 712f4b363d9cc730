//! Auth gate middleware
//!
//! Evaluated fresh on every request, in front of every route. Four terminal
//! outcomes: proceed with identity, proceed anonymous, redirect to sign-in,
//! redirect to dashboard. Paths under `/dashboard` require identity; a
//! well-signed token whose session no longer resolves forces
//! re-authentication even on public paths.

use crate::{cookies, error::ApiError, state::AppState};
use axum::{
    extract::{Request, State},
    http::header::SET_COOKIE,
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use launchkit_auth::{is_well_formed, SessionRecord, TokenCodec, TokenPurpose};
use launchkit_shared::AppEnv;
use serde::Serialize;
use uuid::Uuid;

pub const SIGN_IN_PATH: &str = "/sign-in";
pub const DASHBOARD_PATH: &str = "/dashboard";

/// Request-scoped identity, inserted into extensions once the cookie token
/// verified and its session resolved to the same subject.
#[derive(Debug, Clone, Serialize)]
pub struct Identity {
    pub uuid: Uuid,
    pub nickname: String,
    pub email: String,
    pub organization: Option<String>,
    pub processor_customer_id: Option<String>,
    pub current_plan_id: Option<String>,
    pub current_period_end_at: Option<i64>,
    pub had_subscription_before: Option<bool>,
    /// The login token string doubles as the session handle
    #[serde(skip)]
    pub session_token: String,
}

impl Identity {
    fn from_session(record: SessionRecord) -> Self {
        Self {
            uuid: record.account_uuid,
            nickname: record.nickname,
            email: record.email,
            organization: record.organization,
            processor_customer_id: record.processor_customer_id,
            current_plan_id: record.current_plan_id,
            current_period_end_at: record.current_period_end_at.map(|t| t.unix_timestamp()),
            had_subscription_before: record.had_subscription_before,
            session_token: record.session_id,
        }
    }
}

fn is_protected(path: &str) -> bool {
    path == DASHBOARD_PATH || path.starts_with("/dashboard/")
}

pub async fn auth_gate(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let path = request.uri().path().to_string();
    let env = state.config.app_env;

    // No cookie at all: anonymous, or sign-in redirect on protected paths
    let Some(token) = cookies::value(request.headers(), cookies::LOGIN_COOKIE) else {
        if is_protected(&path) {
            return Redirect::to(SIGN_IN_PATH).into_response();
        }
        return next.run(request).await;
    };

    // Structural checks run before any cryptographic work
    let Some(subject) = decode_subject(&token) else {
        return clear_and_reject(next, request, &path, env).await;
    };

    // Signature and expiry. An unusable token makes any backing session row
    // dead weight, so it is cleaned up on the way out.
    if let Err(reason) = state.tokens.verify(TokenPurpose::Login, &token) {
        tracing::debug!(reason = %reason, "login token failed verification");
        if let Err(err) = state.sessions.delete(&token).await {
            tracing::warn!(error = %err, "stale session cleanup failed");
        }
        return clear_and_reject(next, request, &path, env).await;
    }

    // The session must still exist and belong to the token's subject
    let resolved = match state.sessions.resolve(&token).await {
        Ok(resolved) => resolved,
        Err(err) => {
            tracing::error!(error = %err, "session resolution failed");
            return ApiError::Internal.into_response();
        }
    };

    match resolved {
        Some(record) if record.account_uuid == subject => {
            if path == SIGN_IN_PATH {
                return Redirect::to(DASHBOARD_PATH).into_response();
            }
            request.extensions_mut().insert(Identity::from_session(record));
            next.run(request).await
        }
        resolved => {
            if resolved.is_some() {
                tracing::warn!(subject = %subject, "session subject mismatch");
            }
            // Well-signed token with no usable session: force sign-in
            // everywhere, not just on protected paths
            let mut response = Redirect::to(SIGN_IN_PATH).into_response();
            append_clear_cookie(&mut response, env);
            response
        }
    }
}

/// Well-formedness and claim extraction without trusting the signature
fn decode_subject(token: &str) -> Option<Uuid> {
    if !is_well_formed(token) {
        tracing::debug!("login cookie is not token-shaped");
        return None;
    }
    match TokenCodec::decode_insecure(token) {
        Ok(claims) => {
            if claims.uuid.is_none() {
                tracing::debug!("login token carries no subject");
            }
            claims.uuid
        }
        Err(reason) => {
            tracing::debug!(reason = %reason, "login token undecodable");
            None
        }
    }
}

/// Clear the broken cookie, then redirect on protected paths or continue
/// anonymously elsewhere
async fn clear_and_reject(next: Next, request: Request, path: &str, env: AppEnv) -> Response {
    let mut response = if is_protected(path) {
        Redirect::to(SIGN_IN_PATH).into_response()
    } else {
        next.run(request).await
    };
    append_clear_cookie(&mut response, env);
    response
}

fn append_clear_cookie(response: &mut Response, env: AppEnv) {
    if let Ok(cookie) = cookies::clear(cookies::LOGIN_COOKIE, env) {
        response.headers_mut().append(SET_COOKIE, cookie);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]  // Allow unwrap() in tests for cleaner test code
mod tests {
    use super::*;
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request as HttpRequest, StatusCode},
        middleware,
        routing::get,
        Extension, Router,
    };
    use launchkit_auth::{BillingSnapshot, Claims};
    use launchkit_shared::RequestMeta;
    use time::OffsetDateTime;
    use tower::ServiceExt;

    fn app(state: AppState) -> Router {
        Router::new()
            .route("/", get(|| async { "public" }))
            .route("/sign-in", get(|| async { "sign-in" }))
            .route(
                "/dashboard",
                get(|identity: Option<Extension<Identity>>| async move {
                    match identity {
                        Some(Extension(identity)) => identity.email,
                        None => "anonymous".to_string(),
                    }
                }),
            )
            .layer(middleware::from_fn_with_state(state, auth_gate))
    }

    /// Issue a login token and mirror a matching session into the cache so
    /// resolution never reaches the unreachable test pool.
    async fn signed_in_state() -> (AppState, String) {
        let state = AppState::for_tests();
        let account = Uuid::new_v4();
        let (token, claims) = state
            .tokens
            .issue(TokenPurpose::Login, Some(account))
            .unwrap();
        seed_session(&state, &token, account, claims.exp).await;
        (state, token)
    }

    async fn seed_session(state: &AppState, token: &str, account: Uuid, exp: i64) {
        let record = SessionRecord::new(
            token.to_string(),
            account,
            "sam".to_string(),
            "sam@example.com".to_string(),
            None,
            BillingSnapshot::default(),
            &RequestMeta::default(),
            OffsetDateTime::from_unix_timestamp(exp).unwrap(),
        );
        state
            .cache
            .put(token, &serde_json::to_string(&record).unwrap(), 600)
            .await
            .unwrap();
    }

    fn get_request(path: &str, cookie: Option<&str>) -> HttpRequest<Body> {
        let mut builder = HttpRequest::builder().uri(path);
        if let Some(token) = cookie {
            builder = builder.header(header::COOKIE, format!("login_auth_token={token}"));
        }
        builder.body(Body::empty()).unwrap()
    }

    fn location(response: &axum::response::Response) -> &str {
        response
            .headers()
            .get(header::LOCATION)
            .unwrap()
            .to_str()
            .unwrap()
    }

    #[tokio::test]
    async fn test_no_cookie_protected_redirects() {
        let app = app(AppState::for_tests());
        let response = app.oneshot(get_request("/dashboard", None)).await.unwrap();

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), SIGN_IN_PATH);
    }

    #[tokio::test]
    async fn test_no_cookie_public_proceeds() {
        let app = app(AppState::for_tests());
        let response = app.oneshot(get_request("/", None)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_malformed_cookie_public_proceeds_and_clears() {
        let app = app(AppState::for_tests());
        let response = app
            .oneshot(get_request("/", Some("not-a-token")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let set_cookie = response.headers().get(header::SET_COOKIE).unwrap();
        assert!(set_cookie.to_str().unwrap().contains("Max-Age=0"));
    }

    #[tokio::test]
    async fn test_malformed_cookie_protected_redirects_and_clears() {
        let app = app(AppState::for_tests());
        let response = app
            .oneshot(get_request("/dashboard", Some("garbage.garbage")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), SIGN_IN_PATH);
        assert!(response.headers().contains_key(header::SET_COOKIE));
    }

    #[tokio::test]
    async fn test_resolved_session_populates_identity() {
        let (state, token) = signed_in_state().await;
        let app = app(state);
        let response = app
            .oneshot(get_request("/dashboard", Some(&token)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"sam@example.com");
    }

    #[tokio::test]
    async fn test_signed_in_visitor_leaves_sign_in_page() {
        let (state, token) = signed_in_state().await;
        let app = app(state);
        let response = app
            .oneshot(get_request("/sign-in", Some(&token)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), DASHBOARD_PATH);
    }

    #[tokio::test]
    async fn test_subject_mismatch_forces_sign_in_on_public_path() {
        let state = AppState::for_tests();
        let (token, claims) = state
            .tokens
            .issue(TokenPurpose::Login, Some(Uuid::new_v4()))
            .unwrap();
        // Session exists but belongs to someone else
        seed_session(&state, &token, Uuid::new_v4(), claims.exp).await;

        let app = app(state);
        let response = app.oneshot(get_request("/", Some(&token))).await.unwrap();

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), SIGN_IN_PATH);
        assert!(response.headers().contains_key(header::SET_COOKIE));
    }

    #[tokio::test]
    async fn test_expired_token_cleared_and_redirected() {
        let state = AppState::for_tests();
        let expired = Claims {
            uuid: Some(Uuid::new_v4()),
            exp: OffsetDateTime::now_utc().unix_timestamp() - 60,
        };
        let token = state.tokens.sign(TokenPurpose::Login, &expired).unwrap();

        let app = app(state);
        let response = app
            .oneshot(get_request("/dashboard", Some(&token)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), SIGN_IN_PATH);
        assert!(response.headers().contains_key(header::SET_COOKIE));
    }
}
