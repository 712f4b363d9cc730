//! Payment-processor glue
//!
//! The processor hosts checkout and the customer portal; this side only
//! issues the CSRF pair embedded in the redirect-back URLs and validates it
//! when the browser returns. Missing or mismatched pairs drop the whole
//! login, not just the CSRF cookie, so a forged return link cannot ride an
//! existing session.

use crate::{
    cookies, csrf,
    error::{ApiError, ApiResult},
    gate::Identity,
    state::AppState,
};
use axum::{
    extract::{Query, State},
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde_json::{json, Value};
use std::collections::HashMap;

/// Start of the subscribe flow: set the CSRF cookie and hand the token to
/// the client for the processor's success/cancel URLs.
pub async fn subscribe(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> ApiResult<Response> {
    let token = csrf::issue_token();
    let cookie = cookies::build(
        cookies::CSRF_COOKIE,
        &token,
        csrf::CSRF_TTL_SECONDS,
        state.config.app_env,
    )?;

    tracing::debug!(account_uuid = %identity.uuid, "csrf pair issued");
    let mut response = Json(json!({ "csrf_token": token })).into_response();
    response.headers_mut().append(header::SET_COOKIE, cookie);
    Ok(response)
}

/// Redirect-back landing. Only requests carrying a processor return marker
/// are CSRF-checked; ordinary page loads pass straight to the snapshot.
pub async fn billing_return(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> ApiResult<Response> {
    if csrf::has_return_markers(&query) {
        let cookie_token = cookies::value(&headers, cookies::CSRF_COOKIE);
        if !csrf::pair_matches(
            query.get("csrf_token").map(String::as_str),
            cookie_token.as_deref(),
        ) {
            tracing::warn!(
                account_uuid = %identity.uuid,
                "csrf pair mismatch on billing return, dropping session cookies"
            );
            let mut response = ApiError::validation("Invalid request.", &[]).into_response();
            let response_headers = response.headers_mut();
            response_headers.append(
                header::SET_COOKIE,
                cookies::clear(cookies::LOGIN_COOKIE, state.config.app_env)?,
            );
            response_headers.append(
                header::SET_COOKIE,
                cookies::clear(cookies::CSRF_COOKIE, state.config.app_env)?,
            );
            return Ok(response);
        }
    }

    Ok(Json(subscription_snapshot(&identity)).into_response())
}

fn subscription_snapshot(identity: &Identity) -> Value {
    json!({
        "processor_customer_id": identity.processor_customer_id,
        "current_plan_id": identity.current_plan_id,
        "current_period_end_at": identity.current_period_end_at,
        "had_subscription_before": identity.had_subscription_before,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]  // Allow unwrap() in tests for cleaner test code
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use axum::http::{HeaderValue, StatusCode};
    use uuid::Uuid;

    fn identity() -> Identity {
        Identity {
            uuid: Uuid::new_v4(),
            nickname: "sam".to_string(),
            email: "sam@example.com".to_string(),
            organization: None,
            processor_customer_id: Some("cus_123".to_string()),
            current_plan_id: Some("plan_pro".to_string()),
            current_period_end_at: Some(1_900_000_000),
            had_subscription_before: Some(true),
            session_token: "token".to_string(),
        }
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_subscribe_sets_cookie_matching_body_token() {
        let state = AppState::for_tests();
        let response = subscribe(State(state), Extension(identity())).await.unwrap();

        let cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(cookie.starts_with("csrf_token="));

        let body = body_json(response).await;
        let token = body["csrf_token"].as_str().unwrap();
        assert!(cookie.starts_with(&format!("csrf_token={token};")));
    }

    #[tokio::test]
    async fn test_return_with_marker_and_mismatch_drops_cookies() {
        let state = AppState::for_tests();
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("csrf_token=cookie-value"),
        );
        let mut query = HashMap::new();
        query.insert("payment_status".to_string(), "success".to_string());
        query.insert("csrf_token".to_string(), "other-value".to_string());

        let response = billing_return(State(state), Extension(identity()), headers, Query(query))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let cleared: Vec<&str> = response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap())
            .collect();
        assert_eq!(cleared.len(), 2);
        assert!(cleared.iter().any(|c| c.starts_with("login_auth_token=;")));
        assert!(cleared.iter().any(|c| c.starts_with("csrf_token=;")));
    }

    #[tokio::test]
    async fn test_return_with_matching_pair_reports_snapshot() {
        let state = AppState::for_tests();
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("csrf_token=pair-value"),
        );
        let mut query = HashMap::new();
        query.insert("session_id".to_string(), "cs_123".to_string());
        query.insert("csrf_token".to_string(), "pair-value".to_string());

        let response = billing_return(State(state), Extension(identity()), headers, Query(query))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["current_plan_id"], "plan_pro");
        assert_eq!(body["had_subscription_before"], true);
    }

    #[tokio::test]
    async fn test_return_without_markers_skips_csrf_check() {
        let state = AppState::for_tests();
        let response = billing_return(
            State(state),
            Extension(identity()),
            HeaderMap::new(),
            Query(HashMap::new()),
        )
        .await
        .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["processor_customer_id"], "cus_123");
    }
}
