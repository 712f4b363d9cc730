//! HTTP routes
//!
//! Route assembly plus the helpers every flow shares: request metadata
//! capture and the account + billing lookup.

pub mod account;
pub mod auth;
pub mod billing;
pub mod dispatch;
pub mod health;

use crate::{gate, state::AppState};
use axum::{
    http::{header, HeaderMap, HeaderValue, Method},
    middleware,
    routing::{get, post},
    Router,
};
use launchkit_auth::{metadata, BillingSnapshot};
use launchkit_shared::RequestMeta;
use time::OffsetDateTime;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use uuid::Uuid;

pub fn create_router(state: AppState) -> Router {
    let cors = match state.config.public_origin.parse::<HeaderValue>() {
        Ok(origin) => CorsLayer::new()
            .allow_origin(origin)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([header::CONTENT_TYPE])
            .allow_credentials(true),
        Err(_) => {
            tracing::warn!(
                origin = %state.config.public_origin,
                "public origin is not a valid header value, CORS left closed"
            );
            CorsLayer::new()
        }
    };

    Router::new()
        // Public account flows
        .route("/sign-up", post(auth::sign_up))
        .route("/sign-in", get(auth::sign_in_page).post(auth::sign_in))
        .route("/passwordless-sign-in", post(auth::passwordless_sign_in))
        .route("/magic-link", get(auth::magic_link))
        .route("/verify-email", get(auth::verify_email))
        .route("/forgot-password", post(auth::forgot_password))
        .route(
            "/new-password",
            get(auth::new_password_peek).post(auth::new_password),
        )
        // Signed-in surface
        .route("/dashboard", get(account::dashboard))
        .route("/dashboard/create-profile", get(account::create_profile))
        .route("/dashboard/sessions", get(account::sessions))
        .route("/dashboard/api/sign-out", post(auth::sign_out))
        .route("/dashboard/api/update-profile", post(account::update_profile))
        .route("/dashboard/api/update-password", post(account::update_password))
        .route("/dashboard/api/delete-account", post(account::delete_account))
        // Billing glue
        .route("/dashboard/billing/subscribe", get(billing::subscribe))
        .route("/dashboard/billing", get(billing::billing_return))
        // Internal dispatch and operations
        .route("/send-email", post(dispatch::send_email))
        .route("/health", get(health::health))
        .layer(middleware::from_fn_with_state(state.clone(), gate::auth_gate))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Client metadata from edge headers: proxy-reported IP (first forwarded
/// hop), edge-resolved country, and a user-agent classification.
pub fn capture_meta(headers: &HeaderMap) -> RequestMeta {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    let ip = forwarded.or_else(|| {
        headers
            .get("x-real-ip")
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    });

    let country = headers
        .get("cf-ipcountry")
        .or_else(|| headers.get("x-ip-country"))
        .and_then(|value| value.to_str().ok());

    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok());

    metadata::capture(ip, country, user_agent)
}

/// Account joined with its billing linkage, the shape every flow reads
#[derive(Debug, sqlx::FromRow)]
pub struct AccountRow {
    pub uuid: Uuid,
    pub email: String,
    pub nickname: String,
    pub organization: Option<String>,
    pub password_hash: String,
    pub email_verified: bool,
    pub processor_customer_id: Option<String>,
    pub current_plan_id: Option<String>,
    pub current_period_end_at: Option<OffsetDateTime>,
    pub had_subscription_before: Option<bool>,
}

impl AccountRow {
    pub fn billing_snapshot(&self) -> BillingSnapshot {
        BillingSnapshot {
            processor_customer_id: self.processor_customer_id.clone(),
            current_plan_id: self.current_plan_id.clone(),
            current_period_end_at: self.current_period_end_at,
            had_subscription_before: self.had_subscription_before,
        }
    }
}

const ACCOUNT_WITH_BILLING: &str =
    "SELECT u.uuid, u.email, u.nickname, u.organization, u.password_hash, u.email_verified, \
     b.processor_customer_id, b.current_plan_id, b.current_period_end_at, b.had_subscription_before \
     FROM user_account u LEFT JOIN billing_customer b ON b.account_uuid = u.uuid";

pub async fn account_by_email(
    pool: &sqlx::PgPool,
    email: &str,
) -> Result<Option<AccountRow>, sqlx::Error> {
    sqlx::query_as::<_, AccountRow>(&format!("{ACCOUNT_WITH_BILLING} WHERE u.email = $1"))
        .bind(email)
        .fetch_optional(pool)
        .await
}

pub async fn account_by_uuid(
    pool: &sqlx::PgPool,
    uuid: Uuid,
) -> Result<Option<AccountRow>, sqlx::Error> {
    sqlx::query_as::<_, AccountRow>(&format!("{ACCOUNT_WITH_BILLING} WHERE u.uuid = $1"))
        .bind(uuid)
        .fetch_optional(pool)
        .await
}

/// Append one audit row; callers decide whether a failure is fatal
pub async fn insert_activity<'e, E>(
    executor: E,
    account_uuid: Uuid,
    action: &str,
    meta: &RequestMeta,
) -> Result<(), sqlx::Error>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query(
        "INSERT INTO activity_record (account_uuid, action, ip, ip_country, device, os, browser) \
         VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(account_uuid)
    .bind(action)
    .bind(&meta.ip)
    .bind(&meta.ip_country)
    .bind(&meta.device)
    .bind(&meta.os)
    .bind(&meta.browser)
    .execute(executor)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use launchkit_shared::{UNKNOWN_COUNTRY, UNKNOWN_IP};

    #[test]
    fn test_capture_meta_prefers_first_forwarded_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.9"));
        headers.insert("cf-ipcountry", HeaderValue::from_static("NL"));

        let meta = capture_meta(&headers);
        assert_eq!(meta.ip, "203.0.113.7");
        assert_eq!(meta.ip_country, "NL");
    }

    #[test]
    fn test_capture_meta_falls_back_to_real_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.9"));
        headers.insert("x-ip-country", HeaderValue::from_static("DE"));

        let meta = capture_meta(&headers);
        assert_eq!(meta.ip, "198.51.100.9");
        assert_eq!(meta.ip_country, "DE");
    }

    #[test]
    fn test_capture_meta_defaults() {
        let meta = capture_meta(&HeaderMap::new());
        assert_eq!(meta.ip, UNKNOWN_IP);
        assert_eq!(meta.ip_country, UNKNOWN_COUNTRY);
        assert_eq!(meta.device, "unknown");
    }
}
