//! Cookie construction and parsing
//!
//! Two cookies exist: `login_auth_token` (the signed login token, lifetime
//! matching the token's own expiry) and `csrf_token` (the short-lived billing
//! redirect-back pair). Both are HttpOnly, SameSite=Lax, Path=/, and carry
//! `Secure` outside development.

use axum::http::{
    header::{InvalidHeaderValue, COOKIE},
    HeaderMap, HeaderValue,
};
use launchkit_shared::AppEnv;

pub const LOGIN_COOKIE: &str = "login_auth_token";
pub const CSRF_COOKIE: &str = "csrf_token";

/// Build a Set-Cookie value. Token values are base64url or uuid-hex, so
/// header construction only fails on caller error.
pub fn build(
    name: &str,
    value: &str,
    max_age_seconds: i64,
    env: AppEnv,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie =
        format!("{name}={value}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age_seconds}");
    if env.is_production() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

/// Expire a cookie immediately
pub fn clear(name: &str, env: AppEnv) -> Result<HeaderValue, InvalidHeaderValue> {
    build(name, "", 0, env)
}

/// Extract a cookie value from the request headers
pub fn value(headers: &HeaderMap, name: &str) -> Option<String> {
    let raw = headers.get(COOKIE)?.to_str().ok()?;
    for pair in raw.split(';') {
        let mut parts = pair.trim().splitn(2, '=');
        if parts.next() == Some(name) {
            return parts.next().map(|v| v.to_string());
        }
    }
    None
}
