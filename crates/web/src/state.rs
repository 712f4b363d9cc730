//! Shared application state

use crate::{
    captcha::CaptchaVerifier,
    config::Config,
    email::{EmailClient, EmailSender},
};
use launchkit_auth::{RateLimiter, SessionStore, TokenCodec};
use launchkit_shared::KvCache;
use sqlx::PgPool;
use std::sync::Arc;

/// Cloned into every handler; every handle is internally synchronized
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pool: PgPool,
    pub cache: KvCache,
    pub tokens: TokenCodec,
    pub limiter: RateLimiter,
    pub sessions: SessionStore,
    pub email: EmailClient,
    pub sender: EmailSender,
    pub captcha: CaptchaVerifier,
}

impl AppState {
    pub fn new(config: Config, pool: PgPool, cache: KvCache) -> Self {
        let tokens = TokenCodec::new(&config.token_secrets(), config.token_ttls());
        let limiter = RateLimiter::new(cache.clone());
        let sessions = SessionStore::new(pool.clone(), cache.clone());
        let email = EmailClient::new(&config.public_origin, tokens.clone());
        let sender = EmailSender::new(
            config.resend_api_key.clone(),
            config.email_from(),
            config.app_name.clone(),
            config.app_domain.clone(),
            &config.public_origin,
        );
        let captcha = CaptchaVerifier::new(config.captcha_secret.clone(), config.app_env);

        Self {
            config: Arc::new(config),
            pool,
            cache,
            tokens,
            limiter,
            sessions,
            email,
            sender,
            captcha,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]  // Allow unwrap() in tests for cleaner test code
impl AppState {
    /// State over an unreachable lazy pool and the in-memory cache. Tests
    /// that stay on cache-served paths never touch Postgres; tests that do
    /// reach it observe a connection error.
    pub fn for_tests() -> Self {
        let config = Config {
            bind_address: "127.0.0.1:0".to_string(),
            public_origin: "http://localhost:3000".to_string(),
            app_env: launchkit_shared::AppEnv::Development,
            database_url: "postgres://127.0.0.1:1/unreachable".to_string(),
            redis_url: String::new(),
            login_token_secret: "login-test-secret-0123456789abcdef!".to_string(),
            magic_link_token_secret: "magic-test-secret-0123456789abcdef!".to_string(),
            email_verify_token_secret: "verify-test-secret-0123456789abcdef".to_string(),
            password_reset_token_secret: "reset-test-secret-0123456789abcdef!".to_string(),
            internal_api_token_secret: "internal-test-secret-0123456789abcd".to_string(),
            login_token_ttl_hours: 24,
            resend_api_key: String::new(),
            app_name: "Launchkit".to_string(),
            app_domain: "localhost".to_string(),
            captcha_secret: String::new(),
        };
        let pool = PgPool::connect_lazy(&config.database_url).unwrap();
        Self::new(config, pool, KvCache::in_memory())
    }
}
