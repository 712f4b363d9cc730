//! Configuration management
//!
//! All configuration is loaded once at startup from environment variables;
//! components receive explicit values and never read the environment
//! themselves. Every token purpose has its own signing secret so a leaked
//! key for one purpose cannot forge tokens for another.

use launchkit_auth::{TokenSecrets, TokenTtls};
use launchkit_shared::AppEnv;
use std::env;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("{0} must be at least 32 characters")]
    WeakSecret(&'static str),

    #[error("Invalid APP_ENV value: {0}")]
    InvalidAppEnv(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub bind_address: String,
    /// Public origin of this deployment, scheme included. Used for links in
    /// outgoing emails, the loopback email dispatch URL, and the
    /// `/send-email` origin check.
    pub public_origin: String,
    pub app_env: AppEnv,

    // Stores
    pub database_url: String,
    pub redis_url: String,

    // Token signing, one secret per purpose
    pub login_token_secret: String,
    pub magic_link_token_secret: String,
    pub email_verify_token_secret: String,
    pub password_reset_token_secret: String,
    pub internal_api_token_secret: String,
    pub login_token_ttl_hours: i64,

    // Email (Resend-style API). An empty key disables outbound email.
    pub resend_api_key: String,
    pub app_name: String,
    pub app_domain: String,

    // CAPTCHA (Turnstile-style). An empty secret disables verification.
    pub captcha_secret: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            public_origin: env::var("PUBLIC_ORIGIN")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            app_env: {
                let raw = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
                raw.parse().map_err(|_| ConfigError::InvalidAppEnv(raw))?
            },

            database_url: env::var("DATABASE_URL").map_err(|_| ConfigError::Missing("DATABASE_URL"))?,
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),

            login_token_secret: required_secret("LOGIN_TOKEN_SECRET")?,
            magic_link_token_secret: required_secret("MAGIC_LINK_TOKEN_SECRET")?,
            email_verify_token_secret: required_secret("EMAIL_VERIFY_TOKEN_SECRET")?,
            password_reset_token_secret: required_secret("PASSWORD_RESET_TOKEN_SECRET")?,
            internal_api_token_secret: required_secret("INTERNAL_API_TOKEN_SECRET")?,
            login_token_ttl_hours: env::var("LOGIN_TOKEN_TTL_HOURS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(24),

            resend_api_key: env::var("RESEND_API_KEY").unwrap_or_default(),
            app_name: env::var("APP_NAME").unwrap_or_else(|_| "Launchkit".to_string()),
            app_domain: env::var("APP_DOMAIN").unwrap_or_else(|_| "localhost".to_string()),

            captcha_secret: env::var("CAPTCHA_SECRET").unwrap_or_default(),
        })
    }

    pub fn token_secrets(&self) -> TokenSecrets {
        TokenSecrets {
            login: self.login_token_secret.clone(),
            magic_link: self.magic_link_token_secret.clone(),
            email_verify: self.email_verify_token_secret.clone(),
            password_reset: self.password_reset_token_secret.clone(),
            internal_api: self.internal_api_token_secret.clone(),
        }
    }

    pub fn token_ttls(&self) -> TokenTtls {
        TokenTtls {
            login: time::Duration::hours(self.login_token_ttl_hours),
            ..TokenTtls::default()
        }
    }

    /// Sender address for outgoing email: `Name <noreply@mail.domain>`
    pub fn email_from(&self) -> String {
        format!("{} <noreply@mail.{}>", self.app_name, self.app_domain)
    }
}

/// Load a signing secret, rejecting values too short to resist brute force
fn required_secret(name: &'static str) -> Result<String, ConfigError> {
    let secret = env::var(name).map_err(|_| ConfigError::Missing(name))?;
    if secret.len() < 32 {
        return Err(ConfigError::WeakSecret(name));
    }
    Ok(secret)
}
