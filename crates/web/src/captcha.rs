//! CAPTCHA verification (Turnstile-style challenge)
//!
//! Guards the public account flows. Verification fails closed: a missing
//! token, a provider fault, or an unreadable outcome all reject the request.
//! An empty secret disables verification for local development.

use launchkit_shared::AppEnv;
use serde::Deserialize;
use serde_json::json;

const VERIFY_URL: &str = "https://challenges.cloudflare.com/turnstile/v0/siteverify";

#[derive(Clone)]
pub struct CaptchaVerifier {
    client: reqwest::Client,
    secret: String,
    verify_url: String,
}

#[derive(Debug, Deserialize)]
struct VerifyOutcome {
    success: bool,
    #[serde(default, rename = "error-codes")]
    error_codes: Vec<String>,
}

impl CaptchaVerifier {
    pub fn new(secret: String, env: AppEnv) -> Self {
        if secret.is_empty() && env.is_production() {
            tracing::warn!("CAPTCHA secret not configured, human verification is disabled");
        }
        Self {
            client: reqwest::Client::new(),
            secret,
            verify_url: VERIFY_URL.to_string(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.secret.is_empty()
    }

    /// Check a challenge response token against the provider
    pub async fn verify(&self, token: Option<&str>) -> bool {
        if !self.is_enabled() {
            return true;
        }
        let Some(token) = token.filter(|t| !t.is_empty()) else {
            tracing::info!("captcha token missing from request");
            return false;
        };

        let result = self
            .client
            .post(&self.verify_url)
            .json(&json!({ "response": token, "secret": self.secret }))
            .send()
            .await;

        match result {
            Ok(response) => match response.json::<VerifyOutcome>().await {
                Ok(outcome) => {
                    if !outcome.success {
                        tracing::info!(errors = ?outcome.error_codes, "captcha verification failed");
                    }
                    outcome.success
                }
                Err(err) => {
                    tracing::warn!(error = %err, "captcha outcome unreadable, rejecting");
                    false
                }
            },
            Err(err) => {
                tracing::warn!(error = %err, "captcha provider unreachable, rejecting");
                false
            }
        }
    }

    #[cfg(test)]
    fn with_verify_url(mut self, url: &str) -> Self {
        self.verify_url = url.to_string();
        self
    }
}
