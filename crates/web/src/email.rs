//! Email dispatch
//!
//! Flows never call the email provider directly. [`EmailClient`] POSTs a
//! task to this deployment's own `/send-email` endpoint, authenticated with
//! a 60 second InternalApi token, mirroring a deployment where dispatch runs
//! on a separate instance of the same binary. The endpoint authorizes the
//! request, renders the task's HTML body through [`EmailSender`], and
//! forwards it to the Resend-style provider API.

use crate::error::ApiError;
use launchkit_auth::{TokenCodec, TokenPurpose};
use launchkit_shared::mask_email;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

const RESEND_URL: &str = "https://api.resend.com/emails";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailTask {
    VerifyEmail,
    MagicLinkSignIn,
    ResetPwdEmail,
    ResetPwdSuccessNotification,
    AccountDeletedNotification,
}

impl EmailTask {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::VerifyEmail => "verify_email",
            Self::MagicLinkSignIn => "magic_link_sign_in",
            Self::ResetPwdEmail => "reset_pwd_email",
            Self::ResetPwdSuccessNotification => "reset_pwd_success_notification",
            Self::AccountDeletedNotification => "account_deleted_notification",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "verify_email" => Some(Self::VerifyEmail),
            "magic_link_sign_in" => Some(Self::MagicLinkSignIn),
            "reset_pwd_email" => Some(Self::ResetPwdEmail),
            "reset_pwd_success_notification" => Some(Self::ResetPwdSuccessNotification),
            "account_deleted_notification" => Some(Self::AccountDeletedNotification),
            _ => None,
        }
    }
}

/// Task payload carried in the `/send-email` body. Link tokens are raw
/// purpose tokens; the dispatch side builds the full URL so links always
/// point at the configured origin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailInfo {
    pub uuid: Uuid,
    pub email: String,
    pub nickname: String,
    pub api_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_verify_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub magic_link_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_reset_token: Option<String>,
}

// =============================================================================
// Flow-side client
// =============================================================================

#[derive(Clone)]
pub struct EmailClient {
    client: reqwest::Client,
    origin: String,
    tokens: TokenCodec,
}

impl EmailClient {
    pub fn new(public_origin: &str, tokens: TokenCodec) -> Self {
        Self {
            client: reqwest::Client::new(),
            origin: public_origin.trim_end_matches('/').to_string(),
            tokens,
        }
    }

    /// Send a task to the dispatch endpoint and wait for the outcome
    pub async fn dispatch(
        &self,
        task: EmailTask,
        account_uuid: Uuid,
        email: &str,
        nickname: &str,
        purpose_token: Option<String>,
    ) -> Result<(), ApiError> {
        let (api_token, _) = self.tokens.issue(TokenPurpose::InternalApi, Some(account_uuid))?;
        let mut info = EmailInfo {
            uuid: account_uuid,
            email: email.to_string(),
            nickname: nickname.to_string(),
            api_token,
            email_verify_token: None,
            magic_link_token: None,
            password_reset_token: None,
        };
        match task {
            EmailTask::VerifyEmail => info.email_verify_token = purpose_token,
            EmailTask::MagicLinkSignIn => info.magic_link_token = purpose_token,
            EmailTask::ResetPwdEmail => info.password_reset_token = purpose_token,
            EmailTask::ResetPwdSuccessNotification | EmailTask::AccountDeletedNotification => {}
        }

        let response = self
            .client
            .post(format!("{}/send-email", self.origin))
            .header("Origin", &self.origin)
            .json(&json!({ "task": task.as_str(), "info": info }))
            .send()
            .await?;

        if !response.status().is_success() {
            tracing::warn!(
                task = task.as_str(),
                status = %response.status(),
                "email dispatch rejected"
            );
            return Err(ApiError::Internal);
        }
        tracing::info!(task = task.as_str(), email = %mask_email(email), "email dispatched");
        Ok(())
    }

    /// Fire-and-forget dispatch for best-effort sends
    pub fn dispatch_detached(
        &self,
        task: EmailTask,
        account_uuid: Uuid,
        email: &str,
        nickname: &str,
        purpose_token: Option<String>,
    ) {
        let client = self.clone();
        let email = email.to_string();
        let nickname = nickname.to_string();
        tokio::spawn(async move {
            if let Err(err) = client
                .dispatch(task, account_uuid, &email, &nickname, purpose_token)
                .await
            {
                tracing::warn!(task = task.as_str(), error = %err, "detached email dispatch failed");
            }
        });
    }
}

// =============================================================================
// Provider-side sender
// =============================================================================

#[derive(Clone)]
pub struct EmailSender {
    client: reqwest::Client,
    api_key: String,
    from: String,
    app_name: String,
    app_domain: String,
    public_origin: String,
}

impl EmailSender {
    pub fn new(
        api_key: String,
        from: String,
        app_name: String,
        app_domain: String,
        public_origin: &str,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            from,
            app_name,
            app_domain,
            public_origin: public_origin.trim_end_matches('/').to_string(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.api_key.is_empty()
    }

    /// Render and send one task's email
    pub async fn send_task(&self, task: EmailTask, info: &EmailInfo) -> Result<(), ApiError> {
        let (subject, html) = self.render(task, info)?;
        self.send(&info.email, subject, &html).await
    }

    fn render(&self, task: EmailTask, info: &EmailInfo) -> Result<(&'static str, String), ApiError> {
        let name = &self.app_name;
        let origin = &self.public_origin;
        let domain = &self.app_domain;
        let nickname = &info.nickname;

        let rendered = match task {
            EmailTask::VerifyEmail => {
                let link = self.link("/verify-email", info.email_verify_token.as_deref(), task)?;
                (
                    "Register Verification",
                    format!(
                        "<p>Hello,<br><br>Welcome to <b>{name}</b>.<br><br>Please click the link \
                         below to verify your email.<br><br><b><a href=\"{link}\">Verify Email</a></b> \
                         (This link will expire in 24 hours)<br><br>Thank you,<br>\
                         <a href=\"{origin}\">{name}</a></p>"
                    ),
                )
            }
            EmailTask::MagicLinkSignIn => {
                let link = self.link("/magic-link", info.magic_link_token.as_deref(), task)?;
                (
                    "Magic Link Sign In",
                    format!(
                        "<p>Hi {nickname},<br><br>Please click the magic link below to sign in to \
                         your account.<br><br><b><a href=\"{link}\">Sign In</a></b> (This link will \
                         expire in 30 minutes)<br><br>Thank you,<br>\
                         <a href=\"{origin}\">{name}</a></p>"
                    ),
                )
            }
            EmailTask::ResetPwdEmail => {
                let link = self.link("/new-password", info.password_reset_token.as_deref(), task)?;
                (
                    "Password Reset Request",
                    format!(
                        "<p>Hi {nickname},<br><br>We received a request to reset your password. If \
                         you want to continue, click the link below to set your new password.<br><br>\
                         <b><a href=\"{link}\">Reset Password</a></b> (This link will expire in \
                         1 hour)<br><br>Thank you,<br><a href=\"{origin}\">{name}</a></p>"
                    ),
                )
            }
            EmailTask::ResetPwdSuccessNotification => (
                "Password Reset Success",
                format!(
                    "<p>Hi {nickname},<br><br>Your password has been reset successfully.<br><br>If \
                     the action was not done by you, please contact support@{domain} immediately.\
                     <br><br>Thank you,<br><a href=\"{origin}\">{name}</a></p>"
                ),
            ),
            EmailTask::AccountDeletedNotification => (
                "Account Deleted",
                format!(
                    "<p>Hi {nickname},<br><br>Your account has been deleted successfully, we are \
                     sad to see you leave.<br><br>If the action was not done by you, please contact \
                     support@{domain} immediately.<br><br>Thank you,<br>\
                     <a href=\"{origin}\">{name}</a></p>"
                ),
            ),
        };
        Ok(rendered)
    }

    fn link(&self, path: &str, token: Option<&str>, task: EmailTask) -> Result<String, ApiError> {
        let token = token.ok_or_else(|| {
            tracing::warn!(task = task.as_str(), "task payload missing its link token");
            ApiError::validation("Invalid request.", &["info"])
        })?;
        Ok(format!("{}{path}?token={token}", self.public_origin))
    }

    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<(), ApiError> {
        if !self.is_enabled() {
            tracing::warn!(
                subject,
                to = %mask_email(to),
                "email provider not configured, dropping message"
            );
            return Ok(());
        }

        let response = self
            .client
            .post(RESEND_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&json!({
                "from": self.from,
                "to": to,
                "subject": subject,
                "html": html,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            tracing::error!(status = %response.status(), "email provider rejected the message");
            return Err(ApiError::Internal);
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]  // Allow unwrap() in tests for cleaner test code
mod tests {
    use super::*;

    fn sender() -> EmailSender {
        EmailSender::new(
            String::new(),
            "Launchkit <noreply@mail.example.com>".to_string(),
            "Launchkit".to_string(),
            "example.com".to_string(),
            "https://example.com/",
        )
    }

    fn info_with(token: Option<&str>) -> EmailInfo {
        EmailInfo {
            uuid: Uuid::new_v4(),
            email: "sam@example.com".to_string(),
            nickname: "sam".to_string(),
            api_token: "api".to_string(),
            email_verify_token: token.map(str::to_string),
            magic_link_token: token.map(str::to_string),
            password_reset_token: token.map(str::to_string),
        }
    }

    #[test]
    fn test_task_names_round_trip() {
        for task in [
            EmailTask::VerifyEmail,
            EmailTask::MagicLinkSignIn,
            EmailTask::ResetPwdEmail,
            EmailTask::ResetPwdSuccessNotification,
            EmailTask::AccountDeletedNotification,
        ] {
            assert_eq!(EmailTask::parse(task.as_str()), Some(task));
        }
        assert_eq!(EmailTask::parse("subscription_success"), None);
    }

    #[test]
    fn test_render_builds_link_from_origin() {
        let (subject, html) = sender()
            .render(EmailTask::MagicLinkSignIn, &info_with(Some("tok123")))
            .unwrap();
        assert_eq!(subject, "Magic Link Sign In");
        assert!(html.contains("https://example.com/magic-link?token=tok123"));
        assert!(html.contains("Hi sam,"));
    }

    #[test]
    fn test_render_rejects_missing_link_token() {
        let err = sender().render(EmailTask::ResetPwdEmail, &info_with(None));
        assert!(err.is_err());
    }

    #[test]
    fn test_notification_tasks_need_no_token() {
        let (subject, html) = sender()
            .render(EmailTask::AccountDeletedNotification, &info_with(None))
            .unwrap();
        assert_eq!(subject, "Account Deleted");
        assert!(html.contains("support@example.com"));
    }

    #[tokio::test]
    async fn test_disabled_sender_drops_quietly() {
        let result = sender().send("sam@example.com", "Subject", "<p>hi</p>").await;
        assert!(result.is_ok());
    }

    #[test]
    fn test_info_serialization_skips_absent_tokens() {
        let info = EmailInfo {
            email_verify_token: None,
            magic_link_token: None,
            password_reset_token: None,
            ..info_with(Some("x"))
        };
        let value = serde_json::to_value(&info).unwrap();
        assert!(value.get("email_verify_token").is_none());
        assert!(value.get("api_token").is_some());
    }
}
