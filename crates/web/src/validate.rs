//! Request field validation
//!
//! Shape checks run before any quota, CAPTCHA, or store work. Email
//! addresses are normalized (trimmed, lowercased) here so every flow keys
//! its lookups and counters identically.

use crate::error::ApiError;

pub const MAX_EMAIL_CHARS: usize = 64;
pub const MAX_NICKNAME_CHARS: usize = 32;
pub const MAX_ORGANIZATION_CHARS: usize = 64;
pub const MAX_REFERRAL_CHARS: usize = 64;

/// Validate and normalize an email address
pub fn email(raw: &str) -> Result<String, ApiError> {
    let email = raw.trim().to_lowercase();
    if email.chars().count() > MAX_EMAIL_CHARS || !looks_like_email(&email) {
        return Err(ApiError::validation(
            "You have entered an invalid format email, please re-enter and try again.",
            &["email"],
        ));
    }
    Ok(email)
}

/// Bounds-check a password and its confirmation
pub fn password_pair(password: &str, confirm: &str) -> Result<(), ApiError> {
    launchkit_auth::validate_password(password)?;
    if password != confirm {
        return Err(ApiError::validation(
            "Passwords do not match, please re-enter and try again.",
            &["confirm_password"],
        ));
    }
    Ok(())
}

pub fn nickname(raw: &str) -> Result<String, ApiError> {
    let nickname = raw.trim().to_string();
    let count = nickname.chars().count();
    if count == 0 || count > MAX_NICKNAME_CHARS {
        return Err(ApiError::validation(
            "Nickname must be between 1 and 32 characters.",
            &["nickname"],
        ));
    }
    Ok(nickname)
}

/// Optional organization; empty input clears the field
pub fn organization(raw: Option<&str>) -> Result<Option<String>, ApiError> {
    let Some(value) = raw.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };
    if value.chars().count() > MAX_ORGANIZATION_CHARS {
        return Err(ApiError::validation(
            "Organization must be at most 64 characters.",
            &["organization"],
        ));
    }
    Ok(Some(value.to_string()))
}

pub fn referral_code(raw: Option<&str>) -> Result<Option<String>, ApiError> {
    let Some(value) = raw.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };
    if value.chars().count() > MAX_REFERRAL_CHARS {
        return Err(ApiError::validation(
            "Referral code must be at most 64 characters.",
            &["referral_code"],
        ));
    }
    Ok(Some(value.to_string()))
}

fn looks_like_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !email.chars().any(char::is_whitespace)
}
