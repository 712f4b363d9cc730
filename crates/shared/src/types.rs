//! Common types used across launchkit

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// =============================================================================
// Application environment
// =============================================================================

/// Deployment environment, passed explicitly into every component that
/// changes behavior between local development and production (cookie
/// security flags, CAPTCHA enforcement). Components never read this from
/// ambient process state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppEnv {
    Development,
    Production,
}

impl AppEnv {
    pub fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }
}

impl FromStr for AppEnv {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            other => Err(format!("unknown app environment: {other}")),
        }
    }
}

impl fmt::Display for AppEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Development => write!(f, "development"),
            Self::Production => write!(f, "production"),
        }
    }
}

// =============================================================================
// Request metadata
// =============================================================================

/// Fallback when no client IP header is present
pub const UNKNOWN_IP: &str = "undefined-ip";
/// Fallback when no country header is present
pub const UNKNOWN_COUNTRY: &str = "undefined-ipcountry";

/// Per-request client metadata captured at the edge and stored alongside
/// sessions and activity records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMeta {
    pub ip: String,
    pub ip_country: String,
    pub device: String,
    pub os: String,
    pub browser: String,
}

impl Default for RequestMeta {
    fn default() -> Self {
        Self {
            ip: UNKNOWN_IP.to_string(),
            ip_country: UNKNOWN_COUNTRY.to_string(),
            device: "unknown".to_string(),
            os: "unknown".to_string(),
            browser: "unknown".to_string(),
        }
    }
}

// =============================================================================
// PII masking
// =============================================================================

/// Mask an email address for logs and user-visible confirmations:
/// `example@domain.com` -> `ex*****@domain.com`.
pub fn mask_email(email: &str) -> String {
    match email.find('@') {
        Some(at) => {
            let prefix: String = email[..at].chars().take(2).collect();
            format!("{prefix}*****{}", &email[at..])
        }
        None => "*****".to_string(),
    }
}

/// Mask the interior of an IPv6 address, keeping the first and last hextet:
/// `2401:4900:1c2a:18e:c0f3:3c02:e9cc:1375` -> `2401:▒▒▒▒▒▒:1375`.
/// IPv4 addresses and placeholder values pass through unchanged.
pub fn mask_ip(ip: &str) -> String {
    let hextets: Vec<&str> = ip.split(':').collect();
    if hextets.len() < 3 {
        return ip.to_string();
    }
    let first = hextets[0];
    let last = hextets[hextets.len() - 1];
    format!("{first}:▒▒▒▒▒▒:{last}")
}
