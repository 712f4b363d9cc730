//! Launchkit Auth Primitives
//!
//! Token signing and verification, password hashing, fixed-window rate
//! limiting, and the dual-store session abstraction. This crate has no HTTP
//! types; the web crate adapts these primitives onto routes and middleware.

pub mod metadata;
pub mod password;
pub mod rate_limit;
pub mod session;
pub mod token;

pub use password::{hash_password, validate_password, verify_password, PasswordError};
pub use rate_limit::{LimitDecision, LimitPurpose, RateLimitError, RateLimiter};
pub use session::{BillingSnapshot, SessionError, SessionPatch, SessionRecord, SessionStore};
pub use token::{
    is_well_formed, Claims, TokenCodec, TokenError, TokenPurpose, TokenSecrets, TokenTtls,
};
