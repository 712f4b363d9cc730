//! Launchkit Web Library
//!
//! This crate contains the HTTP server components for Launchkit: request
//! flows, the auth gate, and the internal email dispatch endpoint.

pub mod captcha;
pub mod config;
pub mod cookies;
pub mod csrf;
pub mod email;
pub mod error;
pub mod gate;
pub mod routes;
pub mod state;
pub mod validate;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use state::AppState;
