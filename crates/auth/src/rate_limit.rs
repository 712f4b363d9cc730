//! Fixed-window rate limiting over the fast cache
//!
//! Counters are JSON `{count, expire}` values keyed by
//! `{purpose}:{scope}:{actor}`. A window is anchored to its first request:
//! later hits keep the original expiry, so windows never slide and reset
//! only by lapsing. Every cache fault fails open; limiting here is abuse
//! mitigation, not the security boundary.

use launchkit_shared::{CacheError, KvCache};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

const HOUR_SECONDS: i64 = 60 * 60;
const DAY_SECONDS: i64 = 24 * HOUR_SECONDS;

/// Counters this close to lapsing are not rewritten; the entry expires on
/// its own before the next realistic attempt
const MIN_PERSIST_TTL_SECONDS: i64 = 10;

/// Operation classes with independent counters. The magic-link request flow
/// shares the `SignIn` counters; `MagicLink` covers link consumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitPurpose {
    SignUp,
    SignIn,
    MagicLink,
    VerifyEmail,
    ForgotPassword,
    NewPassword,
}

impl LimitPurpose {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SignUp => "sign-up",
            Self::SignIn => "sign-in",
            Self::MagicLink => "magic-link",
            Self::VerifyEmail => "verify-email",
            Self::ForgotPassword => "forgot-password",
            Self::NewPassword => "new-password",
        }
    }

    fn ip_quota(self) -> Quota {
        match self {
            Self::SignUp => Quota {
                max_count: 10,
                window_seconds: DAY_SECONDS,
            },
            _ => Quota {
                max_count: 10,
                window_seconds: HOUR_SECONDS,
            },
        }
    }

    fn user_quota(self) -> Option<Quota> {
        match self {
            Self::SignIn | Self::ForgotPassword => Some(Quota {
                max_count: 5,
                window_seconds: DAY_SECONDS,
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Quota {
    max_count: u32,
    window_seconds: i64,
}

/// Outcome of a limit check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitDecision {
    Allowed,
    Blocked,
}

impl LimitDecision {
    pub fn is_blocked(self) -> bool {
        matches!(self, Self::Blocked)
    }
}

/// Internal fault during counter bookkeeping; always logged and swallowed
#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("counter payload unreadable: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Cached counter value. `expire` is the window's fixed unix expiry.
#[derive(Debug, Serialize, Deserialize)]
struct WindowCounter {
    count: u32,
    expire: i64,
}

#[derive(Clone)]
pub struct RateLimiter {
    cache: KvCache,
}

impl RateLimiter {
    pub fn new(cache: KvCache) -> Self {
        Self { cache }
    }

    /// Proactive gate: count the attempt before the guarded operation runs.
    /// A scope already at quota blocks without incrementing. Scopes whose
    /// actor is unknown are skipped.
    pub async fn check_and_increment(
        &self,
        purpose: LimitPurpose,
        ip: Option<&str>,
        user: Option<&str>,
    ) -> LimitDecision {
        for (key, quota) in scope_keys(purpose, ip, user) {
            match self.increment_scope(&key, quota).await {
                Ok(LimitDecision::Blocked) => return LimitDecision::Blocked,
                Ok(LimitDecision::Allowed) => {}
                Err(err) => {
                    tracing::warn!(key = %key, error = %err, "rate limit check failed, allowing");
                }
            }
        }
        LimitDecision::Allowed
    }

    /// Reactive bookkeeping: count an explicit failure signal. Never blocks
    /// by itself; `check_only` consults the counters before the next attempt.
    pub async fn record_failure(&self, purpose: LimitPurpose, ip: Option<&str>, user: Option<&str>) {
        for (key, quota) in scope_keys(purpose, ip, user) {
            if let Err(err) = self.bump_scope(&key, quota).await {
                tracing::warn!(key = %key, error = %err, "failure counter update failed");
            }
        }
    }

    /// Pure read, mutates nothing. Blocked when any scope is at quota.
    pub async fn check_only(
        &self,
        purpose: LimitPurpose,
        ip: Option<&str>,
        user: Option<&str>,
    ) -> LimitDecision {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        for (key, quota) in scope_keys(purpose, ip, user) {
            match self.read_counter(&key, now).await {
                Ok(Some(counter)) if counter.count >= quota.max_count => {
                    return LimitDecision::Blocked;
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(key = %key, error = %err, "rate limit read failed, allowing");
                }
            }
        }
        LimitDecision::Allowed
    }

    async fn increment_scope(&self, key: &str, quota: Quota) -> Result<LimitDecision, RateLimitError> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let next = match self.read_counter(key, now).await? {
            Some(current) if current.count >= quota.max_count => {
                return Ok(LimitDecision::Blocked);
            }
            Some(current) => WindowCounter {
                count: current.count + 1,
                expire: current.expire,
            },
            None => WindowCounter {
                count: 1,
                expire: now + quota.window_seconds,
            },
        };
        self.persist_counter(key, &next, now).await?;
        Ok(LimitDecision::Allowed)
    }

    async fn bump_scope(&self, key: &str, quota: Quota) -> Result<(), RateLimitError> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let next = match self.read_counter(key, now).await? {
            Some(current) => WindowCounter {
                count: current.count + 1,
                expire: current.expire,
            },
            None => WindowCounter {
                count: 1,
                expire: now + quota.window_seconds,
            },
        };
        self.persist_counter(key, &next, now).await
    }

    /// A counter whose window has already lapsed counts as absent even if
    /// the cache entry lingers (TTL granularity, clock drift)
    async fn read_counter(&self, key: &str, now: i64) -> Result<Option<WindowCounter>, RateLimitError> {
        match self.cache.get(key).await? {
            Some(payload) => {
                let counter: WindowCounter = serde_json::from_str(&payload)?;
                Ok(Some(counter).filter(|c| c.expire > now))
            }
            None => Ok(None),
        }
    }

    async fn persist_counter(
        &self,
        key: &str,
        counter: &WindowCounter,
        now: i64,
    ) -> Result<(), RateLimitError> {
        let remaining = counter.expire - now;
        if remaining <= MIN_PERSIST_TTL_SECONDS {
            return Ok(());
        }
        let payload = serde_json::to_string(counter)?;
        self.cache.put(key, &payload, remaining as u64).await?;
        Ok(())
    }
}

/// Resolve the scopes a call touches. Unknown actors contribute no scope.
fn scope_keys(
    purpose: LimitPurpose,
    ip: Option<&str>,
    user: Option<&str>,
) -> Vec<(String, Quota)> {
    let mut scopes = Vec::with_capacity(2);
    if let Some(ip) = ip {
        scopes.push((format!("{}:ip:{ip}", purpose.as_str()), purpose.ip_quota()));
    }
    if let (Some(user), Some(quota)) = (user, purpose.user_quota()) {
        scopes.push((format!("{}:user:{user}", purpose.as_str()), quota));
    }
    scopes
}
