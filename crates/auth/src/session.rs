//! Dual-store login sessions
//!
//! Every session lives in Postgres (authoritative) and is mirrored into the
//! fast cache keyed by the login token itself. The two stores fail
//! asymmetrically: durable-store errors abort the operation, cache errors
//! are logged and swallowed. A session row is denormalized with the account
//! and billing snapshot so the auth gate can authorize without joins.

use launchkit_shared::{CacheError, KvCache, RequestMeta};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, QueryBuilder};
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum SessionError {
    /// Fan-out update found nothing to update; informational for callers
    /// that expect at least their own session to be live
    #[error("no live sessions for account")]
    NoLiveSessions,
    #[error(transparent)]
    Db(#[from] sqlx::Error),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("session payload encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// One login session. `session_id` is the signed login token string; the
/// token is the lookup key in both stores.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SessionRecord {
    pub session_id: String,
    pub account_uuid: Uuid,
    pub nickname: String,
    pub email: String,
    pub organization: Option<String>,
    pub processor_customer_id: Option<String>,
    pub current_plan_id: Option<String>,
    pub current_period_end_at: Option<OffsetDateTime>,
    pub had_subscription_before: Option<bool>,
    pub ip: String,
    pub ip_country: String,
    pub device: String,
    pub os: String,
    pub browser: String,
    pub created_at: OffsetDateTime,
    pub expire_at: OffsetDateTime,
}

impl SessionRecord {
    /// Assemble a fresh record. `expire_at` must come from the login token's
    /// own expiry so the row never outlives the token.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session_id: String,
        account_uuid: Uuid,
        nickname: String,
        email: String,
        organization: Option<String>,
        billing: BillingSnapshot,
        meta: &RequestMeta,
        expire_at: OffsetDateTime,
    ) -> Self {
        Self {
            session_id,
            account_uuid,
            nickname,
            email,
            organization,
            processor_customer_id: billing.processor_customer_id,
            current_plan_id: billing.current_plan_id,
            current_period_end_at: billing.current_period_end_at,
            had_subscription_before: billing.had_subscription_before,
            ip: meta.ip.clone(),
            ip_country: meta.ip_country.clone(),
            device: meta.device.clone(),
            os: meta.os.clone(),
            browser: meta.browser.clone(),
            created_at: OffsetDateTime::now_utc(),
            expire_at,
        }
    }

    fn remaining_ttl_seconds(&self) -> i64 {
        (self.expire_at - OffsetDateTime::now_utc()).whole_seconds()
    }
}

/// Billing fields denormalized into the session at creation; all absent for
/// accounts without a billing customer row
#[derive(Debug, Clone, Default)]
pub struct BillingSnapshot {
    pub processor_customer_id: Option<String>,
    pub current_plan_id: Option<String>,
    pub current_period_end_at: Option<OffsetDateTime>,
    pub had_subscription_before: Option<bool>,
}

/// Partial update fanned out to every live session of an account. Outer
/// `None` leaves the column untouched; nullable columns take a nested
/// `Option` so callers can clear them.
#[derive(Debug, Clone, Default)]
pub struct SessionPatch {
    pub nickname: Option<String>,
    pub organization: Option<Option<String>>,
    pub current_plan_id: Option<Option<String>>,
    pub current_period_end_at: Option<Option<OffsetDateTime>>,
    pub had_subscription_before: Option<bool>,
}

impl SessionPatch {
    pub fn is_empty(&self) -> bool {
        self.nickname.is_none()
            && self.organization.is_none()
            && self.current_plan_id.is_none()
            && self.current_period_end_at.is_none()
            && self.had_subscription_before.is_none()
    }

    fn apply_to(&self, record: &mut SessionRecord) {
        if let Some(nickname) = &self.nickname {
            record.nickname = nickname.clone();
        }
        if let Some(organization) = &self.organization {
            record.organization = organization.clone();
        }
        if let Some(plan) = &self.current_plan_id {
            record.current_plan_id = plan.clone();
        }
        if let Some(period_end) = &self.current_period_end_at {
            record.current_period_end_at = *period_end;
        }
        if let Some(had) = self.had_subscription_before {
            record.had_subscription_before = Some(had);
        }
    }
}

const SESSION_COLUMNS: &str = "session_id, account_uuid, nickname, email, organization, \
     processor_customer_id, current_plan_id, current_period_end_at, had_subscription_before, \
     ip, ip_country, device, os, browser, created_at, expire_at";

#[derive(Clone)]
pub struct SessionStore {
    pool: PgPool,
    cache: KvCache,
}

impl SessionStore {
    pub fn new(pool: PgPool, cache: KvCache) -> Self {
        Self { pool, cache }
    }

    /// Insert the session row and its activity record in one transaction,
    /// then mirror the session into the cache. The transaction failing
    /// aborts the login; the mirror failing does not.
    pub async fn create(&self, record: &SessionRecord, activity: &str) -> Result<(), SessionError> {
        let mut tx = self.pool.begin().await?;
        self.create_in(&mut tx, record, activity).await?;
        tx.commit().await?;

        self.mirror_created(record).await;

        tracing::info!(account_uuid = %record.account_uuid, "session created");
        Ok(())
    }

    /// Session and activity inserts inside a caller-provided transaction, for
    /// flows that pair the session with another account write. The caller
    /// commits and then calls [`mirror_created`](Self::mirror_created).
    pub async fn create_in(
        &self,
        tx: &mut sqlx::Transaction<'_, Postgres>,
        record: &SessionRecord,
        activity: &str,
    ) -> Result<(), SessionError> {
        sqlx::query(
            "INSERT INTO login_session (session_id, account_uuid, nickname, email, organization, \
             processor_customer_id, current_plan_id, current_period_end_at, had_subscription_before, \
             ip, ip_country, device, os, browser, created_at, expire_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)",
        )
        .bind(&record.session_id)
        .bind(record.account_uuid)
        .bind(&record.nickname)
        .bind(&record.email)
        .bind(&record.organization)
        .bind(&record.processor_customer_id)
        .bind(&record.current_plan_id)
        .bind(record.current_period_end_at)
        .bind(record.had_subscription_before)
        .bind(&record.ip)
        .bind(&record.ip_country)
        .bind(&record.device)
        .bind(&record.os)
        .bind(&record.browser)
        .bind(record.created_at)
        .bind(record.expire_at)
        .execute(&mut **tx)
        .await?;

        sqlx::query(
            "INSERT INTO activity_record (account_uuid, action, ip, ip_country, device, os, browser) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(record.account_uuid)
        .bind(activity)
        .bind(&record.ip)
        .bind(&record.ip_country)
        .bind(&record.device)
        .bind(&record.os)
        .bind(&record.browser)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Best-effort cache mirror after the durable write committed
    pub async fn mirror_created(&self, record: &SessionRecord) {
        if let Err(err) = self.mirror(record).await {
            tracing::warn!(
                account_uuid = %record.account_uuid,
                error = %err,
                "session cache mirror failed, continuing on durable store"
            );
        }
    }

    /// Look a session up by its token: cache first, durable store on miss or
    /// cache fault. Expired rows are never returned. Callers must compare
    /// `account_uuid` against the token's decoded subject.
    pub async fn resolve(&self, token: &str) -> Result<Option<SessionRecord>, SessionError> {
        match self.cache.get(token).await {
            Ok(Some(payload)) => match serde_json::from_str::<SessionRecord>(&payload) {
                Ok(record) => return Ok(Some(record)),
                Err(err) => {
                    tracing::warn!(error = %err, "cached session payload unreadable, falling through");
                }
            },
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(error = %err, "session cache read failed, falling through");
            }
        }

        let record = sqlx::query_as::<_, SessionRecord>(&format!(
            "SELECT {SESSION_COLUMNS} FROM login_session \
             WHERE session_id = $1 AND expire_at > $2"
        ))
        .bind(token)
        .bind(OffsetDateTime::now_utc())
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// All live sessions for an account, newest first
    pub async fn live_for_account(&self, account_uuid: Uuid) -> Result<Vec<SessionRecord>, SessionError> {
        let records = sqlx::query_as::<_, SessionRecord>(&format!(
            "SELECT {SESSION_COLUMNS} FROM login_session \
             WHERE account_uuid = $1 AND expire_at > $2 \
             ORDER BY created_at DESC"
        ))
        .bind(account_uuid)
        .bind(OffsetDateTime::now_utc())
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// Apply a patch to every live session of the account: one multi-row
    /// UPDATE, then a per-key cache re-mirror (per-account session counts
    /// are small). Zero live sessions is reported as `NoLiveSessions`.
    pub async fn update_all_for_account(
        &self,
        account_uuid: Uuid,
        patch: &SessionPatch,
    ) -> Result<Vec<SessionRecord>, SessionError> {
        let mut live = self.live_for_account(account_uuid).await?;
        if live.is_empty() {
            return Err(SessionError::NoLiveSessions);
        }
        if patch.is_empty() {
            return Ok(live);
        }

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new("UPDATE login_session SET ");
        let mut fields = builder.separated(", ");
        if let Some(nickname) = &patch.nickname {
            fields.push("nickname = ").push_bind_unseparated(nickname);
        }
        if let Some(organization) = &patch.organization {
            fields
                .push("organization = ")
                .push_bind_unseparated(organization.as_deref());
        }
        if let Some(plan) = &patch.current_plan_id {
            fields
                .push("current_plan_id = ")
                .push_bind_unseparated(plan.as_deref());
        }
        if let Some(period_end) = &patch.current_period_end_at {
            fields
                .push("current_period_end_at = ")
                .push_bind_unseparated(*period_end);
        }
        if let Some(had) = patch.had_subscription_before {
            fields
                .push("had_subscription_before = ")
                .push_bind_unseparated(had);
        }
        builder
            .push(" WHERE account_uuid = ")
            .push_bind(account_uuid)
            .push(" AND expire_at > ")
            .push_bind(OffsetDateTime::now_utc());

        builder.build().execute(&self.pool).await?;

        for record in &mut live {
            patch.apply_to(record);
            if let Err(err) = self.mirror(record).await {
                tracing::warn!(
                    account_uuid = %account_uuid,
                    error = %err,
                    "session cache re-mirror failed after fan-out"
                );
            }
        }

        tracing::info!(account_uuid = %account_uuid, sessions = live.len(), "sessions updated");
        Ok(live)
    }

    /// Remove a session from both stores. Both deletes always run, both must
    /// succeed, and deleting a session that is already gone is not an error.
    pub async fn delete(&self, token: &str) -> Result<(), SessionError> {
        let db_result = sqlx::query("DELETE FROM login_session WHERE session_id = $1")
            .bind(token)
            .execute(&self.pool)
            .await;
        let cache_result = self.cache.delete(token).await;

        db_result?;
        cache_result?;
        Ok(())
    }

    async fn mirror(&self, record: &SessionRecord) -> Result<(), SessionError> {
        let ttl = record.remaining_ttl_seconds();
        if ttl <= 0 {
            return Ok(());
        }
        let payload = serde_json::to_string(record)?;
        self.cache.put(&record.session_id, &payload, ttl as u64).await?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]  // Allow unwrap() in tests for cleaner test code
mod tests {
    use super::*;
    use launchkit_shared::KvCache;
    use time::Duration;

    fn sample_record(token: &str) -> SessionRecord {
        SessionRecord::new(
            token.to_string(),
            Uuid::new_v4(),
            "sam".to_string(),
            "sam@example.com".to_string(),
            Some("Acme".to_string()),
            BillingSnapshot::default(),
            &RequestMeta::default(),
            OffsetDateTime::now_utc() + Duration::hours(24),
        )
    }

    #[test]
    fn test_patch_application() {
        let mut record = sample_record("token");
        let patch = SessionPatch {
            nickname: Some("sammy".to_string()),
            organization: Some(None),
            ..SessionPatch::default()
        };

        patch.apply_to(&mut record);

        assert_eq!(record.nickname, "sammy");
        assert_eq!(record.organization, None);
        // Untouched fields keep their values
        assert_eq!(record.email, "sam@example.com");
    }

    #[test]
    fn test_empty_patch_detection() {
        assert!(SessionPatch::default().is_empty());
        assert!(!SessionPatch {
            nickname: Some("x".to_string()),
            ..SessionPatch::default()
        }
        .is_empty());
    }

    #[test]
    fn test_mirror_payload_round_trips() {
        let record = sample_record("token");
        let payload = serde_json::to_string(&record).unwrap();
        let parsed: SessionRecord = serde_json::from_str(&payload).unwrap();

        assert_eq!(parsed.session_id, record.session_id);
        assert_eq!(parsed.account_uuid, record.account_uuid);
        assert_eq!(parsed.expire_at, record.expire_at);
    }

    #[tokio::test]
    async fn test_resolve_prefers_the_cache() {
        // Lazy pool never connects as long as the cache answers
        let pool = PgPool::connect_lazy("postgres://localhost:1/unreachable").unwrap();
        let cache = KvCache::in_memory();
        let store = SessionStore::new(pool, cache.clone());

        let record = sample_record("cached-token");
        cache
            .put("cached-token", &serde_json::to_string(&record).unwrap(), 60)
            .await
            .unwrap();

        let resolved = store.resolve("cached-token").await.unwrap().unwrap();
        assert_eq!(resolved.account_uuid, record.account_uuid);
    }

    #[tokio::test]
    #[ignore] // Requires database
    async fn test_create_resolve_delete_lifecycle() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
        let pool = launchkit_shared::create_pool(&url).await.unwrap();
        let store = SessionStore::new(pool.clone(), KvCache::in_memory());

        let record = sample_record("lifecycle-token");
        sqlx::query(
            "INSERT INTO user_account (uuid, email, nickname, password_hash, email_verified) \
             VALUES ($1, $2, $3, 'x', TRUE)",
        )
        .bind(record.account_uuid)
        .bind(&record.email)
        .bind(&record.nickname)
        .execute(&pool)
        .await
        .unwrap();

        store.create(&record, "Sign in").await.unwrap();

        let resolved = store.resolve("lifecycle-token").await.unwrap();
        assert!(resolved.is_some());

        store.delete("lifecycle-token").await.unwrap();
        let resolved = store.resolve("lifecycle-token").await.unwrap();
        assert!(resolved.is_none());

        // Idempotent
        store.delete("lifecycle-token").await.unwrap();

        sqlx::query("DELETE FROM user_account WHERE uuid = $1")
            .bind(record.account_uuid)
            .execute(&pool)
            .await
            .unwrap();
    }
}
