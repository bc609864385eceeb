//! Exactly-once execution of financial commands.
//!
//! Each command carries a client key. Per scoped key the record moves
//! `Absent -> Reserved -> Completed`; a record past `expires_at` counts as
//! absent and may be reclaimed. The state machine lives in [`decide_begin`];
//! stores only read and write records, always inside a serializable unit of
//! work so two attempts on the same key cannot both acquire it.

pub mod command;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::store::{StoreError, StoreResult, UnitOfWork};

pub use command::{IdempotentCommand, request_hash, scoped_key};

/// Default lifetime of an idempotency record.
pub fn default_ttl() -> Duration {
    Duration::minutes(10)
}

/// Durable idempotency record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub key: String,
    pub request_hash: Option<String>,
    pub response: Option<JsonValue>,
    pub is_processed: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    /// Fresh reservation (in-flight, no response yet).
    pub fn reserved(key: impl Into<String>, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            key: key.into(),
            request_hash: None,
            response: None,
            is_processed: false,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Outcome of inspecting the current record for a key.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BeginDecision {
    /// No record: reserve it.
    Acquire,
    /// Record expired: replace it with a fresh reservation.
    Reclaim,
    /// Completed and live: replay the cached response.
    Replay,
    /// Reserved and live: another attempt is in flight.
    InFlight,
}

impl BeginDecision {
    pub fn proceeds(&self) -> bool {
        matches!(self, BeginDecision::Acquire | BeginDecision::Reclaim)
    }
}

pub fn decide_begin(existing: Option<&IdempotencyRecord>, now: DateTime<Utc>) -> BeginDecision {
    match existing {
        None => BeginDecision::Acquire,
        Some(record) if record.is_expired(now) => BeginDecision::Reclaim,
        Some(record) if record.is_processed => BeginDecision::Replay,
        Some(_) => BeginDecision::InFlight,
    }
}

/// Response stored for a completed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub response: JsonValue,
    pub request_hash: Option<String>,
}

/// Begin/cache/lookup protocol over a unit of work.
///
/// Implemented for every [`UnitOfWork`]; the writes become durable when the
/// unit commits.
#[async_trait::async_trait]
pub trait IdempotencyStore: Send {
    /// Reserve `key` if it is absent or expired.
    ///
    /// Returns `false` when a live record exists: either completed (fetch the
    /// cached response) or still in flight.
    async fn try_begin(
        &mut self,
        key: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Store the response, mark the record processed and extend its expiry.
    async fn cache_response(
        &mut self,
        key: &str,
        response: JsonValue,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// The cached response, only if the record is processed and not expired.
    async fn get_cached_response(
        &mut self,
        key: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<CachedResponse>>;

    async fn set_request_hash(&mut self, key: &str, hash: &str) -> StoreResult<()>;

    /// Drop an unprocessed reservation so the key can be retried at once.
    async fn release(&mut self, key: &str) -> StoreResult<()>;
}

#[async_trait::async_trait]
impl<U> IdempotencyStore for U
where
    U: UnitOfWork,
{
    async fn try_begin(
        &mut self,
        key: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let existing = self.load_idempotency_record(key).await?;
        let decision = decide_begin(existing.as_ref(), now);

        match decision {
            BeginDecision::Acquire => {
                self.put_idempotency_record(&IdempotencyRecord::reserved(key, now, ttl))
                    .await?;
            }
            BeginDecision::Reclaim => {
                self.delete_idempotency_record(key).await?;
                self.put_idempotency_record(&IdempotencyRecord::reserved(key, now, ttl))
                    .await?;
            }
            BeginDecision::Replay | BeginDecision::InFlight => {}
        }

        Ok(decision.proceeds())
    }

    async fn cache_response(
        &mut self,
        key: &str,
        response: JsonValue,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut record = self
            .load_idempotency_record(key)
            .await?
            .unwrap_or_else(|| IdempotencyRecord::reserved(key, now, ttl));
        record.response = Some(response);
        record.is_processed = true;
        record.expires_at = now + ttl;
        self.put_idempotency_record(&record).await
    }

    async fn get_cached_response(
        &mut self,
        key: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<CachedResponse>> {
        let record = self.load_idempotency_record(key).await?;
        Ok(record.and_then(|r| match (r.is_processed && !r.is_expired(now), r.response) {
            (true, Some(response)) => Some(CachedResponse {
                response,
                request_hash: r.request_hash,
            }),
            _ => None,
        }))
    }

    async fn set_request_hash(&mut self, key: &str, hash: &str) -> StoreResult<()> {
        let mut record = self
            .load_idempotency_record(key)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("idempotency record '{key}'")))?;
        record.request_hash = Some(hash.to_string());
        self.put_idempotency_record(&record).await
    }

    async fn release(&mut self, key: &str) -> StoreResult<()> {
        match self.load_idempotency_record(key).await? {
            Some(record) if !record.is_processed => self.delete_idempotency_record(key).await,
            _ => Ok(()),
        }
    }
}
