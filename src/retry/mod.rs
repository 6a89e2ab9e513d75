//! Retry store and retry sweeper.
//!
//! The delivery worker records every failed first attempt as a
//! `FailedDeliveryRecord`. The sweeper periodically claims due records and
//! re-drives them through the guarded push gateway until they resolve or
//! reach the retry cap, at which point they are dead-lettered.
//!
//! Record invariants:
//! - `retry_count` only grows (one per sweep attempt)
//! - `resolved` and `dead_lettered_at` are written once and never cleared
//! - `last_tried_at` moves on every attempt, including the first
//! - records are never deleted

mod memory_store;
mod postgres_store;
mod sweeper;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

pub use memory_store::MemoryRetryStore;
pub use postgres_store::PostgresRetryStore;
pub use sweeper::{RetrySweeper, SweepReport};

use crate::config::RetryConfig;
use crate::notification::NotificationPayload;
use crate::postgres::{PostgresPool, PostgresPoolError};

/// Errors that can occur during retry store operations.
#[derive(Debug, Error)]
pub enum RetryStoreError {
    #[error("Retry record {0} not found")]
    NotFound(Uuid),

    /// Another sweeper took the record over (lease expired) or it changed state
    #[error("Claim on retry record {0} was lost")]
    ClaimLost(Uuid),

    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// Backend is temporarily unavailable (e.g., circuit breaker open)
    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

impl From<PostgresPoolError> for RetryStoreError {
    fn from(e: PostgresPoolError) -> Self {
        match e {
            PostgresPoolError::Sqlx(e) => RetryStoreError::Postgres(e),
            PostgresPoolError::CircuitOpen => {
                RetryStoreError::Unavailable("PostgreSQL circuit breaker is open".into())
            }
        }
    }
}

/// Lifecycle state derived from a record's columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Pending,
    Resolved,
    DeadLettered,
}

/// A delivery that failed at least once.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedDeliveryRecord {
    pub id: Uuid,
    pub target_token: String,
    /// Serialized `NotificationPayload`; opaque to the store
    pub payload_snapshot: String,
    pub retry_count: u32,
    pub last_tried_at: DateTime<Utc>,
    pub resolved: bool,
    pub created_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub dead_lettered_at: Option<DateTime<Utc>>,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
}

impl FailedDeliveryRecord {
    pub fn status(&self) -> RecordStatus {
        if self.resolved {
            RecordStatus::Resolved
        } else if self.dead_lettered_at.is_some() {
            RecordStatus::DeadLettered
        } else {
            RecordStatus::Pending
        }
    }

    /// Whether a sweep using `claim` may select this record at `now`.
    pub fn is_due(&self, claim: &SweepClaim, now: DateTime<Utc>) -> bool {
        if self.status() != RecordStatus::Pending || self.retry_count >= claim.max_retries {
            return false;
        }
        match self.claimed_at {
            None => true,
            Some(claimed_at) => now - claimed_at >= claim.lease_chrono(),
        }
    }

    /// Whether `claimer` currently holds this record.
    pub fn is_claimed_by(&self, claimer: &str) -> bool {
        self.claimed_by.as_deref() == Some(claimer)
    }
}

/// Input for a record created by the delivery worker.
#[derive(Debug, Clone)]
pub struct NewFailedDelivery {
    pub target_token: String,
    pub payload_snapshot: String,
    pub reason: String,
}

impl NewFailedDelivery {
    pub fn new(
        target_token: &str,
        payload: &NotificationPayload,
        reason: impl Into<String>,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            target_token: target_token.to_string(),
            payload_snapshot: payload.to_snapshot()?,
            reason: reason.into(),
        })
    }
}

/// Parameters of one sweep's claim.
#[derive(Debug, Clone)]
pub struct SweepClaim {
    /// Identity written to `claimed_by`
    pub claimer: String,
    pub batch_size: usize,
    pub max_retries: u32,
    /// Claims older than this are considered abandoned
    pub lease: Duration,
}

impl SweepClaim {
    pub fn new(claimer: impl Into<String>, config: &RetryConfig) -> Self {
        Self {
            claimer: claimer.into(),
            batch_size: config.batch_size,
            max_retries: config.max_retries,
            lease: Duration::from_secs(config.claim_lease_seconds),
        }
    }

    fn lease_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.lease).unwrap_or(chrono::Duration::MAX)
    }
}

/// Retry store statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RetryStoreStats {
    pub total: u64,
    pub pending: u64,
    pub resolved: u64,
    pub dead_lettered: u64,
}

/// Persistent table of failed deliveries.
///
/// State-changing sweep operations are conditional on `claimer` holding the
/// record; otherwise they fail with [`RetryStoreError::ClaimLost`] and
/// change nothing.
#[async_trait]
pub trait RetryStore: Send + Sync {
    /// Insert a new pending record (retry count 0, last tried now).
    async fn record_failure(
        &self,
        failure: NewFailedDelivery,
    ) -> Result<FailedDeliveryRecord, RetryStoreError>;

    /// Claim up to `batch_size` due records, oldest `last_tried_at` first.
    async fn claim_due(&self, claim: &SweepClaim)
        -> Result<Vec<FailedDeliveryRecord>, RetryStoreError>;

    /// Restart the lease on a record `claimer` still holds.
    ///
    /// Called right before each gateway send, so a record is never sent
    /// after another sweeper has taken it over.
    async fn renew_claim(
        &self,
        id: Uuid,
        claimer: &str,
    ) -> Result<FailedDeliveryRecord, RetryStoreError>;

    /// Give a held record back without counting an attempt.
    async fn release_claim(
        &self,
        id: Uuid,
        claimer: &str,
    ) -> Result<FailedDeliveryRecord, RetryStoreError>;

    /// A sweep attempt succeeded: count it and resolve the record.
    async fn mark_resolved(
        &self,
        id: Uuid,
        claimer: &str,
    ) -> Result<FailedDeliveryRecord, RetryStoreError>;

    /// A sweep attempt failed: count it, and dead-letter the record once the
    /// count reaches `max_retries`.
    async fn record_retry_failure(
        &self,
        id: Uuid,
        claimer: &str,
        reason: &str,
        max_retries: u32,
    ) -> Result<FailedDeliveryRecord, RetryStoreError>;

    /// Move a record to dead-letter without an attempt.
    async fn dead_letter(
        &self,
        id: Uuid,
        claimer: &str,
        reason: &str,
    ) -> Result<FailedDeliveryRecord, RetryStoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<FailedDeliveryRecord>, RetryStoreError>;

    async fn stats(&self) -> Result<RetryStoreStats, RetryStoreError>;

    /// Backend type name (for logging/metrics)
    fn backend_type(&self) -> &'static str;
}

/// Create a retry store based on configuration.
///
/// - `"postgres"`: `PostgresRetryStore` if a PostgreSQL pool is provided
/// - `"memory"` (default): `MemoryRetryStore`
pub fn create_retry_store(
    settings: &RetryConfig,
    postgres_pool: Option<Arc<PostgresPool>>,
) -> Arc<dyn RetryStore> {
    match settings.backend.as_str() {
        "postgres" => {
            if let Some(pool) = postgres_pool {
                tracing::info!(backend = "postgres", "Creating PostgreSQL retry store");
                Arc::new(PostgresRetryStore::new(pool))
            } else {
                tracing::warn!(
                    "PostgreSQL retry store requested but no pool provided, falling back to memory"
                );
                Arc::new(MemoryRetryStore::new())
            }
        }
        _ => {
            tracing::info!(backend = "memory", "Creating in-memory retry store");
            Arc::new(MemoryRetryStore::new())
        }
    }
}
