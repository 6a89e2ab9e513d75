//! PostgreSQL retry store.
//!
//! Table structure:
//! - `failed_deliveries` - one row per failed delivery, never deleted
//!
//! Sweep claims use `FOR UPDATE SKIP LOCKED`, so sweepers on different
//! hosts select disjoint batches. Every state change after the claim is a
//! conditional `UPDATE ... WHERE claimed_by = $claimer`, including the
//! lease renewal that precedes each send.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::postgres::PostgresPool;

use super::{
    FailedDeliveryRecord, NewFailedDelivery, RetryStore, RetryStoreError, RetryStoreStats,
    SweepClaim,
};

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS failed_deliveries (
    id UUID PRIMARY KEY,
    target_token TEXT NOT NULL,
    payload_snapshot TEXT NOT NULL,
    retry_count INTEGER NOT NULL DEFAULT 0 CHECK (retry_count >= 0),
    last_tried_at TIMESTAMPTZ NOT NULL,
    resolved BOOLEAN NOT NULL DEFAULT FALSE,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    last_error TEXT,
    dead_lettered_at TIMESTAMPTZ,
    claimed_by TEXT,
    claimed_at TIMESTAMPTZ
)
"#;

const CREATE_DUE_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_failed_deliveries_due
    ON failed_deliveries (last_tried_at)
    WHERE resolved = FALSE AND dead_lettered_at IS NULL
"#;

const RECORD_COLUMNS: &str = "id, target_token, payload_snapshot, retry_count, last_tried_at, \
     resolved, created_at, last_error, dead_lettered_at, claimed_by, claimed_at";

/// Guard shared by every post-claim update
const HELD_PENDING: &str =
    "id = $1 AND claimed_by = $2 AND resolved = FALSE AND dead_lettered_at IS NULL";

#[derive(Debug, sqlx::FromRow)]
struct FailedDeliveryRow {
    id: Uuid,
    target_token: String,
    payload_snapshot: String,
    retry_count: i32,
    last_tried_at: DateTime<Utc>,
    resolved: bool,
    created_at: DateTime<Utc>,
    last_error: Option<String>,
    dead_lettered_at: Option<DateTime<Utc>>,
    claimed_by: Option<String>,
    claimed_at: Option<DateTime<Utc>>,
}

impl From<FailedDeliveryRow> for FailedDeliveryRecord {
    fn from(row: FailedDeliveryRow) -> Self {
        Self {
            id: row.id,
            target_token: row.target_token,
            payload_snapshot: row.payload_snapshot,
            retry_count: row.retry_count.max(0) as u32,
            last_tried_at: row.last_tried_at,
            resolved: row.resolved,
            created_at: row.created_at,
            last_error: row.last_error,
            dead_lettered_at: row.dead_lettered_at,
            claimed_by: row.claimed_by,
            claimed_at: row.claimed_at,
        }
    }
}

pub struct PostgresRetryStore {
    pool: Arc<PostgresPool>,
}

impl PostgresRetryStore {
    pub fn new(pool: Arc<PostgresPool>) -> Self {
        Self { pool }
    }

    /// Create the table and index if they do not exist.
    pub async fn ensure_schema(&self) -> Result<(), RetryStoreError> {
        for statement in [CREATE_TABLE, CREATE_DUE_INDEX] {
            self.pool
                .execute_with_circuit_breaker(|pool| async move {
                    sqlx::query(statement).execute(&pool).await
                })
                .await?;
        }
        tracing::info!("Retry store schema ready");
        Ok(())
    }

    /// Distinguish a missing row from one whose claim is gone.
    async fn claim_lost_or_missing(&self, id: Uuid) -> RetryStoreError {
        let exists = self
            .pool
            .execute_with_circuit_breaker(|pool| async move {
                sqlx::query_scalar::<_, bool>(
                    "SELECT EXISTS(SELECT 1 FROM failed_deliveries WHERE id = $1)",
                )
                .bind(id)
                .fetch_one(&pool)
                .await
            })
            .await;

        match exists {
            Ok(false) => RetryStoreError::NotFound(id),
            Ok(true) => RetryStoreError::ClaimLost(id),
            Err(e) => e.into(),
        }
    }

    async fn update_held(
        &self,
        sql: String,
        id: Uuid,
        claimer: &str,
        extra: Vec<ExtraBind>,
    ) -> Result<FailedDeliveryRecord, RetryStoreError> {
        let claimer = claimer.to_string();
        let row = self
            .pool
            .execute_with_circuit_breaker(|pool| async move {
                let mut query = sqlx::query_as::<_, FailedDeliveryRow>(&sql)
                    .bind(id)
                    .bind(claimer);
                for value in extra {
                    query = match value {
                        ExtraBind::Text(text) => query.bind(text),
                        ExtraBind::Int(int) => query.bind(int),
                    };
                }
                query.fetch_optional(&pool).await
            })
            .await?;

        match row {
            Some(row) => Ok(row.into()),
            None => Err(self.claim_lost_or_missing(id).await),
        }
    }
}

/// Parameters bound after `$1` (id) and `$2` (claimer).
enum ExtraBind {
    Text(String),
    Int(i32),
}

#[async_trait]
impl RetryStore for PostgresRetryStore {
    async fn record_failure(
        &self,
        failure: NewFailedDelivery,
    ) -> Result<FailedDeliveryRecord, RetryStoreError> {
        let sql = format!(
            "INSERT INTO failed_deliveries \
                 (id, target_token, payload_snapshot, retry_count, last_tried_at, resolved, created_at, last_error) \
             VALUES ($1, $2, $3, 0, NOW(), FALSE, NOW(), $4) \
             RETURNING {}",
            RECORD_COLUMNS
        );
        let id = Uuid::new_v4();

        let row = self
            .pool
            .execute_with_circuit_breaker(|pool| async move {
                sqlx::query_as::<_, FailedDeliveryRow>(&sql)
                    .bind(id)
                    .bind(failure.target_token)
                    .bind(failure.payload_snapshot)
                    .bind(failure.reason)
                    .fetch_one(&pool)
                    .await
            })
            .await?;

        tracing::debug!(record_id = %id, "Retry record created");
        Ok(row.into())
    }

    async fn claim_due(
        &self,
        claim: &SweepClaim,
    ) -> Result<Vec<FailedDeliveryRecord>, RetryStoreError> {
        let sql = format!(
            "UPDATE failed_deliveries f \
             SET claimed_by = $1, claimed_at = NOW() \
             FROM ( \
                 SELECT id FROM failed_deliveries \
                 WHERE resolved = FALSE \
                   AND dead_lettered_at IS NULL \
                   AND retry_count < $2 \
                   AND (claimed_at IS NULL OR claimed_at <= NOW() - make_interval(secs => $3)) \
                 ORDER BY last_tried_at ASC, created_at ASC \
                 LIMIT $4 \
                 FOR UPDATE SKIP LOCKED \
             ) due \
             WHERE f.id = due.id \
             RETURNING {}",
            RECORD_COLUMNS
                .split(", ")
                .map(|c| format!("f.{}", c))
                .collect::<Vec<_>>()
                .join(", ")
        );
        let claimer = claim.claimer.clone();
        let max_retries = claim.max_retries.min(i32::MAX as u32) as i32;
        let lease_secs = claim.lease.as_secs_f64();
        let batch_size = claim.batch_size.min(i64::MAX as usize) as i64;

        let rows = self
            .pool
            .execute_with_circuit_breaker(|pool| async move {
                sqlx::query_as::<_, FailedDeliveryRow>(&sql)
                    .bind(claimer)
                    .bind(max_retries)
                    .bind(lease_secs)
                    .bind(batch_size)
                    .fetch_all(&pool)
                    .await
            })
            .await?;

        // RETURNING does not preserve the subquery's order
        let mut records: Vec<FailedDeliveryRecord> = rows.into_iter().map(Into::into).collect();
        records.sort_by_key(|r| (r.last_tried_at, r.created_at));
        Ok(records)
    }

    async fn renew_claim(
        &self,
        id: Uuid,
        claimer: &str,
    ) -> Result<FailedDeliveryRecord, RetryStoreError> {
        let sql = format!(
            "UPDATE failed_deliveries SET claimed_at = NOW() WHERE {} RETURNING {}",
            HELD_PENDING, RECORD_COLUMNS
        );
        self.update_held(sql, id, claimer, Vec::new()).await
    }

    async fn release_claim(
        &self,
        id: Uuid,
        claimer: &str,
    ) -> Result<FailedDeliveryRecord, RetryStoreError> {
        let sql = format!(
            "UPDATE failed_deliveries SET claimed_by = NULL, claimed_at = NULL \
             WHERE {} \
             RETURNING {}",
            HELD_PENDING, RECORD_COLUMNS
        );
        self.update_held(sql, id, claimer, Vec::new()).await
    }

    async fn mark_resolved(
        &self,
        id: Uuid,
        claimer: &str,
    ) -> Result<FailedDeliveryRecord, RetryStoreError> {
        let sql = format!(
            "UPDATE failed_deliveries \
             SET retry_count = retry_count + 1, last_tried_at = NOW(), resolved = TRUE, \
                 claimed_by = NULL, claimed_at = NULL \
             WHERE {} \
             RETURNING {}",
            HELD_PENDING, RECORD_COLUMNS
        );
        self.update_held(sql, id, claimer, Vec::new()).await
    }

    async fn record_retry_failure(
        &self,
        id: Uuid,
        claimer: &str,
        reason: &str,
        max_retries: u32,
    ) -> Result<FailedDeliveryRecord, RetryStoreError> {
        let sql = format!(
            "UPDATE failed_deliveries \
             SET retry_count = retry_count + 1, last_tried_at = NOW(), last_error = $3, \
                 dead_lettered_at = CASE WHEN retry_count + 1 >= $4 THEN NOW() ELSE NULL END, \
                 claimed_by = NULL, claimed_at = NULL \
             WHERE {} \
             RETURNING {}",
            HELD_PENDING, RECORD_COLUMNS
        );
        let max_retries = max_retries.min(i32::MAX as u32) as i32;
        self.update_held(
            sql,
            id,
            claimer,
            vec![ExtraBind::Text(reason.to_string()), ExtraBind::Int(max_retries)],
        )
        .await
    }

    async fn dead_letter(
        &self,
        id: Uuid,
        claimer: &str,
        reason: &str,
    ) -> Result<FailedDeliveryRecord, RetryStoreError> {
        let sql = format!(
            "UPDATE failed_deliveries \
             SET last_error = $3, dead_lettered_at = NOW(), claimed_by = NULL, claimed_at = NULL \
             WHERE {} \
             RETURNING {}",
            HELD_PENDING, RECORD_COLUMNS
        );
        self.update_held(sql, id, claimer, vec![ExtraBind::Text(reason.to_string())])
            .await
    }

    async fn get(&self, id: Uuid) -> Result<Option<FailedDeliveryRecord>, RetryStoreError> {
        let sql = format!(
            "SELECT {} FROM failed_deliveries WHERE id = $1",
            RECORD_COLUMNS
        );
        let row = self
            .pool
            .execute_with_circuit_breaker(|pool| async move {
                sqlx::query_as::<_, FailedDeliveryRow>(&sql)
                    .bind(id)
                    .fetch_optional(&pool)
                    .await
            })
            .await?;
        Ok(row.map(Into::into))
    }

    async fn stats(&self) -> Result<RetryStoreStats, RetryStoreError> {
        let (total, pending, resolved, dead_lettered): (i64, i64, i64, i64) = self
            .pool
            .execute_with_circuit_breaker(|pool| async move {
                sqlx::query_as(
                    r#"
                    SELECT
                        COUNT(*),
                        COUNT(*) FILTER (WHERE NOT resolved AND dead_lettered_at IS NULL),
                        COUNT(*) FILTER (WHERE resolved),
                        COUNT(*) FILTER (WHERE NOT resolved AND dead_lettered_at IS NOT NULL)
                    FROM failed_deliveries
                    "#,
                )
                .fetch_one(&pool)
                .await
            })
            .await?;

        Ok(RetryStoreStats {
            total: total.max(0) as u64,
            pending: pending.max(0) as u64,
            resolved: resolved.max(0) as u64,
            dead_lettered: dead_lettered.max(0) as u64,
        })
    }

    fn backend_type(&self) -> &'static str {
        "postgres"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RecordStatus;

    #[test]
    fn test_row_conversion() {
        let now = Utc::now();
        let row = FailedDeliveryRow {
            id: Uuid::new_v4(),
            target_token: "token".into(),
            payload_snapshot: "{}".into(),
            retry_count: 2,
            last_tried_at: now,
            resolved: false,
            created_at: now,
            last_error: Some("timeout".into()),
            dead_lettered_at: Some(now),
            claimed_by: None,
            claimed_at: None,
        };

        let record: FailedDeliveryRecord = row.into();
        assert_eq!(record.retry_count, 2);
        assert_eq!(record.status(), RecordStatus::DeadLettered);
    }

    #[test]
    fn test_guard_covers_claim_and_terminal_states() {
        assert!(HELD_PENDING.contains("claimed_by = $2"));
        assert!(HELD_PENDING.contains("resolved = FALSE"));
        assert!(HELD_PENDING.contains("dead_lettered_at IS NULL"));
    }
}
