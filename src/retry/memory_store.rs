//! In-memory retry store.
//!
//! Holds records in a `DashMap`; claims are checked and stamped under the
//! entry's shard lock, so concurrent sweepers in one process never claim
//! the same record. Nothing survives the process.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

use super::{
    FailedDeliveryRecord, NewFailedDelivery, RecordStatus, RetryStore, RetryStoreError,
    RetryStoreStats, SweepClaim,
};

#[derive(Default)]
pub struct MemoryRetryStore {
    records: DashMap<Uuid, FailedDeliveryRecord>,
}

impl MemoryRetryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Snapshot of every record, oldest first.
    pub fn records(&self) -> Vec<FailedDeliveryRecord> {
        let mut records: Vec<_> = self.records.iter().map(|r| r.value().clone()).collect();
        records.sort_by_key(|r| r.created_at);
        records
    }

    /// Apply `update` to a pending record held by `claimer`.
    fn update_held<F>(
        &self,
        id: Uuid,
        claimer: &str,
        update: F,
    ) -> Result<FailedDeliveryRecord, RetryStoreError>
    where
        F: FnOnce(&mut FailedDeliveryRecord),
    {
        let mut entry = self
            .records
            .get_mut(&id)
            .ok_or(RetryStoreError::NotFound(id))?;

        if !entry.is_claimed_by(claimer) || entry.status() != RecordStatus::Pending {
            return Err(RetryStoreError::ClaimLost(id));
        }

        update(&mut entry);
        Ok(entry.clone())
    }

    /// Like `update_held`, then release the claim.
    fn update_claimed<F>(
        &self,
        id: Uuid,
        claimer: &str,
        update: F,
    ) -> Result<FailedDeliveryRecord, RetryStoreError>
    where
        F: FnOnce(&mut FailedDeliveryRecord),
    {
        self.update_held(id, claimer, |record| {
            update(record);
            record.claimed_by = None;
            record.claimed_at = None;
        })
    }
}

#[async_trait]
impl RetryStore for MemoryRetryStore {
    async fn record_failure(
        &self,
        failure: NewFailedDelivery,
    ) -> Result<FailedDeliveryRecord, RetryStoreError> {
        let now = Utc::now();
        let record = FailedDeliveryRecord {
            id: Uuid::new_v4(),
            target_token: failure.target_token,
            payload_snapshot: failure.payload_snapshot,
            retry_count: 0,
            last_tried_at: now,
            resolved: false,
            created_at: now,
            last_error: Some(failure.reason),
            dead_lettered_at: None,
            claimed_by: None,
            claimed_at: None,
        };
        self.records.insert(record.id, record.clone());
        Ok(record)
    }

    async fn claim_due(
        &self,
        claim: &SweepClaim,
    ) -> Result<Vec<FailedDeliveryRecord>, RetryStoreError> {
        let now = Utc::now();

        let mut candidates: Vec<_> = self
            .records
            .iter()
            .filter(|r| r.is_due(claim, now))
            .map(|r| (r.last_tried_at, r.created_at, r.id))
            .collect();
        candidates.sort();

        let mut claimed = Vec::new();
        for (_, _, id) in candidates {
            if claimed.len() >= claim.batch_size {
                break;
            }
            if let Some(mut entry) = self.records.get_mut(&id) {
                // Re-check under the lock; another sweeper may have claimed it meanwhile
                if entry.is_due(claim, now) {
                    entry.claimed_by = Some(claim.claimer.clone());
                    entry.claimed_at = Some(now);
                    claimed.push(entry.clone());
                }
            }
        }

        Ok(claimed)
    }

    async fn renew_claim(
        &self,
        id: Uuid,
        claimer: &str,
    ) -> Result<FailedDeliveryRecord, RetryStoreError> {
        self.update_held(id, claimer, |record| {
            record.claimed_at = Some(Utc::now());
        })
    }

    async fn release_claim(
        &self,
        id: Uuid,
        claimer: &str,
    ) -> Result<FailedDeliveryRecord, RetryStoreError> {
        self.update_claimed(id, claimer, |_| {})
    }

    async fn mark_resolved(
        &self,
        id: Uuid,
        claimer: &str,
    ) -> Result<FailedDeliveryRecord, RetryStoreError> {
        self.update_claimed(id, claimer, |record| {
            record.retry_count += 1;
            record.last_tried_at = Utc::now();
            record.resolved = true;
        })
    }

    async fn record_retry_failure(
        &self,
        id: Uuid,
        claimer: &str,
        reason: &str,
        max_retries: u32,
    ) -> Result<FailedDeliveryRecord, RetryStoreError> {
        self.update_claimed(id, claimer, |record| {
            let now = Utc::now();
            record.retry_count += 1;
            record.last_tried_at = now;
            record.last_error = Some(reason.to_string());
            if record.retry_count >= max_retries {
                record.dead_lettered_at = Some(now);
            }
        })
    }

    async fn dead_letter(
        &self,
        id: Uuid,
        claimer: &str,
        reason: &str,
    ) -> Result<FailedDeliveryRecord, RetryStoreError> {
        self.update_claimed(id, claimer, |record| {
            record.last_error = Some(reason.to_string());
            record.dead_lettered_at = Some(Utc::now());
        })
    }

    async fn get(&self, id: Uuid) -> Result<Option<FailedDeliveryRecord>, RetryStoreError> {
        Ok(self.records.get(&id).map(|r| r.value().clone()))
    }

    async fn stats(&self) -> Result<RetryStoreStats, RetryStoreError> {
        let mut stats = RetryStoreStats::default();
        for record in self.records.iter() {
            stats.total += 1;
            match record.status() {
                RecordStatus::Pending => stats.pending += 1,
                RecordStatus::Resolved => stats.resolved += 1,
                RecordStatus::DeadLettered => stats.dead_lettered += 1,
            }
        }
        Ok(stats)
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}
