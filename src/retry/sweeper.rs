use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use crate::config::RetryConfig;
use crate::escalation::{EscalationAlert, EscalationStage, Escalator};
use crate::gateway::{GatewayError, PushGateway};
use crate::metrics::{RetryStoreMetrics, SweepMetrics};
use crate::notification::NotificationPayload;

use super::{FailedDeliveryRecord, RecordStatus, RetryStore, RetryStoreError, SweepClaim};

/// Title used in alerts for records whose snapshot cannot be decoded
const UNDECODABLE_TITLE: &str = "(undecodable payload)";

/// Outcome counts of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Records claimed by this sweep
    pub selected: usize,
    pub resolved: usize,
    /// Attempts that failed but left the record pending
    pub failed: usize,
    pub dead_lettered: usize,
    /// Records whose claim was lost or whose update failed
    pub skipped: usize,
    /// Records handed back unattempted because the gateway circuit was open
    pub deferred: usize,
}

/// Whether the sweep goes on with the rest of its batch.
enum SweepFlow {
    Continue,
    Halt,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.selected == 0
    }
}

/// Periodic job that re-drives pending retry records through the gateway.
pub struct RetrySweeper {
    store: Arc<dyn RetryStore>,
    gateway: Arc<dyn PushGateway>,
    escalator: Arc<Escalator>,
    config: RetryConfig,
    claimer: String,
    shutdown: broadcast::Receiver<()>,
}

impl RetrySweeper {
    pub fn new(
        store: Arc<dyn RetryStore>,
        gateway: Arc<dyn PushGateway>,
        escalator: Arc<Escalator>,
        config: RetryConfig,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            store,
            gateway,
            escalator,
            config,
            claimer: format!("sweeper-{}", Uuid::new_v4()),
            shutdown,
        }
    }

    /// Override the identity written to `claimed_by`.
    pub fn with_claimer(mut self, claimer: impl Into<String>) -> Self {
        self.claimer = claimer.into();
        self
    }

    pub fn claimer(&self) -> &str {
        &self.claimer
    }

    /// Run sweeps on a fixed period until shutdown.
    pub async fn run(mut self) {
        let period = Duration::from_secs(self.config.sweep_interval_seconds.max(1));
        let mut timer = tokio::time::interval(period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // Skip immediate first tick
        timer.tick().await;

        tracing::info!(
            claimer = %self.claimer,
            interval_secs = period.as_secs(),
            batch_size = self.config.batch_size,
            max_retries = self.config.max_retries,
            store = self.store.backend_type(),
            "Retry sweeper started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Retry sweeper received shutdown signal");
                    break;
                }
                _ = timer.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        RetryStoreMetrics::record_error("claim_due");
                        tracing::error!(error = %e, "Retry sweep failed to claim records");
                    }
                }
            }
        }

        tracing::info!("Retry sweeper stopped");
    }

    /// Claim one batch of due records and attempt each once.
    ///
    /// Each record's new state is written as soon as its attempt finishes.
    /// With nothing due, this performs no writes and no gateway calls.
    pub async fn sweep_once(&self) -> Result<SweepReport, RetryStoreError> {
        let start = Instant::now();
        let claim = SweepClaim::new(self.claimer.clone(), &self.config);
        let records = self.store.claim_due(&claim).await?;

        let mut report = SweepReport {
            selected: records.len(),
            ..SweepReport::default()
        };

        let mut batch = records.into_iter();
        while let Some(record) = batch.next() {
            if let SweepFlow::Halt = self.retry_record(record, &mut report).await {
                tracing::warn!(
                    remaining = batch.len(),
                    "Gateway circuit open, deferring the rest of the sweep"
                );
                for record in batch.by_ref() {
                    self.release(&record, &mut report).await;
                }
                break;
            }
        }

        let elapsed = start.elapsed();
        SweepMetrics::record_run(elapsed.as_secs_f64());
        SweepMetrics::record_resolved(report.resolved as u64);
        SweepMetrics::record_failed(report.failed as u64);
        SweepMetrics::record_dead_lettered(report.dead_lettered as u64);
        SweepMetrics::record_skipped(report.skipped as u64);
        SweepMetrics::record_deferred(report.deferred as u64);
        self.refresh_backlog().await;

        if report.is_empty() {
            tracing::debug!("Retry sweep found nothing due");
        } else {
            tracing::info!(
                selected = report.selected,
                resolved = report.resolved,
                failed = report.failed,
                dead_lettered = report.dead_lettered,
                skipped = report.skipped,
                deferred = report.deferred,
                elapsed_ms = elapsed.as_millis() as u64,
                "Retry sweep completed"
            );
        }

        Ok(report)
    }

    async fn retry_record(
        &self,
        record: FailedDeliveryRecord,
        report: &mut SweepReport,
    ) -> SweepFlow {
        let payload = match NotificationPayload::from_snapshot(&record.payload_snapshot) {
            Ok(payload) => payload,
            Err(e) => {
                let reason = format!("undecodable payload snapshot: {}", e);
                match self.store.dead_letter(record.id, &self.claimer, &reason).await {
                    Ok(_) => {
                        report.dead_lettered += 1;
                        self.escalator.escalate(EscalationAlert::new(
                            &record.target_token,
                            UNDECODABLE_TITLE,
                            None,
                            reason,
                            EscalationStage::Exhausted,
                            0,
                        ));
                    }
                    Err(e) => self.skip(&record, "dead_letter", e, report),
                }
                return SweepFlow::Continue;
            }
        };

        let attempt = if record.target_token.trim().is_empty() {
            Err("missing target token".to_string())
        } else {
            // The lease may have run out while earlier rows were sent
            if let Err(e) = self.store.renew_claim(record.id, &self.claimer).await {
                self.skip(&record, "renew_claim", e, report);
                return SweepFlow::Continue;
            }

            match self.gateway.send(&record.target_token, &payload).await {
                Err(GatewayError::CircuitOpen) => {
                    self.release(&record, report).await;
                    return SweepFlow::Halt;
                }
                sent => sent.map_err(|e| e.to_string()),
            }
        };

        match attempt {
            Ok(message_id) => match self.store.mark_resolved(record.id, &self.claimer).await {
                Ok(updated) => {
                    report.resolved += 1;
                    tracing::info!(
                        record_id = %record.id,
                        message_id = %message_id,
                        retry_count = updated.retry_count,
                        "Retried delivery succeeded"
                    );
                }
                Err(e) => {
                    // Already sent; a takeover may send it again
                    tracing::warn!(
                        record_id = %record.id,
                        message_id = %message_id,
                        "Delivered but could not mark record resolved"
                    );
                    self.skip(&record, "mark_resolved", e, report);
                }
            },
            Err(reason) => {
                let updated = match self
                    .store
                    .record_retry_failure(
                        record.id,
                        &self.claimer,
                        &reason,
                        self.config.max_retries,
                    )
                    .await
                {
                    Ok(updated) => updated,
                    Err(e) => {
                        self.skip(&record, "record_retry_failure", e, report);
                        return SweepFlow::Continue;
                    }
                };

                let stage = if updated.status() == RecordStatus::DeadLettered {
                    report.dead_lettered += 1;
                    tracing::warn!(
                        record_id = %record.id,
                        retry_count = updated.retry_count,
                        error = %reason,
                        "Retries exhausted, record dead-lettered"
                    );
                    EscalationStage::Exhausted
                } else {
                    report.failed += 1;
                    tracing::warn!(
                        record_id = %record.id,
                        retry_count = updated.retry_count,
                        error = %reason,
                        "Retried delivery failed"
                    );
                    EscalationStage::RetrySweep {
                        attempt: updated.retry_count,
                    }
                };

                self.escalator
                    .delivery_failed(&record.target_token, &payload, reason, stage);
            }
        }

        SweepFlow::Continue
    }

    /// Hand a claimed record back for the next sweep without an attempt.
    async fn release(&self, record: &FailedDeliveryRecord, report: &mut SweepReport) {
        match self.store.release_claim(record.id, &self.claimer).await {
            Ok(_) => report.deferred += 1,
            Err(e) => self.skip(record, "release_claim", e, report),
        }
    }

    fn skip(
        &self,
        record: &FailedDeliveryRecord,
        operation: &'static str,
        error: RetryStoreError,
        report: &mut SweepReport,
    ) {
        report.skipped += 1;
        match error {
            RetryStoreError::ClaimLost(_) | RetryStoreError::NotFound(_) => {
                tracing::warn!(
                    record_id = %record.id,
                    operation = operation,
                    error = %error,
                    "Skipping retry record"
                );
            }
            other => {
                RetryStoreMetrics::record_error(operation);
                tracing::error!(
                    record_id = %record.id,
                    operation = operation,
                    error = %other,
                    "Retry store update failed"
                );
            }
        }
    }

    async fn refresh_backlog(&self) {
        match self.store.stats().await {
            Ok(stats) => RetryStoreMetrics::set_backlog(stats.pending, stats.dead_lettered),
            Err(e) => {
                RetryStoreMetrics::record_error("stats");
                tracing::debug!(error = %e, "Could not refresh retry backlog gauges");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escalation::LogNotifier;
    use crate::gateway::{GatewayError, MessageId};
    use crate::notification::PayloadBuilder;
    use crate::retry::{MemoryRetryStore, NewFailedDelivery};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Gateway answering from a script, then succeeding.
    #[derive(Default)]
    struct ScriptedGateway {
        script: Mutex<VecDeque<Result<(), GatewayError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedGateway {
        fn failing(times: usize) -> Self {
            let script = (0..times)
                .map(|_| {
                    Err(GatewayError::Provider {
                        code: "UNAVAILABLE".into(),
                        message: "down".into(),
                    })
                })
                .collect();
            Self {
                script: Mutex::new(script),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl PushGateway for ScriptedGateway {
        async fn send(
            &self,
            _token: &str,
            _payload: &NotificationPayload,
        ) -> Result<MessageId, GatewayError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().unwrap().pop_front();
            match next {
                Some(Err(e)) => Err(e),
                _ => Ok(MessageId::new("m-1")),
            }
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }

    fn config(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            ..RetryConfig::default()
        }
    }

    fn sweeper(
        store: Arc<MemoryRetryStore>,
        gateway: Arc<ScriptedGateway>,
        max_retries: u32,
    ) -> (RetrySweeper, broadcast::Sender<()>) {
        let (tx, rx) = broadcast::channel(1);
        let escalator = Arc::new(Escalator::new(
            Arc::new(LogNotifier),
            Duration::from_millis(100),
            200,
        ));
        (
            RetrySweeper::new(store, gateway, escalator, config(max_retries), rx),
            tx,
        )
    }

    async fn seed(store: &MemoryRetryStore, token: &str) -> Uuid {
        let payload = PayloadBuilder::new_follower("mina", "m-1");
        store
            .record_failure(NewFailedDelivery::new(token, &payload, "first attempt failed").unwrap())
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_empty_sweep_is_a_noop() {
        let store = Arc::new(MemoryRetryStore::new());
        let gateway = Arc::new(ScriptedGateway::default());
        let (sweeper, _tx) = sweeper(store.clone(), gateway.clone(), 3);

        let report = sweeper.sweep_once().await.unwrap();
        assert!(report.is_empty());
        assert_eq!(report, SweepReport::default());
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 0);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_success_resolves_record() {
        let store = Arc::new(MemoryRetryStore::new());
        let gateway = Arc::new(ScriptedGateway::default());
        let id = seed(&store, "token-abcdef-123456").await;
        let (sweeper, _tx) = sweeper(store.clone(), gateway, 3);

        let report = sweeper.sweep_once().await.unwrap();
        assert_eq!(report.resolved, 1);

        let record = store.get(id).await.unwrap().unwrap();
        assert!(record.resolved);
        assert_eq!(record.retry_count, 1);
    }

    #[tokio::test]
    async fn test_failures_until_dead_letter() {
        let store = Arc::new(MemoryRetryStore::new());
        let gateway = Arc::new(ScriptedGateway::failing(10));
        let id = seed(&store, "token-abcdef-123456").await;
        let (sweeper, _tx) = sweeper(store.clone(), gateway.clone(), 2);

        let first = sweeper.sweep_once().await.unwrap();
        assert_eq!(first.failed, 1);
        let second = sweeper.sweep_once().await.unwrap();
        assert_eq!(second.dead_lettered, 1);
        let third = sweeper.sweep_once().await.unwrap();
        assert!(third.is_empty());

        let record = store.get(id).await.unwrap().unwrap();
        assert_eq!(record.retry_count, 2);
        assert!(!record.resolved);
        assert_eq!(record.status(), RecordStatus::DeadLettered);
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_undecodable_snapshot_is_dead_lettered_without_send() {
        let store = Arc::new(MemoryRetryStore::new());
        let gateway = Arc::new(ScriptedGateway::default());
        let record = store
            .record_failure(NewFailedDelivery {
                target_token: "token-abcdef-123456".into(),
                payload_snapshot: "not json".into(),
                reason: "x".into(),
            })
            .await
            .unwrap();
        let (sweeper, _tx) = sweeper(store.clone(), gateway.clone(), 3);

        let report = sweeper.sweep_once().await.unwrap();
        assert_eq!(report.dead_lettered, 1);
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 0);

        let record = store.get(record.id).await.unwrap().unwrap();
        assert_eq!(record.status(), RecordStatus::DeadLettered);
        assert_eq!(record.retry_count, 0);
    }

    #[tokio::test]
    async fn test_blank_token_counts_as_failed_attempt() {
        let store = Arc::new(MemoryRetryStore::new());
        let gateway = Arc::new(ScriptedGateway::default());
        let id = seed(&store, "  ").await;
        let (sweeper, _tx) = sweeper(store.clone(), gateway.clone(), 3);

        let report = sweeper.sweep_once().await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.get(id).await.unwrap().unwrap().retry_count, 1);
    }

    /// Gateway whose first send lets another sweeper take every due record over.
    struct TakeoverGateway {
        store: Arc<MemoryRetryStore>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PushGateway for TakeoverGateway {
        async fn send(
            &self,
            _token: &str,
            _payload: &NotificationPayload,
        ) -> Result<MessageId, GatewayError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                let takeover = SweepClaim {
                    claimer: "sweeper-b".into(),
                    batch_size: 10,
                    max_retries: 3,
                    lease: Duration::ZERO,
                };
                self.store.claim_due(&takeover).await.unwrap();
            }
            Ok(MessageId::new("m-1"))
        }

        fn name(&self) -> &'static str {
            "takeover"
        }
    }

    #[tokio::test]
    async fn test_records_taken_over_mid_sweep_are_not_sent() {
        let store = Arc::new(MemoryRetryStore::new());
        for i in 0..3 {
            seed(&store, &format!("token-abcdef-00000{}", i)).await;
        }
        let gateway = Arc::new(TakeoverGateway {
            store: store.clone(),
            calls: AtomicUsize::new(0),
        });
        let (_tx, rx) = broadcast::channel(1);
        let escalator = Arc::new(Escalator::new(
            Arc::new(LogNotifier),
            Duration::from_millis(100),
            200,
        ));
        let sweeper = RetrySweeper::new(
            store.clone(),
            gateway.clone(),
            escalator,
            RetryConfig {
                claim_lease_seconds: 0,
                ..RetryConfig::default()
            },
            rx,
        )
        .with_claimer("sweeper-a");

        let report = sweeper.sweep_once().await.unwrap();

        // Only the record in flight at takeover time went out
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 1);
        assert_eq!(report.selected, 3);
        assert_eq!(report.skipped, 3);
        assert_eq!(report.resolved, 0);
        assert!(store.records().iter().all(|r| r.is_claimed_by("sweeper-b")));
    }

    #[tokio::test]
    async fn test_open_circuit_defers_rest_of_batch() {
        let store = Arc::new(MemoryRetryStore::new());
        let first = seed(&store, "token-abcdef-000001").await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        seed(&store, "token-abcdef-000002").await;
        seed(&store, "token-abcdef-000003").await;

        let gateway = Arc::new(ScriptedGateway {
            script: Mutex::new(VecDeque::from([
                Err(GatewayError::Timeout(Duration::from_secs(10))),
                Err(GatewayError::CircuitOpen),
            ])),
            calls: AtomicUsize::new(0),
        });
        let (sweeper, _tx) = sweeper(store.clone(), gateway.clone(), 3);

        let report = sweeper.sweep_once().await.unwrap();
        assert_eq!(report.selected, 3);
        assert_eq!(report.failed, 1);
        assert_eq!(report.deferred, 2);
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 2);

        // Deferred records keep their retry budget and are free to claim
        for record in store.records() {
            let expected = if record.id == first { 1 } else { 0 };
            assert_eq!(record.retry_count, expected);
            assert!(record.claimed_by.is_none());
        }

        let next = sweeper.sweep_once().await.unwrap();
        assert_eq!(next.resolved, 3);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let store = Arc::new(MemoryRetryStore::new());
        let gateway = Arc::new(ScriptedGateway::default());
        let (sweeper, tx) = sweeper(store, gateway, 3);

        let handle = tokio::spawn(sweeper.run());
        tokio::time::sleep(Duration::from_millis(10)).await;
        tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper should stop")
            .unwrap();
    }
}
