//! End-to-end checks of the queued delivery path: sender -> memory log ->
//! delivery worker -> gateway, with failures recovered by the sweeper.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use push_delivery_service::commit_log::{ConsumerMember, LogProducer, MemoryCommitLog};
use push_delivery_service::config::{RetryConfig, WorkerConfig};
use push_delivery_service::dispatch::{DispatchOutcome, NotificationSender, QueuedSender};
use push_delivery_service::escalation::{
    EscalationAlert, EscalationError, EscalationNotifier, EscalationStage, Escalator,
};
use push_delivery_service::gateway::{GatewayError, MessageId, PushGateway};
use push_delivery_service::notification::{NotificationPayload, PayloadBuilder};
use push_delivery_service::retry::{
    MemoryRetryStore, NewFailedDelivery, RecordStatus, RetryStore, RetrySweeper,
};
use push_delivery_service::worker::{DeliveryOutcome, DeliveryWorker, WorkerContext};

const TOKEN: &str = "fcm-token-0123456789abcdef";

/// Gateway that fails a scripted number of times per token, then accepts.
#[derive(Default)]
struct ScriptedGateway {
    failures: Mutex<HashMap<String, usize>>,
    sent: Mutex<Vec<(String, String)>>,
    calls: Mutex<usize>,
}

impl ScriptedGateway {
    fn fail_times(&self, token: &str, times: usize) {
        self.failures.lock().unwrap().insert(token.to_string(), times);
    }

    fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }

    /// Titles accepted for `token`, in delivery order.
    fn delivered_titles(&self, token: &str) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == token)
            .map(|(_, title)| title.clone())
            .collect()
    }
}

#[async_trait]
impl PushGateway for ScriptedGateway {
    async fn send(
        &self,
        token: &str,
        payload: &NotificationPayload,
    ) -> Result<MessageId, GatewayError> {
        *self.calls.lock().unwrap() += 1;

        let should_fail = {
            let mut failures = self.failures.lock().unwrap();
            match failures.get_mut(token) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    true
                }
                _ => false,
            }
        };
        if should_fail {
            return Err(GatewayError::Provider {
                code: "UNAVAILABLE".into(),
                message: "scripted failure".into(),
            });
        }

        let mut sent = self.sent.lock().unwrap();
        sent.push((token.to_string(), payload.title().to_string()));
        Ok(MessageId::new(format!("msg-{}", sent.len())))
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

#[derive(Default)]
struct RecordingNotifier {
    alerts: Mutex<VecDeque<EscalationAlert>>,
}

#[async_trait]
impl EscalationNotifier for RecordingNotifier {
    async fn notify(&self, alert: &EscalationAlert) -> Result<(), EscalationError> {
        self.alerts.lock().unwrap().push_back(alert.clone());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

struct Pipeline {
    log: MemoryCommitLog,
    sender: QueuedSender,
    store: Arc<MemoryRetryStore>,
    gateway: Arc<ScriptedGateway>,
    notifier: Arc<RecordingNotifier>,
    worker: DeliveryWorker,
    sweeper: RetrySweeper,
    _shutdown: broadcast::Sender<()>,
}

impl Pipeline {
    fn new(max_retries: u32) -> Self {
        let log = MemoryCommitLog::with_options("push", 4, "workers", Duration::from_millis(20));
        let store = Arc::new(MemoryRetryStore::new());
        let gateway = Arc::new(ScriptedGateway::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let escalator = Arc::new(Escalator::new(
            notifier.clone(),
            Duration::from_millis(200),
            200,
        ));
        let (shutdown, _) = broadcast::channel(1);

        let context = WorkerContext {
            gateway: gateway.clone(),
            retry_store: store.clone(),
            escalator: escalator.clone(),
        };
        let worker = DeliveryWorker::new(
            "worker-0",
            Box::new(log.member_consumer(&ConsumerMember::solo("worker-0"))),
            context,
            &WorkerConfig::default(),
            shutdown.subscribe(),
        );
        let sweeper = RetrySweeper::new(
            store.clone(),
            gateway.clone(),
            escalator,
            RetryConfig {
                max_retries,
                ..RetryConfig::default()
            },
            shutdown.subscribe(),
        );

        Self {
            sender: QueuedSender::new(Arc::new(log.clone()), Duration::from_secs(1)),
            log,
            store,
            gateway,
            notifier,
            worker,
            sweeper,
            _shutdown: shutdown,
        }
    }

    /// Let the worker consume everything currently on the log.
    async fn drain(&mut self) -> Vec<DeliveryOutcome> {
        let mut outcomes = Vec::new();
        while let Some(outcome) = self.worker.poll_once().await.unwrap() {
            outcomes.push(outcome);
        }
        outcomes
    }

    async fn alerts(&self) -> Vec<EscalationAlert> {
        // Escalations run on their own tasks
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.notifier.alerts.lock().unwrap().iter().cloned().collect()
    }
}

fn greeting(title: &str, body: &str) -> NotificationPayload {
    PayloadBuilder::new(push_delivery_service::notification::NotificationKind::Promotion)
        .title(title)
        .body(body)
        .build()
}

#[tokio::test]
async fn invalid_requests_publish_nothing_and_record_nothing() {
    let mut pipeline = Pipeline::new(3);

    let outcome = pipeline.sender.send("", greeting("Hi", "x")).await.unwrap();
    assert!(matches!(outcome, DispatchOutcome::Skipped { .. }));

    let blank_title = NotificationPayload::from_snapshot(r#"{"title":" "}"#).unwrap();
    let outcome = pipeline.sender.send(TOKEN, blank_title).await.unwrap();
    assert!(matches!(outcome, DispatchOutcome::Skipped { .. }));

    assert!(pipeline.log.is_empty());
    assert!(pipeline.drain().await.is_empty());
    assert!(pipeline.store.is_empty());
    assert_eq!(pipeline.gateway.calls(), 0);
}

#[tokio::test]
async fn successful_delivery_leaves_no_retry_record() {
    let mut pipeline = Pipeline::new(3);
    pipeline.sender.send(TOKEN, greeting("Hi", "x")).await.unwrap();

    let outcomes = pipeline.drain().await;
    assert_eq!(outcomes.len(), 1);
    assert!(matches!(outcomes[0], DeliveryOutcome::Delivered { .. }));
    assert!(pipeline.store.is_empty());
    assert_eq!(pipeline.log.uncommitted(), 0);
}

#[tokio::test]
async fn one_failure_then_success_resolves_on_first_sweep() {
    let mut pipeline = Pipeline::new(3);
    pipeline.gateway.fail_times(TOKEN, 1);
    pipeline.sender.send(TOKEN, greeting("Hi", "x")).await.unwrap();

    let outcomes = pipeline.drain().await;
    assert!(matches!(outcomes[0], DeliveryOutcome::Failed { record_id: Some(_), .. }));
    assert_eq!(pipeline.log.uncommitted(), 0);

    let report = pipeline.sweeper.sweep_once().await.unwrap();
    assert_eq!(report.resolved, 1);

    let records = pipeline.store.records();
    assert_eq!(records.len(), 1);
    assert!(records[0].resolved);
    assert_eq!(records[0].retry_count, 1);
}

#[tokio::test]
async fn two_failures_then_success_takes_two_sweeps() {
    let mut pipeline = Pipeline::new(3);
    pipeline.gateway.fail_times("t1", 2);
    pipeline.sender.send("t1", greeting("Hi", "x")).await.unwrap();
    pipeline.drain().await;

    let first = pipeline.sweeper.sweep_once().await.unwrap();
    assert_eq!((first.failed, first.resolved), (1, 0));
    let second = pipeline.sweeper.sweep_once().await.unwrap();
    assert_eq!((second.failed, second.resolved), (0, 1));

    let record = &pipeline.store.records()[0];
    assert!(record.resolved);
    assert_eq!(record.retry_count, 2);
    assert_eq!(pipeline.gateway.delivered_titles("t1"), vec!["Hi".to_string()]);
}

#[tokio::test]
async fn exhausted_record_is_dead_lettered_and_no_longer_selected() {
    let cap = 3;
    let mut pipeline = Pipeline::new(cap);
    pipeline.gateway.fail_times(TOKEN, usize::MAX);
    pipeline.sender.send(TOKEN, greeting("Hi", "x")).await.unwrap();
    pipeline.drain().await;

    for _ in 0..cap {
        pipeline.sweeper.sweep_once().await.unwrap();
    }
    let after_cap = pipeline.sweeper.sweep_once().await.unwrap();
    assert!(after_cap.is_empty());

    let record = &pipeline.store.records()[0];
    assert_eq!(record.retry_count, cap);
    assert!(!record.resolved);
    assert_eq!(record.status(), RecordStatus::DeadLettered);
    // First attempt plus one per sweep
    assert_eq!(pipeline.gateway.calls(), 1 + cap as usize);

    let alerts = pipeline.alerts().await;
    assert_eq!(alerts.first().map(|a| a.stage), Some(EscalationStage::InitialDelivery));
    assert_eq!(alerts.last().map(|a| a.stage), Some(EscalationStage::Exhausted));
    assert_eq!(alerts.len(), 1 + cap as usize);
}

#[tokio::test]
async fn sweep_with_nothing_due_is_a_noop() {
    let pipeline = Pipeline::new(3);

    let report = pipeline.sweeper.sweep_once().await.unwrap();
    assert!(report.is_empty());
    assert_eq!(pipeline.gateway.calls(), 0);
    assert!(pipeline.store.is_empty());
}

#[tokio::test]
async fn same_token_is_delivered_in_publish_order() {
    let mut pipeline = Pipeline::new(3);
    for i in 0..5 {
        pipeline
            .sender
            .send(TOKEN, greeting(&format!("n{}", i), "x"))
            .await
            .unwrap();
        pipeline
            .sender
            .send("other-device-token-xyz", greeting(&format!("o{}", i), "x"))
            .await
            .unwrap();
    }

    pipeline.drain().await;

    assert_eq!(
        pipeline.gateway.delivered_titles(TOKEN),
        (0..5).map(|i| format!("n{}", i)).collect::<Vec<_>>()
    );
    assert_eq!(
        pipeline.gateway.delivered_titles("other-device-token-xyz"),
        (0..5).map(|i| format!("o{}", i)).collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn malformed_bytes_are_committed_and_skipped() {
    let mut pipeline = Pipeline::new(3);
    pipeline.log.publish(TOKEN, b"\x00not-an-event").await.unwrap();
    pipeline.sender.send(TOKEN, greeting("Hi", "x")).await.unwrap();

    let outcomes = pipeline.drain().await;
    assert_eq!(outcomes.len(), 2);
    assert!(matches!(outcomes[0], DeliveryOutcome::Poison { .. }));
    assert!(matches!(outcomes[1], DeliveryOutcome::Delivered { .. }));

    let partition = pipeline.log.partition_for(TOKEN);
    assert_eq!(pipeline.log.committed_offset(partition), Some(2));
    assert!(pipeline.store.is_empty());
}

#[tokio::test]
async fn escalations_never_carry_the_raw_token() {
    let mut pipeline = Pipeline::new(3);
    pipeline.gateway.fail_times(TOKEN, 1);
    pipeline.sender.send(TOKEN, greeting("Hi", &"long body ".repeat(50))).await.unwrap();
    pipeline.drain().await;

    let alerts = pipeline.alerts().await;
    assert_eq!(alerts.len(), 1);
    let alert = &alerts[0];
    assert_ne!(alert.masked_token, TOKEN);
    assert!(!alert.to_text().contains(TOKEN));
    assert!(alert.body_excerpt.as_ref().unwrap().chars().count() <= 200);
    assert!(alert.reason.contains("UNAVAILABLE"));
}

#[tokio::test]
async fn concurrent_sweepers_never_send_a_record_twice() {
    let store = Arc::new(MemoryRetryStore::new());
    let gateway = Arc::new(ScriptedGateway::default());
    let escalator = Arc::new(Escalator::new(
        Arc::new(RecordingNotifier::default()),
        Duration::from_millis(200),
        200,
    ));
    let (shutdown, _) = broadcast::channel::<()>(1);

    for i in 0..20 {
        let payload = greeting(&format!("n{}", i), "x");
        store
            .record_failure(
                NewFailedDelivery::new(
                    &format!("token-{:02}-abcdefghij", i),
                    &payload,
                    "first attempt failed",
                )
                .unwrap(),
            )
            .await
            .unwrap();
    }

    let sweeper = |name: &str| {
        RetrySweeper::new(
            store.clone(),
            gateway.clone(),
            escalator.clone(),
            RetryConfig {
                batch_size: 15,
                ..RetryConfig::default()
            },
            shutdown.subscribe(),
        )
        .with_claimer(name)
    };
    let a = sweeper("sweeper-a");
    let b = sweeper("sweeper-b");

    let (ra, rb) = tokio::join!(a.sweep_once(), b.sweep_once());
    let (ra, rb) = (ra.unwrap(), rb.unwrap());

    assert_eq!(ra.selected + rb.selected, 20);
    assert_eq!(gateway.calls(), 20);
    assert_eq!(store.stats().await.unwrap().resolved, 20);
}

/// Gateway that accepts every message after a fixed delay.
struct SlowGateway {
    delay: Duration,
    calls: Mutex<usize>,
}

#[async_trait]
impl PushGateway for SlowGateway {
    async fn send(
        &self,
        _token: &str,
        _payload: &NotificationPayload,
    ) -> Result<MessageId, GatewayError> {
        *self.calls.lock().unwrap() += 1;
        tokio::time::sleep(self.delay).await;
        Ok(MessageId::new("slow"))
    }

    fn name(&self) -> &'static str {
        "slow"
    }
}

#[tokio::test]
async fn sweep_outlasting_the_lease_does_not_double_send() {
    let store = Arc::new(MemoryRetryStore::new());
    for i in 0..3 {
        let payload = greeting("Hi", &format!("m-{}", i));
        store
            .record_failure(
                NewFailedDelivery::new(&format!("{}-{}", TOKEN, i), &payload, "first attempt")
                    .unwrap(),
            )
            .await
            .unwrap();
    }
    let gateway = Arc::new(SlowGateway {
        delay: Duration::from_millis(700),
        calls: Mutex::new(0),
    });
    let escalator = Arc::new(Escalator::new(
        Arc::new(RecordingNotifier::default()),
        Duration::from_millis(200),
        200,
    ));
    let (shutdown, _) = broadcast::channel::<()>(1);
    let sweeper = |name: &str| {
        RetrySweeper::new(
            store.clone(),
            gateway.clone(),
            escalator.clone(),
            RetryConfig {
                claim_lease_seconds: 1,
                ..RetryConfig::default()
            },
            shutdown.subscribe(),
        )
        .with_claimer(name)
    };
    let a = sweeper("sweeper-a");
    let b = sweeper("sweeper-b");

    // B sweeps after A's original claim on the last record has expired
    let (ra, rb) = tokio::join!(a.sweep_once(), async {
        tokio::time::sleep(Duration::from_millis(1100)).await;
        b.sweep_once().await
    });
    let (ra, rb) = (ra.unwrap(), rb.unwrap());

    assert_eq!(*gateway.calls.lock().unwrap(), 3);
    assert_eq!(ra.resolved + rb.resolved, 3);
    assert_eq!(store.stats().await.unwrap().resolved, 3);
}
