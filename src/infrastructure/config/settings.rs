use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub escalation: EscalationConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub otel: OtelConfig,
}

/// Ops HTTP listener (health, stats, metrics)
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Which sender is bound as the primary dispatch strategy
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// "queued" (commit log) or "direct" (synchronous gateway call)
    #[serde(default = "default_strategy")]
    pub strategy: String,
}

/// Durable commit log settings
#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// "kafka", "redis" or "memory"
    #[serde(default = "default_log_backend")]
    pub backend: String,
    #[serde(default = "default_topic")]
    pub topic: String,
    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,
    /// Partition count for the redis and memory backends (Kafka owns its own)
    #[serde(default = "default_partitions")]
    pub partitions: u32,
    #[serde(default = "default_publish_timeout_ms")]
    pub publish_timeout_ms: u64,
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    #[serde(default = "default_bootstrap_servers")]
    pub bootstrap_servers: String,
    #[serde(default = "default_log_redis_prefix")]
    pub redis_prefix: String,
    /// Approximate MAXLEN applied to each Redis stream
    #[serde(default = "default_redis_maxlen")]
    pub redis_maxlen: usize,
}

/// Push gateway client settings
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// "fcm" or "log"
    #[serde(default = "default_gateway_kind")]
    pub kind: String,
    #[serde(default = "default_fcm_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub project_id: String,
    /// Static bearer token; application-default credentials are used when unset
    #[serde(default)]
    pub access_token: Option<String>,
    /// Hard per-call timeout; a timeout counts as a retryable failure
    #[serde(default = "default_gateway_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_cb_failure_threshold")]
    pub circuit_breaker_failure_threshold: u32,
    #[serde(default = "default_cb_success_threshold")]
    pub circuit_breaker_success_threshold: u32,
    #[serde(default = "default_cb_reset_timeout_ms")]
    pub circuit_breaker_reset_timeout_ms: u64,
}

/// Retry store and sweeper settings
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// "postgres" or "memory"
    #[serde(default = "default_retry_backend")]
    pub backend: String,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// How long a sweeper's claim on a row stays valid; must outlast a
    /// full batch of gateway calls
    #[serde(default = "default_claim_lease")]
    pub claim_lease_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u32,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_seconds: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,
    #[serde(default = "default_cb_failure_threshold")]
    pub circuit_breaker_failure_threshold: u32,
    #[serde(default = "default_cb_success_threshold")]
    pub circuit_breaker_success_threshold: u32,
    #[serde(default = "default_cb_reset_timeout_ms")]
    pub circuit_breaker_reset_timeout_ms: u64,
}

/// Out-of-band alert channel settings
#[derive(Debug, Clone, Deserialize)]
pub struct EscalationConfig {
    /// "webhook", "log" or "disabled"
    #[serde(default = "default_escalation_kind")]
    pub kind: String,
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default = "default_escalation_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_body_max_chars")]
    pub body_max_chars: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Consumers started in this process, all in the same consumer group
    #[serde(default = "default_worker_instances")]
    pub instances: usize,
    #[serde(default = "default_backoff_initial_ms")]
    pub backoff_initial_delay_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OtelConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_otel_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_sampling_ratio")]
    pub sampling_ratio: f64,
    /// Emit log lines as JSON instead of the human-readable format
    #[serde(default)]
    pub json_logs: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    9090
}

fn default_strategy() -> String {
    "queued".to_string()
}

fn default_log_backend() -> String {
    "memory".to_string()
}

fn default_topic() -> String {
    "push-notifications".to_string()
}

fn default_consumer_group() -> String {
    "push-delivery-worker".to_string()
}

fn default_partitions() -> u32 {
    8
}

fn default_publish_timeout_ms() -> u64 {
    5_000
}

fn default_poll_timeout_ms() -> u64 {
    1_000
}

fn default_bootstrap_servers() -> String {
    "localhost:9092".to_string()
}

fn default_log_redis_prefix() -> String {
    "push:log".to_string()
}

fn default_redis_maxlen() -> usize {
    100_000
}

fn default_gateway_kind() -> String {
    "log".to_string()
}

fn default_fcm_base_url() -> String {
    "https://fcm.googleapis.com".to_string()
}

fn default_gateway_timeout_ms() -> u64 {
    10_000
}

fn default_cb_failure_threshold() -> u32 {
    5
}

fn default_cb_success_threshold() -> u32 {
    2
}

fn default_cb_reset_timeout_ms() -> u64 {
    30_000
}

fn default_retry_backend() -> String {
    "memory".to_string()
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_batch_size() -> usize {
    100
}

fn default_max_retries() -> u32 {
    3
}

fn default_claim_lease() -> u64 {
    1_200
}

fn default_database_url() -> String {
    "postgres://localhost:5432/push".to_string()
}

fn default_pool_size() -> u32 {
    10
}

fn default_connect_timeout() -> u32 {
    5
}

fn default_idle_timeout() -> u32 {
    600
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_escalation_kind() -> String {
    "log".to_string()
}

fn default_escalation_timeout_ms() -> u64 {
    3_000
}

fn default_body_max_chars() -> usize {
    200
}

fn default_worker_instances() -> usize {
    1
}

fn default_backoff_initial_ms() -> u64 {
    100
}

fn default_backoff_max_ms() -> u64 {
    30_000
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_service_name() -> String {
    "push-delivery-service".to_string()
}

fn default_sampling_ratio() -> f64 {
    1.0
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 9090)?
            .set_default("dispatch.strategy", "queued")?
            .set_default("retry.sweep_interval_seconds", 60)?
            .set_default("retry.batch_size", 100)?
            .set_default("retry.max_retries", 3)?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // PUSH_RETRY__BATCH_SIZE, PUSH_LOG__BACKEND, PUSH_GATEWAY__TIMEOUT_MS, ...
            .add_source(
                Environment::with_prefix("PUSH")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        let settings: Self = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject combinations that would let a claim expire mid-sweep.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let lease_ms = u128::from(self.retry.claim_lease_seconds) * 1_000;
        let batch_ms = self.retry.batch_size as u128 * u128::from(self.gateway.timeout_ms);
        if lease_ms <= batch_ms {
            return Err(ConfigError::Message(format!(
                "retry.claim_lease_seconds ({}s) must exceed retry.batch_size ({}) x gateway.timeout_ms ({}ms)",
                self.retry.claim_lease_seconds, self.retry.batch_size, self.gateway.timeout_ms
            )));
        }
        Ok(())
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            backend: default_log_backend(),
            topic: default_topic(),
            consumer_group: default_consumer_group(),
            partitions: default_partitions(),
            publish_timeout_ms: default_publish_timeout_ms(),
            poll_timeout_ms: default_poll_timeout_ms(),
            bootstrap_servers: default_bootstrap_servers(),
            redis_prefix: default_log_redis_prefix(),
            redis_maxlen: default_redis_maxlen(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            kind: default_gateway_kind(),
            base_url: default_fcm_base_url(),
            project_id: String::new(),
            access_token: None,
            timeout_ms: default_gateway_timeout_ms(),
            circuit_breaker_failure_threshold: default_cb_failure_threshold(),
            circuit_breaker_success_threshold: default_cb_success_threshold(),
            circuit_breaker_reset_timeout_ms: default_cb_reset_timeout_ms(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            backend: default_retry_backend(),
            sweep_interval_seconds: default_sweep_interval(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            claim_lease_seconds: default_claim_lease(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            pool_size: default_pool_size(),
            connect_timeout_seconds: default_connect_timeout(),
            idle_timeout_seconds: default_idle_timeout(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            circuit_breaker_failure_threshold: default_cb_failure_threshold(),
            circuit_breaker_success_threshold: default_cb_success_threshold(),
            circuit_breaker_reset_timeout_ms: default_cb_reset_timeout_ms(),
        }
    }
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            kind: default_escalation_kind(),
            webhook_url: None,
            timeout_ms: default_escalation_timeout_ms(),
            body_max_chars: default_body_max_chars(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            instances: default_worker_instances(),
            backoff_initial_delay_ms: default_backoff_initial_ms(),
            backoff_max_delay_ms: default_backoff_max_ms(),
        }
    }
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_otel_endpoint(),
            service_name: default_service_name(),
            sampling_ratio: default_sampling_ratio(),
            json_logs: false,
        }
    }
}
