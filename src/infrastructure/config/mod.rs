mod settings;

pub use settings::{
    DatabaseConfig, DispatchConfig, EscalationConfig, GatewayConfig, LogConfig, OtelConfig,
    RedisConfig, RetryConfig, ServerConfig, Settings, WorkerConfig,
};
