//! Health check and statistics endpoints.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::error::Result;
use crate::gateway::PushGateway;
use crate::resilience::{CircuitBreakerStats, CircuitState};
use crate::retry::RetryStoreStats;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub dispatch_strategy: String,
    pub gateway: GatewayHealthResponse,
    pub commit_log: BackendHealthResponse,
    pub retry_store: BackendHealthResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub postgres: Option<PostgresHealthResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redis: Option<RedisHealthResponse>,
}

#[derive(Debug, Serialize)]
pub struct GatewayHealthResponse {
    pub name: String,
    pub circuit_state: CircuitState,
}

#[derive(Debug, Serialize)]
pub struct BackendHealthResponse {
    pub backend: String,
    pub available: bool,
}

#[derive(Debug, Serialize)]
pub struct PostgresHealthResponse {
    pub circuit_state: CircuitState,
    pub pool_size: u32,
    pub idle_connections: usize,
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct RedisHealthResponse {
    pub circuit_state: CircuitState,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub dispatch_strategy: String,
    pub retry: RetryStoreStats,
    pub sweep: SweepSettingsResponse,
    pub gateway: CircuitBreakerStats,
    pub worker_instances: usize,
}

#[derive(Debug, Serialize)]
pub struct SweepSettingsResponse {
    pub interval_seconds: u64,
    pub batch_size: usize,
    pub max_retries: u32,
    pub claim_lease_seconds: u64,
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let gateway_state = state.gateway.circuit_stats().state;
    let retry_store_available = state.retry_store.stats().await.is_ok();

    let postgres = state.postgres_pool.as_ref().map(|pool| PostgresHealthResponse {
        circuit_state: pool.circuit_state(),
        pool_size: pool.pool().size(),
        idle_connections: pool.pool().num_idle(),
        url: pool.database_url_masked(),
    });

    let redis = state.redis_pool.as_ref().map(|pool| RedisHealthResponse {
        circuit_state: pool.circuit_state(),
    });
    let redis_available = redis
        .as_ref()
        .map_or(true, |r| r.circuit_state != CircuitState::Open);

    let healthy = gateway_state != CircuitState::Open && retry_store_available && redis_available;

    Json(HealthResponse {
        status: if healthy { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        dispatch_strategy: state.sender.strategy().to_string(),
        gateway: GatewayHealthResponse {
            name: state.gateway.name().to_string(),
            circuit_state: gateway_state,
        },
        commit_log: BackendHealthResponse {
            backend: state.commit_log.backend_type().to_string(),
            available: redis_available,
        },
        retry_store: BackendHealthResponse {
            backend: state.retry_store.backend_type().to_string(),
            available: retry_store_available,
        },
        postgres,
        redis,
    })
}

/// GET /stats
pub async fn stats(State(state): State<AppState>) -> Result<Json<StatsResponse>> {
    let retry = state.retry_store.stats().await?;
    let settings = &state.settings;

    Ok(Json(StatsResponse {
        dispatch_strategy: state.sender.strategy().to_string(),
        retry,
        sweep: SweepSettingsResponse {
            interval_seconds: settings.retry.sweep_interval_seconds,
            batch_size: settings.retry.batch_size,
            max_retries: settings.retry.max_retries,
            claim_lease_seconds: settings.retry.claim_lease_seconds,
        },
        gateway: state.gateway.circuit_stats(),
        worker_instances: settings.worker.instances.max(1),
    }))
}
