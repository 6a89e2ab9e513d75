//! Timeout and circuit breaker around a push gateway.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::metrics::GatewayMetrics;
use crate::notification::NotificationPayload;
use crate::resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats};

use super::{GatewayError, MessageId, PushGateway};

/// The call path every component uses to reach the push gateway.
///
/// A call that exceeds `timeout` fails with [`GatewayError::Timeout`]; while
/// the breaker is open calls fail fast with [`GatewayError::CircuitOpen`].
/// Both are ordinary retryable failures to callers.
pub struct GuardedGateway {
    inner: Arc<dyn PushGateway>,
    breaker: Arc<CircuitBreaker>,
    timeout: Duration,
}

impl GuardedGateway {
    pub fn new(
        inner: Arc<dyn PushGateway>,
        timeout: Duration,
        breaker_config: CircuitBreakerConfig,
    ) -> Self {
        let name = format!("gateway:{}", inner.name());
        Self {
            inner,
            breaker: Arc::new(CircuitBreaker::with_config(name, breaker_config)),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn circuit_stats(&self) -> CircuitBreakerStats {
        self.breaker.stats()
    }

    fn publish_circuit_state(&self) {
        GatewayMetrics::set_circuit_state(self.breaker.state().as_gauge());
    }
}

#[async_trait]
impl PushGateway for GuardedGateway {
    async fn send(
        &self,
        token: &str,
        payload: &NotificationPayload,
    ) -> Result<MessageId, GatewayError> {
        let gateway = self.inner.name();

        if !self.breaker.allow_request() {
            GatewayMetrics::record_rejected(gateway);
            self.publish_circuit_state();
            return Err(GatewayError::CircuitOpen);
        }

        let started = Instant::now();
        let result = match tokio::time::timeout(self.timeout, self.inner.send(token, payload)).await
        {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout(self.timeout)),
        };
        let elapsed = started.elapsed().as_secs_f64();

        match &result {
            Ok(_) => {
                self.breaker.record_success();
                GatewayMetrics::record_request(gateway, "success", elapsed);
            }
            Err(e) => {
                if e.indicates_outage() {
                    self.breaker.record_failure();
                } else {
                    // The provider answered; it is reachable
                    self.breaker.record_success();
                }
                GatewayMetrics::record_request(gateway, e.kind(), elapsed);
            }
        }
        self.publish_circuit_state();

        result
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }
}
