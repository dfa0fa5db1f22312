//! Per-endpoint health tracking.
//!
//! Each endpoint is wrapped by an [`EndpointHealth`] holding the connection
//! handle, a circuit breaker and a set of rolling metrics (latency EMA,
//! success/error counters, slot lag). Metric reads return snapshots so the
//! health loop and failover callers never tear a reader.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::CircuitBreakerConfig;
use crate::constants::LATENCY_EMA_ALPHA;
use crate::models::{RpcConfig, SenderError};
use crate::services::circuit_breaker::{CircuitBreaker, CircuitState};
use crate::services::connection::SolanaConnection;
use solana_sdk::commitment_config::CommitmentConfig;

/// Snapshot of one endpoint's health, returned by value.
#[derive(Debug, Clone)]
pub struct EndpointMetrics {
    pub label: String,
    pub url: String,
    pub latency_ema_ms: f64,
    pub success_count: u64,
    pub error_count: u64,
    pub last_slot: u64,
    /// Highest slot across the pool minus this endpoint's last seen slot.
    pub slot_lag: u64,
    pub last_success_at: Option<DateTime<Utc>>,
    pub circuit_state: CircuitState,
}

impl EndpointMetrics {
    /// Fraction of requests that failed; 0 when nothing was recorded yet.
    pub fn error_rate(&self) -> f64 {
        let total = self.success_count + self.error_count;
        if total == 0 {
            return 0.0;
        }
        self.error_count as f64 / total as f64
    }
}

#[derive(Debug, Default)]
struct MetricsInner {
    latency_ema_ms: f64,
    has_latency_sample: bool,
    success_count: u64,
    error_count: u64,
    last_slot: u64,
    slot_lag: u64,
    last_success_at: Option<DateTime<Utc>>,
}

/// One endpoint: connection handle, breaker and rolling metrics.
pub struct EndpointHealth<C> {
    config: RpcConfig,
    connection: Arc<C>,
    breaker: CircuitBreaker,
    metrics: Mutex<MetricsInner>,
}

impl<C: SolanaConnection> EndpointHealth<C> {
    pub fn new(config: RpcConfig, connection: Arc<C>, breaker_config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            connection,
            breaker: CircuitBreaker::new(breaker_config),
            metrics: Mutex::new(MetricsInner::default()),
        }
    }

    pub fn connection(&self) -> Arc<C> {
        Arc::clone(&self.connection)
    }

    pub fn config(&self) -> &RpcConfig {
        &self.config
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Records a successful request and folds its latency into the EMA.
    /// The first sample sets the EMA to its own value.
    pub fn record_success(&self, latency_ms: f64, slot: Option<u64>) {
        let mut metrics = self.metrics.lock();
        if metrics.has_latency_sample {
            metrics.latency_ema_ms =
                LATENCY_EMA_ALPHA * latency_ms + (1.0 - LATENCY_EMA_ALPHA) * metrics.latency_ema_ms;
        } else {
            metrics.latency_ema_ms = latency_ms;
            metrics.has_latency_sample = true;
        }
        metrics.success_count += 1;
        metrics.last_success_at = Some(Utc::now());
        if let Some(slot) = slot {
            metrics.last_slot = metrics.last_slot.max(slot);
        }
        drop(metrics);
        self.breaker.record_success();
    }

    /// Records a failed request and routes it to the breaker.
    pub fn record_failure(&self, error: &SenderError) {
        debug!(url = %self.config.url, error = %error, "endpoint request failed");
        self.metrics.lock().error_count += 1;
        self.breaker.record_failure();
    }

    /// Updates the slot lag against the pool-wide highest slot. Before any
    /// success `last_slot` is 0 and the lag reports the highest slot itself.
    pub fn update_slot_lag(&self, highest_slot: u64) {
        let mut metrics = self.metrics.lock();
        metrics.slot_lag = highest_slot.saturating_sub(metrics.last_slot);
    }

    /// Latency EMA, for latency-based selection. 0 until the first sample.
    pub fn latency_ema_ms(&self) -> f64 {
        self.metrics.lock().latency_ema_ms
    }

    /// Last slot observed through a successful request or health check.
    pub fn last_slot(&self) -> u64 {
        self.metrics.lock().last_slot
    }

    /// Returns a snapshot; distinct object on every call.
    pub fn get_metrics(&self) -> EndpointMetrics {
        let metrics = self.metrics.lock();
        EndpointMetrics {
            label: self.config.get_label().to_string(),
            url: self.config.url.clone(),
            latency_ema_ms: metrics.latency_ema_ms,
            success_count: metrics.success_count,
            error_count: metrics.error_count,
            last_slot: metrics.last_slot,
            slot_lag: metrics.slot_lag,
            last_success_at: metrics.last_success_at,
            circuit_state: self.breaker.current_state(),
        }
    }

    /// Low-cost health probe: a slot query timed and recorded through the
    /// same paths as regular traffic.
    pub async fn health_check(&self, commitment: CommitmentConfig) {
        let started = Instant::now();
        match self.connection.get_slot(commitment).await {
            Ok(slot) => {
                let latency_ms = started.elapsed().as_secs_f64() * 1_000.0;
                self.record_success(latency_ms, Some(slot));
            }
            Err(error) => {
                warn!(url = %self.config.url, error = %error, "health check failed");
                self.record_failure(&error);
            }
        }
    }
}

impl<C> std::fmt::Debug for EndpointHealth<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointHealth")
            .field("url", &self.config.url)
            .field("breaker", &self.breaker)
            .finish_non_exhaustive()
    }
}
