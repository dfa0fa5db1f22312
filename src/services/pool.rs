//! Multi-endpoint RPC dispatch.
//!
//! The pool owns one [`EndpointHealth`] per configured endpoint and hands
//! out connections by strategy: weighted round-robin (default) or lowest
//! latency EMA. Request paths that must succeed go through
//! [`ConnectionPool::with_fallback`], which walks the candidates in order
//! and records outcomes on the tracker they came from. A background loop
//! probes every endpoint and recomputes slot lag pool-wide.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use solana_sdk::commitment_config::CommitmentConfig;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::config::{RpcPoolConfig, SelectionStrategy};
use crate::models::{RpcConfig, SenderError};
use crate::services::health::{EndpointHealth, EndpointMetrics};
use crate::services::connection::SolanaConnection;

/// Endpoint selection, failover and background health checking.
pub struct ConnectionPool<C> {
    trackers: Vec<Arc<EndpointHealth<C>>>,
    strategy: SelectionStrategy,
    rr_cursor: AtomicU64,
    health_check_interval: Duration,
    health_check_commitment: CommitmentConfig,
    health_task: Mutex<Option<JoinHandle<()>>>,
}

impl<C: SolanaConnection> ConnectionPool<C> {
    /// Builds a pool from endpoint descriptors paired with their
    /// connection handles.
    pub fn new(
        entries: Vec<(RpcConfig, Arc<C>)>,
        config: &RpcPoolConfig,
    ) -> Result<Self, SenderError> {
        let configs: Vec<RpcConfig> = entries.iter().map(|(c, _)| c.clone()).collect();
        RpcConfig::validate_list(&configs)?;

        let trackers = entries
            .into_iter()
            .map(|(endpoint, connection)| {
                Arc::new(EndpointHealth::new(
                    endpoint,
                    connection,
                    config.circuit_breaker,
                ))
            })
            .collect();

        Ok(Self {
            trackers,
            strategy: config.strategy,
            rr_cursor: AtomicU64::new(0),
            health_check_interval: Duration::from_millis(config.health_check_interval_ms),
            health_check_commitment: config.health_check_commitment,
            health_task: Mutex::new(None),
        })
    }

    pub(crate) fn trackers(&self) -> &[Arc<EndpointHealth<C>>] {
        &self.trackers
    }

    /// Selects a single connection by the configured strategy.
    ///
    /// When every breaker is open this falls back to the first endpoint
    /// rather than failing: callers may still want to attempt the request,
    /// and [`ConnectionPool::with_fallback`] is the path that escalates.
    pub fn get_connection(&self) -> Arc<C> {
        let available: Vec<&Arc<EndpointHealth<C>>> = self
            .trackers
            .iter()
            .filter(|tracker| tracker.breaker().can_execute())
            .collect();

        if available.is_empty() {
            warn!("no healthy RPC endpoints available, falling back to first endpoint");
            return self.trackers[0].connection();
        }

        match self.strategy {
            SelectionStrategy::WeightedRoundRobin => self.select_weighted(&available),
            SelectionStrategy::LatencyBased => self.select_by_latency(&available),
        }
    }

    fn select_weighted(&self, available: &[&Arc<EndpointHealth<C>>]) -> Arc<C> {
        let total_weight: u64 = available
            .iter()
            .map(|tracker| tracker.config().get_weight() as u64)
            .sum();
        let cursor = self.rr_cursor.fetch_add(1, Ordering::Relaxed);
        let mut position = cursor % total_weight;

        for tracker in available {
            let weight = tracker.config().get_weight() as u64;
            if position < weight {
                return tracker.connection();
            }
            position -= weight;
        }
        // Cumulative weights cover `position < total_weight`.
        available[0].connection()
    }

    fn select_by_latency(&self, available: &[&Arc<EndpointHealth<C>>]) -> Arc<C> {
        let mut best = available[0];
        for tracker in &available[1..] {
            if tracker.latency_ema_ms() < best.latency_ema_ms() {
                best = tracker;
            }
        }
        best.connection()
    }

    /// Runs `operation` against the candidate endpoints in order, failing
    /// over on error. Successes and failures are recorded on the tracker
    /// the connection came from.
    pub async fn with_fallback<T, F, Fut>(
        &self,
        operation: &str,
        f: F,
    ) -> Result<T, SenderError>
    where
        F: Fn(Arc<C>) -> Fut,
        Fut: Future<Output = Result<T, SenderError>>,
    {
        let available: Vec<Arc<EndpointHealth<C>>> = self
            .trackers
            .iter()
            .filter(|tracker| tracker.breaker().can_execute())
            .cloned()
            .collect();
        let candidates = if available.is_empty() {
            self.trackers.clone()
        } else {
            available
        };
        let attempted = candidates.len();

        let mut last_error: Option<SenderError> = None;
        for tracker in candidates {
            let started = Instant::now();
            match f(tracker.connection()).await {
                Ok(value) => {
                    let latency_ms = started.elapsed().as_secs_f64() * 1_000.0;
                    tracker.record_success(latency_ms, None);
                    return Ok(value);
                }
                Err(error) => {
                    debug!(
                        operation = operation,
                        url = %tracker.config().url,
                        error = %error,
                        "endpoint attempt failed, trying next"
                    );
                    tracker.record_failure(&error);
                    last_error = Some(error);
                }
            }
        }

        Err(SenderError::AllEndpointsUnhealthy {
            attempted,
            source: Arc::new(
                last_error.unwrap_or_else(|| SenderError::Rpc("no endpoints attempted".into())),
            ),
        })
    }

    /// Spawns the periodic health loop. Idempotent.
    pub fn start(self: &Arc<Self>)
    where
        C: 'static,
    {
        let mut guard = self.health_task.lock();
        if guard.is_some() {
            return;
        }

        let weak = Arc::downgrade(self);
        let interval = self.health_check_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick fires immediately; consume it so checks start
            // one interval in.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(pool) = weak.upgrade() else { break };
                pool.run_health_checks().await;
            }
        });
        *guard = Some(handle);
    }

    /// Probes every endpoint concurrently, then recomputes slot lag
    /// against the pool-wide highest slot.
    pub async fn run_health_checks(&self) {
        let checks = self
            .trackers
            .iter()
            .map(|tracker| tracker.health_check(self.health_check_commitment));
        futures::future::join_all(checks).await;

        let highest_slot = self
            .trackers
            .iter()
            .map(|tracker| tracker.last_slot())
            .max()
            .unwrap_or(0);
        for tracker in &self.trackers {
            tracker.update_slot_lag(highest_slot);
        }
    }

    /// Per-endpoint metric snapshots, keyed by label.
    pub fn health_report(&self) -> Vec<EndpointMetrics> {
        self.trackers
            .iter()
            .map(|tracker| tracker.get_metrics())
            .collect()
    }

    /// Stops the health loop. Idempotent.
    pub fn destroy(&self) {
        if let Some(handle) = self.health_task.lock().take() {
            handle.abort();
        }
    }
}

impl<C> Drop for ConnectionPool<C> {
    fn drop(&mut self) {
        if let Some(handle) = self.health_task.lock().take() {
            handle.abort();
        }
    }
}

impl<C> std::fmt::Debug for ConnectionPool<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("endpoints", &self.trackers.len())
            .field("strategy", &self.strategy)
            .finish_non_exhaustive()
    }
}
