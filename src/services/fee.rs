//! Priority-fee estimation over recent prioritization-fee samples.
//!
//! Zero-valued samples are discarded (idle slots say nothing about the fee
//! market), percentiles are computed by nearest rank over the ascending
//! sorted samples, and the chosen percentile is clamped into the configured
//! bounds. An empty market yields the configured minimum.

use std::sync::Arc;

use tracing::debug;

use crate::config::PriorityFeeConfig;
use crate::models::{FeeEstimate, SenderError};
use crate::services::connection::SolanaConnection;
use crate::services::pool::ConnectionPool;

/// Nearest-rank percentile over an ascending sorted slice:
/// `index = ceil(p/100 * n) - 1`, clamped into `[0, n - 1]`.
fn nearest_rank(sorted: &[u64], percentile: u8) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let n = sorted.len();
    let rank = (percentile as f64 / 100.0 * n as f64).ceil() as usize;
    let index = rank.saturating_sub(1).min(n - 1);
    sorted[index]
}

/// Estimates priority fees through the connection pool.
pub struct PriorityFeeEstimator<C> {
    pool: Arc<ConnectionPool<C>>,
}

impl<C: SolanaConnection> PriorityFeeEstimator<C> {
    pub fn new(pool: Arc<ConnectionPool<C>>) -> Self {
        Self { pool }
    }

    /// Produces a fee estimate for the configured percentile.
    ///
    /// RPC failure surfaces as [`SenderError::FeeEstimationFailed`] with the
    /// cause preserved.
    pub async fn estimate(&self, config: &PriorityFeeConfig) -> Result<FeeEstimate, SenderError> {
        config.validate()?;

        let accounts = config.writable_accounts.clone();
        let samples = self
            .pool
            .with_fallback("get_recent_prioritization_fees", move |conn| {
                let accounts = accounts.clone();
                async move { conn.get_recent_prioritization_fees(&accounts).await }
            })
            .await
            .map_err(|error| SenderError::FeeEstimationFailed {
                source: Arc::new(error),
            })?;

        let mut fees: Vec<u64> = samples
            .iter()
            .map(|sample| sample.prioritization_fee)
            .filter(|fee| *fee > 0)
            .collect();
        fees.sort_unstable();

        let estimate = if fees.is_empty() {
            FeeEstimate {
                micro_lamports: config.min_micro_lamports,
                p50: 0,
                p75: 0,
                p90: 0,
                sample_count: 0,
            }
        } else {
            let p50 = nearest_rank(&fees, 50);
            let p75 = nearest_rank(&fees, 75);
            let p90 = nearest_rank(&fees, 90);
            let target = nearest_rank(&fees, config.target_percentile);
            FeeEstimate {
                micro_lamports: target
                    .clamp(config.min_micro_lamports, config.max_micro_lamports),
                p50,
                p75,
                p90,
                sample_count: fees.len(),
            }
        };

        debug!(
            micro_lamports = estimate.micro_lamports,
            p50 = estimate.p50,
            p75 = estimate.p75,
            p90 = estimate.p90,
            samples = estimate.sample_count,
            "estimated priority fee"
        );
        Ok(estimate)
    }
}
