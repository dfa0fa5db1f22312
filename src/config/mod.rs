//! Configuration records for the transaction sender.
//!
//! Every option recognized by the pipeline lives here, with defaults
//! matching the constants module. Records that can be loaded from JSON
//! reject unknown keys; the top-level [`SenderConfig`] is assembled in code
//! because it carries live signer handles.

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signer::Signer;

use crate::constants::*;
use crate::models::{RpcConfig, SenderError};

/// A shared signer handle. The primary signer doubles as the fee payer.
pub type DynSigner = Arc<dyn Signer + Send + Sync>;

/// Hook invoked before each retry sleep with (error, attempt, planned delay).
pub type OnRetryHook =
    Arc<dyn Fn(SenderError, u32, u64) -> BoxFuture<'static, ()> + Send + Sync>;

/// Predicate overriding the built-in error classifier for retry decisions.
pub type RetryPredicate = Arc<dyn Fn(&SenderError) -> bool + Send + Sync>;

/// Endpoint selection strategy for the connection pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionStrategy {
    /// Deterministic weighted rotation over healthy endpoints.
    #[default]
    WeightedRoundRobin,
    /// Pick the healthy endpoint with the lowest latency EMA.
    LatencyBased,
}

/// Per-endpoint circuit breaker tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CircuitBreakerConfig {
    /// Failures inside the sliding window before the breaker opens.
    pub failure_threshold: usize,
    /// How long an open breaker waits before allowing a probe.
    pub reset_timeout_ms: u64,
    /// Width of the sliding failure window.
    pub window_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_BREAKER_FAILURE_THRESHOLD,
            reset_timeout_ms: DEFAULT_BREAKER_RESET_TIMEOUT_MS,
            window_ms: DEFAULT_BREAKER_WINDOW_MS,
        }
    }
}

/// Connection pool configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RpcPoolConfig {
    /// Endpoints to dispatch over; at least one is required.
    pub endpoints: Vec<RpcConfig>,
    pub strategy: SelectionStrategy,
    pub health_check_interval_ms: u64,
    pub health_check_commitment: CommitmentConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    /// Request timeout applied to each underlying RPC client.
    pub rpc_timeout_ms: u64,
}

impl Default for RpcPoolConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            strategy: SelectionStrategy::default(),
            health_check_interval_ms: DEFAULT_HEALTH_CHECK_INTERVAL_MS,
            health_check_commitment: CommitmentConfig::confirmed(),
            circuit_breaker: CircuitBreakerConfig::default(),
            rpc_timeout_ms: DEFAULT_RPC_TIMEOUT_MS,
        }
    }
}

impl RpcPoolConfig {
    /// Convenience constructor for a single-endpoint pool.
    pub fn single(url: impl Into<String>) -> Self {
        Self {
            endpoints: vec![RpcConfig::new(url)],
            ..Default::default()
        }
    }

    /// Constructor for a multi-endpoint pool with the default strategy.
    pub fn with_endpoints(endpoints: Vec<RpcConfig>) -> Self {
        Self {
            endpoints,
            ..Default::default()
        }
    }
}

/// Retry loop tuning plus optional behavior overrides.
#[derive(Clone)]
pub struct RetryPolicy {
    /// Retries after the initial attempt; the loop runs `max_retries + 1`
    /// attempts at most.
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    /// When set, its verdict replaces the classifier entirely.
    pub retry_predicate: Option<RetryPredicate>,
    /// Awaited before every retry sleep; may trigger side effects such as a
    /// forced blockhash refresh.
    pub on_retry: Option<OnRetryHook>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_RETRY_MAX_DELAY_MS,
            backoff_multiplier: DEFAULT_RETRY_BACKOFF_MULTIPLIER,
            retry_predicate: None,
            on_retry: None,
        }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("base_delay_ms", &self.base_delay_ms)
            .field("max_delay_ms", &self.max_delay_ms)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("retry_predicate", &self.retry_predicate.is_some())
            .field("on_retry", &self.on_retry.is_some())
            .finish()
    }
}

/// Priority-fee estimation tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PriorityFeeConfig {
    /// Percentile of non-zero samples to target; one of 50, 75 or 90.
    pub target_percentile: u8,
    pub min_micro_lamports: u64,
    pub max_micro_lamports: u64,
    /// Restrict samples to fees paid on these writable accounts.
    pub writable_accounts: Vec<Pubkey>,
}

impl Default for PriorityFeeConfig {
    fn default() -> Self {
        Self {
            target_percentile: DEFAULT_FEE_TARGET_PERCENTILE,
            min_micro_lamports: DEFAULT_FEE_MIN_MICRO_LAMPORTS,
            max_micro_lamports: DEFAULT_FEE_MAX_MICRO_LAMPORTS,
            writable_accounts: Vec::new(),
        }
    }
}

impl PriorityFeeConfig {
    pub fn validate(&self) -> Result<(), SenderError> {
        if !matches!(self.target_percentile, 50 | 75 | 90) {
            return Err(SenderError::Config(format!(
                "target_percentile must be 50, 75 or 90, got {}",
                self.target_percentile
            )));
        }
        if self.min_micro_lamports > self.max_micro_lamports {
            return Err(SenderError::Config(
                "min_micro_lamports exceeds max_micro_lamports".to_string(),
            ));
        }
        Ok(())
    }
}

/// Pre-flight simulation tuning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimulationConfig {
    pub commitment: CommitmentConfig,
    pub replace_recent_blockhash: bool,
    pub sig_verify: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            commitment: CommitmentConfig::confirmed(),
            replace_recent_blockhash: true,
            sig_verify: false,
        }
    }
}

/// Confirmation tracking tuning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfirmationConfig {
    pub commitment: CommitmentConfig,
    pub timeout_ms: u64,
    pub poll_interval_ms: u64,
    /// Race a signature subscription against the polling loop.
    pub use_web_socket: bool,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            commitment: CommitmentConfig::confirmed(),
            timeout_ms: DEFAULT_CONFIRMATION_TIMEOUT_MS,
            poll_interval_ms: DEFAULT_CONFIRMATION_POLL_INTERVAL_MS,
            use_web_socket: true,
        }
    }
}

/// Blockhash cache tuning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BlockhashConfig {
    pub ttl_ms: u64,
    pub refresh_interval_ms: u64,
    pub commitment: CommitmentConfig,
}

impl Default for BlockhashConfig {
    fn default() -> Self {
        Self {
            ttl_ms: DEFAULT_BLOCKHASH_TTL_MS,
            refresh_interval_ms: DEFAULT_BLOCKHASH_REFRESH_INTERVAL_MS,
            commitment: CommitmentConfig::confirmed(),
        }
    }
}

/// Top-level configuration record for a [`TransactionSender`].
///
/// [`TransactionSender`]: crate::sender::TransactionSender
#[derive(Clone)]
pub struct SenderConfig {
    pub rpc: RpcPoolConfig,
    /// Primary signer; also the fee payer for rebuilt legacy transactions.
    pub signer: DynSigner,
    pub extra_signers: Vec<DynSigner>,
    pub retry: RetryPolicy,
    /// `None` disables compute-budget injection entirely.
    pub priority_fee: Option<PriorityFeeConfig>,
    /// `None` disables pre-flight simulation entirely.
    pub simulation: Option<SimulationConfig>,
    pub confirmation: ConfirmationConfig,
    pub blockhash: BlockhashConfig,
    /// Global default commitment, used where no narrower setting applies.
    pub commitment: CommitmentConfig,
}

impl SenderConfig {
    /// Creates a configuration with the given pool and signer and every
    /// other option at its default.
    pub fn new(rpc: RpcPoolConfig, signer: DynSigner) -> Self {
        Self {
            rpc,
            signer,
            extra_signers: Vec::new(),
            retry: RetryPolicy::default(),
            priority_fee: Some(PriorityFeeConfig::default()),
            simulation: Some(SimulationConfig::default()),
            confirmation: ConfirmationConfig::default(),
            blockhash: BlockhashConfig::default(),
            commitment: CommitmentConfig::confirmed(),
        }
    }

    /// Validates the whole record; called by the sender constructor.
    pub fn validate(&self) -> Result<(), SenderError> {
        RpcConfig::validate_list(&self.rpc.endpoints)?;
        if let Some(fee) = &self.priority_fee {
            fee.validate()?;
        }
        if self.confirmation.poll_interval_ms == 0 {
            return Err(SenderError::Config(
                "poll_interval_ms must be positive".to_string(),
            ));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(SenderError::Config(
                "backoff_multiplier must be at least 1.0".to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for SenderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SenderConfig")
            .field("rpc", &self.rpc)
            .field("signer", &self.signer.pubkey())
            .field("extra_signers", &self.extra_signers.len())
            .field("retry", &self.retry)
            .field("priority_fee", &self.priority_fee)
            .field("simulation", &self.simulation)
            .field("confirmation", &self.confirmation)
            .field("blockhash", &self.blockhash)
            .field("commitment", &self.commitment)
            .finish()
    }
}

/// Per-send priority-fee override.
#[derive(Debug, Clone)]
pub enum PriorityFeeOverride {
    /// Use a fixed fee, skipping estimation.
    Static { micro_lamports: u64 },
    /// Estimate with this configuration instead of the sender-level one.
    Estimate(PriorityFeeConfig),
}

/// Options applying to a single `send` call.
#[derive(Clone, Default)]
pub struct SendOptions {
    pub priority_fee: Option<PriorityFeeOverride>,
    /// Compute-unit limit for the injected budget instruction.
    pub compute_units: Option<u32>,
    /// Replaces the sender-level retry policy for this call.
    pub retry: Option<RetryPolicy>,
    pub skip_simulation: bool,
    pub skip_confirmation: bool,
    pub commitment: Option<CommitmentConfig>,
    pub extra_signers: Vec<DynSigner>,
}

impl fmt::Debug for SendOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendOptions")
            .field("priority_fee", &self.priority_fee)
            .field("compute_units", &self.compute_units)
            .field("retry", &self.retry)
            .field("skip_simulation", &self.skip_simulation)
            .field("skip_confirmation", &self.skip_confirmation)
            .field("commitment", &self.commitment)
            .field("extra_signers", &self.extra_signers.len())
            .finish()
    }
}
