//! Constants for transaction submission.
//!
//! This module contains the default values for retry scheduling, confirmation
//! tracking, blockhash caching, priority fees and endpoint health handling.

// Retry scheduling
/// Maximum number of retries after the initial attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Base delay for the exponential backoff (in milliseconds).
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 500;

/// Upper bound for a single backoff delay (in milliseconds).
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 10_000;

/// Multiplier applied to the base delay per attempt.
pub const DEFAULT_RETRY_BACKOFF_MULTIPLIER: f64 = 2.0;

// Confirmation tracking
/// How long to wait for a confirmation before giving up (in milliseconds).
pub const DEFAULT_CONFIRMATION_TIMEOUT_MS: u64 = 60_000;

/// Cadence of the signature-status polling loop (in milliseconds).
pub const DEFAULT_CONFIRMATION_POLL_INTERVAL_MS: u64 = 2_000;

// Blockhash caching
/// Age after which a cached blockhash is considered stale (in milliseconds).
pub const DEFAULT_BLOCKHASH_TTL_MS: u64 = 60_000;

/// Cadence of the background blockhash refresh (in milliseconds).
pub const DEFAULT_BLOCKHASH_REFRESH_INTERVAL_MS: u64 = 30_000;

// Priority fees
/// Percentile of recent prioritization-fee samples to target.
pub const DEFAULT_FEE_TARGET_PERCENTILE: u8 = 75;

/// Floor for the chosen priority fee (micro-lamports per compute unit).
pub const DEFAULT_FEE_MIN_MICRO_LAMPORTS: u64 = 1_000;

/// Ceiling for the chosen priority fee (micro-lamports per compute unit).
pub const DEFAULT_FEE_MAX_MICRO_LAMPORTS: u64 = 1_000_000;

/// Compute-unit limit set on the injected budget instruction.
pub const DEFAULT_COMPUTE_UNIT_LIMIT: u32 = 200_000;

// Endpoint health
/// Cadence of the background endpoint health checks (in milliseconds).
pub const DEFAULT_HEALTH_CHECK_INTERVAL_MS: u64 = 10_000;

/// Number of failures inside the sliding window that opens a breaker.
pub const DEFAULT_BREAKER_FAILURE_THRESHOLD: usize = 5;

/// How long an open breaker waits before probing again (in milliseconds).
pub const DEFAULT_BREAKER_RESET_TIMEOUT_MS: u64 = 30_000;

/// Width of the breaker's sliding failure window (in milliseconds).
pub const DEFAULT_BREAKER_WINDOW_MS: u64 = 60_000;

/// Smoothing factor for the per-endpoint latency EMA.
pub const LATENCY_EMA_ALPHA: f64 = 0.3;

/// Weight assumed for endpoints that do not specify one.
pub const DEFAULT_RPC_WEIGHT: u32 = 1;

/// Request timeout applied to each RPC client (in milliseconds).
pub const DEFAULT_RPC_TIMEOUT_MS: u64 = 30_000;

/// Capacity of the lifecycle event channel; slow subscribers lag rather
/// than block the pipeline.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;
