//! Error taxonomy for the transaction submission pipeline.
//!
//! Every externally-visible failure is a [`SenderError`] carrying a
//! machine-readable [`ErrorCode`], a human-readable message and a cause chain
//! reachable through [`std::error::Error::source`]. Variants are cheap to
//! clone (causes are `Arc`-wrapped) so the retry engine can hand the last
//! error to hooks and contexts without consuming it.

use std::sync::Arc;

use thiserror::Error;

/// Machine-readable code identifying a failure class.
///
/// The set is closed: every [`SenderError`] maps onto exactly one code via
/// [`SenderError::code`]. The bundle codes belong to the separable bundle
/// submission client and are part of the public surface for its callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    RetriesExhausted,
    NonRetryable,
    BlockhashExpired,
    BlockhashFetchFailed,
    SimulationFailed,
    InsufficientFunds,
    ConfirmationTimeout,
    TransactionFailed,
    AllEndpointsUnhealthy,
    RateLimited,
    BundleFailed,
    BundleDropped,
    TipTooLow,
    FeeEstimationFailed,
    Rpc,
    Network,
    Signing,
    Config,
}

/// Errors raised by the transaction submission pipeline.
///
/// The first group of variants carries the pipeline-level failure codes; the
/// trailing `Rpc` / `Network` / `Signing` / `Config` variants describe leaf
/// faults and usually appear as causes of a coded error rather than as the
/// top of a chain.
#[derive(Error, Debug, Clone)]
pub enum SenderError {
    /// All planned attempts were consumed by retryable failures.
    #[error("retries exhausted after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Arc<SenderError>,
    },

    /// The first failure was classified as non-retryable.
    #[error("non-retryable error: {source}")]
    NonRetryable {
        #[source]
        source: Arc<SenderError>,
    },

    /// The transaction's blockhash fell out of its validity window.
    #[error("blockhash expired: {0}")]
    BlockhashExpired(String),

    /// Fetching a fresh blockhash failed on every endpoint.
    #[error("failed to fetch blockhash: {source}")]
    BlockhashFetchFailed {
        #[source]
        source: Arc<SenderError>,
    },

    /// Pre-flight simulation reported an execution error.
    #[error("transaction simulation failed: {reason}")]
    SimulationFailed { reason: String, logs: Vec<String> },

    /// The fee payer cannot cover the transaction (permanent).
    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),

    /// Confirmation tracking gave up after its timeout budget.
    #[error("confirmation timed out after {elapsed_ms}ms")]
    ConfirmationTimeout { elapsed_ms: u64 },

    /// The transaction landed on-chain but failed execution.
    #[error("transaction {signature} failed on-chain: {reason}")]
    TransactionFailed {
        signature: String,
        slot: Option<u64>,
        reason: String,
    },

    /// Every endpoint in the pool rejected the request.
    #[error("all {attempted} endpoints failed: {source}")]
    AllEndpointsUnhealthy {
        attempted: usize,
        #[source]
        source: Arc<SenderError>,
    },

    /// The endpoint asked us to back off (HTTP 429).
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// A submitted bundle was rejected by the block engine.
    #[error("bundle failed: {0}")]
    BundleFailed(String),

    /// A submitted bundle was dropped without landing.
    #[error("bundle dropped: {0}")]
    BundleDropped(String),

    /// The bundle tip is below the block engine's floor.
    #[error("tip too low: provided {provided} lamports, minimum {minimum}")]
    TipTooLow { provided: u64, minimum: u64 },

    /// Priority-fee estimation could not complete.
    #[error("fee estimation failed: {source}")]
    FeeEstimationFailed {
        #[source]
        source: Arc<SenderError>,
    },

    /// Leaf fault: an RPC call returned an error.
    #[error("rpc error: {0}")]
    Rpc(String),

    /// Leaf fault: the transport layer failed before the RPC responded.
    #[error("network error: {0}")]
    Network(String),

    /// Leaf fault: signing the transaction failed.
    #[error("signing error: {0}")]
    Signing(String),

    /// Leaf fault: the configuration record is invalid.
    #[error("configuration error: {0}")]
    Config(String),
}

impl SenderError {
    /// Returns the machine-readable code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            SenderError::RetriesExhausted { .. } => ErrorCode::RetriesExhausted,
            SenderError::NonRetryable { .. } => ErrorCode::NonRetryable,
            SenderError::BlockhashExpired(_) => ErrorCode::BlockhashExpired,
            SenderError::BlockhashFetchFailed { .. } => ErrorCode::BlockhashFetchFailed,
            SenderError::SimulationFailed { .. } => ErrorCode::SimulationFailed,
            SenderError::InsufficientFunds(_) => ErrorCode::InsufficientFunds,
            SenderError::ConfirmationTimeout { .. } => ErrorCode::ConfirmationTimeout,
            SenderError::TransactionFailed { .. } => ErrorCode::TransactionFailed,
            SenderError::AllEndpointsUnhealthy { .. } => ErrorCode::AllEndpointsUnhealthy,
            SenderError::RateLimited(_) => ErrorCode::RateLimited,
            SenderError::BundleFailed(_) => ErrorCode::BundleFailed,
            SenderError::BundleDropped(_) => ErrorCode::BundleDropped,
            SenderError::TipTooLow { .. } => ErrorCode::TipTooLow,
            SenderError::FeeEstimationFailed { .. } => ErrorCode::FeeEstimationFailed,
            SenderError::Rpc(_) => ErrorCode::Rpc,
            SenderError::Network(_) => ErrorCode::Network,
            SenderError::Signing(_) => ErrorCode::Signing,
            SenderError::Config(_) => ErrorCode::Config,
        }
    }

    /// Returns the typed cause for wrapper variants, if any.
    pub(crate) fn typed_source(&self) -> Option<&SenderError> {
        match self {
            SenderError::RetriesExhausted { source, .. }
            | SenderError::NonRetryable { source }
            | SenderError::BlockhashFetchFailed { source }
            | SenderError::AllEndpointsUnhealthy { source, .. }
            | SenderError::FeeEstimationFailed { source } => Some(source),
            _ => None,
        }
    }

    /// Renders this error together with its whole cause chain.
    ///
    /// The classifier matches substrings against this rendering so that a
    /// pattern buried two causes deep (for example a 429 inside a fetch
    /// failure) still drives the retry decision.
    pub fn render_chain(&self) -> String {
        let mut rendered = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            rendered.push_str(": ");
            rendered.push_str(&cause.to_string());
            source = cause.source();
        }
        rendered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_is_stable_per_variant() {
        let err = SenderError::RateLimited("429".to_string());
        assert_eq!(err.code(), ErrorCode::RateLimited);

        let err = SenderError::TipTooLow {
            provided: 100,
            minimum: 1_000,
        };
        assert_eq!(err.code(), ErrorCode::TipTooLow);

        let err = SenderError::ConfirmationTimeout { elapsed_ms: 60_000 };
        assert_eq!(err.code(), ErrorCode::ConfirmationTimeout);
    }

    #[test]
    fn test_cause_chain_is_preserved() {
        let leaf = SenderError::Network("connection reset".to_string());
        let wrapped = SenderError::BlockhashFetchFailed {
            source: Arc::new(leaf),
        };
        let top = SenderError::RetriesExhausted {
            attempts: 4,
            source: Arc::new(wrapped),
        };

        let mut depth = 0;
        let mut source = std::error::Error::source(&top);
        while let Some(cause) = source {
            depth += 1;
            source = cause.source();
        }
        assert_eq!(depth, 2);
    }

    #[test]
    fn test_render_chain_includes_all_causes() {
        let leaf = SenderError::Rpc("HTTP 429 Too Many Requests".to_string());
        let top = SenderError::FeeEstimationFailed {
            source: Arc::new(leaf),
        };

        let rendered = top.render_chain();
        assert!(rendered.contains("fee estimation failed"));
        assert!(rendered.contains("429"));
    }

    #[test]
    fn test_errors_are_cloneable() {
        let err = SenderError::AllEndpointsUnhealthy {
            attempted: 3,
            source: Arc::new(SenderError::Rpc("boom".to_string())),
        };
        let clone = err.clone();
        assert_eq!(clone.code(), ErrorCode::AllEndpointsUnhealthy);
        assert_eq!(clone.to_string(), err.to_string());
    }
}
