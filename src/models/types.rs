//! Value types flowing through the submission pipeline.

use std::time::{Duration, Instant};

use serde::Serialize;
use solana_sdk::hash::Hash;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::{Transaction, VersionedTransaction};

use crate::models::SenderError;

/// A user-supplied transaction accepted by the sender.
///
/// Legacy transactions are rebuilt per attempt (fee payer, blockhash and
/// compute budget are owned by the pipeline); versioned transactions are
/// re-signed as-is and keep whatever compute-budget instructions their
/// author compiled in.
#[derive(Debug, Clone)]
pub enum TransactionRequest {
    Legacy(Transaction),
    Versioned(VersionedTransaction),
}

impl From<Transaction> for TransactionRequest {
    fn from(tx: Transaction) -> Self {
        TransactionRequest::Legacy(tx)
    }
}

impl From<VersionedTransaction> for TransactionRequest {
    fn from(tx: VersionedTransaction) -> Self {
        TransactionRequest::Versioned(tx)
    }
}

/// A cached blockhash with its validity horizon.
#[derive(Debug, Clone, Copy)]
pub struct BlockhashRecord {
    pub blockhash: Hash,
    pub last_valid_block_height: u64,
    pub fetched_at: Instant,
}

impl BlockhashRecord {
    /// Whether the record is older than the given time-to-live.
    pub fn is_stale(&self, ttl: Duration) -> bool {
        self.fetched_at.elapsed() > ttl
    }
}

/// Context handed to every retry attempt.
#[derive(Debug, Clone)]
pub struct RetryContext {
    /// Zero-based attempt index.
    pub attempt: u32,
    /// Total planned attempts (`max_retries + 1`).
    pub total_attempts: u32,
    /// Milliseconds since the first attempt started.
    pub elapsed_ms: u64,
    /// The failure that triggered this retry, absent on the first attempt.
    pub last_error: Option<SenderError>,
}

/// Confidence level a signature status has reached on-chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CommitmentLevel {
    Processed,
    Confirmed,
    Finalized,
}

/// Snapshot of a signature status as reported by an RPC node.
#[derive(Debug, Clone)]
pub struct SignatureStatusSnapshot {
    pub slot: u64,
    /// Rendered on-chain execution error, if the transaction failed.
    pub err: Option<String>,
    pub commitment: CommitmentLevel,
}

/// A push notification from a signature subscription.
#[derive(Debug, Clone)]
pub struct SignatureNotification {
    pub slot: u64,
    pub err: Option<String>,
}

/// Result of a pre-flight simulation.
#[derive(Debug, Clone, Default)]
pub struct SimulationOutcome {
    pub err: Option<String>,
    pub logs: Vec<String>,
    pub units_consumed: Option<u64>,
}

/// Terminal state of a confirmation race.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConfirmationStatus {
    Confirmed,
    Finalized,
    Expired,
    Failed,
}

/// Outcome of tracking one signature to a terminal state.
#[derive(Debug, Clone)]
pub struct ConfirmationOutcome {
    pub status: ConfirmationStatus,
    pub slot: Option<u64>,
    /// Rendered on-chain error when `status` is `Failed`.
    pub err: Option<String>,
    pub latency_ms: u64,
}

impl ConfirmationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(
            self.status,
            ConfirmationStatus::Confirmed | ConfirmationStatus::Finalized
        )
    }
}

/// Result of a successful `send` call.
#[derive(Debug, Clone)]
pub struct SendResult {
    pub signature: Signature,
    /// Slot the transaction was confirmed in; 0 when confirmation was
    /// skipped.
    pub slot: u64,
    /// Commitment level the result was observed at.
    pub commitment: String,
    /// 1-based number of attempts consumed.
    pub attempts: u32,
    /// Wall-clock time from the first attempt to the returned result.
    pub latency_ms: u64,
    /// Compute units consumed, when simulation ran.
    pub units_consumed: Option<u64>,
    /// Priority fee attached to the transaction, when fees were enabled.
    pub priority_fee_micro_lamports: Option<u64>,
}

/// Priority-fee estimate over recent prioritization-fee samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeeEstimate {
    /// The chosen fee: the configured percentile clamped into bounds.
    pub micro_lamports: u64,
    pub p50: u64,
    pub p75: u64,
    pub p90: u64,
    pub sample_count: usize,
}
