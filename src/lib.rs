//! Production-grade Solana transaction submission.
//!
//! This crate turns a user-supplied transaction into a confirmed on-chain
//! signature under adversarial network conditions: rate-limited RPC
//! endpoints, expiring blockhashes, transient transport failures and
//! congested fee markets.
//!
//! The pipeline composes five subsystems:
//!
//! - a **send pipeline** ([`TransactionSender`]) orchestrating fee
//!   estimation, blockhash acquisition, signing, simulation, submission and
//!   confirmation behind a single `send(tx)` call;
//! - an **RPC connection pool** with per-endpoint circuit breakers, health
//!   tracking and cascading failover;
//! - a **blockhash manager** with TTL caching, background refresh and
//!   single-flight deduplication;
//! - a **retry engine** with full-jitter exponential backoff driven by an
//!   error classifier;
//! - a **confirmation tracker** racing a signature subscription against
//!   status polling with expiry detection.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use solana_sdk::signature::Keypair;
//! use solana_sender::{RpcPoolConfig, SendOptions, SenderConfig, TransactionSender};
//!
//! # async fn example(transaction: solana_sdk::transaction::Transaction)
//! # -> Result<(), solana_sender::SenderError> {
//! let config = SenderConfig::new(
//!     RpcPoolConfig::single("https://api.mainnet-beta.solana.com"),
//!     Arc::new(Keypair::new()),
//! );
//! let sender = TransactionSender::new(config)?;
//!
//! let result = sender.send(transaction, SendOptions::default()).await?;
//! println!("confirmed {} in slot {}", result.signature, result.slot);
//!
//! sender.destroy();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod events;
pub mod models;
pub mod sender;
pub mod services;

pub use config::{
    BlockhashConfig, CircuitBreakerConfig, ConfirmationConfig, DynSigner, OnRetryHook,
    PriorityFeeConfig, PriorityFeeOverride, RetryPolicy, RetryPredicate, RpcPoolConfig,
    SelectionStrategy, SendOptions, SenderConfig, SimulationConfig,
};
pub use events::{EventBus, SenderEvent};
pub use models::{
    classify_error, BlockhashRecord, CommitmentLevel, ConfirmationOutcome, ConfirmationStatus,
    ErrorClassification, ErrorCode, ErrorKind, FeeEstimate, RetryContext, RpcConfig, SendResult,
    SenderError, SignatureNotification, SignatureStatusSnapshot, SimulationOutcome,
    TransactionRequest,
};
pub use sender::TransactionSender;
pub use services::{
    BlockhashManager, CircuitBreaker, CircuitState, Confirmer, ConnectionPool, EndpointHealth,
    EndpointMetrics, PriorityFeeEstimator, RpcConnection, SolanaConnection,
};
