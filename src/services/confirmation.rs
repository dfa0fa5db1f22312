//! Dual-strategy confirmation tracking.
//!
//! A confirmation races up to three arms: a hard timeout, an optional
//! signature subscription and a polling loop that doubles as the expiry
//! detector (block height past the blockhash's last valid height). The
//! first arm to resolve wins; losing arms are dropped, which cancels their
//! timers and tears down the subscription.

use std::sync::Arc;
use std::time::{Duration, Instant};

use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::signature::Signature;
use tokio::time::{sleep, MissedTickBehavior};
use tracing::debug;

use crate::config::ConfirmationConfig;
use crate::events::{EventBus, SenderEvent};
use crate::models::{CommitmentLevel, ConfirmationOutcome, ConfirmationStatus};
use crate::services::connection::SolanaConnection;
use crate::services::pool::ConnectionPool;

struct ArmOutcome {
    status: ConfirmationStatus,
    slot: Option<u64>,
    err: Option<String>,
}

/// Tracks submitted signatures to a terminal state.
pub struct Confirmer<C> {
    pool: Arc<ConnectionPool<C>>,
    config: ConfirmationConfig,
    events: EventBus,
}

impl<C: SolanaConnection + 'static> Confirmer<C> {
    pub fn new(pool: Arc<ConnectionPool<C>>, config: ConfirmationConfig, events: EventBus) -> Self {
        Self {
            pool,
            config,
            events,
        }
    }

    /// Races subscription, polling and timeout for the given signature.
    ///
    /// `Expired` means the blockhash's validity window closed (or the
    /// timeout elapsed) without a terminal status; callers decide whether
    /// that is retryable.
    pub async fn confirm(
        &self,
        signature: &Signature,
        last_valid_block_height: u64,
        commitment: CommitmentConfig,
    ) -> ConfirmationOutcome {
        let started = Instant::now();
        self.events.emit(SenderEvent::Confirming {
            signature: *signature,
        });

        let outcome = tokio::select! {
            _ = sleep(Duration::from_millis(self.config.timeout_ms)) => {
                debug!(signature = %signature, "confirmation timed out");
                ArmOutcome {
                    status: ConfirmationStatus::Expired,
                    slot: None,
                    err: None,
                }
            }
            outcome = self.subscription_arm(signature, commitment),
                if self.config.use_web_socket => outcome,
            outcome = self.polling_arm(signature, last_valid_block_height, commitment) => outcome,
        };

        ConfirmationOutcome {
            status: outcome.status,
            slot: outcome.slot,
            err: outcome.err,
            latency_ms: started.elapsed().as_millis() as u64,
        }
    }

    /// Waits on a push notification. Setup failures are swallowed (the arm
    /// parks forever and polling stays authoritative).
    async fn subscription_arm(
        &self,
        signature: &Signature,
        commitment: CommitmentConfig,
    ) -> ArmOutcome {
        let connection = self.pool.get_connection();
        let receiver = match connection.signature_subscribe(signature, commitment).await {
            Ok(receiver) => receiver,
            Err(error) => {
                debug!(
                    signature = %signature,
                    error = %error,
                    "signature subscription unavailable, polling takes over"
                );
                return std::future::pending().await;
            }
        };

        match receiver.await {
            Ok(notification) => {
                if let Some(err) = notification.err {
                    ArmOutcome {
                        status: ConfirmationStatus::Failed,
                        slot: Some(notification.slot),
                        err: Some(err),
                    }
                } else {
                    ArmOutcome {
                        status: if commitment.is_finalized() {
                            ConfirmationStatus::Finalized
                        } else {
                            ConfirmationStatus::Confirmed
                        },
                        slot: Some(notification.slot),
                        err: None,
                    }
                }
            }
            // The subscription task died without notifying; polling is
            // authoritative.
            Err(_) => std::future::pending().await,
        }
    }

    /// Polls block height and signature status at the configured cadence.
    async fn polling_arm(
        &self,
        signature: &Signature,
        last_valid_block_height: u64,
        commitment: CommitmentConfig,
    ) -> ArmOutcome {
        let mut ticker =
            tokio::time::interval(Duration::from_millis(self.config.poll_interval_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;

            let height = self
                .pool
                .with_fallback("get_block_height", |conn| async move {
                    conn.get_block_height(commitment).await
                })
                .await;
            if let Ok(height) = height {
                if height > last_valid_block_height {
                    debug!(
                        signature = %signature,
                        block_height = height,
                        last_valid_block_height = last_valid_block_height,
                        "blockhash validity window closed"
                    );
                    return ArmOutcome {
                        status: ConfirmationStatus::Expired,
                        slot: None,
                        err: None,
                    };
                }
            }

            let status = {
                let signature = *signature;
                self.pool
                    .with_fallback("get_signature_status", move |conn| async move {
                        conn.get_signature_status(&signature).await
                    })
                    .await
            };
            let snapshot = match status {
                Ok(Some(snapshot)) => snapshot,
                // Not seen yet, or a transient RPC failure: keep polling.
                Ok(None) | Err(_) => continue,
            };

            if let Some(err) = snapshot.err {
                return ArmOutcome {
                    status: ConfirmationStatus::Failed,
                    slot: Some(snapshot.slot),
                    err: Some(err),
                };
            }
            match snapshot.commitment {
                CommitmentLevel::Finalized => {
                    return ArmOutcome {
                        status: ConfirmationStatus::Finalized,
                        slot: Some(snapshot.slot),
                        err: None,
                    };
                }
                CommitmentLevel::Confirmed | CommitmentLevel::Processed
                    if !commitment.is_finalized() =>
                {
                    return ArmOutcome {
                        status: ConfirmationStatus::Confirmed,
                        slot: Some(snapshot.slot),
                        err: None,
                    };
                }
                // Waiting for finalization.
                _ => {}
            }
        }
    }
}
