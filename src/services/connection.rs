//! RPC connection abstraction.
//!
//! [`SolanaConnection`] is the seam between the pipeline and the Solana RPC
//! surface: exactly the calls the sender consumes, nothing more. The
//! production implementation wraps the non-blocking [`RpcClient`] plus an
//! on-demand WebSocket client for signature subscriptions; tests mock the
//! trait.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
#[cfg(test)]
use mockall::automock;
use solana_client::client_error::{ClientError, ClientErrorKind};
use solana_client::nonblocking::pubsub_client::PubsubClient;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::{
    RpcSendTransactionConfig, RpcSignatureSubscribeConfig, RpcSimulateTransactionConfig,
};
use solana_client::rpc_response::{RpcPrioritizationFee, RpcSignatureResult};
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::hash::Hash;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::{TransactionError, VersionedTransaction};
use tokio::sync::oneshot;
use tracing::debug;

use crate::config::SimulationConfig;
use crate::models::{
    CommitmentLevel, RpcConfig, SenderError, SignatureNotification, SignatureStatusSnapshot,
    SimulationOutcome,
};

/// The RPC operations the pipeline consumes from a single endpoint.
#[async_trait]
#[cfg_attr(test, automock)]
pub trait SolanaConnection: Send + Sync {
    /// The endpoint URL, used for logging and health reports.
    fn url(&self) -> String;

    /// Fetches the latest blockhash and its last valid block height.
    async fn get_latest_blockhash(
        &self,
        commitment: CommitmentConfig,
    ) -> Result<(Hash, u64), SenderError>;

    /// Fetches the current block height.
    async fn get_block_height(&self, commitment: CommitmentConfig) -> Result<u64, SenderError>;

    /// Fetches the current slot; the low-cost health probe.
    async fn get_slot(&self, commitment: CommitmentConfig) -> Result<u64, SenderError>;

    /// Fetches recent prioritization-fee samples, optionally filtered by
    /// writable accounts.
    async fn get_recent_prioritization_fees(
        &self,
        writable_accounts: &[Pubkey],
    ) -> Result<Vec<RpcPrioritizationFee>, SenderError>;

    /// Simulates a signed transaction.
    async fn simulate_transaction(
        &self,
        transaction: &VersionedTransaction,
        config: &SimulationConfig,
    ) -> Result<SimulationOutcome, SenderError>;

    /// Submits a signed transaction with preflight skipped and no
    /// client-side retries (retries live in the pipeline).
    async fn send_transaction(
        &self,
        transaction: &VersionedTransaction,
    ) -> Result<Signature, SenderError>;

    /// Fetches the status of a signature, if the node has seen it.
    async fn get_signature_status(
        &self,
        signature: &Signature,
    ) -> Result<Option<SignatureStatusSnapshot>, SenderError>;

    /// Subscribes to the signature notification at the given commitment.
    ///
    /// The returned channel yields at most one notification. Dropping the
    /// receiver tears the subscription down.
    async fn signature_subscribe(
        &self,
        signature: &Signature,
        commitment: CommitmentConfig,
    ) -> Result<oneshot::Receiver<SignatureNotification>, SenderError>;
}

/// Classifies a Solana RPC client error into the crate taxonomy.
///
/// Transport-level faults become `Network`; a handful of transaction errors
/// map onto their typed variants so the classifier can act on them without
/// string matching; everything else surfaces as `Rpc` with the full message.
fn map_client_error(error: ClientError) -> SenderError {
    match error.kind() {
        ClientErrorKind::Io(_) | ClientErrorKind::Reqwest(_) => {
            SenderError::Network(error.to_string())
        }
        ClientErrorKind::TransactionError(tx_error) => map_transaction_error(tx_error, &error),
        _ => SenderError::Rpc(error.to_string()),
    }
}

fn map_transaction_error(tx_error: &TransactionError, full_error: &ClientError) -> SenderError {
    match tx_error {
        TransactionError::InsufficientFundsForFee
        | TransactionError::InsufficientFundsForRent { .. } => {
            SenderError::InsufficientFunds(full_error.to_string())
        }
        TransactionError::BlockhashNotFound => {
            SenderError::BlockhashExpired(full_error.to_string())
        }
        _ => SenderError::Rpc(full_error.to_string()),
    }
}

/// Production connection handle: one HTTP client per endpoint, plus an
/// on-demand WebSocket client for the subscription arm.
pub struct RpcConnection {
    url: String,
    ws_url: Option<String>,
    client: Arc<RpcClient>,
}

impl RpcConnection {
    pub fn new(config: &RpcConfig, timeout: Duration, commitment: CommitmentConfig) -> Self {
        let client = RpcClient::new_with_timeout_and_commitment(
            config.url.clone(),
            timeout,
            commitment,
        );
        Self {
            url: config.url.clone(),
            ws_url: config.get_ws_url(),
            client: Arc::new(client),
        }
    }
}

impl std::fmt::Debug for RpcConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcConnection")
            .field("url", &self.url)
            .field("ws_url", &self.ws_url)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SolanaConnection for RpcConnection {
    fn url(&self) -> String {
        self.url.clone()
    }

    async fn get_latest_blockhash(
        &self,
        commitment: CommitmentConfig,
    ) -> Result<(Hash, u64), SenderError> {
        self.client
            .get_latest_blockhash_with_commitment(commitment)
            .await
            .map_err(map_client_error)
    }

    async fn get_block_height(&self, commitment: CommitmentConfig) -> Result<u64, SenderError> {
        self.client
            .get_block_height_with_commitment(commitment)
            .await
            .map_err(map_client_error)
    }

    async fn get_slot(&self, commitment: CommitmentConfig) -> Result<u64, SenderError> {
        self.client
            .get_slot_with_commitment(commitment)
            .await
            .map_err(map_client_error)
    }

    async fn get_recent_prioritization_fees(
        &self,
        writable_accounts: &[Pubkey],
    ) -> Result<Vec<RpcPrioritizationFee>, SenderError> {
        self.client
            .get_recent_prioritization_fees(writable_accounts)
            .await
            .map_err(map_client_error)
    }

    async fn simulate_transaction(
        &self,
        transaction: &VersionedTransaction,
        config: &SimulationConfig,
    ) -> Result<SimulationOutcome, SenderError> {
        let rpc_config = RpcSimulateTransactionConfig {
            sig_verify: config.sig_verify,
            replace_recent_blockhash: config.replace_recent_blockhash,
            commitment: Some(config.commitment),
            ..Default::default()
        };
        let response = self
            .client
            .simulate_transaction_with_config(transaction, rpc_config)
            .await
            .map_err(map_client_error)?;
        let value = response.value;
        Ok(SimulationOutcome {
            err: value.err.map(|err| err.to_string()),
            logs: value.logs.unwrap_or_default(),
            units_consumed: value.units_consumed,
        })
    }

    async fn send_transaction(
        &self,
        transaction: &VersionedTransaction,
    ) -> Result<Signature, SenderError> {
        let rpc_config = RpcSendTransactionConfig {
            skip_preflight: true,
            max_retries: Some(0),
            ..Default::default()
        };
        self.client
            .send_transaction_with_config(transaction, rpc_config)
            .await
            .map_err(map_client_error)
    }

    async fn get_signature_status(
        &self,
        signature: &Signature,
    ) -> Result<Option<SignatureStatusSnapshot>, SenderError> {
        let response = self
            .client
            .get_signature_statuses(&[*signature])
            .await
            .map_err(map_client_error)?;

        Ok(response.value.into_iter().next().flatten().map(|status| {
            let commitment = if status.satisfies_commitment(CommitmentConfig::finalized()) {
                CommitmentLevel::Finalized
            } else if status.satisfies_commitment(CommitmentConfig::confirmed()) {
                CommitmentLevel::Confirmed
            } else {
                CommitmentLevel::Processed
            };
            SignatureStatusSnapshot {
                slot: status.slot,
                err: status.err.map(|err| err.to_string()),
                commitment,
            }
        }))
    }

    async fn signature_subscribe(
        &self,
        signature: &Signature,
        commitment: CommitmentConfig,
    ) -> Result<oneshot::Receiver<SignatureNotification>, SenderError> {
        let ws_url = self.ws_url.clone().ok_or_else(|| {
            SenderError::Config(format!("no websocket endpoint derivable for {}", self.url))
        })?;
        let signature = *signature;
        let (tx, rx) = oneshot::channel();

        // The subscription lives in its own task so that dropping the
        // receiver (the confirmer losing the race) still unsubscribes.
        tokio::spawn(async move {
            let mut tx = tx;
            let client = match PubsubClient::new(&ws_url).await {
                Ok(client) => client,
                Err(err) => {
                    debug!(ws_url = %ws_url, error = %err, "websocket connect failed");
                    return;
                }
            };
            let config = RpcSignatureSubscribeConfig {
                commitment: Some(commitment),
                enable_received_notification: Some(false),
            };
            let (mut stream, unsubscribe) =
                match client.signature_subscribe(&signature, Some(config)).await {
                    Ok(subscription) => subscription,
                    Err(err) => {
                        debug!(signature = %signature, error = %err, "signature subscribe failed");
                        return;
                    }
                };

            tokio::select! {
                notification = stream.next() => {
                    if let Some(response) = notification {
                        if let RpcSignatureResult::ProcessedSignature(result) = response.value {
                            let _ = tx.send(SignatureNotification {
                                slot: response.context.slot,
                                err: result.err.map(|err| err.to_string()),
                            });
                        }
                    }
                }
                _ = tx.closed() => {}
            }

            drop(stream);
            unsubscribe().await;
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_transaction_errors_onto_typed_variants() {
        let insufficient = ClientError::from(TransactionError::InsufficientFundsForFee);
        assert!(matches!(
            map_client_error(insufficient),
            SenderError::InsufficientFunds(_)
        ));

        let expired = ClientError::from(TransactionError::BlockhashNotFound);
        assert!(matches!(
            map_client_error(expired),
            SenderError::BlockhashExpired(_)
        ));

        let other = ClientError::from(TransactionError::AccountInUse);
        assert!(matches!(map_client_error(other), SenderError::Rpc(_)));
    }

    #[test]
    fn test_rpc_connection_derives_ws_url() {
        let connection = RpcConnection::new(
            &RpcConfig::new("https://rpc.example.com"),
            Duration::from_secs(30),
            CommitmentConfig::confirmed(),
        );
        assert_eq!(connection.ws_url.as_deref(), Some("wss://rpc.example.com"));
        assert_eq!(connection.url(), "https://rpc.example.com");
    }
}
