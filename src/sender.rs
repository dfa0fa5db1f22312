//! The transaction submission pipeline.
//!
//! [`TransactionSender`] composes fee estimation, blockhash acquisition,
//! signing, simulation, submission and confirmation into a single
//! `send(tx) -> result` operation driven by the retry engine. The sender
//! exclusively owns its connection pool, blockhash manager, confirmer and
//! event bus; `destroy` stops the background tasks and closes the bus.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::compute_budget::{self, ComputeBudgetInstruction};
use solana_sdk::hash::Hash;
use solana_sdk::instruction::{AccountMeta, Instruction};
use solana_sdk::message::Message;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signer::Signer;
use solana_sdk::transaction::{Transaction, VersionedTransaction};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::config::{
    DynSigner, PriorityFeeOverride, RetryPolicy, SendOptions, SenderConfig,
};
use crate::constants::DEFAULT_COMPUTE_UNIT_LIMIT;
use crate::events::{EventBus, SenderEvent};
use crate::models::{
    classify_error, ConfirmationStatus, RetryContext, SendResult, SenderError, TransactionRequest,
};
use crate::services::blockhash::BlockhashManager;
use crate::services::confirmation::Confirmer;
use crate::services::connection::{RpcConnection, SolanaConnection};
use crate::services::fee::PriorityFeeEstimator;
use crate::services::health::EndpointMetrics;
use crate::services::pool::ConnectionPool;
use crate::services::retry::with_retry;

/// The attempt-independent shape of the transaction being sent.
///
/// Legacy transactions are decompiled into owned instructions so each
/// attempt can rebuild and re-sign a fresh message without ever touching
/// the caller's transaction. Versioned transactions are re-signed as-is.
enum WorkingTransaction {
    Legacy {
        instructions: Vec<Instruction>,
        payer: Pubkey,
    },
    Versioned(VersionedTransaction),
}

struct PreparedTransaction {
    working: WorkingTransaction,
    priority_fee_micro_lamports: Option<u64>,
}

/// Rebuilds owned instructions from a compiled legacy message.
fn decompile_instructions(message: &Message) -> Vec<Instruction> {
    message
        .instructions
        .iter()
        .map(|compiled| {
            let program_id = message.account_keys[compiled.program_id_index as usize];
            let accounts = compiled
                .accounts
                .iter()
                .map(|&index| {
                    let index = index as usize;
                    AccountMeta {
                        pubkey: message.account_keys[index],
                        is_signer: message.is_signer(index),
                        is_writable: message.is_maybe_writable(index, None),
                    }
                })
                .collect();
            Instruction {
                program_id,
                accounts,
                data: compiled.data.clone(),
            }
        })
        .collect()
}

/// Prepends fresh compute-budget instructions and strips any the caller
/// compiled in: replacement, never duplication.
fn inject_compute_budget(
    instructions: &[Instruction],
    unit_limit: u32,
    unit_price_micro_lamports: u64,
) -> Vec<Instruction> {
    let mut working = Vec::with_capacity(instructions.len() + 2);
    working.push(ComputeBudgetInstruction::set_compute_unit_limit(unit_limit));
    working.push(ComputeBudgetInstruction::set_compute_unit_price(
        unit_price_micro_lamports,
    ));
    working.extend(
        instructions
            .iter()
            .filter(|instruction| instruction.program_id != compute_budget::id())
            .cloned(),
    );
    working
}

fn commitment_name(commitment: CommitmentConfig) -> String {
    format!("{:?}", commitment.commitment).to_lowercase()
}

/// Orchestrates the full submission pipeline.
pub struct TransactionSender<C = RpcConnection> {
    config: SenderConfig,
    pool: Arc<ConnectionPool<C>>,
    blockhash: Arc<BlockhashManager<C>>,
    confirmer: Confirmer<C>,
    fee_estimator: PriorityFeeEstimator<C>,
    events: EventBus,
    destroyed: AtomicBool,
}

impl TransactionSender<RpcConnection> {
    /// Builds a sender over HTTP/WebSocket connections to the configured
    /// endpoints and starts the background health and refresh loops.
    pub fn new(config: SenderConfig) -> Result<Self, SenderError> {
        config.validate()?;
        let timeout = Duration::from_millis(config.rpc.rpc_timeout_ms);
        let connections = config
            .rpc
            .endpoints
            .iter()
            .map(|endpoint| Arc::new(RpcConnection::new(endpoint, timeout, config.commitment)))
            .collect();
        Self::with_connections(config, connections)
    }
}

impl<C: SolanaConnection + 'static> TransactionSender<C> {
    /// Builds a sender over caller-supplied connection handles, paired
    /// positionally with `config.rpc.endpoints`.
    pub fn with_connections(
        config: SenderConfig,
        connections: Vec<Arc<C>>,
    ) -> Result<Self, SenderError> {
        config.validate()?;
        if connections.len() != config.rpc.endpoints.len() {
            return Err(SenderError::Config(format!(
                "{} connections supplied for {} endpoints",
                connections.len(),
                config.rpc.endpoints.len()
            )));
        }

        let entries = config
            .rpc
            .endpoints
            .iter()
            .cloned()
            .zip(connections)
            .collect();
        let pool = Arc::new(ConnectionPool::new(entries, &config.rpc)?);
        pool.start();

        let blockhash = Arc::new(BlockhashManager::new(Arc::clone(&pool), config.blockhash));
        blockhash.start();

        let events = EventBus::new();
        let confirmer = Confirmer::new(Arc::clone(&pool), config.confirmation, events.clone());
        let fee_estimator = PriorityFeeEstimator::new(Arc::clone(&pool));

        Ok(Self {
            config,
            pool,
            blockhash,
            confirmer,
            fee_estimator,
            events,
            destroyed: AtomicBool::new(false),
        })
    }

    /// Subscribes to the lifecycle event stream. `None` after `destroy`.
    pub fn subscribe(&self) -> Option<broadcast::Receiver<SenderEvent>> {
        self.events.subscribe()
    }

    /// Per-endpoint health snapshots.
    pub fn health_report(&self) -> Vec<EndpointMetrics> {
        self.pool.health_report()
    }

    /// Stops background tasks and closes the event bus. Idempotent; a
    /// destroyed sender rejects further sends.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.pool.destroy();
        self.blockhash.destroy();
        self.events.close();
        debug!("transaction sender destroyed");
    }

    /// Submits a transaction and drives it to a confirmed signature.
    ///
    /// The caller's transaction is never mutated. Legacy transactions get
    /// compute-budget instructions injected (when priority fees are
    /// enabled) and are re-signed per attempt with a fresh blockhash;
    /// versioned transactions bypass injection (their authors own the
    /// compute budget) and are only re-signed.
    pub async fn send(
        &self,
        transaction: impl Into<TransactionRequest>,
        options: SendOptions,
    ) -> Result<SendResult, SenderError> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(SenderError::Config(
                "sender has been destroyed".to_string(),
            ));
        }

        let started = Instant::now();
        let transaction = transaction.into();
        let commitment = options
            .commitment
            .unwrap_or(self.config.confirmation.commitment);

        let prepared = self.prepare_transaction(&transaction, &options).await?;

        let mut signers: Vec<DynSigner> = Vec::with_capacity(
            1 + self.config.extra_signers.len() + options.extra_signers.len(),
        );
        signers.push(Arc::clone(&self.config.signer));
        signers.extend(self.config.extra_signers.iter().cloned());
        signers.extend(options.extra_signers.iter().cloned());

        let policy = self.instrument_policy(
            options
                .retry
                .clone()
                .unwrap_or_else(|| self.config.retry.clone()),
        );

        let result = with_retry(&policy, |ctx| {
            self.run_attempt(ctx, &prepared, &signers, &options, commitment)
        })
        .await;

        match result {
            Ok(mut send_result) => {
                send_result.latency_ms = started.elapsed().as_millis() as u64;
                Ok(send_result)
            }
            Err(error) => {
                self.events.emit(SenderEvent::Failed {
                    error: error.to_string(),
                });
                Err(error)
            }
        }
    }

    /// One pass through the pipeline: blockhash, sign, simulate, submit,
    /// confirm.
    async fn run_attempt(
        &self,
        ctx: RetryContext,
        prepared: &PreparedTransaction,
        signers: &[DynSigner],
        options: &SendOptions,
        commitment: CommitmentConfig,
    ) -> Result<SendResult, SenderError> {
        let record = self.blockhash.get_blockhash().await?;
        let signed = self.sign_transaction(&prepared.working, record.blockhash, signers)?;

        let mut units_consumed = None;
        if let Some(simulation) = self.config.simulation {
            if !options.skip_simulation {
                let outcome = self
                    .pool
                    .with_fallback("simulate_transaction", |conn| {
                        let transaction = signed.clone();
                        async move { conn.simulate_transaction(&transaction, &simulation).await }
                    })
                    .await?;
                if let Some(err) = outcome.err {
                    return Err(SenderError::SimulationFailed {
                        reason: err,
                        logs: outcome.logs,
                    });
                }
                units_consumed = outcome.units_consumed;
                self.events.emit(SenderEvent::Simulated {
                    units_consumed,
                    logs: outcome.logs,
                });
            }
        }

        self.events.emit(SenderEvent::Sending {
            attempt: ctx.attempt,
        });
        let signature = self
            .pool
            .with_fallback("send_transaction", |conn| {
                let transaction = signed.clone();
                async move { conn.send_transaction(&transaction).await }
            })
            .await?;
        self.events.emit(SenderEvent::Sent {
            signature,
            attempt: ctx.attempt,
        });

        if options.skip_confirmation {
            return Ok(SendResult {
                signature,
                slot: 0,
                commitment: commitment_name(commitment),
                attempts: ctx.attempt + 1,
                latency_ms: 0,
                units_consumed,
                priority_fee_micro_lamports: prepared.priority_fee_micro_lamports,
            });
        }

        let outcome = self
            .confirmer
            .confirm(&signature, record.last_valid_block_height, commitment)
            .await;
        match outcome.status {
            ConfirmationStatus::Failed => Err(SenderError::TransactionFailed {
                signature: signature.to_string(),
                slot: outcome.slot,
                reason: outcome
                    .err
                    .unwrap_or_else(|| "transaction failed on-chain".to_string()),
            }),
            ConfirmationStatus::Expired => Err(SenderError::BlockhashExpired(format!(
                "signature {signature} expired past block height {}",
                record.last_valid_block_height
            ))),
            ConfirmationStatus::Confirmed | ConfirmationStatus::Finalized => {
                let slot = outcome.slot.unwrap_or(0);
                self.events.emit(SenderEvent::Confirmed {
                    signature,
                    slot,
                    latency_ms: outcome.latency_ms,
                });
                Ok(SendResult {
                    signature,
                    slot,
                    commitment: commitment_name(commitment),
                    attempts: ctx.attempt + 1,
                    latency_ms: 0,
                    units_consumed,
                    priority_fee_micro_lamports: prepared.priority_fee_micro_lamports,
                })
            }
        }
    }

    /// Builds the working copy once, before the retry loop.
    async fn prepare_transaction(
        &self,
        transaction: &TransactionRequest,
        options: &SendOptions,
    ) -> Result<PreparedTransaction, SenderError> {
        match transaction {
            TransactionRequest::Versioned(tx) => Ok(PreparedTransaction {
                working: WorkingTransaction::Versioned(tx.clone()),
                priority_fee_micro_lamports: None,
            }),
            TransactionRequest::Legacy(tx) => {
                let instructions = decompile_instructions(&tx.message);
                let payer = self.config.signer.pubkey();

                match self.resolve_priority_fee(options).await? {
                    Some(micro_lamports) => {
                        let unit_limit =
                            options.compute_units.unwrap_or(DEFAULT_COMPUTE_UNIT_LIMIT);
                        Ok(PreparedTransaction {
                            working: WorkingTransaction::Legacy {
                                instructions: inject_compute_budget(
                                    &instructions,
                                    unit_limit,
                                    micro_lamports,
                                ),
                                payer,
                            },
                            priority_fee_micro_lamports: Some(micro_lamports),
                        })
                    }
                    None => Ok(PreparedTransaction {
                        working: WorkingTransaction::Legacy {
                            instructions,
                            payer,
                        },
                        priority_fee_micro_lamports: None,
                    }),
                }
            }
        }
    }

    /// Per-send override first, then the sender-level estimator config;
    /// `None` when priority fees are disabled on both levels.
    async fn resolve_priority_fee(
        &self,
        options: &SendOptions,
    ) -> Result<Option<u64>, SenderError> {
        match &options.priority_fee {
            Some(PriorityFeeOverride::Static { micro_lamports }) => Ok(Some(*micro_lamports)),
            Some(PriorityFeeOverride::Estimate(config)) => Ok(Some(
                self.fee_estimator.estimate(config).await?.micro_lamports,
            )),
            None => match &self.config.priority_fee {
                Some(config) => Ok(Some(
                    self.fee_estimator.estimate(config).await?.micro_lamports,
                )),
                None => Ok(None),
            },
        }
    }

    /// Signs a fresh transaction for this attempt.
    fn sign_transaction(
        &self,
        working: &WorkingTransaction,
        blockhash: Hash,
        signers: &[DynSigner],
    ) -> Result<VersionedTransaction, SenderError> {
        let signer_refs: Vec<&dyn Signer> = signers
            .iter()
            .map(|signer| signer.as_ref() as &dyn Signer)
            .collect();

        match working {
            WorkingTransaction::Legacy {
                instructions,
                payer,
            } => {
                let message = Message::new_with_blockhash(instructions, Some(payer), &blockhash);
                let mut transaction = Transaction::new_unsigned(message);
                transaction
                    .try_sign(&signer_refs, blockhash)
                    .map_err(|error| SenderError::Signing(error.to_string()))?;
                Ok(VersionedTransaction::from(transaction))
            }
            WorkingTransaction::Versioned(tx) => {
                let mut message = tx.message.clone();
                message.set_recent_blockhash(blockhash);
                VersionedTransaction::try_new(message, &signer_refs)
                    .map_err(|error| SenderError::Signing(error.to_string()))
            }
        }
    }

    /// Wraps the retry hook: emit `Retrying`, force-refresh the blockhash
    /// on expiry-class errors, then defer to any caller-supplied hook.
    fn instrument_policy(&self, mut policy: RetryPolicy) -> RetryPolicy {
        let events = self.events.clone();
        let blockhash = Arc::clone(&self.blockhash);
        let user_hook = policy.on_retry.take();
        let max_retries = policy.max_retries;

        policy.on_retry = Some(Arc::new(move |error, attempt, delay_ms| {
            let events = events.clone();
            let blockhash = Arc::clone(&blockhash);
            let user_hook = user_hook.clone();
            Box::pin(async move {
                events.emit(SenderEvent::Retrying {
                    attempt,
                    max_retries,
                    error: error.to_string(),
                    delay_ms,
                });

                if classify_error(&error).needs_resign {
                    let old = blockhash
                        .get_cached_blockhash()
                        .map(|record| record.blockhash.to_string())
                        .unwrap_or_default();
                    match blockhash.refresh_blockhash().await {
                        Ok(record) => events.emit(SenderEvent::BlockhashExpired {
                            old,
                            new: record.blockhash.to_string(),
                        }),
                        Err(refresh_error) => {
                            warn!(
                                error = %refresh_error,
                                "forced blockhash refresh failed, next attempt will retry it"
                            );
                        }
                    }
                }

                if let Some(hook) = user_hook {
                    hook(error, attempt, delay_ms).await;
                }
            })
        }));
        policy
    }
}

impl<C> std::fmt::Debug for TransactionSender<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionSender")
            .field("config", &self.config)
            .field("destroyed", &self.destroyed)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RpcPoolConfig, SimulationConfig};
    use crate::models::{CommitmentLevel, SignatureStatusSnapshot, SimulationOutcome};
    use crate::services::connection::MockSolanaConnection;
    use solana_client::rpc_response::RpcPrioritizationFee;
    use solana_sdk::signature::{Keypair, Signature};
    use solana_sdk::system_instruction;
    use std::sync::atomic::AtomicU32;

    fn transfer_transaction(from: &Keypair) -> Transaction {
        let instruction =
            system_instruction::transfer(&from.pubkey(), &Pubkey::new_unique(), 1_000);
        Transaction::new_with_payer(&[instruction], Some(&from.pubkey()))
    }

    fn test_signature() -> Signature {
        Signature::from([7u8; 64])
    }

    fn fast_config(signer: Arc<Keypair>) -> SenderConfig {
        let mut config = SenderConfig::new(
            RpcPoolConfig::single("https://rpc.example.com"),
            signer,
        );
        config.retry.base_delay_ms = 1;
        config.retry.max_delay_ms = 2;
        config.priority_fee = None;
        config.simulation = None;
        config.confirmation.poll_interval_ms = 5;
        config.confirmation.timeout_ms = 2_000;
        config.confirmation.use_web_socket = false;
        // Keep background cadences far away from test timing.
        config.blockhash.refresh_interval_ms = 60_000;
        config.rpc.health_check_interval_ms = 60_000;
        config
    }

    fn sender_with(
        connection: MockSolanaConnection,
        config: SenderConfig,
    ) -> TransactionSender<MockSolanaConnection> {
        TransactionSender::with_connections(config, vec![Arc::new(connection)]).unwrap()
    }

    fn confirmed_snapshot(slot: u64) -> SignatureStatusSnapshot {
        SignatureStatusSnapshot {
            slot,
            err: None,
            commitment: CommitmentLevel::Confirmed,
        }
    }

    fn drain_events(rx: &mut broadcast::Receiver<SenderEvent>) -> Vec<SenderEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    // -- compute budget helpers ---------------------------------------------

    #[test]
    fn test_decompile_round_trips_transfer() {
        let from = Keypair::new();
        let to = Pubkey::new_unique();
        let original = system_instruction::transfer(&from.pubkey(), &to, 1_000);
        let tx = Transaction::new_with_payer(&[original.clone()], Some(&from.pubkey()));

        let decompiled = decompile_instructions(&tx.message);
        assert_eq!(decompiled.len(), 1);
        assert_eq!(decompiled[0].program_id, original.program_id);
        assert_eq!(decompiled[0].data, original.data);
        assert_eq!(decompiled[0].accounts.len(), original.accounts.len());
        for (rebuilt, source) in decompiled[0].accounts.iter().zip(&original.accounts) {
            assert_eq!(rebuilt.pubkey, source.pubkey);
            assert_eq!(rebuilt.is_signer, source.is_signer);
            assert_eq!(rebuilt.is_writable, source.is_writable);
        }
    }

    #[test]
    fn test_inject_compute_budget_prepends_limit_and_price() {
        let from = Keypair::new();
        let transfer = system_instruction::transfer(&from.pubkey(), &Pubkey::new_unique(), 1);
        let working = inject_compute_budget(&[transfer.clone()], 200_000, 5_000);

        assert_eq!(working.len(), 3);
        assert_eq!(working[0].program_id, compute_budget::id());
        assert_eq!(working[1].program_id, compute_budget::id());
        assert_eq!(working[2].data, transfer.data);
    }

    #[test]
    fn test_inject_compute_budget_replaces_existing_instructions() {
        let from = Keypair::new();
        let instructions = vec![
            ComputeBudgetInstruction::set_compute_unit_limit(400_000),
            system_instruction::transfer(&from.pubkey(), &Pubkey::new_unique(), 1),
            ComputeBudgetInstruction::set_compute_unit_price(99),
        ];

        let working = inject_compute_budget(&instructions, 200_000, 5_000);

        let budget_count = working
            .iter()
            .filter(|ix| ix.program_id == compute_budget::id())
            .count();
        assert_eq!(budget_count, 2);
        assert_eq!(working.len(), 3);
        assert_eq!(working[0].program_id, compute_budget::id());
        assert_eq!(working[1].program_id, compute_budget::id());
    }

    #[test]
    fn test_inject_leaves_original_instructions_untouched() {
        let from = Keypair::new();
        let instructions = vec![
            ComputeBudgetInstruction::set_compute_unit_limit(400_000),
            system_instruction::transfer(&from.pubkey(), &Pubkey::new_unique(), 1),
        ];
        let before = instructions.clone();

        let _working = inject_compute_budget(&instructions, 200_000, 5_000);
        assert_eq!(instructions.len(), before.len());
        assert_eq!(instructions[0].data, before[0].data);
    }

    // -- end-to-end scenarios -----------------------------------------------

    #[tokio::test]
    async fn test_happy_path_confirms_on_first_attempt() {
        let signer = Arc::new(Keypair::new());
        let blockhash = Hash::new_unique();

        let mut connection = MockSolanaConnection::new();
        connection
            .expect_get_latest_blockhash()
            .times(1)
            .returning(move |_| Box::pin(async move { Ok((blockhash, 1_000)) }));
        connection
            .expect_get_recent_prioritization_fees()
            .times(1)
            .returning(|_| {
                Box::pin(async {
                    Ok(vec![RpcPrioritizationFee {
                        slot: 1,
                        prioritization_fee: 2_500,
                    }])
                })
            });
        connection
            .expect_simulate_transaction()
            .times(1)
            .returning(|_, _| {
                Box::pin(async {
                    Ok(SimulationOutcome {
                        err: None,
                        logs: vec!["Program log: ok".to_string()],
                        units_consumed: Some(5_000),
                    })
                })
            });
        connection
            .expect_send_transaction()
            .times(1)
            .returning(|_| Box::pin(async { Ok(test_signature()) }));
        connection
            .expect_get_block_height()
            .returning(|_| Box::pin(async { Ok(900) }));
        connection
            .expect_get_signature_status()
            .returning(|_| Box::pin(async { Ok(Some(confirmed_snapshot(150))) }));

        let mut config = fast_config(Arc::clone(&signer));
        config.priority_fee = Some(Default::default());
        config.simulation = Some(SimulationConfig::default());
        let sender = sender_with(connection, config);
        let mut rx = sender.subscribe().unwrap();

        let result = sender
            .send(transfer_transaction(&signer), SendOptions::default())
            .await
            .unwrap();

        assert_eq!(result.signature, test_signature());
        assert_eq!(result.slot, 150);
        assert_eq!(result.attempts, 1);
        assert_eq!(result.commitment, "confirmed");
        assert_eq!(result.units_consumed, Some(5_000));
        assert_eq!(result.priority_fee_micro_lamports, Some(2_500));

        let events = drain_events(&mut rx);
        let kinds: Vec<&'static str> = events
            .iter()
            .map(|event| match event {
                SenderEvent::Simulated { .. } => "simulated",
                SenderEvent::Sending { .. } => "sending",
                SenderEvent::Sent { .. } => "sent",
                SenderEvent::Confirming { .. } => "confirming",
                SenderEvent::Confirmed { .. } => "confirmed",
                _ => "other",
            })
            .collect();
        assert_eq!(
            kinds,
            vec!["simulated", "sending", "sent", "confirming", "confirmed"]
        );
    }

    #[tokio::test]
    async fn test_blockhash_expiry_retries_with_fresh_hash() {
        let signer = Arc::new(Keypair::new());
        let fetches = Arc::new(AtomicU32::new(0));
        let fetches_in_mock = Arc::clone(&fetches);

        let mut connection = MockSolanaConnection::new();
        connection
            .expect_get_latest_blockhash()
            .returning(move |_| {
                let fetch = fetches_in_mock.fetch_add(1, Ordering::SeqCst);
                Box::pin(async move {
                    if fetch == 0 {
                        // First blockhash is already near the end of its
                        // validity window.
                        Ok((Hash::new_unique(), 1_000))
                    } else {
                        Ok((Hash::new_unique(), 2_000))
                    }
                })
            });
        connection
            .expect_send_transaction()
            .times(2)
            .returning(|_| Box::pin(async { Ok(test_signature()) }));
        connection
            .expect_get_block_height()
            .returning(|_| Box::pin(async { Ok(1_500) }));
        connection
            .expect_get_signature_status()
            .returning(|_| Box::pin(async { Ok(Some(confirmed_snapshot(152))) }));

        let sender = sender_with(connection, fast_config(Arc::clone(&signer)));
        let mut rx = sender.subscribe().unwrap();

        let result = sender
            .send(transfer_transaction(&signer), SendOptions::default())
            .await
            .unwrap();

        assert_eq!(result.attempts, 2);
        assert_eq!(result.slot, 152);
        assert!(fetches.load(Ordering::SeqCst) >= 2);

        let events = drain_events(&mut rx);
        let expired_events = events
            .iter()
            .filter(|event| matches!(event, SenderEvent::BlockhashExpired { .. }))
            .count();
        assert_eq!(expired_events, 1);
    }

    #[tokio::test]
    async fn test_rate_limited_sends_recover() {
        let signer = Arc::new(Keypair::new());
        let sends = Arc::new(AtomicU32::new(0));
        let sends_in_mock = Arc::clone(&sends);

        let mut connection = MockSolanaConnection::new();
        connection
            .expect_get_latest_blockhash()
            .returning(|_| Box::pin(async { Ok((Hash::new_unique(), 1_000)) }));
        connection.expect_send_transaction().returning(move |_| {
            let send = sends_in_mock.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                if send < 2 {
                    Err(SenderError::Rpc("HTTP 429 Too Many Requests".to_string()))
                } else {
                    Ok(test_signature())
                }
            })
        });
        connection
            .expect_get_block_height()
            .returning(|_| Box::pin(async { Ok(900) }));
        connection
            .expect_get_signature_status()
            .returning(|_| Box::pin(async { Ok(Some(confirmed_snapshot(150))) }));

        let sender = sender_with(connection, fast_config(Arc::clone(&signer)));
        let mut rx = sender.subscribe().unwrap();

        let result = sender
            .send(transfer_transaction(&signer), SendOptions::default())
            .await
            .unwrap();

        assert_eq!(result.attempts, 3);
        assert_eq!(sends.load(Ordering::SeqCst), 3);

        let retrying: Vec<_> = drain_events(&mut rx)
            .into_iter()
            .filter_map(|event| match event {
                SenderEvent::Retrying { delay_ms, .. } => Some(delay_ms),
                _ => None,
            })
            .collect();
        assert_eq!(retrying.len(), 2);
    }

    #[tokio::test]
    async fn test_non_retryable_failure_consumes_one_attempt() {
        let signer = Arc::new(Keypair::new());
        let mut connection = MockSolanaConnection::new();
        connection
            .expect_get_latest_blockhash()
            .returning(|_| Box::pin(async { Ok((Hash::new_unique(), 1_000)) }));
        connection
            .expect_send_transaction()
            .times(1)
            .returning(|_| {
                Box::pin(async {
                    Err(SenderError::Rpc(
                        "Transfer: insufficient funds for fee".to_string(),
                    ))
                })
            });

        let sender = sender_with(connection, fast_config(Arc::clone(&signer)));
        let error = sender
            .send(transfer_transaction(&signer), SendOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(error, SenderError::NonRetryable { .. }));
    }

    #[tokio::test]
    async fn test_repeated_failures_trip_the_breaker() {
        let signer = Arc::new(Keypair::new());
        let mut connection = MockSolanaConnection::new();
        connection
            .expect_get_latest_blockhash()
            .returning(|_| Box::pin(async { Ok((Hash::new_unique(), 1_000)) }));
        connection
            .expect_send_transaction()
            .returning(|_| {
                Box::pin(async { Err(SenderError::Rpc("invalid account data".to_string())) })
            });

        let mut config = fast_config(Arc::clone(&signer));
        config.rpc.circuit_breaker.failure_threshold = 2;
        let sender = sender_with(connection, config);

        for _ in 0..2 {
            let _ = sender
                .send(transfer_transaction(&signer), SendOptions::default())
                .await;
        }

        let report = sender.health_report();
        assert_eq!(
            report[0].circuit_state,
            crate::services::circuit_breaker::CircuitState::Open
        );
    }

    #[tokio::test]
    async fn test_simulation_failure_is_fatal_with_logs() {
        let signer = Arc::new(Keypair::new());
        let mut connection = MockSolanaConnection::new();
        connection
            .expect_get_latest_blockhash()
            .returning(|_| Box::pin(async { Ok((Hash::new_unique(), 1_000)) }));
        connection
            .expect_simulate_transaction()
            .times(1)
            .returning(|_, _| {
                Box::pin(async {
                    Ok(SimulationOutcome {
                        err: Some(
                            "Transaction simulation failed at instruction 0: custom program error"
                                .to_string(),
                        ),
                        logs: vec!["Program log: panicked".to_string()],
                        units_consumed: None,
                    })
                })
            });

        let mut config = fast_config(Arc::clone(&signer));
        config.simulation = Some(SimulationConfig::default());
        let sender = sender_with(connection, config);

        let error = sender
            .send(transfer_transaction(&signer), SendOptions::default())
            .await
            .unwrap_err();

        match error {
            SenderError::NonRetryable { source } => match source.as_ref() {
                SenderError::SimulationFailed { logs, .. } => {
                    assert_eq!(logs.len(), 1);
                }
                other => panic!("unexpected cause: {other}"),
            },
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_skip_simulation_option_bypasses_configured_simulation() {
        let signer = Arc::new(Keypair::new());
        let mut connection = MockSolanaConnection::new();
        connection
            .expect_get_latest_blockhash()
            .returning(|_| Box::pin(async { Ok((Hash::new_unique(), 1_000)) }));
        // No simulate expectation: a call would panic the mock.
        connection
            .expect_send_transaction()
            .returning(|_| Box::pin(async { Ok(test_signature()) }));
        connection
            .expect_get_block_height()
            .returning(|_| Box::pin(async { Ok(900) }));
        connection
            .expect_get_signature_status()
            .returning(|_| Box::pin(async { Ok(Some(confirmed_snapshot(150))) }));

        let mut config = fast_config(Arc::clone(&signer));
        config.simulation = Some(SimulationConfig::default());
        let sender = sender_with(connection, config);

        let result = sender
            .send(
                transfer_transaction(&signer),
                SendOptions {
                    skip_simulation: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(result.attempts, 1);
    }

    #[tokio::test]
    async fn test_skip_confirmation_returns_slot_zero_without_status_queries() {
        let signer = Arc::new(Keypair::new());
        let mut connection = MockSolanaConnection::new();
        connection
            .expect_get_latest_blockhash()
            .returning(|_| Box::pin(async { Ok((Hash::new_unique(), 1_000)) }));
        connection
            .expect_send_transaction()
            .returning(|_| Box::pin(async { Ok(test_signature()) }));
        // No get_signature_status / get_block_height expectations: any call
        // would panic the mock.

        let sender = sender_with(connection, fast_config(Arc::clone(&signer)));
        let result = sender
            .send(
                transfer_transaction(&signer),
                SendOptions {
                    skip_confirmation: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(result.slot, 0);
        assert_eq!(result.attempts, 1);
    }

    #[tokio::test]
    async fn test_on_chain_failure_surfaces_transaction_failed() {
        let signer = Arc::new(Keypair::new());
        let mut connection = MockSolanaConnection::new();
        connection
            .expect_get_latest_blockhash()
            .returning(|_| Box::pin(async { Ok((Hash::new_unique(), 1_000)) }));
        connection
            .expect_send_transaction()
            .returning(|_| Box::pin(async { Ok(test_signature()) }));
        connection
            .expect_get_block_height()
            .returning(|_| Box::pin(async { Ok(900) }));
        connection.expect_get_signature_status().returning(|_| {
            Box::pin(async {
                Ok(Some(SignatureStatusSnapshot {
                    slot: 151,
                    err: Some("custom program error: 0x1".to_string()),
                    commitment: CommitmentLevel::Confirmed,
                }))
            })
        });

        let sender = sender_with(connection, fast_config(Arc::clone(&signer)));
        let error = sender
            .send(transfer_transaction(&signer), SendOptions::default())
            .await
            .unwrap_err();

        match error {
            SenderError::NonRetryable { source } => {
                assert!(matches!(
                    source.as_ref(),
                    SenderError::TransactionFailed { .. }
                ));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_static_priority_fee_injects_budget_instructions() {
        let signer = Arc::new(Keypair::new());
        let mut connection = MockSolanaConnection::new();
        connection
            .expect_get_latest_blockhash()
            .returning(|_| Box::pin(async { Ok((Hash::new_unique(), 1_000)) }));
        connection
            .expect_send_transaction()
            .withf(|transaction| {
                let instructions = transaction.message.instructions();
                let account_keys = transaction.message.static_account_keys();
                instructions.len() == 3
                    && account_keys[instructions[0].program_id_index as usize]
                        == compute_budget::id()
                    && account_keys[instructions[1].program_id_index as usize]
                        == compute_budget::id()
            })
            .times(1)
            .returning(|_| Box::pin(async { Ok(test_signature()) }));
        connection
            .expect_get_block_height()
            .returning(|_| Box::pin(async { Ok(900) }));
        connection
            .expect_get_signature_status()
            .returning(|_| Box::pin(async { Ok(Some(confirmed_snapshot(150))) }));

        let sender = sender_with(connection, fast_config(Arc::clone(&signer)));
        let original = transfer_transaction(&signer);
        let original_instruction_count = original.message.instructions.len();

        let result = sender
            .send(
                original.clone(),
                SendOptions {
                    priority_fee: Some(PriorityFeeOverride::Static {
                        micro_lamports: 4_000,
                    }),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(result.priority_fee_micro_lamports, Some(4_000));
        // The caller's transaction was never mutated.
        assert_eq!(original.message.instructions.len(), original_instruction_count);
    }

    #[tokio::test]
    async fn test_versioned_transaction_bypasses_injection() {
        let signer = Arc::new(Keypair::new());
        let blockhash = Hash::new_unique();

        let mut connection = MockSolanaConnection::new();
        connection
            .expect_get_latest_blockhash()
            .returning(move |_| Box::pin(async move { Ok((blockhash, 1_000)) }));
        // No prioritization-fee expectation: versioned transactions skip
        // fee estimation entirely.
        connection
            .expect_send_transaction()
            .withf(|transaction| transaction.message.instructions().len() == 1)
            .times(1)
            .returning(|_| Box::pin(async { Ok(test_signature()) }));
        connection
            .expect_get_block_height()
            .returning(|_| Box::pin(async { Ok(900) }));
        connection
            .expect_get_signature_status()
            .returning(|_| Box::pin(async { Ok(Some(confirmed_snapshot(150))) }));

        let mut config = fast_config(Arc::clone(&signer));
        config.priority_fee = Some(Default::default());
        let sender = sender_with(connection, config);

        let mut legacy = transfer_transaction(&signer);
        legacy.try_sign(&[signer.as_ref()], blockhash).unwrap();
        let versioned = VersionedTransaction::from(legacy);

        let result = sender.send(versioned, SendOptions::default()).await.unwrap();
        assert_eq!(result.priority_fee_micro_lamports, None);
    }

    #[tokio::test]
    async fn test_destroy_is_idempotent_and_rejects_further_sends() {
        let signer = Arc::new(Keypair::new());
        let connection = MockSolanaConnection::new();
        let sender = sender_with(connection, fast_config(Arc::clone(&signer)));

        sender.destroy();
        sender.destroy();

        let error = sender
            .send(transfer_transaction(&signer), SendOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(error, SenderError::Config(_)));
        assert!(sender.subscribe().is_none());
    }

    #[tokio::test]
    async fn test_failed_event_accompanies_the_returned_error() {
        let signer = Arc::new(Keypair::new());
        let mut connection = MockSolanaConnection::new();
        connection
            .expect_get_latest_blockhash()
            .returning(|_| Box::pin(async { Ok((Hash::new_unique(), 1_000)) }));
        connection.expect_send_transaction().returning(|_| {
            Box::pin(async { Err(SenderError::Rpc("Account not found".to_string())) })
        });

        let sender = sender_with(connection, fast_config(Arc::clone(&signer)));
        let mut rx = sender.subscribe().unwrap();

        let _ = sender
            .send(transfer_transaction(&signer), SendOptions::default())
            .await;

        let failed = drain_events(&mut rx)
            .into_iter()
            .filter(|event| matches!(event, SenderEvent::Failed { .. }))
            .count();
        assert_eq!(failed, 1);
    }
}
