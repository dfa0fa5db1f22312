//! Blockhash caching with TTL, background refresh and single-flight fetch.
//!
//! The manager holds at most one cached record and at most one in-flight
//! fetch. Concurrent refreshes coalesce: the first caller performs the RPC
//! and broadcasts the outcome, every other caller subscribes and receives
//! the identical record. Background refresh failures are logged and the old
//! cache is preserved until it goes stale.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::config::BlockhashConfig;
use crate::models::{BlockhashRecord, SenderError};
use crate::services::connection::SolanaConnection;
use crate::services::pool::ConnectionPool;

type FetchResult = Result<BlockhashRecord, SenderError>;

#[derive(Default)]
struct ManagerState {
    cached: Option<BlockhashRecord>,
    inflight: Option<broadcast::Sender<FetchResult>>,
}

/// Clears the in-flight slot if the leading fetch is cancelled, so waiters
/// are woken with a channel error instead of hanging.
struct InflightGuard<'a> {
    state: &'a Mutex<ManagerState>,
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        self.state.lock().inflight.take();
    }
}

/// TTL-cached blockhash provider.
pub struct BlockhashManager<C> {
    pool: Arc<ConnectionPool<C>>,
    config: BlockhashConfig,
    state: Mutex<ManagerState>,
    refresh_task: Mutex<Option<JoinHandle<()>>>,
}

impl<C: SolanaConnection + 'static> BlockhashManager<C> {
    pub fn new(pool: Arc<ConnectionPool<C>>, config: BlockhashConfig) -> Self {
        Self {
            pool,
            config,
            state: Mutex::new(ManagerState::default()),
            refresh_task: Mutex::new(None),
        }
    }

    fn ttl(&self) -> Duration {
        Duration::from_millis(self.config.ttl_ms)
    }

    /// Spawns the periodic background refresh. Idempotent.
    pub fn start(self: &Arc<Self>) {
        let mut guard = self.refresh_task.lock();
        if guard.is_some() {
            return;
        }

        let weak = Arc::downgrade(self);
        let interval = Duration::from_millis(self.config.refresh_interval_ms);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(manager) = weak.upgrade() else { break };
                if let Err(error) = manager.refresh_blockhash().await {
                    warn!(error = %error, "background blockhash refresh failed");
                }
            }
        });
        *guard = Some(handle);
    }

    /// Returns a fresh-enough blockhash, fetching one if the cache is
    /// absent or stale.
    pub async fn get_blockhash(&self) -> FetchResult {
        if let Some(record) = self.get_cached_blockhash() {
            return Ok(record);
        }
        self.refresh_blockhash().await
    }

    /// Fetches a fresh blockhash, coalescing concurrent callers onto a
    /// single RPC call.
    pub async fn refresh_blockhash(&self) -> FetchResult {
        let waiter = {
            let mut state = self.state.lock();
            match &state.inflight {
                Some(inflight) => Some(inflight.subscribe()),
                None => {
                    let (tx, _) = broadcast::channel(1);
                    state.inflight = Some(tx);
                    None
                }
            }
        };

        if let Some(mut rx) = waiter {
            return match rx.recv().await {
                Ok(result) => result,
                // The leading fetch was cancelled before broadcasting.
                Err(_) => Err(SenderError::Rpc(
                    "coalesced blockhash fetch was aborted".to_string(),
                )),
            };
        }

        let cancel_guard = InflightGuard { state: &self.state };
        let result = self.fetch_blockhash().await;

        let inflight = {
            let mut state = self.state.lock();
            if let Ok(record) = &result {
                state.cached = Some(*record);
            }
            state.inflight.take()
        };
        if let Some(tx) = inflight {
            let _ = tx.send(result.clone());
        }
        drop(cancel_guard);
        result
    }

    async fn fetch_blockhash(&self) -> FetchResult {
        let commitment = self.config.commitment;
        let fetched = self
            .pool
            .with_fallback("get_latest_blockhash", |conn| async move {
                conn.get_latest_blockhash(commitment).await
            })
            .await;

        match fetched {
            Ok((blockhash, last_valid_block_height)) => {
                debug!(
                    blockhash = %blockhash,
                    last_valid_block_height = last_valid_block_height,
                    "fetched fresh blockhash"
                );
                Ok(BlockhashRecord {
                    blockhash,
                    last_valid_block_height,
                    fetched_at: Instant::now(),
                })
            }
            Err(error) => Err(SenderError::BlockhashFetchFailed {
                source: Arc::new(error),
            }),
        }
    }

    /// Whether the cached blockhash is still inside its validity window,
    /// judged against the current block height. Never errors: an RPC
    /// failure (or an empty cache) reports `false`.
    pub async fn is_blockhash_valid(&self) -> bool {
        let cached = match self.get_cached_blockhash() {
            Some(record) => record,
            None => return false,
        };

        let commitment = self.config.commitment;
        match self
            .pool
            .with_fallback("get_block_height", |conn| async move {
                conn.get_block_height(commitment).await
            })
            .await
        {
            Ok(height) => height < cached.last_valid_block_height,
            Err(error) => {
                debug!(error = %error, "block height query failed, treating blockhash as invalid");
                false
            }
        }
    }

    /// Returns the cached record only if present and fresh. Never triggers
    /// a fetch.
    pub fn get_cached_blockhash(&self) -> Option<BlockhashRecord> {
        self.state
            .lock()
            .cached
            .filter(|record| !record.is_stale(self.ttl()))
    }

    /// Stops the background refresh. Idempotent.
    pub fn destroy(&self) {
        if let Some(handle) = self.refresh_task.lock().take() {
            handle.abort();
        }
    }
}

impl<C> Drop for BlockhashManager<C> {
    fn drop(&mut self) {
        if let Some(handle) = self.refresh_task.lock().take() {
            handle.abort();
        }
    }
}
