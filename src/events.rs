//! Lifecycle event bus.
//!
//! Every internal component publishes typed [`SenderEvent`]s through a
//! single [`EventBus`] the sender exposes read-only to callers. Emission is
//! fire-and-forget: a send without subscribers is not an error, and slow
//! subscribers lag rather than back-pressure the pipeline.

use parking_lot::RwLock;
use solana_sdk::signature::Signature;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::trace;

use crate::constants::EVENT_CHANNEL_CAPACITY;

/// Lifecycle events emitted during transaction submission.
///
/// Within one `send` call the per-attempt order is fixed:
/// `Sending` -> `Sent` -> (`Confirming` -> `Confirmed`) or
/// (`Retrying` [-> `BlockhashExpired`]), with `Simulated` before `Sending`
/// when simulation runs. No ordering is guaranteed across concurrent sends.
#[derive(Debug, Clone)]
pub enum SenderEvent {
    /// An attempt is about to submit the serialized transaction.
    Sending { attempt: u32 },
    /// Pre-flight simulation succeeded.
    Simulated {
        units_consumed: Option<u64>,
        logs: Vec<String>,
    },
    /// The transaction was accepted by an RPC node.
    Sent { signature: Signature, attempt: u32 },
    /// Confirmation tracking started for a signature.
    Confirming { signature: Signature },
    /// The transaction reached its target commitment.
    Confirmed {
        signature: Signature,
        slot: u64,
        latency_ms: u64,
    },
    /// A retryable failure; the next attempt starts after `delay_ms`.
    Retrying {
        attempt: u32,
        max_retries: u32,
        error: String,
        delay_ms: u64,
    },
    /// The cached blockhash was force-refreshed after an expiry.
    BlockhashExpired { old: String, new: String },
    /// The send call is returning an error.
    Failed { error: String },
    /// A bundle was handed to the block engine (bundle client collaborator).
    BundleSubmitted { bundle_id: String },
    /// A bundle was rejected or dropped (bundle client collaborator).
    BundleFailed { bundle_id: String, error: String },
}

/// Broadcast bus for [`SenderEvent`]s.
///
/// Cloning the bus shares the underlying channel. [`EventBus::close`] drops
/// the sender half so every subscriber observes a clean end-of-stream; a
/// closed bus swallows further emissions.
#[derive(Clone)]
pub struct EventBus {
    tx: Arc<RwLock<Option<broadcast::Sender<SenderEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            tx: Arc::new(RwLock::new(Some(tx))),
        }
    }

    /// Subscribes to the event stream.
    ///
    /// Returns `None` once the bus has been closed by `destroy`.
    pub fn subscribe(&self) -> Option<broadcast::Receiver<SenderEvent>> {
        self.tx.read().as_ref().map(|tx| tx.subscribe())
    }

    /// Publishes an event; best effort.
    pub fn emit(&self, event: SenderEvent) {
        trace!(event = ?event, "emitting sender event");
        if let Some(tx) = self.tx.read().as_ref() {
            let _ = tx.send(event);
        }
    }

    /// Drops the channel, disconnecting all subscribers. Idempotent.
    pub fn close(&self) {
        self.tx.write().take();
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe().unwrap();

        bus.emit(SenderEvent::Sending { attempt: 0 });
        bus.emit(SenderEvent::Failed {
            error: "boom".to_string(),
        });

        assert!(matches!(
            rx.recv().await.unwrap(),
            SenderEvent::Sending { attempt: 0 }
        ));
        assert!(matches!(rx.recv().await.unwrap(), SenderEvent::Failed { .. }));
    }

    #[tokio::test]
    async fn test_emit_without_subscribers_is_silent() {
        let bus = EventBus::new();
        bus.emit(SenderEvent::Sending { attempt: 0 });
    }

    #[tokio::test]
    async fn test_close_disconnects_subscribers() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe().unwrap();

        bus.close();
        bus.close(); // idempotent

        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
        assert!(bus.subscribe().is_none());

        // Emissions after close are swallowed.
        bus.emit(SenderEvent::Sending { attempt: 1 });
    }

    #[tokio::test]
    async fn test_clones_share_the_channel() {
        let bus = EventBus::new();
        let clone = bus.clone();
        let mut rx = bus.subscribe().unwrap();

        clone.emit(SenderEvent::Confirming {
            signature: Signature::default(),
        });
        assert!(matches!(
            rx.recv().await.unwrap(),
            SenderEvent::Confirming { .. }
        ));
    }
}
