//! Identity change events
//!
//! Replaces the callback-listener model of typical provider SDKs with an
//! explicit channel: providers emit through [`IdentityEvents`], consumers
//! hold an [`IdentitySubscription`]. Unsubscribing is dropping the
//! subscription; once every subscription and the hub itself are gone the
//! consumer's receive loop observes closure and can tear down.

use tokio::sync::broadcast;
use tracing::warn;

use super::ports::Identity;

/// A single identity transition as reported by the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityEvent {
    SignedIn(Identity),
    SignedOut,
}

/// Broadcast hub for identity events.
///
/// Any number of subscribers may listen (the original client had several
/// independent listeners on the same provider); each gets every event.
#[derive(Debug, Clone)]
pub struct IdentityEvents {
    tx: broadcast::Sender<IdentityEvent>,
}

impl IdentityEvents {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(16);
        Self { tx }
    }

    /// Emit an event to all current subscribers
    pub fn emit(&self, event: IdentityEvent) {
        // No subscribers is fine: nobody is watching the session yet
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> IdentitySubscription {
        IdentitySubscription {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for IdentityEvents {
    fn default() -> Self {
        Self::new()
    }
}

/// A live subscription to identity events. Drop it to unsubscribe.
pub struct IdentitySubscription {
    rx: broadcast::Receiver<IdentityEvent>,
}

impl IdentitySubscription {
    /// Next event, or `None` once the hub and all senders are gone.
    ///
    /// A slow consumer that misses events only ever needs the latest
    /// identity state, so lagged gaps are logged and skipped.
    pub async fn next(&mut self) -> Option<IdentityEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("identity event subscriber lagged, skipped {missed} events");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
