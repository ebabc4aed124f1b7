//! The `EventBridge` contract — how the engine asks the outside world to
//! tell it about events it cares about.
//!
//! The engine knows nothing about ledgers, RPC providers or sockets.  An
//! event-source node names a *subject* (for the wallet watcher, a wallet
//! address) and the bridge calls back once per matching occurrence.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Invoked by the bridge once per matching event, possibly from another
/// task or thread.
pub type EventCallback = Arc<dyn Fn(Value) + Send + Sync>;

/// Errors a bridge can report while registering or maintaining a watch.
#[derive(Debug, Error, Clone)]
pub enum EventBridgeError {
    /// The subject is malformed for this bridge (e.g. not an address).
    #[error("invalid subject '{0}'")]
    InvalidSubject(String),

    /// The upstream event source could not be reached.
    #[error("event source unavailable: {0}")]
    Unavailable(String),
}

/// Identifies one standing registration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WatchHandle {
    pub id: String,
    pub subject: String,
}

impl fmt::Display for WatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.subject)
    }
}

#[async_trait]
pub trait EventBridge: Send + Sync {
    /// Begin delivering events matching `subject` to `on_match`.
    ///
    /// Delivery is asynchronous; returning says nothing about whether any
    /// event has been, or will ever be, seen.
    async fn watch(&self, subject: &str, on_match: EventCallback) -> Result<WatchHandle, EventBridgeError>;

    /// Stop delivery for `handle`.  Returns `false` if it was not active.
    /// Safe to call any number of times.
    fn unwatch(&self, handle: &WatchHandle) -> bool;
}

// ---------------------------------------------------------------------------
// Token transfers
// ---------------------------------------------------------------------------

/// Payload delivered for an ERC-20 `Transfer` touching a watched wallet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferEvent {
    pub from: String,
    pub to: String,
    /// Raw on-chain amount as a decimal string (may exceed 64 bits).
    pub value: String,
    pub transaction_hash: String,
    pub block_number: u64,
    pub token_symbol: String,
    pub value_formatted: String,
    /// Milliseconds since the Unix epoch when the event was observed.
    pub timestamp: i64,
}

impl TransferEvent {
    /// Whether `address` is the sender or the recipient.  Addresses compare
    /// case-insensitively since checksummed and lowercase forms are equal.
    pub fn involves(&self, address: &str) -> bool {
        self.from.eq_ignore_ascii_case(address) || self.to.eq_ignore_ascii_case(address)
    }

    pub fn to_payload(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
