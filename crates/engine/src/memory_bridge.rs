//! `InMemoryBridge` — an `EventBridge` that delivers whatever you hand it.
//!
//! Used by tests and by the CLI's event replay.  Delivery is synchronous on
//! the caller of [`InMemoryBridge::emit`]; the engine's callback is expected
//! to hand the work off rather than run it inline.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::bridge::{EventBridge, EventBridgeError, EventCallback, TransferEvent, WatchHandle};

struct Registration {
    subject: String,
    callback: EventCallback,
}

#[derive(Default)]
pub struct InMemoryBridge {
    next_id: AtomicU64,
    watches: Mutex<BTreeMap<String, Registration>>,
    /// When set, every `watch` call fails with this error.
    failure: Option<EventBridgeError>,
}

impl InMemoryBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// A bridge whose `watch` always fails, for exercising error paths.
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            failure: Some(EventBridgeError::Unavailable(reason.into())),
            ..Self::default()
        }
    }

    /// Deliver `payload` to every watch whose subject matches
    /// (case-insensitively).  Returns the number of callbacks invoked.
    pub fn emit(&self, subject: &str, payload: Value) -> usize {
        let targets = self.matching(|s| s.eq_ignore_ascii_case(subject));
        debug!(subject, deliveries = targets.len(), "emitting event");
        for callback in &targets {
            callback(payload.clone());
        }
        targets.len()
    }

    /// Deliver a token transfer to every watch on its sender or recipient.
    pub fn emit_transfer(&self, transfer: &TransferEvent) -> usize {
        let targets = self.matching(|s| transfer.involves(s));
        let payload = transfer.to_payload();
        for callback in &targets {
            callback(payload.clone());
        }
        targets.len()
    }

    pub fn active_watches(&self) -> usize {
        self.lock().len()
    }

    // Callbacks are cloned out so they run without the lock held; a callback
    // may well call `unwatch`.
    fn matching(&self, accept: impl Fn(&str) -> bool) -> Vec<EventCallback> {
        self.lock()
            .values()
            .filter(|r| accept(&r.subject))
            .map(|r| r.callback.clone())
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Registration>> {
        self.watches.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl EventBridge for InMemoryBridge {
    async fn watch(&self, subject: &str, on_match: EventCallback) -> Result<WatchHandle, EventBridgeError> {
        if let Some(err) = &self.failure {
            return Err(err.clone());
        }
        if subject.trim().is_empty() {
            return Err(EventBridgeError::InvalidSubject(subject.to_owned()));
        }

        let id = format!("watch-{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.lock().insert(
            id.clone(),
            Registration { subject: subject.to_owned(), callback: on_match },
        );
        Ok(WatchHandle { id, subject: subject.to_owned() })
    }

    fn unwatch(&self, handle: &WatchHandle) -> bool {
        self.lock().remove(&handle.id).is_some()
    }
}
