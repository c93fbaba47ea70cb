//! Correlation of asynchronous requests to their responses
//!
//! Both the entity-lookup protocol and the outbound request proxy send a
//! request carrying a correlation id and wait for exactly one matching
//! response. Each pending correlation is a single-resolution completion
//! handle: completing and cancelling both remove the entry, so a late
//! response after a timeout is dropped instead of firing twice.

use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::oneshot;

/// Map from correlation id to the waiting continuation
#[derive(Debug, Default)]
pub struct CorrelationMap {
    pending: Mutex<HashMap<String, oneshot::Sender<JsonValue>>>,
}

impl CorrelationMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending correlation, returning the receiving end. A
    /// re-registration under the same id replaces (and thereby drops) the
    /// previous waiter.
    pub fn register(&self, id: impl Into<String>) -> oneshot::Receiver<JsonValue> {
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("correlation map lock poisoned")
            .insert(id.into(), tx);
        rx
    }

    /// Complete a pending correlation. Returns `false` when no waiter was
    /// registered (already completed, cancelled, or never requested).
    pub fn complete(&self, id: &str, value: JsonValue) -> bool {
        let waiter = self
            .pending
            .lock()
            .expect("correlation map lock poisoned")
            .remove(id);
        match waiter {
            Some(tx) => tx.send(value).is_ok(),
            None => false,
        }
    }

    /// Remove a pending correlation without resolving it. Idempotent.
    pub fn cancel(&self, id: &str) -> bool {
        self.pending
            .lock()
            .expect("correlation map lock poisoned")
            .remove(id)
            .is_some()
    }

    /// Number of correlations still outstanding
    pub fn outstanding(&self) -> usize {
        self.pending
            .lock()
            .expect("correlation map lock poisoned")
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_complete_resolves_waiter() {
        let map = CorrelationMap::new();
        let rx = map.register("req-1");

        assert!(map.complete("req-1", json!({"ok": true})));
        assert_eq!(rx.await.unwrap(), json!({"ok": true}));
        assert_eq!(map.outstanding(), 0);
    }

    #[test]
    fn test_complete_unknown_id_is_noop() {
        let map = CorrelationMap::new();
        assert!(!map.complete("nope", json!(null)));
    }

    #[test]
    fn test_removal_fires_exactly_once() {
        let map = CorrelationMap::new();
        let _rx = map.register("req-1");

        assert!(map.cancel("req-1"));
        // Second removal, and a response arriving after the timeout path
        // already cancelled, are both silent no-ops.
        assert!(!map.cancel("req-1"));
        assert!(!map.complete("req-1", json!(1)));
    }

    #[tokio::test]
    async fn test_concurrent_correlations_are_independent() {
        let map = CorrelationMap::new();
        let rx_a = map.register("a");
        let rx_b = map.register("b");

        // Responses may arrive in any order relative to the requests
        assert!(map.complete("b", json!("b-data")));
        assert!(map.complete("a", json!("a-data")));

        assert_eq!(rx_a.await.unwrap(), json!("a-data"));
        assert_eq!(rx_b.await.unwrap(), json!("b-data"));
    }

    #[tokio::test]
    async fn test_reregistration_replaces_waiter() {
        let map = CorrelationMap::new();
        let stale = map.register("dup");
        let fresh = map.register("dup");

        assert!(map.complete("dup", json!(2)));
        assert!(stale.await.is_err());
        assert_eq!(fresh.await.unwrap(), json!(2));
    }
}
