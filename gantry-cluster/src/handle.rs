//! Worker-side IPC handle
//!
//! The handle is the worker's structured logger and messaging client in one:
//! its log sink is a `Log` notification over the channel, so workers never
//! write to their own console. It is cloneable and shared between the runtime
//! and the user application.

use gantry_ipc::{
    ClusterMessage, CorrelationMap, Embed, FetchKind, FetchValue, IpcError, LifecycleKind, LogLevel,
};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Handler invoked for a registered event name
pub type EventHandler = Box<dyn Fn(JsonValue) + Send + Sync>;

/// Key user payloads are dispatched on
pub const EVENT_NAME_KEY: &str = "_eventName";

/// Cloneable worker-side messaging client
#[derive(Clone)]
pub struct IpcHandle {
    outbound: mpsc::UnboundedSender<ClusterMessage>,
    correlations: Arc<CorrelationMap>,
    events: Arc<Mutex<HashMap<String, EventHandler>>>,
    fetch_timeout: Duration,
}

impl IpcHandle {
    pub(crate) fn new(
        outbound: mpsc::UnboundedSender<ClusterMessage>,
        correlations: Arc<CorrelationMap>,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            outbound,
            correlations,
            events: Arc::new(Mutex::new(HashMap::new())),
            fetch_timeout,
        }
    }

    /// Queue a message for the master. Fails only once the channel to the
    /// writer task has closed.
    pub fn send(&self, message: ClusterMessage) -> Result<(), IpcError> {
        self.outbound
            .send(message)
            .map_err(|_| IpcError::ConnectionClosed)
    }

    pub(crate) fn correlations(&self) -> &Arc<CorrelationMap> {
        &self.correlations
    }

    fn log_at(&self, level: LogLevel, msg: impl Into<String>) {
        // Log relay is fire-and-forget; a closed channel means the process is
        // shutting down anyway.
        let _ = self.send(ClusterMessage::Log {
            level,
            msg: msg.into(),
        });
    }

    pub fn log(&self, msg: impl Into<String>) {
        self.log_at(LogLevel::Log, msg);
    }

    pub fn debug(&self, msg: impl Into<String>) {
        self.log_at(LogLevel::Debug, msg);
    }

    pub fn info(&self, msg: impl Into<String>) {
        self.log_at(LogLevel::Info, msg);
    }

    pub fn warn(&self, msg: impl Into<String>) {
        self.log_at(LogLevel::Warn, msg);
    }

    pub fn error(&self, msg: impl Into<String>) {
        self.log_at(LogLevel::Error, msg);
    }

    /// Emit a lifecycle embed for the given webhook category
    pub fn lifecycle(&self, kind: LifecycleKind, embed: Embed) {
        let _ = self.send(ClusterMessage::Lifecycle { kind, embed });
    }

    /// Register a handler for a named event delivered via broadcast/send.
    /// Re-registration replaces the previous handler.
    pub fn register(&self, event: impl Into<String>, handler: EventHandler) {
        self.events
            .lock()
            .expect("event registry lock poisoned")
            .insert(event.into(), handler);
    }

    /// Unregister a named event handler
    pub fn unregister(&self, event: &str) {
        self.events
            .lock()
            .expect("event registry lock poisoned")
            .remove(event);
    }

    /// Dispatch an incoming user payload to its registered handler. Unknown
    /// event names are dropped silently.
    pub(crate) fn dispatch(&self, payload: JsonValue) {
        let Some(name) = payload.get(EVENT_NAME_KEY).and_then(JsonValue::as_str) else {
            return;
        };
        let events = self.events.lock().expect("event registry lock poisoned");
        if let Some(handler) = events.get(name) {
            handler(payload.clone());
        }
    }

    /// Send a named payload to every cluster (routed through the master)
    pub fn broadcast(&self, event: &str, mut msg: JsonValue) -> Result<(), IpcError> {
        if let Some(obj) = msg.as_object_mut() {
            obj.insert(EVENT_NAME_KEY.to_string(), JsonValue::from(event));
        }
        self.send(ClusterMessage::Broadcast { msg })
    }

    /// Send a named payload to one cluster (routed through the master)
    pub fn send_to(&self, cluster: u32, event: &str, mut msg: JsonValue) -> Result<(), IpcError> {
        if let Some(obj) = msg.as_object_mut() {
            obj.insert(EVENT_NAME_KEY.to_string(), JsonValue::from(event));
        }
        self.send(ClusterMessage::Send { cluster, msg })
    }

    /// Ask another cluster to restart itself
    pub fn restart_cluster(&self, cluster: u32) -> Result<(), IpcError> {
        self.send_to(cluster, "restart", serde_json::json!({}))
    }

    /// Fetch a user from whichever cluster caches it
    pub async fn fetch_user(&self, id: &str) -> Result<Option<JsonValue>, IpcError> {
        self.fetch(FetchKind::User, FetchValue::Id(id.to_string()))
            .await
    }

    /// Fetch a guild from whichever cluster caches it
    pub async fn fetch_guild(&self, id: &str) -> Result<Option<JsonValue>, IpcError> {
        self.fetch(FetchKind::Guild, FetchValue::Id(id.to_string()))
            .await
    }

    /// Fetch a channel from whichever cluster caches it
    pub async fn fetch_channel(&self, id: &str) -> Result<Option<JsonValue>, IpcError> {
        self.fetch(FetchKind::Channel, FetchValue::Id(id.to_string()))
            .await
    }

    /// Fetch a guild member from whichever cluster caches the guild
    pub async fn fetch_member(
        &self,
        guild_id: &str,
        member_id: &str,
    ) -> Result<Option<JsonValue>, IpcError> {
        self.fetch(
            FetchKind::Member,
            FetchValue::GuildMember(guild_id.to_string(), member_id.to_string()),
        )
        .await
    }

    /// Correlated lookup fanned out across the fleet by the master. Resolves
    /// `Ok(None)` when no cluster answers within the fetch timeout.
    async fn fetch(&self, kind: FetchKind, value: FetchValue) -> Result<Option<JsonValue>, IpcError> {
        let key = value.correlation_key().to_string();
        let waiter = self.correlations.register(key.clone());
        self.send(ClusterMessage::Fetch { kind, value })?;

        match tokio::time::timeout(self.fetch_timeout, waiter).await {
            Ok(Ok(value)) => Ok(Some(value)),
            // Waiter replaced by a newer lookup for the same id
            Ok(Err(_)) => Ok(None),
            Err(_) => {
                self.correlations.cancel(&key);
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_handle() -> (IpcHandle, mpsc::UnboundedReceiver<ClusterMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = IpcHandle::new(tx, Arc::new(CorrelationMap::new()), Duration::from_millis(50));
        (handle, rx)
    }

    #[tokio::test]
    async fn test_log_sink_is_a_notification() {
        let (handle, mut rx) = test_handle();
        handle.warn("running low");

        match rx.recv().await.unwrap() {
            ClusterMessage::Log { level, msg } => {
                assert_eq!(level, LogLevel::Warn);
                assert_eq!(msg, "running low");
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_broadcast_carries_event_name() {
        let (handle, mut rx) = test_handle();
        handle.broadcast("refresh", json!({"scope": "all"})).unwrap();

        match rx.recv().await.unwrap() {
            ClusterMessage::Broadcast { msg } => {
                assert_eq!(msg[EVENT_NAME_KEY], "refresh");
                assert_eq!(msg["scope"], "all");
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_dispatch_registered_and_unknown() {
        let (handle, _rx) = test_handle();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        handle.register(
            "ping",
            Box::new(move |payload| {
                sink.lock().unwrap().push(payload);
            }),
        );

        handle.dispatch(json!({"_eventName": "ping", "n": 1}));
        // Unknown names are dropped silently
        handle.dispatch(json!({"_eventName": "unknown"}));
        handle.dispatch(json!({"no_event_name": true}));

        assert_eq!(seen.lock().unwrap().len(), 1);

        handle.unregister("ping");
        handle.dispatch(json!({"_eventName": "ping", "n": 2}));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_resolves_none_on_timeout() {
        let (handle, mut rx) = test_handle();

        let result = handle.fetch_user("42").await.unwrap();
        assert!(result.is_none());
        assert_eq!(handle.correlations().outstanding(), 0);

        // The lookup itself still went out
        assert!(matches!(
            rx.recv().await.unwrap(),
            ClusterMessage::Fetch {
                kind: FetchKind::User,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_fetch_resolves_with_answer() {
        let (handle, _rx) = test_handle();

        let lookup = handle.fetch_guild("g9");
        let correlations = handle.correlations().clone();
        let answer = tokio::spawn(async move {
            // Wait for the registration to appear, then answer like the
            // runtime does when a FetchReturn arrives.
            loop {
                if correlations.complete("g9", json!({"id": "g9", "name": "home"})) {
                    break;
                }
                tokio::task::yield_now().await;
            }
        });

        let result = lookup.await.unwrap().unwrap();
        assert_eq!(result["name"], "home");
        answer.await.unwrap();
    }
}
