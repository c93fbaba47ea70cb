//! Application contract
//!
//! The user-supplied application is resolved through a factory registry
//! rather than loaded from disk: the `file` key carried by the `connect`
//! instruction selects a registered [`ClusterAppFactory`]. A worker whose key
//! has no registration logs an error and keeps its gateway connection up
//! without running any application logic.

use async_trait::async_trait;
use gantry_interfaces::GatewayClient;
use std::collections::HashMap;
use std::sync::Arc;

use crate::handle::IpcHandle;
use crate::request::RequestHandler;

/// Runtime context handed to the application exactly once per worker
pub struct AppContext {
    /// Live gateway client owning this worker's shard range
    pub gateway: Arc<dyn GatewayClient>,
    pub cluster_id: u32,
    /// Messaging client shared with the runtime
    pub ipc: IpcHandle,
    /// Proxy for outbound API calls
    pub requests: RequestHandler,
}

/// The capability every registered application must expose
#[async_trait]
pub trait ClusterApp: Send {
    async fn launch(self: Box<Self>) -> anyhow::Result<()>;
}

/// Builds one application instance per worker launch
pub trait ClusterAppFactory: Send + Sync {
    fn create(&self, ctx: AppContext) -> Box<dyn ClusterApp>;
}

impl<F> ClusterAppFactory for F
where
    F: Fn(AppContext) -> Box<dyn ClusterApp> + Send + Sync,
{
    fn create(&self, ctx: AppContext) -> Box<dyn ClusterApp> {
        self(ctx)
    }
}

/// Registry of application factories keyed by entrypoint name
#[derive(Default)]
pub struct AppRegistry {
    factories: HashMap<String, Box<dyn ClusterAppFactory>>,
}

impl AppRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under an entrypoint name
    pub fn register(
        mut self,
        name: impl Into<String>,
        factory: impl ClusterAppFactory + 'static,
    ) -> Self {
        self.factories.insert(name.into(), Box::new(factory));
        self
    }

    /// Resolve a factory by the entrypoint name from the connect instruction
    pub fn get(&self, name: &str) -> Option<&dyn ClusterAppFactory> {
        self.factories.get(name).map(Box::as_ref)
    }
}
