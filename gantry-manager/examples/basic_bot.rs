//! Minimal master/worker wiring.
//!
//! The same binary serves both roles: forked workers carry the
//! `GANTRY_WORKER` environment variable and branch into the worker runtime;
//! everything else constructs the manager. The gateway client here is a
//! stand-in that reports its shards ready immediately; bind a real client
//! library at the [`GatewayClientFactory`] seam.

use async_trait::async_trait;
use gantry_cluster::{run_worker, AppContext, AppRegistry, ClusterApp, WorkerOptions};
use gantry_config::{ManagerConfig, ShardCount};
use gantry_interfaces::{
    GatewayClient, GatewayClientFactory, GatewayError, GatewayEvent, GatewayOptions,
};
use gantry_ipc::ShardStats;
use gantry_manager::{is_worker_process, ShardingManager};
use serde_json::Value as JsonValue;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::mpsc;

struct StubGateway {
    options: GatewayOptions,
    sender: mpsc::UnboundedSender<GatewayEvent>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<GatewayEvent>>>,
    started: Instant,
}

#[async_trait]
impl GatewayClient for StubGateway {
    async fn connect(&self) -> Result<(), GatewayError> {
        for shard_id in self.options.first_shard_id..=self.options.last_shard_id {
            let _ = self.sender.send(GatewayEvent::ShardConnect { shard_id });
            let _ = self.sender.send(GatewayEvent::ShardReady { shard_id });
        }
        let _ = self.sender.send(GatewayEvent::AllShardsReady);
        Ok(())
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<GatewayEvent> {
        self.receiver
            .lock()
            .expect("subscription lock poisoned")
            .take()
            .expect("subscribe may only be called once")
    }

    fn guild_count(&self) -> u64 {
        0
    }
    fn user_count(&self) -> u64 {
        0
    }
    fn voice_connection_count(&self) -> u64 {
        0
    }
    fn large_guild_count(&self) -> u64 {
        0
    }
    fn exclusive_guild_count(&self) -> u64 {
        0
    }
    fn uptime_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    fn shard_stats(&self) -> Vec<ShardStats> {
        (self.options.first_shard_id..=self.options.last_shard_id)
            .map(|id| ShardStats {
                id,
                latency_ms: 0,
                ready: true,
                status: "ready".to_string(),
            })
            .collect()
    }

    fn user(&self, _id: &str) -> Option<JsonValue> {
        None
    }
    fn guild(&self, _id: &str) -> Option<JsonValue> {
        None
    }
    fn channel(&self, _id: &str) -> Option<JsonValue> {
        None
    }
    fn member(&self, _guild_id: &str, _member_id: &str) -> Option<JsonValue> {
        None
    }
}

struct StubGatewayFactory;

impl GatewayClientFactory for StubGatewayFactory {
    fn create(
        &self,
        _token: &str,
        options: GatewayOptions,
    ) -> Result<Arc<dyn GatewayClient>, GatewayError> {
        let (sender, receiver) = mpsc::unbounded_channel();
        Ok(Arc::new(StubGateway {
            options,
            sender,
            receiver: Mutex::new(Some(receiver)),
            started: Instant::now(),
        }))
    }
}

struct EchoApp {
    ctx: AppContext,
}

#[async_trait]
impl ClusterApp for EchoApp {
    async fn launch(self: Box<Self>) -> anyhow::Result<()> {
        self.ctx.ipc.info(format!(
            "cluster {} application running",
            self.ctx.cluster_id
        ));
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if is_worker_process() {
        // Workers log over the IPC channel, never to their own console
        let registry = AppRegistry::new()
            .register("main", |ctx: AppContext| Box::new(EchoApp { ctx }) as Box<dyn ClusterApp>);
        run_worker(registry, Arc::new(StubGatewayFactory), WorkerOptions::default()).await?;
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut config = ManagerConfig::new("main", std::env::var("DISCORD_TOKEN")?);
    config.shards = ShardCount::Fixed(2);
    config.clusters = 2;
    config.stats = true;
    config.stats_interval_ms = 30_000;

    let mut manager = ShardingManager::from_config(config)?;
    let mut fleet_stats = manager.subscribe_stats();
    tokio::spawn(async move {
        while let Some(stats) = fleet_stats.recv().await {
            tracing::info!(
                "fleet: {} guilds, {} users across {} clusters",
                stats.guilds,
                stats.users,
                stats.clusters.len()
            );
        }
    });

    manager.run().await?;
    Ok(())
}
