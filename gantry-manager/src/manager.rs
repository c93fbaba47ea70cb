//! Master-side orchestrator
//!
//! The manager owns every worker process and all routing between them. It
//! computes the shard partition, forks one worker per cluster, feeds connect
//! instructions through the startup queue, and then settles into a single
//! event loop: relaying logs, advancing the queue, aggregating statistics,
//! fanning out entity lookups, executing proxied API calls and restarting
//! dead workers in place.

use gantry_config::ManagerConfig;
use gantry_http::HttpRestClient;
use gantry_interfaces::{RestClient, RestError, RestFile, RestRequest};
use gantry_ipc::{
    ApiError, ClusterMessage, Embed, FilePayload, HttpMethod, LifecycleKind, LogLevel,
    MasterMessage,
};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::error::ManagerError;
use crate::process::{ClusterProcess, ExeSpawner, WorkerSpawner};
use crate::queue::{QueueItem, StartupQueue};
use crate::sharding::{compute_shard_count, partition_shards, ShardRange};
use crate::stats::{FleetStats, StatsRound};
use crate::webhook::WebhookNotifier;

/// Events feeding the manager's single-threaded routing loop
pub enum ManagerEvent {
    /// A message arrived from a worker
    Worker {
        cluster_id: u32,
        message: ClusterMessage,
    },
    /// A worker process terminated
    Exited { pid: u32, code: Option<i32> },
}

/// Commands accepted by the routing loop from outside the master process
enum ManagerCommand {
    RestartCluster(u32),
}

/// Cloneable handle for steering a running manager. Obtain it with
/// [`ShardingManager::handle`] before calling [`run`].
///
/// [`run`]: ShardingManager::run
#[derive(Clone)]
pub struct ManagerHandle {
    commands: mpsc::UnboundedSender<ManagerCommand>,
}

impl ManagerHandle {
    /// Restart one cluster. The worker terminates with a non-zero status and
    /// is relaunched with its original shard range through the normal crash
    /// path. Unknown cluster ids are ignored.
    pub fn restart_cluster(&self, cluster_id: u32) {
        let _ = self
            .commands
            .send(ManagerCommand::RestartCluster(cluster_id));
    }
}

/// The sharding orchestrator. Construct it in the master process, subscribe
/// to statistics if needed, then hand it the current task with [`run`].
///
/// [`run`]: ShardingManager::run
pub struct ShardingManager {
    config: ManagerConfig,
    rest: Arc<dyn RestClient>,
    spawner: Arc<dyn WorkerSpawner>,
    stats_subscribers: Vec<mpsc::UnboundedSender<FleetStats>>,
    commands_tx: mpsc::UnboundedSender<ManagerCommand>,
    commands_rx: mpsc::UnboundedReceiver<ManagerCommand>,
}

impl ShardingManager {
    /// Build a manager with explicit REST and spawner implementations.
    /// Configuration problems are fatal here, never later.
    pub fn new(
        config: ManagerConfig,
        rest: Arc<dyn RestClient>,
        spawner: Arc<dyn WorkerSpawner>,
    ) -> Result<Self, ManagerError> {
        config.validate()?;
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        Ok(Self {
            config,
            rest,
            spawner,
            stats_subscribers: Vec::new(),
            commands_tx,
            commands_rx,
        })
    }

    /// Build a manager with the default REST client and process spawner
    pub fn from_config(config: ManagerConfig) -> Result<Self, ManagerError> {
        let rest = Arc::new(HttpRestClient::new(config.token.clone())?);
        Self::new(config, rest, Arc::new(ExeSpawner))
    }

    /// Receive every consolidated statistics snapshot. Call before [`run`].
    ///
    /// [`run`]: ShardingManager::run
    pub fn subscribe_stats(&mut self) -> mpsc::UnboundedReceiver<FleetStats> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.stats_subscribers.push(tx);
        rx
    }

    /// Handle for steering the fleet after [`run`] takes ownership
    ///
    /// [`run`]: ShardingManager::run
    pub fn handle(&self) -> ManagerHandle {
        ManagerHandle {
            commands: self.commands_tx.clone(),
        }
    }

    /// Fork the fleet and route messages until the process is torn down
    pub async fn run(self) -> Result<(), ManagerError> {
        let Self {
            config,
            rest,
            spawner,
            stats_subscribers,
            commands_tx,
            mut commands_rx,
        } = self;
        // Keep a live sender so the command branch never resolves to None
        let _commands_tx = commands_tx;

        let shard_count = compute_shard_count(&config, rest.as_ref()).await?;
        let first_shard_id = config.first_shard_id;
        let last_shard_id = config
            .last_shard_id
            .unwrap_or_else(|| shard_count.saturating_sub(1));
        if last_shard_id < first_shard_id {
            return Err(gantry_config::ConfigError::ValidationError(format!(
                "last_shard_id {} is below first_shard_id {}",
                last_shard_id, first_shard_id
            ))
            .into());
        }
        let total_shards = last_shard_id - first_shard_id + 1;

        // Never fork more clusters than there are shards to serve
        let cluster_count = config.clusters.min(total_shards as usize);

        tracing::info!(
            "Starting {} shards in {} clusters",
            total_shards,
            cluster_count
        );
        let notifier = WebhookNotifier::new(rest.clone(), config.webhooks.clone());
        notifier.notify(
            LifecycleKind::Cluster,
            Embed {
                title: Some(format!(
                    "Starting {} shards in {} clusters",
                    total_shards, cluster_count
                )),
                ..Default::default()
            },
        );

        let ranges = partition_shards(first_shard_id, last_shard_id, cluster_count);

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let (queue, mut dispatched) =
            StartupQueue::new(Duration::from_secs(config.cluster_timeout_secs));

        let mut state = RunState {
            config,
            rest,
            spawner,
            notifier,
            queue,
            events_tx,
            processes: HashMap::new(),
            pids: HashMap::new(),
            fetch_origins: HashMap::new(),
            stats_round: StatsRound::new(),
            stats_subscribers,
            shard_count,
            cluster_count: ranges.len() as u32,
        };

        for (cluster_id, range) in ranges.into_iter().enumerate() {
            let cluster_id = cluster_id as u32;
            tracing::info!("Launching cluster {}", cluster_id);
            state.launch(cluster_id, range).await?;
            state.queue.enqueue(QueueItem {
                cluster_id,
                message: state.connect_message(cluster_id, range),
            });
        }

        let mut stats_tick = if state.config.stats {
            let period = Duration::from_millis(state.config.stats_interval_ms);
            Some(tokio::time::interval_at(
                tokio::time::Instant::now() + period,
                period,
            ))
        } else {
            None
        };

        loop {
            tokio::select! {
                Some(event) = events_rx.recv() => state.handle_event(event).await,
                Some(command) = commands_rx.recv() => state.handle_command(command),
                Some(item) = dispatched.recv() => {
                    if let Some(process) = state.processes.get(&item.cluster_id) {
                        process.send(item.message);
                    }
                }
                _ = tick(&mut stats_tick) => state.trigger_stats_round(),
            }
        }
    }
}

async fn tick(interval: &mut Option<tokio::time::Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Mutable state owned by the routing loop
struct RunState {
    config: ManagerConfig,
    rest: Arc<dyn RestClient>,
    spawner: Arc<dyn WorkerSpawner>,
    notifier: WebhookNotifier,
    queue: StartupQueue,
    events_tx: mpsc::UnboundedSender<ManagerEvent>,
    processes: HashMap<u32, ClusterProcess>,
    /// Live process ids, for attributing exit events to clusters
    pids: HashMap<u32, u32>,
    /// Correlation key of each in-flight entity lookup, mapped to the
    /// cluster that initiated it
    fetch_origins: HashMap<String, u32>,
    stats_round: StatsRound,
    stats_subscribers: Vec<mpsc::UnboundedSender<FleetStats>>,
    shard_count: u32,
    cluster_count: u32,
}

impl RunState {
    async fn launch(&mut self, cluster_id: u32, range: ShardRange) -> Result<(), ManagerError> {
        let spawned = self.spawner.spawn(cluster_id).await?;
        let process = ClusterProcess::start(cluster_id, range, spawned, self.events_tx.clone());
        self.pids.insert(process.pid, cluster_id);
        self.processes.insert(cluster_id, process);
        Ok(())
    }

    fn connect_message(&self, cluster_id: u32, range: ShardRange) -> MasterMessage {
        MasterMessage::Connect {
            first_shard_id: range.first_shard_id,
            last_shard_id: range.last_shard_id,
            cluster_count: self.cluster_count,
            max_shards: self.shard_count,
            token: self.config.token.clone(),
            file: self.config.main_file.clone(),
            id: cluster_id,
            client_options: self.config.client_options.clone(),
        }
    }

    fn handle_command(&mut self, command: ManagerCommand) {
        match command {
            ManagerCommand::RestartCluster(cluster_id) => {
                if let Some(process) = self.processes.get(&cluster_id) {
                    tracing::info!("Restart requested for cluster {}", cluster_id);
                    process.send(MasterMessage::Restart);
                }
            }
        }
    }

    async fn handle_event(&mut self, event: ManagerEvent) {
        match event {
            ManagerEvent::Worker {
                cluster_id,
                message,
            } => self.handle_worker_message(cluster_id, message),
            ManagerEvent::Exited { pid, code } => self.handle_worker_exit(pid, code).await,
        }
    }

    fn handle_worker_message(&mut self, cluster_id: u32, message: ClusterMessage) {
        match message {
            ClusterMessage::Log { level, msg } => self.relay_log(cluster_id, level, &msg),

            ClusterMessage::Lifecycle { kind, embed } => self.notifier.notify(kind, embed),

            ClusterMessage::ShardsStarted => self.queue.advance(),

            ClusterMessage::Stats { stats } => {
                if let Some(fleet) = self.stats_round.record(cluster_id, stats) {
                    self.stats_subscribers
                        .retain(|subscriber| subscriber.send(fleet.clone()).is_ok());
                }
            }

            ClusterMessage::Fetch { kind, value } => {
                self.fetch_origins
                    .insert(value.correlation_key().to_string(), cluster_id);
                let message = MasterMessage::Fetch { kind, value };
                for process in self.processes.values() {
                    process.send(message.clone());
                }
            }

            ClusterMessage::FetchReturn { id, value } => {
                // First answer wins; the entry is gone for any duplicate
                if let Some(origin) = self.fetch_origins.remove(&id) {
                    if let Some(process) = self.processes.get(&origin) {
                        process.send(MasterMessage::FetchReturn { id, value });
                    }
                }
            }

            ClusterMessage::Broadcast { msg } => {
                for process in self.processes.values() {
                    process.send(MasterMessage::Payload { msg: msg.clone() });
                }
            }

            ClusterMessage::Send { cluster, msg } => {
                if let Some(process) = self.processes.get(&cluster) {
                    process.send(MasterMessage::Payload { msg });
                }
            }

            ClusterMessage::ApiRequest {
                method,
                url,
                auth,
                body,
                file,
                route,
                short,
                request_id,
            } => {
                let Some(process) = self.processes.get(&cluster_id) else {
                    return;
                };
                let reply = process.sender();
                let rest = self.rest.clone();
                tokio::spawn(async move {
                    let response = match execute_api_request(
                        rest.as_ref(),
                        method,
                        url,
                        auth,
                        body,
                        file,
                        route,
                        short,
                    )
                    .await
                    {
                        Ok(data) => MasterMessage::ApiResponse {
                            request_id,
                            data: Some(data),
                            err: None,
                        },
                        Err(err) => MasterMessage::ApiResponse {
                            request_id,
                            data: None,
                            err: Some(err),
                        },
                    };
                    let _ = reply.send(response);
                });
            }
        }
    }

    async fn handle_worker_exit(&mut self, pid: u32, code: Option<i32>) {
        // Exit events from already-replaced processes carry a stale pid
        let Some(cluster_id) = self.pids.remove(&pid) else {
            return;
        };
        let Some(process) = self.processes.get(&cluster_id) else {
            return;
        };
        let range = process.range;

        let code_text = code.map_or_else(|| "unknown".to_string(), |c| c.to_string());
        tracing::warn!(
            "Cluster {} died with code {}. Restarting...",
            cluster_id,
            code_text
        );
        self.notifier.notify(
            LifecycleKind::Cluster,
            Embed {
                title: Some(format!(
                    "Cluster {} died with code {}. Restarting...",
                    cluster_id, code_text
                )),
                description: Some(format!(
                    "Shards {} - {}",
                    range.first_shard_id, range.last_shard_id
                )),
                ..Default::default()
            },
        );

        tracing::debug!("Restarting cluster {}", cluster_id);
        match self.launch(cluster_id, range).await {
            Ok(()) => self.queue.enqueue(QueueItem {
                cluster_id,
                message: self.connect_message(cluster_id, range),
            }),
            Err(e) => tracing::error!("Failed to respawn cluster {}: {}", cluster_id, e),
        }
    }

    fn trigger_stats_round(&mut self) {
        let missing = self.stats_round.missing();
        if !self.stats_round.begin(self.processes.len()) {
            tracing::warn!(
                "Statistics round incomplete, {} clusters missing; discarding",
                missing
            );
        }
        for process in self.processes.values() {
            process.send(MasterMessage::StatsRequest);
        }
    }

    fn relay_log(&self, cluster_id: u32, level: LogLevel, msg: &str) {
        if level == LogLevel::Debug && !self.config.debug {
            return;
        }
        if self.config.no_console_override {
            match level {
                LogLevel::Error => eprintln!("{}", msg),
                _ => println!("{}", msg),
            }
            return;
        }
        match level {
            LogLevel::Log | LogLevel::Info => {
                tracing::info!(cluster = cluster_id, "{}", msg)
            }
            LogLevel::Debug => tracing::debug!(cluster = cluster_id, "{}", msg),
            LogLevel::Warn => tracing::warn!(cluster = cluster_id, "{}", msg),
            LogLevel::Error => tracing::error!(cluster = cluster_id, "{}", msg),
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn execute_api_request(
    rest: &dyn RestClient,
    method: HttpMethod,
    url: String,
    auth: bool,
    body: Option<JsonValue>,
    file: Option<FilePayload>,
    route: Option<String>,
    short: bool,
) -> Result<JsonValue, ApiError> {
    let file = match file {
        Some(payload) => match payload.decode() {
            Ok(bytes) => Some(RestFile {
                name: payload.name,
                bytes,
            }),
            Err(e) => {
                return Err(ApiError {
                    code: None,
                    message: format!("Invalid file attachment: {}", e),
                    stack: None,
                })
            }
        },
        None => None,
    };

    match rest
        .request(RestRequest {
            method,
            url,
            auth,
            body,
            file,
            route,
            short,
        })
        .await
    {
        Ok(data) => Ok(data),
        Err(RestError::Api {
            code,
            message,
            stack,
        }) => Err(ApiError {
            code,
            message,
            stack,
        }),
        Err(e) => Err(ApiError {
            code: None,
            message: e.to_string(),
            stack: None,
        }),
    }
}
