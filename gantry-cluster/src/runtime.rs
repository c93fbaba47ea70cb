//! Cluster worker runtime
//!
//! State machine per worker process: `Idle` (forked, awaiting instruction) →
//! `Configuring` → `Connecting` → `ShardsReady` → `Running` → `Terminated`.
//! Individual shard disconnects and resumes are reported as notifications and
//! never change the worker's own top-level state.

use gantry_interfaces::{GatewayClientFactory, GatewayEvent, GatewayOptions};
use gantry_ipc::{
    ClusterMessage, ClusterStats, CorrelationMap, Embed, FetchKind, FetchValue, IpcReceiver,
    IpcSender, LifecycleKind, MasterMessage,
};
use serde_json::Value as JsonValue;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

use crate::app::{AppContext, AppRegistry};
use crate::error::WorkerError;
use crate::handle::{IpcHandle, EVENT_NAME_KEY};
use crate::request::RequestHandler;

/// Reserved gateway option keys the worker always sets itself
const RESERVED_OPTION_KEYS: [&str; 4] = [
    "autoreconnect",
    "first_shard_id",
    "last_shard_id",
    "max_shards",
];

/// Exit status used for the restart command, observed by the master as a
/// crash and handled via the normal restart path
const RESTART_EXIT_CODE: i32 = 1;

/// Worker runtime tuning
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Deadline for proxied outbound API requests (grace period excluded)
    pub request_timeout: Duration,
    /// Deadline for fanned-out entity lookups
    pub fetch_timeout: Duration,
    /// Local statistics sampling interval
    pub sample_interval: Duration,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(15),
            fetch_timeout: Duration::from_secs(10),
            sample_interval: Duration::from_secs(5),
        }
    }
}

/// Top-level worker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Configuring,
    Connecting,
    ShardsReady,
    Running,
    Terminated,
}

/// One cluster worker: owns a contiguous shard range and the gateway client
/// serving it
pub struct ClusterWorker {
    registry: Arc<AppRegistry>,
    gateway_factory: Arc<dyn GatewayClientFactory>,
    options: WorkerOptions,
    ipc: IpcHandle,

    state: WorkerState,
    cluster_id: u32,
    first_shard_id: u32,
    last_shard_id: u32,
    shard_count: u32,
    main_file: String,
    gateway: Option<Arc<dyn gantry_interfaces::GatewayClient>>,
    latest_stats: Arc<Mutex<ClusterStats>>,
    app_launched: bool,
}

impl ClusterWorker {
    /// Drive the worker over the given duplex channel until the master closes
    /// it or a restart command arrives. Returns the exit code the process
    /// should terminate with, if any.
    pub async fn run<R, W>(
        registry: Arc<AppRegistry>,
        gateway_factory: Arc<dyn GatewayClientFactory>,
        options: WorkerOptions,
        reader: R,
        writer: W,
    ) -> Result<Option<i32>, WorkerError>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ClusterMessage>();
        tokio::spawn(async move {
            let mut sender = IpcSender::new(writer);
            while let Some(message) = outbound_rx.recv().await {
                if sender.send(&message).await.is_err() {
                    break;
                }
            }
        });

        let ipc = IpcHandle::new(
            outbound_tx,
            Arc::new(CorrelationMap::new()),
            options.fetch_timeout,
        );

        let mut worker = Self {
            registry,
            gateway_factory,
            options,
            ipc,
            state: WorkerState::Idle,
            cluster_id: 0,
            first_shard_id: 0,
            last_shard_id: 0,
            shard_count: 0,
            main_file: String::new(),
            gateway: None,
            latest_stats: Arc::new(Mutex::new(ClusterStats::default())),
            app_launched: false,
        };

        let mut receiver = IpcReceiver::new(reader);
        let mut gateway_events: Option<mpsc::UnboundedReceiver<GatewayEvent>> = None;
        let mut sampler = tokio::time::interval(worker.options.sample_interval);
        sampler.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                incoming = receiver.recv::<MasterMessage>() => {
                    match incoming {
                        Ok(Some(message)) => {
                            if let Some(code) =
                                worker.handle_master_message(message, &mut gateway_events)?
                            {
                                return Ok(Some(code));
                            }
                        }
                        Ok(None) => return Ok(None),
                        Err(e) if e.is_fatal() => return Err(e.into()),
                        Err(e) => worker.ipc.warn(format!("Dropping malformed message: {}", e)),
                    }
                }
                event = Self::next_gateway_event(&mut gateway_events) => {
                    match event {
                        Some(event) => worker.handle_gateway_event(event),
                        None => gateway_events = None,
                    }
                }
                _ = sampler.tick() => worker.sample_stats(),
            }
        }
    }

    async fn next_gateway_event(
        events: &mut Option<mpsc::UnboundedReceiver<GatewayEvent>>,
    ) -> Option<GatewayEvent> {
        match events {
            Some(rx) => rx.recv().await,
            None => std::future::pending().await,
        }
    }

    fn handle_master_message(
        &mut self,
        message: MasterMessage,
        gateway_events: &mut Option<mpsc::UnboundedReceiver<GatewayEvent>>,
    ) -> Result<Option<i32>, WorkerError> {
        match message {
            MasterMessage::Connect {
                first_shard_id,
                last_shard_id,
                max_shards,
                token,
                file,
                id,
                client_options,
                ..
            } => {
                self.connect(
                    first_shard_id,
                    last_shard_id,
                    max_shards,
                    token,
                    file,
                    id,
                    client_options,
                    gateway_events,
                );
                Ok(None)
            }

            MasterMessage::StatsRequest => {
                let mut stats = self
                    .latest_stats
                    .lock()
                    .expect("stats lock poisoned")
                    .clone();
                stats.shards = self.shard_count;
                stats.ram_bytes = current_rss();
                self.ipc.send(ClusterMessage::Stats { stats })?;
                Ok(None)
            }

            MasterMessage::Fetch { kind, value } => {
                self.answer_fetch(kind, value)?;
                Ok(None)
            }

            MasterMessage::FetchReturn { id, value } => {
                self.ipc.correlations().complete(&id, value);
                Ok(None)
            }

            MasterMessage::ApiResponse {
                request_id,
                data,
                err,
            } => {
                let response = serde_json::json!({ "data": data, "err": err });
                self.ipc.correlations().complete(&request_id, response);
                Ok(None)
            }

            MasterMessage::Payload { msg } => {
                if msg.get(EVENT_NAME_KEY).and_then(JsonValue::as_str) == Some("restart") {
                    self.state = WorkerState::Terminated;
                    return Ok(Some(RESTART_EXIT_CODE));
                }
                self.ipc.dispatch(msg);
                Ok(None)
            }

            MasterMessage::Restart => {
                self.state = WorkerState::Terminated;
                Ok(Some(RESTART_EXIT_CODE))
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn connect(
        &mut self,
        first_shard_id: u32,
        last_shard_id: u32,
        max_shards: u32,
        token: String,
        file: String,
        id: u32,
        client_options: JsonValue,
        gateway_events: &mut Option<mpsc::UnboundedReceiver<GatewayEvent>>,
    ) {
        if self.state != WorkerState::Idle {
            self.ipc
                .warn(format!("Cluster {} already configured, ignoring connect", self.cluster_id));
            return;
        }
        if last_shard_id < first_shard_id {
            // Empty range, nothing to serve
            return;
        }

        self.cluster_id = id;
        self.first_shard_id = first_shard_id;
        self.last_shard_id = last_shard_id;
        self.shard_count = last_shard_id - first_shard_id + 1;
        self.main_file = file;
        self.state = WorkerState::Configuring;

        // Caller options pass through, reserved keys always win
        let mut extra = client_options;
        if let Some(obj) = extra.as_object_mut() {
            for key in RESERVED_OPTION_KEYS {
                obj.remove(key);
            }
        }

        let gateway = match self.gateway_factory.create(
            &token,
            GatewayOptions {
                autoreconnect: true,
                first_shard_id,
                last_shard_id,
                max_shards,
                extra,
            },
        ) {
            Ok(gateway) => gateway,
            Err(e) => {
                self.ipc.error(format!("Failed to build gateway client: {}", e));
                self.state = WorkerState::Idle;
                return;
            }
        };

        *gateway_events = Some(gateway.subscribe());
        self.ipc
            .log(format!("Connecting with {} shard(s)", self.shard_count));
        self.state = WorkerState::Connecting;

        // Establishing shards can take a long time; the event loop keeps
        // serving master messages while the connection comes up
        let ipc = self.ipc.clone();
        let connecting = gateway.clone();
        tokio::spawn(async move {
            if let Err(e) = connecting.connect().await {
                ipc.error(format!("Gateway connection failed: {}", e));
            }
        });

        self.gateway = Some(gateway);
    }

    /// Answer a fanned-out entity lookup from the local cache. A miss sends
    /// nothing; eventual resolution relies on some other cluster owning the
    /// entity.
    fn answer_fetch(&self, kind: FetchKind, value: FetchValue) -> Result<(), WorkerError> {
        let Some(gateway) = &self.gateway else {
            return Ok(());
        };

        let key = value.correlation_key().to_string();
        let found = match (kind, &value) {
            (FetchKind::User, FetchValue::Id(id)) => gateway.user(id),
            (FetchKind::Guild, FetchValue::Id(id)) => gateway.guild(id),
            (FetchKind::Channel, FetchValue::Id(id)) => gateway.channel(id),
            (FetchKind::Member, FetchValue::GuildMember(guild_id, member_id)) => {
                gateway.member(guild_id, member_id)
            }
            _ => None,
        };

        if let Some(entity) = found {
            self.ipc
                .send(ClusterMessage::FetchReturn { id: key, value: entity })?;
        }
        Ok(())
    }

    fn handle_gateway_event(&mut self, event: GatewayEvent) {
        match event {
            GatewayEvent::ShardConnect { shard_id } => {
                self.ipc
                    .log(format!("Shard {} established connection!", shard_id));
            }
            GatewayEvent::ShardReady { shard_id } => {
                self.ipc.log(format!("Shard {} is ready!", shard_id));
                self.shard_embed(format!("Shard {} is ready!", shard_id));
            }
            GatewayEvent::ShardDisconnect { shard_id, .. } => {
                self.ipc.log(format!("Shard {} disconnected!", shard_id));
                self.shard_embed(format!("Shard {} disconnected!", shard_id));
            }
            GatewayEvent::ShardResume { shard_id } => {
                self.ipc.log(format!("Shard {} has resumed!", shard_id));
                self.shard_embed(format!("Shard {} resumed!", shard_id));
            }
            GatewayEvent::ShardWarn { shard_id, message } => {
                self.ipc.warn(format!("Shard {} | {}", shard_id, message));
            }
            GatewayEvent::ShardError { shard_id, message } => {
                self.ipc.error(format!("Shard {} | {}", shard_id, message));
            }
            GatewayEvent::AllShardsReady => self.on_all_shards_ready(),
        }
    }

    fn shard_embed(&self, description: String) {
        self.ipc.lifecycle(
            LifecycleKind::Shard,
            Embed {
                title: Some("Shard Status Update".to_string()),
                description: Some(description),
                ..Default::default()
            },
        );
    }

    fn on_all_shards_ready(&mut self) {
        self.ipc.log(format!(
            "Shards {} - {} are ready!",
            self.first_shard_id, self.last_shard_id
        ));
        self.ipc.lifecycle(
            LifecycleKind::Cluster,
            Embed {
                title: Some(format!("Cluster {} is ready!", self.cluster_id)),
                description: Some(format!(
                    "Shards {} - {}",
                    self.first_shard_id, self.last_shard_id
                )),
                ..Default::default()
            },
        );
        let _ = self.ipc.send(ClusterMessage::ShardsStarted);

        if self.state == WorkerState::Connecting {
            self.state = WorkerState::ShardsReady;
        }
        if !self.app_launched {
            self.launch_app();
        }
    }

    /// Launch the registered application exactly once. Contract violations
    /// leave the gateway connection up without any application logic.
    fn launch_app(&mut self) {
        let Some(gateway) = self.gateway.clone() else {
            return;
        };

        let Some(factory) = self.registry.get(&self.main_file) else {
            self.ipc.error(format!(
                "Your code has not been loaded! No application factory registered for '{}'",
                self.main_file
            ));
            return;
        };

        let app = factory.create(AppContext {
            gateway,
            cluster_id: self.cluster_id,
            ipc: self.ipc.clone(),
            requests: RequestHandler::new(self.ipc.clone(), self.options.request_timeout),
        });

        let ipc = self.ipc.clone();
        let launched = tokio::spawn(async move { app.launch().await });
        tokio::spawn(async move {
            match launched.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => ipc.error(format!("Application error: {:#}", e)),
                Err(e) => ipc.error(format!("Application panicked: {}", e)),
            }
        });

        self.app_launched = true;
        self.state = WorkerState::Running;
    }

    fn sample_stats(&self) {
        let Some(gateway) = &self.gateway else {
            return;
        };
        let mut latest = self.latest_stats.lock().expect("stats lock poisoned");
        latest.guilds = gateway.guild_count();
        latest.users = gateway.user_count();
        latest.voice = gateway.voice_connection_count();
        latest.large_guilds = gateway.large_guild_count();
        latest.exclusive_guilds = gateway.exclusive_guild_count();
        latest.uptime_ms = gateway.uptime_ms();
        latest.shards = self.shard_count;
        latest.shards_stats = gateway.shard_stats();
    }
}

/// Resident set size of this worker process, in bytes
fn current_rss() -> u64 {
    use sysinfo::{ProcessesToUpdate, System};
    let Ok(pid) = sysinfo::get_current_pid() else {
        return 0;
    };
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    system.process(pid).map(|p| p.memory()).unwrap_or(0)
}

/// Worker-process entry point: drives the runtime over stdio and terminates
/// the process when a restart command arrives.
pub async fn run_worker(
    registry: AppRegistry,
    gateway_factory: Arc<dyn GatewayClientFactory>,
    options: WorkerOptions,
) -> Result<(), WorkerError> {
    let exit = ClusterWorker::run(
        Arc::new(registry),
        gateway_factory,
        options,
        tokio::io::stdin(),
        tokio::io::stdout(),
    )
    .await?;

    if let Some(code) = exit {
        std::process::exit(code);
    }
    Ok(())
}
