//! End-to-end orchestration tests driving the manager against in-memory
//! worker transports.

use async_trait::async_trait;
use gantry_config::{ManagerConfig, ShardCount};
use gantry_interfaces::{RestClient, RestError, RestRequest};
use gantry_ipc::{
    ClusterMessage, ClusterStats, Embed, FetchKind, FetchValue, HttpMethod, IpcReceiver,
    IpcSender, MasterMessage,
};
use gantry_manager::{ManagerError, ShardingManager, SpawnedWorker, WorkerSpawner};
use serde_json::{json, Value as JsonValue};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, oneshot};

static NEXT_PID: AtomicU32 = AtomicU32::new(100);

/// The far end of one spawned worker's stdio, driven by the test
struct TestWorker {
    cluster_id: u32,
    from_master: IpcReceiver<ReadHalf<DuplexStream>>,
    to_master: IpcSender<WriteHalf<DuplexStream>>,
    exit: Option<oneshot::Sender<Option<i32>>>,
}

impl TestWorker {
    async fn recv(&mut self) -> MasterMessage {
        self.from_master
            .recv()
            .await
            .unwrap()
            .expect("manager closed the channel")
    }

    async fn send(&mut self, message: ClusterMessage) {
        self.to_master.send(&message).await.unwrap();
    }

    fn die(&mut self, code: i32) {
        self.exit
            .take()
            .expect("already dead")
            .send(Some(code))
            .unwrap();
    }
}

struct MockSpawner {
    workers: Mutex<mpsc::UnboundedSender<TestWorker>>,
}

impl MockSpawner {
    fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<TestWorker>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                workers: Mutex::new(tx),
            }),
            rx,
        )
    }
}

#[async_trait]
impl WorkerSpawner for MockSpawner {
    async fn spawn(&self, cluster_id: u32) -> Result<SpawnedWorker, ManagerError> {
        let (manager_side, worker_side) = tokio::io::duplex(64 * 1024);
        let (manager_read, manager_write) = tokio::io::split(manager_side);
        let (worker_read, worker_write) = tokio::io::split(worker_side);

        let pid = NEXT_PID.fetch_add(1, Ordering::SeqCst);
        let (exit_tx, exit_rx) = oneshot::channel();

        self.workers
            .lock()
            .unwrap()
            .send(TestWorker {
                cluster_id,
                from_master: IpcReceiver::new(worker_read),
                to_master: IpcSender::new(worker_write),
                exit: Some(exit_tx),
            })
            .expect("test dropped the worker receiver");

        Ok(SpawnedWorker {
            pid,
            writer: Box::new(manager_write),
            reader: Box::new(manager_read),
            exit: exit_rx,
        })
    }
}

struct MockRest;

#[async_trait]
impl RestClient for MockRest {
    async fn recommended_shards(&self) -> Result<u32, RestError> {
        Ok(1)
    }

    async fn request(&self, request: RestRequest) -> Result<JsonValue, RestError> {
        if request.url.contains("forbidden") {
            return Err(RestError::Api {
                code: Some(50013),
                message: "Missing Permissions".to_string(),
                stack: Some("DiscordRESTError: Missing Permissions".to_string()),
            });
        }
        Ok(json!({"echo": request.url, "method": request.method.as_str()}))
    }

    async fn execute_webhook(
        &self,
        _id: &str,
        _token: &str,
        _embeds: Vec<Embed>,
    ) -> Result<(), RestError> {
        Ok(())
    }
}

fn test_config(shards: u32, clusters: usize) -> ManagerConfig {
    let mut config = ManagerConfig::new("main", "bot-token");
    config.shards = ShardCount::Fixed(shards);
    config.clusters = clusters;
    config.cluster_timeout_secs = 0;
    config
}

/// Spin up a manager over mock workers; returns the workers in launch order
async fn start_fleet(
    config: ManagerConfig,
    expected: usize,
) -> (Vec<TestWorker>, mpsc::UnboundedReceiver<TestWorker>) {
    let (spawner, mut spawned) = MockSpawner::new();
    let manager = ShardingManager::new(config, Arc::new(MockRest), spawner).unwrap();
    tokio::spawn(manager.run());

    let mut workers = Vec::new();
    for _ in 0..expected {
        workers.push(spawned.recv().await.unwrap());
    }
    (workers, spawned)
}

fn connect_range(message: &MasterMessage) -> (u32, u32, u32, u32) {
    match message {
        MasterMessage::Connect {
            first_shard_id,
            last_shard_id,
            max_shards,
            id,
            ..
        } => (*first_shard_id, *last_shard_id, *max_shards, *id),
        other => panic!("expected connect, got {:?}", other),
    }
}

#[tokio::test]
async fn test_startup_is_sequential_and_partition_is_contiguous() {
    let (mut workers, _spawned) = start_fleet(test_config(3, 2), 2).await;
    assert_eq!(workers[0].cluster_id, 0);
    assert_eq!(workers[1].cluster_id, 1);

    // Cluster 0 gets the front-loaded chunk immediately
    let (first, last, max_shards, id) = connect_range(&workers[0].recv().await);
    assert_eq!((first, last, max_shards, id), (0, 1, 3, 0));

    // Cluster 1 must wait for cluster 0 to finish starting
    let pending = tokio::time::timeout(Duration::from_millis(100), workers[1].recv()).await;
    assert!(pending.is_err(), "second connect dispatched too early");

    workers[0].send(ClusterMessage::ShardsStarted).await;

    let (first, last, _, id) = connect_range(&workers[1].recv().await);
    assert_eq!((first, last, id), (2, 2, 1));
}

#[tokio::test]
async fn test_cluster_count_clamped_to_shard_count() {
    // 2 shards, 4 requested clusters: only 2 workers are forked
    let (mut workers, mut spawned) = start_fleet(test_config(2, 4), 2).await;

    connect_range(&workers[0].recv().await);
    workers[0].send(ClusterMessage::ShardsStarted).await;
    let (first, last, _, _) = connect_range(&workers[1].recv().await);
    assert_eq!((first, last), (1, 1));

    let extra = tokio::time::timeout(Duration::from_millis(100), spawned.recv()).await;
    assert!(extra.is_err(), "forked more clusters than shards");
}

#[tokio::test]
async fn test_dead_cluster_restarts_with_original_range() {
    let (mut workers, mut spawned) = start_fleet(test_config(3, 2), 2).await;

    connect_range(&workers[0].recv().await);
    workers[0].send(ClusterMessage::ShardsStarted).await;
    connect_range(&workers[1].recv().await);
    workers[1].send(ClusterMessage::ShardsStarted).await;

    workers[0].die(137);

    // A replacement is forked for the same cluster and re-queued with the
    // exact same shard range
    let mut replacement = spawned.recv().await.unwrap();
    assert_eq!(replacement.cluster_id, 0);

    let (first, last, max_shards, id) = connect_range(&replacement.recv().await);
    assert_eq!((first, last, max_shards, id), (0, 1, 3, 0));
}

#[tokio::test]
async fn test_handle_restart_reaches_the_right_worker() {
    let (spawner, mut spawned) = MockSpawner::new();
    let manager = ShardingManager::new(test_config(3, 2), Arc::new(MockRest), spawner).unwrap();
    let handle = manager.handle();
    tokio::spawn(manager.run());

    let mut workers = Vec::new();
    for _ in 0..2 {
        workers.push(spawned.recv().await.unwrap());
    }
    connect_range(&workers[0].recv().await);
    workers[0].send(ClusterMessage::ShardsStarted).await;
    connect_range(&workers[1].recv().await);
    workers[1].send(ClusterMessage::ShardsStarted).await;

    handle.restart_cluster(1);
    match workers[1].recv().await {
        MasterMessage::Restart => {}
        other => panic!("expected restart, got {:?}", other),
    }

    // Cluster 0 is untouched
    let quiet = tokio::time::timeout(Duration::from_millis(100), workers[0].recv()).await;
    assert!(quiet.is_err(), "restart leaked to another cluster");

    // The worker honors the command by exiting; the crash path relaunches it
    workers[1].die(1);
    let mut replacement = spawned.recv().await.unwrap();
    assert_eq!(replacement.cluster_id, 1);
    let (first, last, _, id) = connect_range(&replacement.recv().await);
    assert_eq!((first, last, id), (2, 2, 1));
}

#[tokio::test]
async fn test_fetch_fans_out_and_answer_routes_back() {
    let (mut workers, _spawned) = start_fleet(test_config(2, 2), 2).await;

    connect_range(&workers[0].recv().await);
    workers[0].send(ClusterMessage::ShardsStarted).await;
    connect_range(&workers[1].recv().await);
    workers[1].send(ClusterMessage::ShardsStarted).await;

    workers[0]
        .send(ClusterMessage::Fetch {
            kind: FetchKind::User,
            value: FetchValue::Id("7".to_string()),
        })
        .await;

    // Every cluster sees the lookup, the origin included
    for worker in workers.iter_mut() {
        match worker.recv().await {
            MasterMessage::Fetch {
                kind: FetchKind::User,
                value,
            } => assert_eq!(value.correlation_key(), "7"),
            other => panic!("expected fetch, got {:?}", other),
        }
    }

    // Only cluster 1 has the entity; its answer lands back at cluster 0
    workers[1]
        .send(ClusterMessage::FetchReturn {
            id: "7".to_string(),
            value: json!({"id": "7", "username": "someone"}),
        })
        .await;

    match workers[0].recv().await {
        MasterMessage::FetchReturn { id, value } => {
            assert_eq!(id, "7");
            assert_eq!(value["username"], "someone");
        }
        other => panic!("expected fetch return, got {:?}", other),
    }
}

#[tokio::test]
async fn test_broadcast_and_targeted_send() {
    let (mut workers, _spawned) = start_fleet(test_config(2, 2), 2).await;

    connect_range(&workers[0].recv().await);
    workers[0].send(ClusterMessage::ShardsStarted).await;
    connect_range(&workers[1].recv().await);

    workers[0]
        .send(ClusterMessage::Broadcast {
            msg: json!({"_eventName": "refresh"}),
        })
        .await;
    for worker in workers.iter_mut() {
        match worker.recv().await {
            MasterMessage::Payload { msg } => assert_eq!(msg["_eventName"], "refresh"),
            other => panic!("expected payload, got {:?}", other),
        }
    }

    workers[0]
        .send(ClusterMessage::Send {
            cluster: 1,
            msg: json!({"_eventName": "ping"}),
        })
        .await;
    match workers[1].recv().await {
        MasterMessage::Payload { msg } => assert_eq!(msg["_eventName"], "ping"),
        other => panic!("expected payload, got {:?}", other),
    }
}

#[tokio::test]
async fn test_api_request_proxied_through_shared_client() {
    let (mut workers, _spawned) = start_fleet(test_config(1, 1), 1).await;
    connect_range(&workers[0].recv().await);

    workers[0]
        .send(ClusterMessage::ApiRequest {
            method: HttpMethod::Get,
            url: "/guilds/9".to_string(),
            auth: true,
            body: None,
            file: None,
            route: None,
            short: false,
            request_id: "req-1".to_string(),
        })
        .await;

    match workers[0].recv().await {
        MasterMessage::ApiResponse {
            request_id,
            data,
            err,
        } => {
            assert_eq!(request_id, "req-1");
            assert!(err.is_none());
            assert_eq!(data.unwrap()["echo"], "/guilds/9");
        }
        other => panic!("expected api response, got {:?}", other),
    }

    // Remote failures come back as structured errors, not dropped replies
    workers[0]
        .send(ClusterMessage::ApiRequest {
            method: HttpMethod::Post,
            url: "/forbidden".to_string(),
            auth: true,
            body: None,
            file: None,
            route: None,
            short: false,
            request_id: "req-2".to_string(),
        })
        .await;

    match workers[0].recv().await {
        MasterMessage::ApiResponse {
            request_id,
            data,
            err,
        } => {
            assert_eq!(request_id, "req-2");
            assert!(data.is_none());
            let err = err.unwrap();
            assert_eq!(err.code, Some(50013));
            assert_eq!(err.message, "Missing Permissions");
        }
        other => panic!("expected api response, got {:?}", other),
    }
}

#[tokio::test]
async fn test_stats_round_consolidates_all_clusters() {
    let mut config = test_config(2, 2);
    config.stats = true;
    config.stats_interval_ms = 50;

    let (spawner, mut spawned) = MockSpawner::new();
    let mut manager = ShardingManager::new(config, Arc::new(MockRest), spawner).unwrap();
    let mut fleet_stats = manager.subscribe_stats();
    tokio::spawn(manager.run());

    let mut workers = Vec::new();
    for _ in 0..2 {
        workers.push(spawned.recv().await.unwrap());
    }

    connect_range(&workers[0].recv().await);
    workers[0].send(ClusterMessage::ShardsStarted).await;
    connect_range(&workers[1].recv().await);
    workers[1].send(ClusterMessage::ShardsStarted).await;

    // Each worker answers the periodic stats trigger
    for (i, worker) in workers.iter_mut().enumerate() {
        loop {
            if let MasterMessage::StatsRequest = worker.recv().await {
                break;
            }
        }
        worker
            .send(ClusterMessage::Stats {
                stats: ClusterStats {
                    guilds: 10 + i as u64,
                    users: 100,
                    voice: 1,
                    exclusive_guilds: 2,
                    large_guilds: 0,
                    shards: 1,
                    ram_bytes: 1_000_000,
                    uptime_ms: 60_000,
                    shards_stats: Vec::new(),
                },
            })
            .await;
    }

    let fleet = fleet_stats.recv().await.unwrap();
    assert_eq!(fleet.guilds, 21);
    assert_eq!(fleet.users, 200);
    assert_eq!(fleet.total_ram_mb, 2.0);
    assert_eq!(fleet.clusters.len(), 2);
    assert_eq!(fleet.clusters[0].cluster, 0);
    assert_eq!(fleet.clusters[1].cluster, 1);
}
