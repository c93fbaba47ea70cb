//! Master-side orchestration for Gantry
//!
//! The manager forks one worker process per cluster, assigns each a
//! contiguous shard range, paces their gateway startups through a FIFO
//! queue, and routes every message between workers: logs, lifecycle
//! webhooks, statistics rounds, entity lookups, user payloads and proxied
//! API calls. A worker that dies is restarted in place with its original
//! shard range.

pub mod error;
pub mod manager;
pub mod process;
pub mod queue;
pub mod sharding;
pub mod stats;
pub mod webhook;

pub use error::ManagerError;
pub use manager::{ManagerEvent, ManagerHandle, ShardingManager};
pub use process::{is_worker_process, ExeSpawner, SpawnedWorker, WorkerSpawner, WORKER_ENV};
pub use queue::{QueueItem, StartupQueue};
pub use sharding::{compute_shard_count, partition_shards, ShardRange};
pub use stats::{ClusterSnapshot, FleetStats, StatsRound};
pub use webhook::WebhookNotifier;
