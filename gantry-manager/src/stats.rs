//! Fleet statistics aggregation
//!
//! Every interval the master triggers one aggregation round: a fresh
//! accumulator expecting a reply from each known cluster. The consolidated
//! snapshot is emitted exactly once, when the last expected reply lands. A
//! round still incomplete at the next trigger is discarded with a warning;
//! partial snapshots are never emitted.

use gantry_ipc::{ClusterStats, ShardStats};
use serde::Serialize;

const BYTES_PER_MB: f64 = 1_000_000.0;

/// One cluster's contribution to a consolidated snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterSnapshot {
    pub cluster: u32,
    pub guilds: u64,
    pub voice: u64,
    pub exclusive_guilds: u64,
    pub large_guilds: u64,
    pub shards: u32,
    pub ram_mb: f64,
    pub uptime_ms: u64,
    pub shards_stats: Vec<ShardStats>,
}

/// Consolidated fleet-wide snapshot, emitted once per completed round
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FleetStats {
    pub guilds: u64,
    pub users: u64,
    pub voice: u64,
    pub exclusive_guilds: u64,
    pub large_guilds: u64,
    pub total_ram_mb: f64,
    /// Per-cluster breakdown, ordered by cluster id
    pub clusters: Vec<ClusterSnapshot>,
}

/// Accumulator for one aggregation round
pub struct StatsRound {
    expected: usize,
    guilds: u64,
    users: u64,
    voice: u64,
    exclusive_guilds: u64,
    large_guilds: u64,
    total_ram_bytes: u64,
    clusters: Vec<ClusterSnapshot>,
    active: bool,
}

impl Default for StatsRound {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsRound {
    pub fn new() -> Self {
        Self {
            expected: 0,
            guilds: 0,
            users: 0,
            voice: 0,
            exclusive_guilds: 0,
            large_guilds: 0,
            total_ram_bytes: 0,
            clusters: Vec::new(),
            active: false,
        }
    }

    /// A round is active until every expected reply has been recorded
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// How many expected replies are still outstanding
    pub fn missing(&self) -> usize {
        if self.active {
            self.expected - self.clusters.len()
        } else {
            0
        }
    }

    /// Reset the accumulator for a new round expecting one reply per known
    /// cluster. Returns false when the previous round was still incomplete
    /// and had to be discarded.
    pub fn begin(&mut self, expected: usize) -> bool {
        let clean = !self.active;
        *self = Self::new();
        self.expected = expected;
        self.active = expected > 0;
        clean
    }

    /// Record one cluster's reply. Returns the consolidated snapshot when
    /// this was the last expected reply; replies outside an active round are
    /// dropped.
    pub fn record(&mut self, cluster_id: u32, stats: ClusterStats) -> Option<FleetStats> {
        if !self.active {
            return None;
        }

        self.guilds += stats.guilds;
        self.users += stats.users;
        self.voice += stats.voice;
        self.exclusive_guilds += stats.exclusive_guilds;
        self.large_guilds += stats.large_guilds;
        self.total_ram_bytes += stats.ram_bytes;

        self.clusters.push(ClusterSnapshot {
            cluster: cluster_id,
            guilds: stats.guilds,
            voice: stats.voice,
            exclusive_guilds: stats.exclusive_guilds,
            large_guilds: stats.large_guilds,
            shards: stats.shards,
            ram_mb: stats.ram_bytes as f64 / BYTES_PER_MB,
            uptime_ms: stats.uptime_ms,
            shards_stats: stats.shards_stats,
        });

        if self.clusters.len() < self.expected {
            return None;
        }

        self.active = false;
        let mut clusters = std::mem::take(&mut self.clusters);
        clusters.sort_by_key(|c| c.cluster);

        Some(FleetStats {
            guilds: self.guilds,
            users: self.users,
            voice: self.voice,
            exclusive_guilds: self.exclusive_guilds,
            large_guilds: self.large_guilds,
            total_ram_mb: self.total_ram_bytes as f64 / BYTES_PER_MB,
            clusters,
        })
    }
}
