//! Shard range arithmetic
//!
//! The fleet-wide shard range is split into contiguous, non-overlapping
//! chunks, one per cluster. Chunk sizes are non-increasing: the front
//! clusters absorb the remainder when the split is uneven.

use gantry_config::{ManagerConfig, ShardCount};
use gantry_interfaces::RestClient;

use crate::error::ManagerError;

/// A contiguous, inclusive range of shard ids owned by one cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardRange {
    pub first_shard_id: u32,
    pub last_shard_id: u32,
}

impl ShardRange {
    pub fn count(&self) -> u32 {
        self.last_shard_id - self.first_shard_id + 1
    }
}

/// Split the inclusive shard range into at most `clusters` contiguous chunks.
/// Fewer than two clusters get the whole range as a single chunk.
pub fn partition_shards(first_shard_id: u32, last_shard_id: u32, clusters: usize) -> Vec<ShardRange> {
    if clusters < 2 {
        return vec![ShardRange {
            first_shard_id,
            last_shard_id,
        }];
    }

    let mut out = Vec::with_capacity(clusters);
    let mut cursor = first_shard_id;
    let mut remaining = last_shard_id - first_shard_id + 1;
    let mut left = clusters as u32;

    while remaining > 0 {
        let size = remaining.div_ceil(left);
        out.push(ShardRange {
            first_shard_id: cursor,
            last_shard_id: cursor + size - 1,
        });
        cursor += size;
        remaining -= size;
        left -= 1;
    }

    out
}

/// Resolve the total shard count: fixed, or scaled from the gateway's
/// recommendation by the configured guild density target.
pub async fn compute_shard_count(
    config: &ManagerConfig,
    rest: &dyn RestClient,
) -> Result<u32, ManagerError> {
    match config.shards {
        ShardCount::Fixed(n) => Ok(n),
        ShardCount::Auto => {
            let recommended = rest.recommended_shards().await?;
            if recommended == 1 {
                return Ok(1);
            }
            Ok((f64::from(recommended) * (1000.0 / f64::from(config.guilds_per_shard))).ceil()
                as u32)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use gantry_interfaces::{RestError, RestRequest};
    use gantry_ipc::Embed;
    use serde_json::Value as JsonValue;

    #[test]
    fn test_even_split() {
        let ranges = partition_shards(0, 3, 2);
        assert_eq!(
            ranges,
            vec![
                ShardRange { first_shard_id: 0, last_shard_id: 1 },
                ShardRange { first_shard_id: 2, last_shard_id: 3 },
            ]
        );
    }

    #[test]
    fn test_uneven_split_front_loads_remainder() {
        let ranges = partition_shards(0, 2, 2);
        assert_eq!(
            ranges,
            vec![
                ShardRange { first_shard_id: 0, last_shard_id: 1 },
                ShardRange { first_shard_id: 2, last_shard_id: 2 },
            ]
        );

        // Sizes are non-increasing and cover the range exactly once
        let ranges = partition_shards(0, 6, 3);
        let sizes: Vec<u32> = ranges.iter().map(ShardRange::count).collect();
        assert_eq!(sizes, vec![3, 2, 2]);
        assert_eq!(ranges[0].first_shard_id, 0);
        assert_eq!(ranges[2].last_shard_id, 6);
        for pair in ranges.windows(2) {
            assert_eq!(pair[1].first_shard_id, pair[0].last_shard_id + 1);
        }
    }

    #[test]
    fn test_single_cluster_takes_whole_range() {
        let ranges = partition_shards(4, 9, 1);
        assert_eq!(
            ranges,
            vec![ShardRange { first_shard_id: 4, last_shard_id: 9 }]
        );
    }

    #[test]
    fn test_offset_range() {
        let ranges = partition_shards(8, 11, 2);
        assert_eq!(
            ranges,
            vec![
                ShardRange { first_shard_id: 8, last_shard_id: 9 },
                ShardRange { first_shard_id: 10, last_shard_id: 11 },
            ]
        );
    }

    struct FixedRecommendation(u32);

    #[async_trait]
    impl RestClient for FixedRecommendation {
        async fn recommended_shards(&self) -> Result<u32, RestError> {
            Ok(self.0)
        }

        async fn request(&self, _request: RestRequest) -> Result<JsonValue, RestError> {
            Err(RestError::Transport("not implemented".into()))
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

    #[tokio::test]
    async fn test_auto_shard_count_scales_by_guild_density() {
        let config = ManagerConfig::new("main", "bot-token");

        // recommended 16 at 1300 guilds per shard: ceil(16 * 1000/1300) = 13
        let count = compute_shard_count(&config, &FixedRecommendation(16))
            .await
            .unwrap();
        assert_eq!(count, 13);

        // A single recommended shard short-circuits the scaling
        let count = compute_shard_count(&config, &FixedRecommendation(1))
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_fixed_shard_count_skips_the_gateway() {
        let mut config = ManagerConfig::new("main", "bot-token");
        config.shards = ShardCount::Fixed(7);

        struct Unreachable;

        #[async_trait]
        impl RestClient for Unreachable {
            async fn recommended_shards(&self) -> Result<u32, RestError> {
                panic!("fixed count must not query the gateway")
            }

            async fn request(&self, _request: RestRequest) -> Result<JsonValue, RestError> {
                unreachable!()
            }

            async fn execute_webhook(
                &self,
                _id: &str,
                _token: &str,
                _embeds: Vec<Embed>,
            ) -> Result<(), RestError> {
                unreachable!()
            }
        }

        let count = compute_shard_count(&config, &Unreachable).await.unwrap();
        assert_eq!(count, 7);
    }
}
