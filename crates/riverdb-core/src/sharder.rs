//! Key-to-shard hashing
//!
//! Every node must route a key to the same shard, so the hash function and
//! the shard count are both cluster-wide constants.

use xxhash_rust::xxh64::xxh64;

use crate::DATA_SHARD_ID_BASE;

/// How a key is mapped to a shard. Only hash partitioning exists today; the
/// enum keeps the call sites honest about which scheme they expect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardType {
    Hash,
}

/// Stateless shard calculator for a fixed shard count.
#[derive(Debug, Clone)]
pub struct Sharder {
    num_shards: u64,
}

impl Sharder {
    pub fn new(num_shards: usize) -> Self {
        assert!(num_shards > 0, "shard count must be non-zero");
        Self {
            num_shards: num_shards as u64,
        }
    }

    /// Map an encoded key to its owning shard id.
    pub fn calculate_shard(&self, shard_type: ShardType, key: &[u8]) -> u64 {
        match shard_type {
            ShardType::Hash => xxh64(key, 0) % self.num_shards + DATA_SHARD_ID_BASE,
        }
    }
}
