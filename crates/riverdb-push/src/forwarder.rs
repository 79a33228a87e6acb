//! Cross-shard row forwarding
//!
//! Rekeyed rows travel in two hops, each atomic on a single shard:
//!
//! 1. The producing operator queues the row in its own shard's **forward
//!    queue** (same batch as the writes that produced it), keyed
//!    `be(local) ‖ be(FORWARD_QUEUE) ‖ be(dest) ‖ be(entity) ‖ be(seq)`.
//! 2. The queue mover copies entries to the destination shard's **inbox**
//!    (`be(dest) ‖ be(RECEIVER) ‖ be(sender) ‖ be(entity) ‖ be(seq)`) and
//!    then deletes them from the queue. A crash in between re-sends; the
//!    inbox sequence makes the replay harmless.
//!
//! The sequence is monotone per (sender shard, destination shard, entity),
//! so inbox application preserves per-source FIFO, and the receiver's
//! applied-sequence watermark (committed in the same batch as the derived
//! updates) gives exactly-once effect within the cluster.

use std::collections::HashMap;

use tokio::sync::Mutex;

use riverdb_cluster::{Cluster, WriteBatch};
use riverdb_core::{
    append_u64_be, encode_row, encode_table_key_prefix, read_u64_be, read_u64_le, ColumnType,
    Row, ShardType, Sharder, FORWARD_QUEUE_TABLE_ID, RECEIVER_SEQUENCE_TABLE_ID,
    RECEIVER_TABLE_ID,
};

use crate::error::{PushError, Result};
use crate::exec::ExecContext;

/// Scan prefix of one shard's outbound forward queue.
pub fn forward_queue_prefix(local_shard: u64) -> Vec<u8> {
    encode_table_key_prefix(FORWARD_QUEUE_TABLE_ID, local_shard, 16)
}

fn forward_queue_key(local_shard: u64, dest_shard: u64, entity_id: u64, seq: u64) -> Vec<u8> {
    let mut key = encode_table_key_prefix(FORWARD_QUEUE_TABLE_ID, local_shard, 40);
    append_u64_be(&mut key, dest_shard);
    append_u64_be(&mut key, entity_id);
    append_u64_be(&mut key, seq);
    key
}

/// `(dest shard, entity id, seq)` of a forward-queue key.
pub fn parse_forward_queue_key(key: &[u8]) -> Result<(u64, u64, u64)> {
    Ok((
        read_u64_be(key, 16)?,
        read_u64_be(key, 24)?,
        read_u64_be(key, 32)?,
    ))
}

/// Scan prefix of one shard's inbox.
pub fn inbox_prefix(shard_id: u64) -> Vec<u8> {
    encode_table_key_prefix(RECEIVER_TABLE_ID, shard_id, 16)
}

pub fn inbox_key(dest_shard: u64, sender_shard: u64, entity_id: u64, seq: u64) -> Vec<u8> {
    let mut key = encode_table_key_prefix(RECEIVER_TABLE_ID, dest_shard, 40);
    append_u64_be(&mut key, sender_shard);
    append_u64_be(&mut key, entity_id);
    append_u64_be(&mut key, seq);
    key
}

/// `(sender shard, entity id, seq)` of an inbox key.
pub fn parse_inbox_key(key: &[u8]) -> Result<(u64, u64, u64)> {
    Ok((
        read_u64_be(key, 16)?,
        read_u64_be(key, 24)?,
        read_u64_be(key, 32)?,
    ))
}

/// Key of the applied-sequence watermark for `(sender, entity)` on `shard`.
pub fn receiver_sequence_key(shard_id: u64, sender_shard: u64, entity_id: u64) -> Vec<u8> {
    let mut key = encode_table_key_prefix(RECEIVER_SEQUENCE_TABLE_ID, shard_id, 32);
    append_u64_be(&mut key, sender_shard);
    append_u64_be(&mut key, entity_id);
    key
}

/// Read the applied watermark; zero when none has been written.
pub async fn read_receiver_sequence(
    cluster: &dyn Cluster,
    shard_id: u64,
    sender_shard: u64,
    entity_id: u64,
) -> Result<u64> {
    let key = receiver_sequence_key(shard_id, sender_shard, entity_id);
    match cluster.local_get(&key).await? {
        Some(value) => Ok(read_u64_le(&value, 0)?),
        None => Ok(0),
    }
}

/// Queues rekeyed rows into the local forward queue with monotone
/// sequences.
pub struct ShardForwarder {
    sharder: Sharder,
    /// (sender shard, dest shard, entity) → next sequence. Lazily recovered
    /// from storage after a restart.
    sequences: Mutex<HashMap<(u64, u64, u64), u64>>,
}

impl ShardForwarder {
    pub fn new(sharder: Sharder) -> Self {
        Self {
            sharder,
            sequences: Mutex::new(HashMap::new()),
        }
    }

    /// Route `key` to its owning shard.
    pub fn shard_for_key(&self, key: &[u8]) -> u64 {
        self.sharder.calculate_shard(ShardType::Hash, key)
    }

    /// Queue `row` for delivery to the shard owning `key`, on behalf of
    /// `entity_id`. The queue put joins `batch`, so emission commits
    /// atomically with whatever produced the row.
    pub async fn queue_for_remote_send(
        &self,
        cluster: &dyn Cluster,
        key: &[u8],
        row: &Row,
        local_shard: u64,
        entity_id: u64,
        col_types: &[ColumnType],
        batch: &mut WriteBatch,
    ) -> Result<u64> {
        let dest_shard = self.shard_for_key(key);
        let seq = self
            .next_sequence(cluster, local_shard, dest_shard, entity_id)
            .await?;
        let mut value = Vec::new();
        encode_row(row, col_types, &mut value)?;
        batch.add_put(
            forward_queue_key(local_shard, dest_shard, entity_id, seq),
            value,
        )?;
        Ok(dest_shard)
    }

    async fn next_sequence(
        &self,
        cluster: &dyn Cluster,
        local_shard: u64,
        dest_shard: u64,
        entity_id: u64,
    ) -> Result<u64> {
        let mut sequences = self.sequences.lock().await;
        let slot = (local_shard, dest_shard, entity_id);
        let next = match sequences.get(&slot) {
            Some(&next) => next,
            None => {
                recover_sequence(cluster, local_shard, dest_shard, entity_id).await? + 1
            }
        };
        sequences.insert(slot, next + 1);
        Ok(next)
    }
}

/// Highest sequence already used for `(local, dest, entity)`: the larger of
/// the last queued-but-unmoved entry and the receiver's applied watermark.
async fn recover_sequence(
    cluster: &dyn Cluster,
    local_shard: u64,
    dest_shard: u64,
    entity_id: u64,
) -> Result<u64> {
    let mut prefix = encode_table_key_prefix(FORWARD_QUEUE_TABLE_ID, local_shard, 32);
    append_u64_be(&mut prefix, dest_shard);
    append_u64_be(&mut prefix, entity_id);
    let mut end = prefix.clone();
    end.push(0xFF);
    let queued = cluster.local_scan(&prefix, Some(&end), -1).await?;
    let queue_max = queued
        .last()
        .map(|pair| parse_forward_queue_key(&pair.key).map(|(_, _, seq)| seq))
        .transpose()?
        .unwrap_or(0);
    let applied = read_receiver_sequence(cluster, dest_shard, local_shard, entity_id).await?;
    Ok(queue_max.max(applied))
}

/// Convenience used by the aggregate's upstream half.
pub async fn forward_row(
    ctx: &mut ExecContext<'_>,
    key: &[u8],
    row: &Row,
    local_shard: u64,
    entity_id: u64,
    col_types: &[ColumnType],
) -> Result<()> {
    if ctx.batch.shard_id() != local_shard {
        return Err(PushError::Internal(format!(
            "forwarding from shard {local_shard} into a batch for shard {}",
            ctx.batch.shard_id()
        )));
    }
    ctx.forwarder
        .queue_for_remote_send(
            ctx.cluster,
            key,
            row,
            local_shard,
            entity_id,
            col_types,
            ctx.batch,
        )
        .await?;
    ctx.forwarded = true;
    Ok(())
}
