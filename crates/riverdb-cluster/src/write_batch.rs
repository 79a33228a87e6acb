//! Atomic per-shard write batches

use std::collections::{BTreeMap, BTreeSet};

use riverdb_core::{read_u64_be, DATA_SHARD_ID_BASE};

use crate::error::{ClusterError, Result};

/// A set of puts and deletes applied atomically to one shard.
///
/// Built synchronously, submitted once via [`crate::Cluster::write_batch`],
/// never reused. Every key must carry the batch's `be(shard_id)` prefix.
#[derive(Debug)]
pub struct WriteBatch {
    shard_id: u64,
    puts: BTreeMap<Vec<u8>, Vec<u8>>,
    deletes: BTreeSet<Vec<u8>>,
    notify_remote: bool,
}

impl WriteBatch {
    pub fn new(shard_id: u64, notify_remote: bool) -> Self {
        assert!(
            shard_id >= DATA_SHARD_ID_BASE,
            "invalid shard id {shard_id}"
        );
        Self {
            shard_id,
            puts: BTreeMap::new(),
            deletes: BTreeSet::new(),
            notify_remote,
        }
    }

    pub fn shard_id(&self) -> u64 {
        self.shard_id
    }

    pub fn notify_remote(&self) -> bool {
        self.notify_remote
    }

    /// Change the notification flag after filling; the caller may only know
    /// whether downstream work exists once every put is in.
    pub fn set_notify_remote(&mut self, notify_remote: bool) {
        self.notify_remote = notify_remote;
    }

    /// Add a put. A later put or delete of the same key within this batch
    /// wins over an earlier one.
    pub fn add_put(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        self.check_key(&key)?;
        self.deletes.remove(&key);
        self.puts.insert(key, value);
        Ok(())
    }

    /// Add a delete.
    pub fn add_delete(&mut self, key: Vec<u8>) -> Result<()> {
        self.check_key(&key)?;
        self.puts.remove(&key);
        self.deletes.insert(key);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.puts.is_empty() && self.deletes.is_empty()
    }

    pub fn put_count(&self) -> usize {
        self.puts.len()
    }

    pub fn delete_count(&self) -> usize {
        self.deletes.len()
    }

    pub fn puts(&self) -> impl Iterator<Item = (&Vec<u8>, &Vec<u8>)> {
        self.puts.iter()
    }

    pub fn deletes(&self) -> impl Iterator<Item = &Vec<u8>> {
        self.deletes.iter()
    }

    pub(crate) fn into_parts(self) -> (BTreeMap<Vec<u8>, Vec<u8>>, BTreeSet<Vec<u8>>) {
        (self.puts, self.deletes)
    }

    fn check_key(&self, key: &[u8]) -> Result<()> {
        let shard = read_u64_be(key, 0)
            .map_err(|_| ClusterError::InvalidBatch("key shorter than shard prefix".to_string()))?;
        if shard != self.shard_id {
            return Err(ClusterError::InvalidBatch(format!(
                "key belongs to shard {shard}, batch is for shard {}",
                self.shard_id
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use riverdb_core::append_u64_be;

    fn key(shard: u64, tail: &[u8]) -> Vec<u8> {
        let mut k = Vec::new();
        append_u64_be(&mut k, shard);
        k.extend_from_slice(tail);
        k
    }

    #[test]
    fn test_put_then_delete_same_key() {
        let mut batch = WriteBatch::new(1000, false);
        let k = key(1000, b"k");
        batch.add_put(k.clone(), b"v".to_vec()).unwrap();
        batch.add_delete(k).unwrap();
        assert_eq!(batch.put_count(), 0);
        assert_eq!(batch.delete_count(), 1);
    }

    #[test]
    fn test_delete_then_put_same_key() {
        let mut batch = WriteBatch::new(1000, false);
        let k = key(1000, b"k");
        batch.add_delete(k.clone()).unwrap();
        batch.add_put(k, b"v".to_vec()).unwrap();
        assert_eq!(batch.put_count(), 1);
        assert_eq!(batch.delete_count(), 0);
    }

    #[test]
    fn test_wrong_shard_key_rejected() {
        let mut batch = WriteBatch::new(1000, false);
        assert!(batch.add_put(key(1001, b"k"), b"v".to_vec()).is_err());
    }

    #[test]
    fn test_short_key_rejected() {
        let mut batch = WriteBatch::new(1000, false);
        assert!(batch.add_put(b"xy".to_vec(), b"v".to_vec()).is_err());
    }

    #[test]
    #[should_panic(expected = "invalid shard id")]
    fn test_sub_base_shard_panics() {
        let _ = WriteBatch::new(1, false);
    }
}
