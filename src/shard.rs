//! Deterministic catalog partitioning across independent workers.
//!
//! `shard(recording) = id mod N`, where id is the catalog's stable,
//! monotonically-assigned, never-reused key — so shard membership does not
//! shift when new recordings are ingested. There is no reservation or
//! locking here: overlapping workers are safe because every measurement
//! write is an idempotent keyed upsert.

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ShardError {
    #[error("shard count must be at least 1")]
    ZeroCount,
    #[error("shard index {index} out of range for {count} shards")]
    IndexOutOfRange { index: u32, count: u32 },
}

/// One worker's slice of the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardSpec {
    pub index: u32,
    pub count: u32,
}

impl ShardSpec {
    pub fn new(index: u32, count: u32) -> Result<Self, ShardError> {
        if count == 0 {
            return Err(ShardError::ZeroCount);
        }
        if index >= count {
            return Err(ShardError::IndexOutOfRange { index, count });
        }
        Ok(Self { index, count })
    }

    /// Whether this shard owns the given recording id.
    pub fn owns(&self, recording_id: i64) -> bool {
        recording_id.rem_euclid(self.count as i64) == self.index as i64
    }

    /// Filter an id set down to this shard's members, preserving order.
    pub fn partition(&self, ids: &[i64]) -> Vec<i64> {
        ids.iter().copied().filter(|id| self.owns(*id)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_specs() {
        assert_eq!(ShardSpec::new(0, 0), Err(ShardError::ZeroCount));
        assert_eq!(
            ShardSpec::new(3, 3),
            Err(ShardError::IndexOutOfRange { index: 3, count: 3 })
        );
    }

    #[test]
    fn test_shards_are_disjoint_and_cover() {
        let ids: Vec<i64> = (1..=100).collect();
        let mut seen = Vec::new();
        for i in 0..7 {
            let shard = ShardSpec::new(i, 7).unwrap();
            seen.extend(shard.partition(&ids));
        }
        seen.sort_unstable();
        assert_eq!(seen, ids);
    }

    #[test]
    fn test_membership_is_stable_under_catalog_growth() {
        // Adding recordings must never move an existing one to another
        // shard (this is why the key is the id, not list position).
        let shard = ShardSpec::new(2, 5).unwrap();
        let before = shard.partition(&(1..=50).collect::<Vec<_>>());
        let after = shard.partition(&(1..=500).collect::<Vec<_>>());
        assert_eq!(&after[..before.len()], &before[..]);
    }

    #[test]
    fn test_single_shard_owns_everything() {
        let shard = ShardSpec::new(0, 1).unwrap();
        assert!(shard.owns(1));
        assert!(shard.owns(42));
    }
}
