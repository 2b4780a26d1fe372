//! Key-hash partitioning of a batch across parallel workers.

use std::hash::Hasher;

use ahash::AHasher;

/// Assigns serialized grouping keys to partitions.
///
/// Uses ahash for fast hashing. All records for one key land in the same
/// partition, which is what makes partition-local accumulator deltas safe
/// to merge without per-key locking.
#[derive(Debug, Clone, Copy)]
pub struct HashPartitioner {
    num_partitions: usize,
}

impl HashPartitioner {
    pub fn new(num_partitions: usize) -> Self {
        Self {
            num_partitions: num_partitions.max(1),
        }
    }

    pub fn num_partitions(&self) -> usize {
        self.num_partitions
    }

    /// Partition index for the given serialized key.
    pub fn partition(&self, key_bytes: &[u8]) -> usize {
        let mut hasher = AHasher::default();
        hasher.write(key_bytes);
        (hasher.finish() as usize) % self.num_partitions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_in_range() {
        let partitioner = HashPartitioner::new(4);
        for i in 0..100u32 {
            let key = i.to_le_bytes();
            assert!(partitioner.partition(&key) < 4);
        }
    }

    #[test]
    fn test_same_key_same_partition() {
        let partitioner = HashPartitioner::new(8);
        let a = partitioner.partition(b"user_1");
        let b = partitioner.partition(b"user_1");
        assert_eq!(a, b);
    }

    #[test]
    fn test_single_partition() {
        let partitioner = HashPartitioner::new(1);
        assert_eq!(partitioner.partition(b"anything"), 0);
    }

    #[test]
    fn test_zero_clamps_to_one() {
        let partitioner = HashPartitioner::new(0);
        assert_eq!(partitioner.num_partitions(), 1);
    }
}
