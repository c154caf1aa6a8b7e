use std::{num::NonZeroUsize, ops::Range};

/// Splits `total` stream positions among `world_size` ranks and returns the shard of `rank`.
///
/// Properties:
/// - Ranges are contiguous, disjoint and cover `[0..total)`.
/// - Sizes differ by at most 1 (balanced partition).
pub fn shard_range(total: usize, rank: usize, world_size: usize) -> Range<usize> {
    let world_size = world_size.max(1);
    let rank = rank.min(world_size - 1);

    let base = total / world_size;
    let rem = total % world_size;

    let start = rank * base + rank.min(rem);
    let extra = usize::from(rank < rem);
    let end = start + base + extra;

    start..end
}

/// The slice of every epoch stream a process trains on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardSpec {
    pub rank: usize,
    pub world_size: NonZeroUsize,
}

impl ShardSpec {
    /// # Returns
    /// A shard spec, or `None` if `rank` is not part of the group.
    pub fn new(rank: usize, world_size: NonZeroUsize) -> Option<Self> {
        (rank < world_size.get()).then_some(Self { rank, world_size })
    }

    /// The whole stream, for single-process runs.
    pub fn single() -> Self {
        Self {
            rank: 0,
            world_size: NonZeroUsize::MIN,
        }
    }

    #[inline]
    pub fn range(self, total: usize) -> Range<usize> {
        shard_range(total, self.rank, self.world_size.get())
    }

    /// Number of batches every rank runs per epoch.
    ///
    /// Ranks stop at the batch count of the smallest shard so they all reach
    /// each gradient-averaging point the same number of times.
    pub fn batches_per_rank(self, total: usize, batch_size: NonZeroUsize) -> usize {
        (0..self.world_size.get())
            .map(|rank| shard_range(total, rank, self.world_size.get()).len())
            .map(|len| len.div_ceil(batch_size.get()))
            .min()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nz(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    #[test]
    fn shard_range_balanced() {
        // total 10, ranks 3 => sizes 4,3,3
        assert_eq!(shard_range(10, 0, 3), 0..4);
        assert_eq!(shard_range(10, 1, 3), 4..7);
        assert_eq!(shard_range(10, 2, 3), 7..10);
    }

    #[test]
    fn shard_spec_range_matches_function() {
        let spec = ShardSpec::new(1, nz(3)).unwrap();
        assert_eq!(spec.range(10), 4..7);
        assert!(ShardSpec::new(3, nz(3)).is_none());
    }

    #[test]
    fn ranks_agree_on_the_smallest_batch_count() {
        // Shards of 4, 3 and 3 positions with batches of 2 => 2, 2, 2.
        assert_eq!(ShardSpec::new(0, nz(3)).unwrap().batches_per_rank(10, nz(2)), 2);
        // Shards of 5 and 4 with batches of 4 => 2 and 1.
        assert_eq!(ShardSpec::new(0, nz(2)).unwrap().batches_per_rank(9, nz(4)), 1);
        assert_eq!(ShardSpec::single().batches_per_rank(9, nz(4)), 3);
    }
}
