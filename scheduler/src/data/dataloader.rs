use std::{num::NonZeroUsize, ops::Range};

use super::shard::ShardSpec;
use crate::registry::SampleRef;

/// Shard-aware loader producing borrowed raw batches of one epoch stream.
#[derive(Debug, Clone)]
pub struct DataLoader {
    stream: Vec<SampleRef>,
    shard_range: Range<usize>,
    batch_size: usize,
    num_batches: usize,
    cursor: usize, // absolute index in the stream
    served: usize,
}

impl DataLoader {
    /// Creates a loader over this process's shard of `stream`.
    ///
    /// # Args
    /// * `stream` - The epoch stream, identical on every rank.
    /// * `shard` - Which part of the stream this rank trains on.
    /// * `batch_size` - Instances per raw batch.
    pub fn new(stream: Vec<SampleRef>, shard: ShardSpec, batch_size: NonZeroUsize) -> Self {
        let total = stream.len();
        let shard_range = shard.range(total);
        let cursor = shard_range.start;
        let num_batches = shard.batches_per_rank(total, batch_size);

        Self {
            stream,
            shard_range,
            batch_size: batch_size.get(),
            num_batches,
            cursor,
            served: 0,
        }
    }

    /// Number of raw batches this loader yields per pass.
    #[inline]
    pub fn len(&self) -> usize {
        self.num_batches
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.num_batches == 0
    }

    #[inline]
    pub fn shard_range(&self) -> Range<usize> {
        self.shard_range.clone()
    }

    /// Advances past `n` batches without yielding them.
    pub fn skip_batches(&mut self, n: usize) {
        for _ in 0..n {
            if self.next_batch().is_none() {
                break;
            }
        }
    }

    /// Exhausts the loader so the remaining batches are never served.
    pub fn close(&mut self) {
        self.cursor = self.shard_range.end;
        self.served = self.num_batches;
    }

    /// Returns the next borrowed batch for this shard, or `None` if exhausted.
    pub fn next_batch(&mut self) -> Option<&[SampleRef]> {
        if self.served >= self.num_batches || self.cursor >= self.shard_range.end {
            return None;
        }

        let start = self.cursor;
        let end = (start + self.batch_size).min(self.shard_range.end);

        self.cursor = end;
        self.served += 1;
        Some(&self.stream[start..end])
    }
}
