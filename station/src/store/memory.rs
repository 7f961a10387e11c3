//! In-memory sample store for tests and ephemeral runs.

use std::sync::{PoisonError, RwLock};

use station_shared::{BucketAggregate, Timestamp};

use super::{check_order, SampleRecord, SampleStore, StoreError};
use crate::downsampler::{BucketAccumulator, BucketPlan};

const SCAN_CHUNK: usize = 1024;

/// Records kept in a timestamp-ordered vector.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<Vec<SampleRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Visit records at or after `start` in chunks of at most `SCAN_CHUNK`
    /// until `visit` returns false. Each chunk is copied out so the lock is
    /// not held while visiting and appends can proceed between chunks.
    /// Records are never removed, so positions stay valid across chunks.
    fn scan_from(&self, start: Timestamp, mut visit: impl FnMut(&[SampleRecord]) -> bool) {
        let mut next = self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .partition_point(|r| r.timestamp < start);

        loop {
            let chunk: Vec<SampleRecord> = {
                let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
                let end = records.len().min(next + SCAN_CHUNK);
                records[next.min(end)..end].to_vec()
            };
            if chunk.is_empty() || !visit(&chunk) {
                return;
            }
            next += chunk.len();
        }
    }
}

impl SampleStore for MemoryStore {
    fn append(&self, record: &SampleRecord) -> Result<(), StoreError> {
        self.append_batch(std::slice::from_ref(record))
    }

    fn append_batch(&self, records: &[SampleRecord]) -> Result<(), StoreError> {
        let mut stored = self.records.write().unwrap_or_else(PoisonError::into_inner);
        check_order(stored.last().map(|r| r.timestamp), records)?;
        stored.extend_from_slice(records);
        Ok(())
    }

    fn last_timestamp(&self) -> Option<Timestamp> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .map(|r| r.timestamp)
    }

    fn aggregate_range(&self, plan: &BucketPlan) -> Result<Vec<BucketAggregate>, StoreError> {
        let mut acc = BucketAccumulator::new(*plan);
        self.scan_from(plan.start(), |chunk| {
            for record in chunk {
                if record.timestamp >= plan.end() {
                    return false;
                }
                acc.add(record);
            }
            true
        });
        Ok(acc.finish())
    }
}
