//! Append-only sample persistence.
//!
//! A store accepts records in non-decreasing timestamp order and answers
//! bucketed range aggregations by streaming its records through a
//! [`BucketAccumulator`].

pub mod csv_store;
pub mod memory;

pub use csv_store::CsvStore;
pub use memory::MemoryStore;

use station_shared::{BucketAggregate, Frame, Orientation, Timestamp};
use thiserror::Error;

use crate::downsampler::BucketPlan;

/// One persisted tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleRecord {
    pub timestamp: Timestamp,
    pub frame: Frame,
    pub orientation: Orientation,
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("record at {got} is older than the last stored record at {last}")]
    OutOfOrder { last: Timestamp, got: Timestamp },

    #[error("unreadable record at byte {offset} is followed by more records")]
    Corrupt { offset: u64 },
}

/// Time-series backend shared by the publisher and the downsampler.
///
/// Appends come from a single writer; aggregations may run concurrently
/// with appends and see a prefix of the appended records.
pub trait SampleStore: Send + Sync {
    fn append(&self, record: &SampleRecord) -> Result<(), StoreError>;

    /// Append several records with a single flush.
    fn append_batch(&self, records: &[SampleRecord]) -> Result<(), StoreError> {
        for record in records {
            self.append(record)?;
        }
        Ok(())
    }

    /// Timestamp of the newest record, if any.
    fn last_timestamp(&self) -> Option<Timestamp>;

    /// Mean of every field per non-empty bucket of `plan`, in bucket order.
    fn aggregate_range(&self, plan: &BucketPlan) -> Result<Vec<BucketAggregate>, StoreError>;
}

/// Reject `records` if any would move time backwards from `last`.
pub(crate) fn check_order(
    mut last: Option<Timestamp>,
    records: &[SampleRecord],
) -> Result<Option<Timestamp>, StoreError> {
    for record in records {
        if let Some(last) = last {
            if record.timestamp < last {
                return Err(StoreError::OutOfOrder {
                    last,
                    got: record.timestamp,
                });
            }
        }
        last = Some(record.timestamp);
    }
    Ok(last)
}
