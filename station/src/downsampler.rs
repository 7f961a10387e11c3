//! Historical range queries aggregated into time buckets.
//!
//! `[start, end)` is cut into `count` equal half-open buckets and every
//! stored record inside the range is averaged into its bucket. Bucket
//! membership uses exact integer nanosecond arithmetic, so bucket edges are
//! exact even when the width is not a whole number of nanoseconds.

use std::collections::BTreeMap;
use std::sync::Arc;

use station_shared::{BucketAggregate, Timestamp, Vec3};
use thiserror::Error;
use tracing::debug;

use crate::store::{SampleRecord, SampleStore, StoreError};

pub const DEFAULT_BUCKETS: u32 = 100;
pub const MAX_BUCKETS: u32 = 10_000;

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("invalid range: start {start}, end {end}, buckets {buckets}")]
    InvalidRange {
        start: Timestamp,
        end: Timestamp,
        buckets: i64,
    },

    #[error("{requested} buckets requested, at most {max} allowed")]
    TooManyBuckets { requested: i64, max: u32 },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("query task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Partition of `[start, end)` into `count` equal half-open buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketPlan {
    start: Timestamp,
    end: Timestamp,
    count: u32,
}

impl BucketPlan {
    /// Returns None unless `start < end` and `count > 0`.
    pub fn new(start: Timestamp, end: Timestamp, count: u32) -> Option<Self> {
        (start < end && count > 0).then_some(Self { start, end, count })
    }

    pub fn start(&self) -> Timestamp {
        self.start
    }

    pub fn end(&self) -> Timestamp {
        self.end
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    fn span_nanos(&self) -> u128 {
        self.end.as_nanos() - self.start.as_nanos()
    }

    pub fn contains(&self, t: Timestamp) -> bool {
        self.start <= t && t < self.end
    }

    /// Bucket holding `t`, or None when `t` is outside the range.
    pub fn index_of(&self, t: Timestamp) -> Option<usize> {
        if !self.contains(t) {
            return None;
        }
        let offset = t.as_nanos() - self.start.as_nanos();
        Some((offset * self.count as u128 / self.span_nanos()) as usize)
    }

    /// First nanosecond belonging to bucket `k`.
    pub fn bucket_start(&self, k: usize) -> Timestamp {
        let count = self.count as u128;
        let offset = (self.span_nanos() * k as u128).div_ceil(count);
        Timestamp::from_nanos(self.start.as_nanos() + offset)
    }
}

#[derive(Debug, Clone, Default)]
struct BucketSums {
    samples: u64,
    temperature: f64,
    humidity: f64,
    lux: f64,
    infrared: f64,
    visible: f64,
    acceleration: Vec3,
    gyro: Vec3,
    magnetic: Vec3,
    roll: f64,
    pitch: f64,
    yaw: f64,
}

impl BucketSums {
    fn add(&mut self, record: &SampleRecord) {
        let frame = &record.frame;
        self.samples += 1;
        self.temperature += frame.temperature;
        self.humidity += frame.humidity;
        self.lux += frame.lux as f64;
        self.infrared += frame.infrared as f64;
        self.visible += frame.visible as f64;
        for axis in 0..3 {
            self.acceleration[axis] += frame.acceleration[axis];
            self.gyro[axis] += frame.gyro[axis];
            self.magnetic[axis] += frame.magnetic[axis];
        }
        self.roll += record.orientation.roll;
        self.pitch += record.orientation.pitch;
        self.yaw += record.orientation.yaw;
    }

    fn mean(&self, start: Timestamp) -> BucketAggregate {
        let n = self.samples as f64;
        BucketAggregate {
            start,
            samples: self.samples,
            temperature: self.temperature / n,
            relative_humidity: self.humidity / n,
            lux: self.lux / n,
            infrared: self.infrared / n,
            visible: self.visible / n,
            acceleration: self.acceleration.map(|v| v / n),
            gyro: self.gyro.map(|v| v / n),
            magnetic: self.magnetic.map(|v| v / n),
            roll: self.roll / n,
            pitch: self.pitch / n,
            yaw: self.yaw / n,
        }
    }
}

/// Running per-bucket sums. Memory grows with the number of non-empty
/// buckets, never with the number of records.
#[derive(Debug, Clone)]
pub struct BucketAccumulator {
    plan: BucketPlan,
    buckets: BTreeMap<usize, BucketSums>,
}

impl BucketAccumulator {
    pub fn new(plan: BucketPlan) -> Self {
        Self {
            plan,
            buckets: BTreeMap::new(),
        }
    }

    /// Fold a record into its bucket. Returns false (and ignores the record)
    /// when it falls outside the plan.
    pub fn add(&mut self, record: &SampleRecord) -> bool {
        match self.plan.index_of(record.timestamp) {
            Some(index) => {
                self.buckets.entry(index).or_default().add(record);
                true
            }
            None => false,
        }
    }

    /// Non-empty bucket count so far.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Means of every non-empty bucket in ascending bucket order.
    pub fn finish(self) -> Vec<BucketAggregate> {
        self.buckets
            .iter()
            .map(|(index, sums)| sums.mean(self.plan.bucket_start(*index)))
            .collect()
    }
}

/// Answers range queries against a shared store.
#[derive(Clone)]
pub struct Downsampler {
    store: Arc<dyn SampleStore>,
    default_buckets: u32,
}

impl Downsampler {
    pub fn new(store: Arc<dyn SampleStore>, default_buckets: u32) -> Self {
        Self {
            store,
            default_buckets: default_buckets.clamp(1, MAX_BUCKETS),
        }
    }

    pub fn default_buckets(&self) -> u32 {
        self.default_buckets
    }

    /// Validate a request. `Ok(None)` means the range is empty (`start ==
    /// end`), which is answered with no buckets whatever the bucket count.
    pub fn plan(
        &self,
        start: Timestamp,
        end: Timestamp,
        target_buckets: Option<i64>,
    ) -> Result<Option<BucketPlan>, QueryError> {
        if start == end {
            return Ok(None);
        }

        let buckets = target_buckets.unwrap_or(self.default_buckets as i64);
        if end < start || buckets <= 0 {
            return Err(QueryError::InvalidRange {
                start,
                end,
                buckets,
            });
        }
        if buckets > MAX_BUCKETS as i64 {
            return Err(QueryError::TooManyBuckets {
                requested: buckets,
                max: MAX_BUCKETS,
            });
        }

        Ok(BucketPlan::new(start, end, buckets as u32))
    }

    /// Bucketed means of the stored records in `[start, end)`.
    pub async fn query(
        &self,
        start: Timestamp,
        end: Timestamp,
        target_buckets: Option<i64>,
    ) -> Result<Vec<BucketAggregate>, QueryError> {
        let Some(plan) = self.plan(start, end, target_buckets)? else {
            return Ok(Vec::new());
        };

        let store = self.store.clone();
        let buckets = tokio::task::spawn_blocking(move || store.aggregate_range(&plan)).await??;
        debug!(
            "Query [{start}, {end}) over {} buckets returned {}",
            plan.count(),
            buckets.len()
        );
        Ok(buckets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::record;
    use crate::store::MemoryStore;
    use approx::assert_relative_eq;

    const T0: u64 = 1_700_000_000;

    fn ts(seconds: u64) -> Timestamp {
        Timestamp::new(seconds, 0)
    }

    fn downsampler_with(records: &[SampleRecord]) -> Downsampler {
        let store = MemoryStore::new();
        store.append_batch(records).unwrap();
        Downsampler::new(Arc::new(store), DEFAULT_BUCKETS)
    }

    #[test]
    fn test_plan_exact_buckets() {
        let plan = BucketPlan::new(ts(T0), ts(T0 + 10), 3).unwrap();

        // Width is 3.333...s: 3s is in bucket 0, 3.334s in bucket 1
        assert_eq!(plan.index_of(ts(T0)), Some(0));
        assert_eq!(plan.index_of(ts(T0 + 3)), Some(0));
        assert_eq!(plan.index_of(Timestamp::new(T0 + 3, 333_333_333)), Some(0));
        assert_eq!(plan.index_of(Timestamp::new(T0 + 3, 333_333_334)), Some(1));
        assert_eq!(plan.index_of(Timestamp::new(T0 + 9, 999_999_999)), Some(2));
        assert_eq!(plan.index_of(ts(T0 + 10)), None);
        assert_eq!(plan.index_of(ts(T0 - 1)), None);

        assert_eq!(plan.bucket_start(0), ts(T0));
        assert_eq!(plan.bucket_start(1), Timestamp::new(T0 + 3, 333_333_334));
        assert_eq!(plan.bucket_start(2), Timestamp::new(T0 + 6, 666_666_667));
    }

    #[test]
    fn test_plan_rejects_empty() {
        assert!(BucketPlan::new(ts(T0), ts(T0), 5).is_none());
        assert!(BucketPlan::new(ts(T0), ts(T0 + 1), 0).is_none());
    }

    #[test]
    fn test_accumulator_ignores_out_of_range() {
        let plan = BucketPlan::new(ts(T0), ts(T0 + 10), 2).unwrap();
        let mut acc = BucketAccumulator::new(plan);
        assert!(acc.add(&record(T0 + 1, 1.0)));
        assert!(!acc.add(&record(T0 + 10, 2.0)));
        assert!(!acc.add(&record(T0 - 5, 3.0)));
        assert_eq!(acc.len(), 1);
    }

    #[tokio::test]
    async fn test_thousand_records_into_hundred_buckets() {
        let records: Vec<_> = (0..1000).map(|i| record(T0 + i, i as f64)).collect();
        let downsampler = downsampler_with(&records);

        let buckets = downsampler
            .query(ts(T0), ts(T0 + 1000), Some(100))
            .await
            .unwrap();

        assert_eq!(buckets.len(), 100);
        for (k, bucket) in buckets.iter().enumerate() {
            assert_eq!(bucket.samples, 10);
            assert_eq!(bucket.start, ts(T0 + 10 * k as u64));
            let expected = 10.0 * k as f64 + 4.5;
            assert_relative_eq!(bucket.temperature, expected, epsilon = 1e-9);
            assert_relative_eq!(bucket.relative_humidity, 2.0 * expected, epsilon = 1e-9);
            assert_relative_eq!(bucket.magnetic[2], expected, epsilon = 1e-9);
            assert_relative_eq!(bucket.pitch, -expected, epsilon = 1e-9);
        }
    }

    #[tokio::test]
    async fn test_buckets_are_exact_means_and_skip_empty() {
        // Records only in the first and last thirds of the range
        let records = vec![
            record(T0, 1.0),
            record(T0 + 1, 3.0),
            record(T0 + 7, 10.0),
            record(T0 + 9, 20.0),
            record(T0 + 10, 99.0),
        ];
        let downsampler = downsampler_with(&records);

        let buckets = downsampler
            .query(ts(T0), ts(T0 + 10), Some(3))
            .await
            .unwrap();

        assert_eq!(buckets.len(), 2);
        assert!(buckets[0].start < buckets[1].start);
        assert_eq!(buckets[0].samples, 2);
        assert_relative_eq!(buckets[0].temperature, 2.0);
        assert_relative_eq!(buckets[0].lux, 2.0);
        // The record at `end` is excluded
        assert_eq!(buckets[1].samples, 2);
        assert_relative_eq!(buckets[1].temperature, 15.0);
        assert_eq!(buckets[1].start, Timestamp::new(T0 + 6, 666_666_667));
    }

    #[tokio::test]
    async fn test_never_more_buckets_than_requested() {
        let records: Vec<_> = (0..50).map(|i| record(T0 + i, 1.0)).collect();
        let downsampler = downsampler_with(&records);

        let buckets = downsampler.query(ts(T0), ts(T0 + 50), Some(7)).await.unwrap();
        assert_eq!(buckets.len(), 7);
        assert_eq!(buckets.iter().map(|b| b.samples).sum::<u64>(), 50);

        let buckets = downsampler.query(ts(T0), ts(T0 + 50), None).await.unwrap();
        assert_eq!(buckets.len(), 50);
    }

    #[tokio::test]
    async fn test_empty_range_for_any_bucket_count() {
        let downsampler = downsampler_with(&[record(T0, 1.0)]);
        for buckets in [None, Some(-3), Some(0), Some(1), Some(1_000_000)] {
            let result = downsampler.query(ts(T0), ts(T0), buckets).await.unwrap();
            assert!(result.is_empty());
        }
    }

    #[tokio::test]
    async fn test_invalid_requests() {
        let downsampler = downsampler_with(&[record(T0, 1.0)]);

        assert!(matches!(
            downsampler.query(ts(T0 + 5), ts(T0), Some(10)).await,
            Err(QueryError::InvalidRange { .. })
        ));
        assert!(matches!(
            downsampler.query(ts(T0), ts(T0 + 5), Some(0)).await,
            Err(QueryError::InvalidRange { .. })
        ));
        assert!(matches!(
            downsampler.query(ts(T0), ts(T0 + 5), Some(-1)).await,
            Err(QueryError::InvalidRange { .. })
        ));
        assert!(matches!(
            downsampler.query(ts(T0), ts(T0 + 5), Some(10_001)).await,
            Err(QueryError::TooManyBuckets { requested: 10_001, .. })
        ));
    }

    #[tokio::test]
    async fn test_unknown_orientation_averages_to_unknown() {
        let mut unknown = record(T0 + 1, 2.0);
        unknown.orientation = station_shared::Orientation::unknown();
        let downsampler = downsampler_with(&[record(T0, 1.0), unknown]);

        let buckets = downsampler.query(ts(T0), ts(T0 + 2), Some(1)).await.unwrap();
        assert_eq!(buckets.len(), 1);
        assert!(buckets[0].roll.is_nan());
        assert_relative_eq!(buckets[0].temperature, 1.5);
    }
}
