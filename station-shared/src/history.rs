//! Historical query result types.

use serde::{Deserialize, Serialize};

use crate::telemetry::angle_or_unknown;
use crate::{Timestamp, Vec3};

/// Mean of every numeric Frame/Orientation field over one time bucket.
///
/// Buckets with no samples are never produced, so a sequence of aggregates
/// is not necessarily dense.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketAggregate {
    /// Inclusive start of the bucket's half-open interval
    pub start: Timestamp,
    /// Number of records averaged into this bucket
    pub samples: u64,
    pub temperature: f64,
    pub relative_humidity: f64,
    pub lux: f64,
    pub infrared: f64,
    pub visible: f64,
    pub acceleration: Vec3,
    pub gyro: Vec3,
    pub magnetic: Vec3,
    #[serde(deserialize_with = "angle_or_unknown")]
    pub roll: f64,
    #[serde(deserialize_with = "angle_or_unknown")]
    pub pitch: f64,
    #[serde(deserialize_with = "angle_or_unknown")]
    pub yaw: f64,
}
