//! Wire types shared by the telemetry station and its consumers.
//!
//! Everything that crosses the HTTP/WebSocket boundary lives here so that
//! the server and any client agree on field names and encodings.

mod history;
mod station_client;
mod telemetry;
mod types;

pub use history::BucketAggregate;
pub use station_client::{StationClient, StationError};
pub use telemetry::{Frame, Orientation, TelemetryMessage, Vec3};
pub use types::{HealthInfo, Timestamp, TimestampParseError};
