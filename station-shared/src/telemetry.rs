//! Live telemetry types streamed once per tick.

use serde::{Deserialize, Deserializer, Serialize};

use crate::Timestamp;

/// A 3-axis vector reading (x, y, z).
pub type Vec3 = [f64; 3];

/// One instant's complete raw measurement.
///
/// Every field is always populated. A sensor channel that failed to read
/// contributes zeros rather than leaving its fields out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Air temperature in °C
    pub temperature: f64,
    /// Relative humidity in percent
    #[serde(rename = "relative_humidity")]
    pub humidity: f64,
    /// Illuminance in lux
    pub lux: u32,
    /// Raw infrared channel intensity
    pub infrared: u32,
    /// Raw visible channel intensity
    pub visible: u32,
    /// Linear acceleration
    pub acceleration: Vec3,
    /// Angular rate
    pub gyro: Vec3,
    /// Magnetic field
    pub magnetic: Vec3,
}

impl Frame {
    /// True when every floating point field is finite.
    pub fn is_finite(&self) -> bool {
        self.temperature.is_finite()
            && self.humidity.is_finite()
            && self
                .acceleration
                .iter()
                .chain(&self.gyro)
                .chain(&self.magnetic)
                .all(|v| v.is_finite())
    }
}

/// Attitude angles in degrees.
///
/// Angles may be non-finite when the fusion input was degenerate. Non-finite
/// values mean "unknown": they serialize as JSON `null` and `null` reads back
/// as NaN.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Orientation {
    #[serde(deserialize_with = "angle_or_unknown")]
    pub pitch: f64,
    #[serde(deserialize_with = "angle_or_unknown")]
    pub roll: f64,
    #[serde(deserialize_with = "angle_or_unknown")]
    pub yaw: f64,
}

impl Orientation {
    pub fn new(roll: f64, pitch: f64, yaw: f64) -> Self {
        Self { pitch, roll, yaw }
    }

    /// Orientation with every angle unknown.
    pub fn unknown() -> Self {
        Self::new(f64::NAN, f64::NAN, f64::NAN)
    }

    /// True when all three angles are finite.
    pub fn is_known(&self) -> bool {
        self.roll.is_finite() && self.pitch.is_finite() && self.yaw.is_finite()
    }
}

impl Default for Orientation {
    fn default() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }
}

pub(crate) fn angle_or_unknown<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<f64, D::Error> {
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
}

/// Message pushed to every live subscriber once per tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryMessage {
    /// Timestamp of the persisted record this message mirrors
    pub timestamp: Timestamp,
    pub frame: Frame,
    pub orientation: Orientation,
}
