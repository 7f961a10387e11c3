//! Inertial sensor calibration profile.
//!
//! Stores the gyro bias and the accelerometer/magnetometer offset and scale
//! factors produced by an offline calibration session, and applies them to
//! raw readings.

use serde::{Deserialize, Serialize};
use station_shared::Vec3;
use thiserror::Error;

use crate::sensors::InertialReading;

/// Errors estimating a profile from recorded samples.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CalibrationError {
    #[error("no inertial samples to calibrate from")]
    InsufficientData,

    #[error("{sensor} axis {axis} has zero range; rotate the unit through all orientations")]
    DegenerateAxis { sensor: &'static str, axis: usize },
}

/// Calibration data for the inertial/magnetic unit.
///
/// ```text
/// gyro  = raw - gyro_bias
/// accel = (raw - accel_offset) * accel_scale
/// mag   = (raw - mag_offset) * mag_scale
/// ```
/// All operations are component-wise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationProfile {
    pub gyro_bias: Vec3,
    pub accel_offset: Vec3,
    pub accel_scale: Vec3,
    pub mag_offset: Vec3,
    pub mag_scale: Vec3,
}

impl CalibrationProfile {
    pub fn calibrate_gyro(&self, raw: Vec3) -> Vec3 {
        std::array::from_fn(|i| raw[i] - self.gyro_bias[i])
    }

    pub fn calibrate_accel(&self, raw: Vec3) -> Vec3 {
        std::array::from_fn(|i| (raw[i] - self.accel_offset[i]) * self.accel_scale[i])
    }

    pub fn calibrate_mag(&self, raw: Vec3) -> Vec3 {
        std::array::from_fn(|i| (raw[i] - self.mag_offset[i]) * self.mag_scale[i])
    }

    /// Apply all three corrections to a reading.
    pub fn apply(&self, raw: &InertialReading) -> InertialReading {
        InertialReading {
            acceleration: self.calibrate_accel(raw.acceleration),
            gyro: self.calibrate_gyro(raw.gyro),
            magnetic: self.calibrate_mag(raw.magnetic),
        }
    }

    /// Estimate a profile from a session where the unit was rotated through
    /// all orientations.
    ///
    /// Gyro bias is the per-axis mean. Accelerometer and magnetometer offsets
    /// are the midpoint of each axis' range, and scales equalize each axis'
    /// half-range to the mean half-range.
    pub fn estimate(samples: &[InertialReading]) -> Result<Self, CalibrationError> {
        if samples.is_empty() {
            return Err(CalibrationError::InsufficientData);
        }

        let count = samples.len() as f64;
        let gyro_bias = std::array::from_fn(|axis| {
            samples.iter().map(|s| s.gyro[axis]).sum::<f64>() / count
        });

        let (accel_offset, accel_scale) =
            hard_iron_soft_scale("accelerometer", samples.iter().map(|s| s.acceleration))?;
        let (mag_offset, mag_scale) =
            hard_iron_soft_scale("magnetometer", samples.iter().map(|s| s.magnetic))?;

        Ok(Self {
            gyro_bias,
            accel_offset,
            accel_scale,
            mag_offset,
            mag_scale,
        })
    }

    /// Save to JSON file
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<(), std::io::Error> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)
    }

    /// Load from JSON file
    pub fn load_from_file(path: &std::path::Path) -> Result<Self, std::io::Error> {
        let json = std::fs::read_to_string(path)?;
        serde_json::from_str(&json)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}

impl Default for CalibrationProfile {
    /// Identity profile (no bias, no offset, unit scale)
    fn default() -> Self {
        Self {
            gyro_bias: [0.0; 3],
            accel_offset: [0.0; 3],
            accel_scale: [1.0; 3],
            mag_offset: [0.0; 3],
            mag_scale: [1.0; 3],
        }
    }
}

fn hard_iron_soft_scale(
    sensor: &'static str,
    vectors: impl Iterator<Item = Vec3>,
) -> Result<(Vec3, Vec3), CalibrationError> {
    let mut min = [f64::INFINITY; 3];
    let mut max = [f64::NEG_INFINITY; 3];
    for v in vectors {
        for axis in 0..3 {
            min[axis] = min[axis].min(v[axis]);
            max[axis] = max[axis].max(v[axis]);
        }
    }

    let offset: Vec3 = std::array::from_fn(|axis| (max[axis] + min[axis]) / 2.0);
    let half_range: Vec3 = std::array::from_fn(|axis| (max[axis] - min[axis]) / 2.0);

    if let Some(axis) = half_range.iter().position(|&r| r <= 0.0 || r.is_nan()) {
        return Err(CalibrationError::DegenerateAxis { sensor, axis });
    }

    let mean_half_range = half_range.iter().sum::<f64>() / 3.0;
    let scale = std::array::from_fn(|axis| mean_half_range / half_range[axis]);
    Ok((offset, scale))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn reading(acc: Vec3, gyro: Vec3, mag: Vec3) -> InertialReading {
        InertialReading {
            acceleration: acc,
            gyro,
            magnetic: mag,
        }
    }

    #[test]
    fn test_default_profile_is_identity() {
        let profile = CalibrationProfile::default();
        let raw = reading([1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]);
        assert_eq!(profile.apply(&raw), raw);
    }

    #[test]
    fn test_apply_corrections() {
        let profile = CalibrationProfile {
            gyro_bias: [0.5, -0.5, 1.0],
            accel_offset: [0.1, 0.0, -0.1],
            accel_scale: [2.0, 1.0, 0.5],
            mag_offset: [10.0, 0.0, 0.0],
            mag_scale: [1.0, 2.0, 1.0],
        };

        assert_eq!(profile.calibrate_gyro([1.0, 1.0, 1.0]), [0.5, 1.5, 0.0]);
        let acc = profile.calibrate_accel([1.1, 1.0, 0.9]);
        assert_relative_eq!(acc[0], 2.0, epsilon = 1e-12);
        assert_relative_eq!(acc[1], 1.0, epsilon = 1e-12);
        assert_relative_eq!(acc[2], 0.5, epsilon = 1e-12);
        assert_eq!(profile.calibrate_mag([15.0, 3.0, 4.0]), [5.0, 6.0, 4.0]);
    }

    #[test]
    fn test_estimate_recovers_offsets_and_scales() {
        // Accelerometer spans x: [-1, 3], y: [-2, 2], z: [-4, 4] (half-ranges 2, 2, 4)
        let samples = vec![
            reading([-1.0, 0.0, 0.0], [0.1, 0.2, 0.3], [10.0, -10.0, 0.0]),
            reading([3.0, 0.0, 0.0], [0.3, 0.2, 0.1], [30.0, 10.0, 0.0]),
            reading([1.0, -2.0, -4.0], [0.2, 0.2, 0.2], [20.0, 0.0, -10.0]),
            reading([1.0, 2.0, 4.0], [0.2, 0.2, 0.2], [20.0, 0.0, 10.0]),
        ];

        let profile = CalibrationProfile::estimate(&samples).unwrap();

        assert_relative_eq!(profile.gyro_bias[0], 0.2, epsilon = 1e-12);
        assert_relative_eq!(profile.gyro_bias[2], 0.2, epsilon = 1e-12);

        assert_eq!(profile.accel_offset, [1.0, 0.0, 0.0]);
        let mean = 8.0 / 3.0;
        assert_relative_eq!(profile.accel_scale[0], mean / 2.0, epsilon = 1e-12);
        assert_relative_eq!(profile.accel_scale[2], mean / 4.0, epsilon = 1e-12);

        assert_eq!(profile.mag_offset, [20.0, 0.0, 0.0]);
        // Mag half-ranges are all 10, so scales are unity
        for s in profile.mag_scale {
            assert_relative_eq!(s, 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_estimate_rejects_degenerate_input() {
        assert_eq!(
            CalibrationProfile::estimate(&[]),
            Err(CalibrationError::InsufficientData)
        );

        let still = vec![reading([0.0, 0.0, 1.0], [0.0; 3], [1.0; 3]); 5];
        assert!(matches!(
            CalibrationProfile::estimate(&still),
            Err(CalibrationError::DegenerateAxis {
                sensor: "accelerometer",
                axis: 0
            })
        ));
    }

    #[test]
    fn test_json_round_trip_uses_profile_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("imu_calibration.json");
        let profile = CalibrationProfile {
            gyro_bias: [0.01, 0.02, 0.03],
            ..Default::default()
        };
        profile.save_to_file(&path).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        for key in [
            "gyro_bias",
            "accel_offset",
            "accel_scale",
            "mag_offset",
            "mag_scale",
        ] {
            assert!(raw.get(key).is_some(), "missing {key}");
        }

        assert_eq!(CalibrationProfile::load_from_file(&path).unwrap(), profile);
    }

    #[test]
    fn test_corrupt_profile_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = CalibrationProfile::load_from_file(&path).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }
}
