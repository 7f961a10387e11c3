//! Attitude estimation from the inertial/magnetic channel.
//!
//! Gradient-descent MARG fusion (Madgwick, 2010): the gyroscope rate is
//! integrated into a quaternion and one normalized gradient step pulls the
//! estimate toward the attitude implied by gravity and the magnetic field.
//! With no magnetometer reading the step uses gravity alone.
//!
//! Readings are fused in the units the channels report them. The quaternion
//! is carried across calls and is only reset by building a new estimator.

use nalgebra::{Matrix3x4, Matrix6x4, Quaternion, Vector3, Vector4, Vector6};
use station_shared::{Frame, Orientation};
use tracing::debug;

use crate::calibration::CalibrationProfile;
use crate::sensors::InertialReading;

pub const DEFAULT_GAIN: f64 = 0.033;
pub const DEFAULT_SAMPLE_PERIOD: f64 = 0.5;

/// Fusion parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionConfig {
    /// Gradient step gain (beta).
    pub gain: f64,
    /// Nominal time between updates in seconds.
    pub sample_period: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            gain: DEFAULT_GAIN,
            sample_period: DEFAULT_SAMPLE_PERIOD,
        }
    }
}

/// Attitude quaternion carried between updates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionState {
    quaternion: Quaternion<f64>,
}

impl FusionState {
    /// The rest attitude `(1, 0, 0, 0)`.
    pub fn identity() -> Self {
        Self {
            quaternion: Quaternion::identity(),
        }
    }

    pub fn quaternion(&self) -> Quaternion<f64> {
        self.quaternion
    }

    /// Aerospace (ZYX) Euler angles in degrees.
    pub fn orientation(&self) -> Orientation {
        quaternion_to_euler(&self.quaternion)
    }
}

impl Default for FusionState {
    fn default() -> Self {
        Self::identity()
    }
}

/// Per-station orientation estimator.
#[derive(Debug, Clone)]
pub struct OrientationEstimator {
    config: FusionConfig,
    state: FusionState,
    calibration: Option<CalibrationProfile>,
}

impl OrientationEstimator {
    pub fn new(config: FusionConfig) -> Self {
        Self {
            config,
            state: FusionState::identity(),
            calibration: None,
        }
    }

    /// Estimator that corrects every reading with `profile` before fusing.
    pub fn with_calibration(config: FusionConfig, profile: CalibrationProfile) -> Self {
        Self {
            calibration: Some(profile),
            ..Self::new(config)
        }
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    pub fn state(&self) -> &FusionState {
        &self.state
    }

    /// Fuse one frame using the configured nominal period.
    pub fn update(&mut self, frame: &Frame) -> Orientation {
        self.update_with_period(frame, self.config.sample_period)
    }

    /// Fuse one frame using an explicit elapsed time `dt` (seconds).
    pub fn update_with_period(&mut self, frame: &Frame, dt: f64) -> Orientation {
        let raw = InertialReading {
            acceleration: frame.acceleration,
            gyro: frame.gyro,
            magnetic: frame.magnetic,
        };
        let reading = match &self.calibration {
            Some(profile) => profile.apply(&raw),
            None => raw,
        };

        self.state.quaternion = madgwick_step(
            self.state.quaternion,
            Vector3::from(reading.gyro),
            Vector3::from(reading.acceleration),
            Vector3::from(reading.magnetic),
            self.config.gain,
            dt,
        );

        let orientation = self.state.orientation();
        if !orientation.is_known() {
            debug!("Fusion produced a non-finite attitude: {:?}", self.state.quaternion);
        }
        orientation
    }
}

impl Default for OrientationEstimator {
    fn default() -> Self {
        Self::new(FusionConfig::default())
    }
}

/// One MARG update. Returns `q` unchanged when the gyro rate is zero or
/// non-finite.
fn madgwick_step(
    q: Quaternion<f64>,
    gyr: Vector3<f64>,
    acc: Vector3<f64>,
    mag: Vector3<f64>,
    gain: f64,
    dt: f64,
) -> Quaternion<f64> {
    if !is_positive(gyr.norm()) {
        return q;
    }
    if !is_positive(mag.norm()) {
        return imu_step(q, gyr, acc, gain, dt);
    }

    let mut q_dot = q * Quaternion::from_imag(gyr) * 0.5;

    let a_norm = acc.norm();
    if a_norm > 0.0 {
        let a = acc / a_norm;
        let m = mag / mag.norm();

        // Earth-frame field direction
        let h = q * Quaternion::from_imag(m) * q.conjugate();
        let bx = h.i.hypot(h.j);
        let bz = h.k;

        let qn = q.normalize();
        let (qw, qx, qy, qz) = (qn.w, qn.i, qn.j, qn.k);

        #[rustfmt::skip]
        let f = Vector6::new(
            2.0 * (qx * qz - qw * qy) - a.x,
            2.0 * (qw * qx + qy * qz) - a.y,
            2.0 * (0.5 - qx * qx - qy * qy) - a.z,
            2.0 * bx * (0.5 - qy * qy - qz * qz) + 2.0 * bz * (qx * qz - qw * qy) - m.x,
            2.0 * bx * (qx * qy - qw * qz) + 2.0 * bz * (qw * qx + qy * qz) - m.y,
            2.0 * bx * (qw * qy + qx * qz) + 2.0 * bz * (0.5 - qx * qx - qy * qy) - m.z,
        );
        #[rustfmt::skip]
        let j = Matrix6x4::new(
            -2.0 * qy, 2.0 * qz, -2.0 * qw, 2.0 * qx,
            2.0 * qx, 2.0 * qw, 2.0 * qz, 2.0 * qy,
            0.0, -4.0 * qx, -4.0 * qy, 0.0,
            -2.0 * bz * qy, 2.0 * bz * qz, -4.0 * bx * qy - 2.0 * bz * qw, -4.0 * bx * qz + 2.0 * bz * qx,
            -2.0 * bx * qz + 2.0 * bz * qx, 2.0 * bx * qy + 2.0 * bz * qw, 2.0 * bx * qx + 2.0 * bz * qz, -2.0 * bx * qw + 2.0 * bz * qy,
            2.0 * bx * qy, 2.0 * bx * qz - 4.0 * bz * qx, 2.0 * bx * qw - 4.0 * bz * qy, 2.0 * bx * qx,
        );

        q_dot -= gradient_step(j.transpose() * f, gain);
    }

    integrate(q, q_dot, dt)
}

/// Gravity-only update for frames without a magnetometer reading.
fn imu_step(
    q: Quaternion<f64>,
    gyr: Vector3<f64>,
    acc: Vector3<f64>,
    gain: f64,
    dt: f64,
) -> Quaternion<f64> {
    let mut q_dot = q * Quaternion::from_imag(gyr) * 0.5;

    let a_norm = acc.norm();
    if a_norm > 0.0 {
        let a = acc / a_norm;
        let qn = q.normalize();
        let (qw, qx, qy, qz) = (qn.w, qn.i, qn.j, qn.k);

        let f = Vector3::new(
            2.0 * (qx * qz - qw * qy) - a.x,
            2.0 * (qw * qx + qy * qz) - a.y,
            2.0 * (0.5 - qx * qx - qy * qy) - a.z,
        );
        #[rustfmt::skip]
        let j = Matrix3x4::new(
            -2.0 * qy, 2.0 * qz, -2.0 * qw, 2.0 * qx,
            2.0 * qx, 2.0 * qw, 2.0 * qz, 2.0 * qy,
            0.0, -4.0 * qx, -4.0 * qy, 0.0,
        );

        q_dot -= gradient_step(j.transpose() * f, gain);
    }

    integrate(q, q_dot, dt)
}

/// `gain · ∇/|∇|` as a quaternion. A zero gradient (estimate already
/// consistent with the references) gives no correction.
fn gradient_step(gradient: Vector4<f64>, gain: f64) -> Quaternion<f64> {
    let norm = gradient.norm();
    if !is_positive(norm) {
        return Quaternion::new(0.0, 0.0, 0.0, 0.0);
    }
    let g = gradient / norm * gain;
    Quaternion::new(g[0], g[1], g[2], g[3])
}

/// False for zero, negative and NaN.
fn is_positive(x: f64) -> bool {
    x > 0.0
}

fn integrate(q: Quaternion<f64>, q_dot: Quaternion<f64>, dt: f64) -> Quaternion<f64> {
    let next = q + q_dot * dt;
    next / next.norm()
}

/// Quaternion to roll/pitch/yaw in degrees. The all-zero quaternion maps to
/// zero angles; NaN components propagate.
pub fn quaternion_to_euler(q: &Quaternion<f64>) -> Orientation {
    let (w, x, y, z) = (q.w, q.i, q.j, q.k);

    let roll = (2.0 * (w * x + y * z)).atan2(1.0 - 2.0 * (x * x + y * y));
    let pitch = (2.0 * (w * y - z * x)).clamp(-1.0, 1.0).asin();
    let yaw = (2.0 * (w * z + x * y)).atan2(1.0 - 2.0 * (y * y + z * z));

    Orientation::new(roll.to_degrees(), pitch.to_degrees(), yaw.to_degrees())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn frame(acc: [f64; 3], gyro: [f64; 3], mag: [f64; 3]) -> Frame {
        Frame {
            acceleration: acc,
            gyro,
            magnetic: mag,
            ..Default::default()
        }
    }

    #[test]
    fn test_identical_inputs_evolve_identically() {
        let mut a = OrientationEstimator::default();
        let mut b = OrientationEstimator::default();

        for i in 0..50 {
            let t = i as f64 * 0.1;
            let f = frame(
                [0.1 * t.sin(), 0.2, 9.8],
                [0.5 * t.cos(), 0.1, -0.2],
                [20.0, 5.0 * t.sin(), 40.0],
            );
            assert_eq!(a.update(&f), b.update(&f));
        }
        assert_eq!(a.state(), b.state());
    }

    #[test]
    fn test_zero_gyro_leaves_rest_attitude() {
        let mut estimator = OrientationEstimator::default();
        let rest = frame([0.0, 0.0, 9.8], [0.0, 0.0, 0.0], [20.0, 0.0, 40.0]);

        for _ in 0..100 {
            let o = estimator.update(&rest);
            assert_relative_eq!(o.roll, 0.0, epsilon = 1e-9);
            assert_relative_eq!(o.pitch, 0.0, epsilon = 1e-9);
        }
        assert_eq!(estimator.state(), &FusionState::identity());
    }

    #[test]
    fn test_consistent_references_hold_level() {
        let mut estimator = OrientationEstimator::default();
        // Tiny rate so the fusion step runs; references agree with identity
        let still = frame([0.0, 0.0, 9.8], [1e-4, 0.0, 0.0], [20.0, 0.0, 40.0]);

        for _ in 0..200 {
            let o = estimator.update(&still);
            assert!(o.is_known());
            // A normalized gradient step moves the attitude by at most ~1.9°
            assert!(o.roll.abs() < 2.5);
            assert!(o.pitch.abs() < 2.5);
        }
    }

    #[test]
    fn test_converges_to_gravity_tilt() {
        let mut estimator = OrientationEstimator::default();
        let tilt = 20f64.to_radians();
        let tilted = frame(
            [0.0, 9.8 * tilt.sin(), 9.8 * tilt.cos()],
            [1e-6, 0.0, 0.0],
            [0.0; 3],
        );

        let mut last = Orientation::default();
        for _ in 0..200 {
            last = estimator.update(&tilted);
        }
        assert!((last.roll - 20.0).abs() < 2.5, "roll = {}", last.roll);
        assert_relative_eq!(last.pitch, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_quaternion_stays_unit() {
        let mut estimator = OrientationEstimator::default();
        for i in 0..100 {
            let t = i as f64;
            estimator.update(&frame(
                [t.sin(), t.cos(), 9.8],
                [10.0 * t.sin(), 5.0, -3.0],
                [30.0, -10.0 + t.cos(), 40.0],
            ));
            assert_relative_eq!(estimator.state().quaternion().norm(), 1.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_non_finite_input_passes_through() {
        let mut estimator = OrientationEstimator::default();
        let mag = [20.0, 0.0, 40.0];

        // NaN gyro norm is not > 0, so the attitude is untouched
        let o = estimator.update(&frame([0.0, 0.0, 9.8], [f64::NAN, 0.0, 0.0], mag));
        assert!(o.is_known());

        let o = estimator.update(&frame([0.0, 0.0, 9.8], [f64::INFINITY, 0.0, 0.0], mag));
        assert!(!o.is_known());
        assert!(serde_json::to_value(o).unwrap()["roll"].is_null());
    }

    #[test]
    fn test_euler_conversion() {
        let zero = quaternion_to_euler(&Quaternion::new(0.0, 0.0, 0.0, 0.0));
        assert_eq!(zero, Orientation::new(0.0, 0.0, 0.0));

        let half = std::f64::consts::FRAC_PI_4;
        let roll_90 = quaternion_to_euler(&Quaternion::new(half.cos(), half.sin(), 0.0, 0.0));
        assert_relative_eq!(roll_90.roll, 90.0, epsilon = 1e-9);
        assert_relative_eq!(roll_90.pitch, 0.0, epsilon = 1e-9);

        let yaw_90 = quaternion_to_euler(&Quaternion::new(half.cos(), 0.0, 0.0, half.sin()));
        assert_relative_eq!(yaw_90.yaw, 90.0, epsilon = 1e-9);
    }

    #[test]
    fn test_calibration_is_applied_before_fusion() {
        let profile = CalibrationProfile {
            gyro_bias: [0.5, 0.0, 0.0],
            ..Default::default()
        };
        let mut calibrated =
            OrientationEstimator::with_calibration(FusionConfig::default(), profile);
        // The bias cancels the whole rate, so nothing moves
        calibrated.update(&frame([0.0, 0.0, 9.8], [0.5, 0.0, 0.0], [20.0, 0.0, 40.0]));
        assert_eq!(calibrated.state(), &FusionState::identity());

        let mut raw = OrientationEstimator::default();
        raw.update(&frame([0.0, 0.0, 9.8], [0.5, 0.0, 0.0], [20.0, 0.0, 40.0]));
        assert_ne!(raw.state(), &FusionState::identity());
    }
}
