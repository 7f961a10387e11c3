//! Synthetic frame generator for running the station without hardware.
//!
//! The first frame is derived from the wall clock (a diurnal temperature,
//! humidity and light cycle plus slowly rotating vector baselines). Each later
//! frame is a correlated random walk from the previous one, except for light,
//! which is always recomputed from the time of day.

use std::f64::consts::PI;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use station_shared::{Frame, Timestamp, Vec3};

use crate::sensors::FrameSource;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Walk step standard deviations.
const TEMPERATURE_STEP: f64 = 0.02;
const HUMIDITY_STEP: f64 = 0.05;
const ACCELERATION_STEP: f64 = 0.01;
const GYRO_STEP: f64 = 0.05;
const MAGNETIC_STEP: f64 = 0.2;

/// Daylight window as a fraction of the UTC day.
const DAWN: f64 = 0.23;
const DUSK: f64 = 0.77;

pub struct SyntheticGenerator {
    rng: StdRng,
    previous: Option<Frame>,
}

impl SyntheticGenerator {
    /// Generator seeded from OS entropy.
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_os_rng(),
            previous: None,
        }
    }

    /// Deterministic generator: the same seed and timestamps produce the same
    /// frames.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            previous: None,
        }
    }

    /// Produce the frame for wall-clock time `t` (unix seconds).
    pub fn sample_at(&mut self, t: f64) -> Frame {
        let day_frac = t.rem_euclid(SECONDS_PER_DAY) / SECONDS_PER_DAY;

        let mut frame = match self.previous {
            None => self.baseline(t, day_frac),
            Some(previous) => self.walk(&previous),
        };

        let lux = daylight_lux(day_frac) + self.noise(100.0);
        let infrared = 0.2 * lux + self.noise(10.0);
        let visible = 0.8 * lux + self.noise(20.0);
        frame.lux = to_intensity(lux);
        frame.infrared = to_intensity(infrared);
        frame.visible = to_intensity(visible);

        self.previous = Some(frame);
        frame
    }

    fn baseline(&mut self, t: f64, day_frac: f64) -> Frame {
        let cycle = (2.0 * PI * day_frac).sin();
        Frame {
            temperature: round_to(22.0 + 5.0 * cycle + self.noise(0.1), 2),
            humidity: round_to(60.0 - 10.0 * cycle + self.noise(0.2), 2),
            acceleration: round_vec([
                0.01 * t.sin(),
                0.01 * t.cos(),
                1.0 + 0.01 * (0.5 * t).sin(),
            ]),
            gyro: round_vec([
                10.0 * (0.1 * t).sin(),
                10.0 * (0.1 * t).cos(),
                0.5 * (0.05 * t).sin(),
            ]),
            magnetic: round_vec([
                30.0 + 2.0 * (0.01 * t).sin(),
                -10.0 + 2.0 * (0.01 * t).cos(),
                40.0 + (0.02 * t).sin(),
            ]),
            ..Default::default()
        }
    }

    fn walk(&mut self, previous: &Frame) -> Frame {
        Frame {
            temperature: round_to(previous.temperature + self.noise(TEMPERATURE_STEP), 2),
            humidity: round_to(previous.humidity + self.noise(HUMIDITY_STEP), 2),
            acceleration: self.walk_vec(previous.acceleration, ACCELERATION_STEP),
            gyro: self.walk_vec(previous.gyro, GYRO_STEP),
            magnetic: self.walk_vec(previous.magnetic, MAGNETIC_STEP),
            ..Default::default()
        }
    }

    fn walk_vec(&mut self, v: Vec3, sigma: f64) -> Vec3 {
        round_vec(std::array::from_fn(|i| v[i] + self.noise(sigma)))
    }

    fn noise(&mut self, sigma: f64) -> f64 {
        let z: f64 = self.rng.sample(StandardNormal);
        sigma * z
    }
}

impl Default for SyntheticGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSource for SyntheticGenerator {
    fn sample(&mut self) -> Frame {
        self.sample_at(Timestamp::now().as_secs_f64())
    }
}

/// Noise-free lux for a fraction of the day: a half-sine between dawn and
/// dusk peaking at 50000, dark otherwise.
fn daylight_lux(day_frac: f64) -> f64 {
    if day_frac > DAWN && day_frac < DUSK {
        10_000.0 + 40_000.0 * (PI * (day_frac - DAWN) / (DUSK - DAWN)).sin()
    } else {
        0.0
    }
}

fn to_intensity(value: f64) -> u32 {
    value.max(0.0).round() as u32
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

fn round_vec(v: Vec3) -> Vec3 {
    v.map(|x| round_to(x, 3))
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2024-06-01T12:00:00Z, midday
    const NOON: f64 = 1_717_243_200.0;
    // 2024-06-01T02:00:00Z, night
    const NIGHT: f64 = 1_717_207_200.0;

    #[test]
    fn test_seeded_generators_agree() {
        let mut a = SyntheticGenerator::seeded(7);
        let mut b = SyntheticGenerator::seeded(7);
        for i in 0..20 {
            let t = NOON + i as f64 * 0.5;
            assert_eq!(a.sample_at(t), b.sample_at(t));
        }
    }

    #[test]
    fn test_first_frame_near_baseline() {
        let mut generator = SyntheticGenerator::seeded(1);
        let frame = generator.sample_at(NOON);

        // sin(2π·0.5) = 0, so the diurnal terms vanish at noon
        assert!((frame.temperature - 22.0).abs() < 1.0);
        assert!((frame.humidity - 60.0).abs() < 2.0);
        assert!((frame.acceleration[2] - 1.0).abs() <= 0.011);
        assert!((frame.magnetic[0] - 30.0).abs() <= 2.001);
        assert!(frame.is_finite());
    }

    #[test]
    fn test_walk_stays_close_to_previous() {
        let mut generator = SyntheticGenerator::seeded(3);
        let mut previous = generator.sample_at(NOON);
        for i in 1..200 {
            let frame = generator.sample_at(NOON + i as f64 * 0.5);
            // Eight standard deviations plus rounding
            assert!((frame.temperature - previous.temperature).abs() < 0.17);
            assert!((frame.gyro[0] - previous.gyro[0]).abs() < 0.41);
            assert!((frame.magnetic[1] - previous.magnetic[1]).abs() < 1.61);
            previous = frame;
        }
    }

    #[test]
    fn test_light_follows_daylight() {
        let mut generator = SyntheticGenerator::seeded(11);
        let day = generator.sample_at(NOON);
        assert!(day.lux > 40_000);
        assert!(day.visible > day.infrared);

        let mut generator = SyntheticGenerator::seeded(11);
        let night = generator.sample_at(NIGHT);
        // Noise around zero is clamped, never wraps around
        assert!(night.lux < 1_000);
        assert!(night.infrared < 1_000);
    }

    #[test]
    fn test_values_are_rounded() {
        let mut generator = SyntheticGenerator::seeded(5);
        for i in 0..10 {
            let frame = generator.sample_at(NOON + i as f64);
            assert_eq!(frame.temperature, round_to(frame.temperature, 2));
            assert_eq!(frame.humidity, round_to(frame.humidity, 2));
            for v in frame.acceleration.iter().chain(&frame.gyro).chain(&frame.magnetic) {
                assert_eq!(*v, round_to(*v, 3));
            }
        }
    }

    #[test]
    fn test_daylight_profile() {
        assert_eq!(daylight_lux(0.1), 0.0);
        assert_eq!(daylight_lux(0.9), 0.0);
        assert!((daylight_lux(0.5) - 50_000.0).abs() < 1e-6);
    }
}
