//! Fault-isolated acquisition from the station's sensor channels.
//!
//! A station has three channels: thermal/humidity, light, and a 9-axis
//! inertial/magnetic unit. Each is read independently through
//! [`SensorChannel`]; a channel that fails contributes zeros for its own
//! fields and never stops the others from reporting.

pub mod recorded;

use station_shared::{Frame, Vec3};
use thiserror::Error;
use tracing::{info, warn};

/// Failure of a single channel read.
#[derive(Error, Debug)]
pub enum ChannelError {
    /// The device did not produce a reading this time.
    #[error("channel unavailable: {0}")]
    Unavailable(String),

    /// Bus or file level I/O failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The read exceeded the driver's time bound.
    #[error("read timed out")]
    Timeout,
}

/// Errors constructing a channel set.
#[derive(Error, Debug)]
pub enum SensorError {
    #[error("no sensor channels available")]
    NoChannels,
}

/// One physical measurement channel.
///
/// `read` performs a single bounded attempt. Retrying is the caller's
/// decision, and the channel set never retries within a tick.
pub trait SensorChannel: Send {
    type Reading: Default;

    /// Short name used in log messages.
    fn name(&self) -> &str;

    fn read(&mut self) -> Result<Self::Reading, ChannelError>;
}

/// Temperature (°C) and relative humidity (%).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ThermalReading {
    pub temperature: f64,
    pub humidity: f64,
}

/// Light intensities.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LightReading {
    pub lux: u32,
    pub infrared: u32,
    pub visible: u32,
}

/// Accelerometer, gyroscope and magnetometer vectors.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct InertialReading {
    pub acceleration: Vec3,
    pub gyro: Vec3,
    pub magnetic: Vec3,
}

pub type ThermalChannel = Box<dyn SensorChannel<Reading = ThermalReading>>;
pub type LightChannel = Box<dyn SensorChannel<Reading = LightReading>>;
pub type InertialChannel = Box<dyn SensorChannel<Reading = InertialReading>>;

/// Anything that can produce one complete Frame per tick.
pub trait FrameSource: Send {
    fn sample(&mut self) -> Frame;
}

/// The station's configured channels.
///
/// Channels missing at startup are tolerated (they report zeros every tick)
/// as long as at least one channel is present.
pub struct SensorChannelSet {
    thermal: Option<ThermalChannel>,
    light: Option<LightChannel>,
    inertial: Option<InertialChannel>,
}

impl SensorChannelSet {
    /// Assemble a channel set.
    ///
    /// # Errors
    /// Returns `SensorError::NoChannels` when every channel is absent.
    pub fn new(
        thermal: Option<ThermalChannel>,
        light: Option<LightChannel>,
        inertial: Option<InertialChannel>,
    ) -> Result<Self, SensorError> {
        if thermal.is_none() && light.is_none() && inertial.is_none() {
            return Err(SensorError::NoChannels);
        }

        for (kind, present) in [
            ("thermal", thermal.is_some()),
            ("light", light.is_some()),
            ("inertial", inertial.is_some()),
        ] {
            if present {
                info!("Sensor channel {kind} ready");
            } else {
                warn!("Sensor channel {kind} not available, reporting zeros");
            }
        }

        Ok(Self {
            thermal,
            light,
            inertial,
        })
    }

    /// Read every channel once and assemble a Frame.
    ///
    /// Never fails. A failed or missing channel contributes its zero reading.
    pub fn sample(&mut self) -> Frame {
        let thermal = read_or_default(&mut self.thermal);
        let light = read_or_default(&mut self.light);
        let inertial = read_or_default(&mut self.inertial);

        Frame {
            temperature: thermal.temperature,
            humidity: thermal.humidity,
            lux: light.lux,
            infrared: light.infrared,
            visible: light.visible,
            acceleration: inertial.acceleration,
            gyro: inertial.gyro,
            magnetic: inertial.magnetic,
        }
    }
}

impl FrameSource for SensorChannelSet {
    fn sample(&mut self) -> Frame {
        SensorChannelSet::sample(self)
    }
}

fn read_or_default<R: Default>(channel: &mut Option<Box<dyn SensorChannel<Reading = R>>>) -> R {
    let Some(channel) = channel else {
        return R::default();
    };

    match channel.read() {
        Ok(reading) => reading,
        Err(e) => {
            warn!("Sensor channel {} read failed: {e}", channel.name());
            R::default()
        }
    }
}
