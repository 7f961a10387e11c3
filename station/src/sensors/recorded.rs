//! Sensor channels that replay a CSV capture of raw readings.
//!
//! The capture has one row per sample and one column per raw value:
//!
//! ```text
//! temperature,humidity,lux,infrared,visible,accel_x,accel_y,accel_z,gyro_x,gyro_y,gyro_z,mag_x,mag_y,mag_z
//! 22.1,45.0,1200,240,960,0.01,0.02,9.79,0.1,0.0,-0.1,20.5,0.3,40.2
//! ,,1180,236,944,0.01,0.02,9.81,0.1,0.0,-0.1,20.4,0.2,40.1
//! ```
//!
//! An empty cell is a failed read of the channel owning that column. Each
//! channel walks the rows with its own cursor and wraps around at the end.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{
    ChannelError, InertialChannel, InertialReading, LightChannel, LightReading, SensorChannel,
    ThermalChannel, ThermalReading,
};

/// Errors loading a capture file.
#[derive(Error, Debug)]
pub enum RecordingError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("recording contains no rows")]
    Empty,
}

/// One captured sample. `None` marks a failed read.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordedRow {
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub lux: Option<u32>,
    pub infrared: Option<u32>,
    pub visible: Option<u32>,
    pub accel_x: Option<f64>,
    pub accel_y: Option<f64>,
    pub accel_z: Option<f64>,
    pub gyro_x: Option<f64>,
    pub gyro_y: Option<f64>,
    pub gyro_z: Option<f64>,
    pub mag_x: Option<f64>,
    pub mag_y: Option<f64>,
    pub mag_z: Option<f64>,
}

impl RecordedRow {
    fn thermal(&self) -> Option<ThermalReading> {
        Some(ThermalReading {
            temperature: self.temperature?,
            humidity: self.humidity?,
        })
    }

    fn light(&self) -> Option<LightReading> {
        Some(LightReading {
            lux: self.lux?,
            infrared: self.infrared?,
            visible: self.visible?,
        })
    }

    fn inertial(&self) -> Option<InertialReading> {
        Some(InertialReading {
            acceleration: [self.accel_x?, self.accel_y?, self.accel_z?],
            gyro: [self.gyro_x?, self.gyro_y?, self.gyro_z?],
            magnetic: [self.mag_x?, self.mag_y?, self.mag_z?],
        })
    }
}

/// A loaded capture, shareable between the three channel drivers.
#[derive(Debug, Clone)]
pub struct Recording {
    rows: Arc<Vec<RecordedRow>>,
}

impl Recording {
    /// Load a capture from a CSV file with a header row.
    pub fn load(path: &Path) -> Result<Self, RecordingError> {
        let mut reader = csv::Reader::from_path(path)?;
        let rows = reader
            .deserialize::<RecordedRow>()
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_rows(rows)
    }

    pub fn from_rows(rows: Vec<RecordedRow>) -> Result<Self, RecordingError> {
        if rows.is_empty() {
            return Err(RecordingError::Empty);
        }
        Ok(Self {
            rows: Arc::new(rows),
        })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Inertial readings from every row where all nine values are present.
    pub fn inertial_readings(&self) -> Vec<InertialReading> {
        self.rows.iter().filter_map(RecordedRow::inertial).collect()
    }

    /// Independent replay drivers for the thermal, light and inertial channels.
    pub fn channels(&self) -> (ThermalChannel, LightChannel, InertialChannel) {
        (
            Box::new(RecordedChannel::new("recorded-thermal", self, RecordedRow::thermal)),
            Box::new(RecordedChannel::new("recorded-light", self, RecordedRow::light)),
            Box::new(RecordedChannel::new("recorded-inertial", self, RecordedRow::inertial)),
        )
    }
}

/// Replays one channel's columns from a recording.
pub struct RecordedChannel<R> {
    name: &'static str,
    rows: Arc<Vec<RecordedRow>>,
    position: usize,
    extract: fn(&RecordedRow) -> Option<R>,
}

impl<R> RecordedChannel<R> {
    fn new(
        name: &'static str,
        recording: &Recording,
        extract: fn(&RecordedRow) -> Option<R>,
    ) -> Self {
        Self {
            name,
            rows: recording.rows.clone(),
            position: 0,
            extract,
        }
    }
}

impl<R: Default + Send> SensorChannel for RecordedChannel<R> {
    type Reading = R;

    fn name(&self) -> &str {
        self.name
    }

    fn read(&mut self) -> Result<R, ChannelError> {
        let row_index = self.position;
        self.position = (self.position + 1) % self.rows.len();

        (self.extract)(&self.rows[row_index]).ok_or_else(|| {
            ChannelError::Unavailable(format!("no value in recorded row {row_index}"))
        })
    }
}
