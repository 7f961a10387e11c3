//! Environmental telemetry station.
//!
//! Samples thermal, light and inertial channels on a fixed cadence, fuses the
//! inertial readings into an orientation estimate, persists every sample and
//! streams live and historical data over HTTP.

pub mod broadcast;
pub mod calibration;
pub mod config;
pub mod config_storage;
pub mod downsampler;
pub mod estimator;
pub mod publisher;
pub mod scheduler;
pub mod sensors;
pub mod server;
pub mod station;
pub mod store;
pub mod synthetic;
