//! Command-line configuration shared by the station binaries.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::Args;

use crate::downsampler::DEFAULT_BUCKETS;
use crate::estimator::{FusionConfig, DEFAULT_GAIN};

pub const DEFAULT_PORT: u16 = 8518;

/// Where frames come from and how they are fused.
#[derive(Args, Debug, Clone)]
pub struct AcquisitionArgs {
    /// Sample period in milliseconds (also the nominal fusion period)
    #[arg(long, default_value_t = 500, value_parser = clap::value_parser!(u64).range(1..))]
    pub period_ms: u64,

    /// Generate synthetic frames instead of reading sensor channels
    #[arg(long)]
    pub synthetic: bool,

    /// Seed for the synthetic generator (random when omitted)
    #[arg(long, requires = "synthetic")]
    pub seed: Option<u64>,

    /// Recorded channel capture (CSV) to replay as the live sensor channels
    #[arg(long, conflicts_with = "synthetic")]
    pub recording: Option<PathBuf>,

    /// IMU calibration profile (defaults to ~/.station/imu_calibration.json)
    #[arg(long)]
    pub calibration: Option<PathBuf>,

    /// Correct inertial readings with the calibration profile before fusion
    #[arg(long)]
    pub apply_calibration: bool,

    /// Madgwick gradient step gain
    #[arg(long, default_value_t = DEFAULT_GAIN)]
    pub fusion_gain: f64,
}

impl AcquisitionArgs {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }

    pub fn fusion_config(&self) -> FusionConfig {
        FusionConfig {
            gain: self.fusion_gain,
            sample_period: self.period().as_secs_f64(),
        }
    }

    /// Live mode reads real (or recorded) channels and needs a calibration
    /// profile on disk.
    pub fn requires_calibration(&self) -> bool {
        !self.synthetic || self.apply_calibration
    }
}

/// The live stream and query endpoints.
#[derive(Args, Debug, Clone)]
pub struct StreamArgs {
    /// Port for the stream/query server
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Address to bind to
    #[arg(short, long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub bind: IpAddr,

    /// Disable the HTTP surface (live stream and queries)
    #[arg(long)]
    pub no_stream: bool,

    /// Default number of buckets for history queries
    #[arg(long, default_value_t = DEFAULT_BUCKETS)]
    pub buckets: u32,

    /// Per-subscriber send timeout in milliseconds
    #[arg(long, default_value_t = 250)]
    pub send_timeout_ms: u64,
}

impl StreamArgs {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

/// Sample persistence.
#[derive(Args, Debug, Clone)]
pub struct StorageArgs {
    /// CSV sample store path
    #[arg(long, default_value = "station_samples.csv")]
    pub store: PathBuf,

    /// Keep samples in memory only (lost on exit)
    #[arg(long, conflicts_with = "store")]
    pub memory_store: bool,
}

/// Full `station_serve` configuration.
#[derive(clap::Parser, Debug, Clone)]
#[command(author, version, about = "Environmental telemetry station")]
pub struct StationArgs {
    #[command(flatten)]
    pub acquisition: AcquisitionArgs,

    #[command(flatten)]
    pub stream: StreamArgs,

    #[command(flatten)]
    pub storage: StorageArgs,
}
