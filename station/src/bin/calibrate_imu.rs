//! Estimate an IMU calibration profile from a recorded channel capture.
//!
//! Record the unit while slowly rotating it through every orientation, then:
//!
//! ```text
//! calibrate_imu --recording capture.csv
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use station::calibration::CalibrationProfile;
use station::config_storage::ConfigStorage;
use station::sensors::recorded::Recording;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "Estimate IMU calibration from a recorded capture")]
struct Args {
    /// Recorded channel capture (CSV)
    #[arg(long)]
    recording: PathBuf,

    /// Where to write the profile (defaults to ~/.station/imu_calibration.json)
    #[arg(long)]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let recording = Recording::load(&args.recording)
        .with_context(|| format!("Failed to load recording {}", args.recording.display()))?;
    let samples = recording.inertial_readings();
    info!(
        "Using {} of {} recorded rows with complete inertial readings",
        samples.len(),
        recording.len()
    );

    let profile = CalibrationProfile::estimate(&samples).context("Calibration failed")?;
    info!("Gyro bias: {:?}", profile.gyro_bias);
    info!(
        "Accelerometer offset {:?}, scale {:?}",
        profile.accel_offset, profile.accel_scale
    );
    info!(
        "Magnetometer offset {:?}, scale {:?}",
        profile.mag_offset, profile.mag_scale
    );

    let path = match args.output {
        Some(path) => {
            profile
                .save_to_file(&path)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            path
        }
        None => ConfigStorage::new()
            .context("Failed to initialize config storage")?
            .save_calibration(&profile)
            .context("Failed to save calibration profile")?,
    };

    info!("Saved calibration profile to {}", path.display());
    Ok(())
}
