//! Configuration storage for station calibration data.
//!
//! All config is stored in ~/.station/ by default.

use std::path::{Path, PathBuf};

use crate::calibration::CalibrationProfile;

const PROFILE_FILENAME: &str = "imu_calibration.json";

/// Configuration storage manager for the station.
///
/// Manages loading and saving of configuration files from a centralized
/// directory (defaults to ~/.station/).
#[derive(Debug, Clone)]
pub struct ConfigStorage {
    root_path: PathBuf,
}

impl ConfigStorage {
    /// Create a new config storage with default path (~/.station)
    pub fn new() -> std::io::Result<Self> {
        let home = std::env::var("HOME")
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::NotFound, "HOME not set"))?;
        let root_path = PathBuf::from(home).join(".station");
        Ok(Self { root_path })
    }

    /// Create a new config storage with custom root path
    pub fn with_path(root_path: PathBuf) -> Self {
        Self { root_path }
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    /// Default location of the IMU calibration profile.
    pub fn calibration_path(&self) -> PathBuf {
        self.root_path.join(PROFILE_FILENAME)
    }

    /// Get the IMU calibration profile.
    ///
    /// Returns None if no profile exists.
    /// Returns Some(Err) if the file exists but cannot be loaded.
    pub fn get_calibration(&self) -> Option<Result<CalibrationProfile, std::io::Error>> {
        let path = self.calibration_path();

        if !path.exists() {
            return None;
        }

        Some(CalibrationProfile::load_from_file(&path))
    }

    /// Save the IMU calibration profile, creating the config directory if
    /// needed. Returns the path written.
    pub fn save_calibration(&self, profile: &CalibrationProfile) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(&self.root_path)?;

        let path = self.calibration_path();
        profile.save_to_file(&path)?;
        Ok(path)
    }
}
