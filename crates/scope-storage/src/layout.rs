//! Experiment directory naming.

use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};

/// Image file extension used for saved frames.
pub const IMAGE_EXTENSION: &str = "tiff";

/// Paths of one experiment under a base directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExperimentLayout {
    base: PathBuf,
    experiment_id: String,
}

impl ExperimentLayout {
    pub fn new(base: impl Into<PathBuf>, experiment_id: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            experiment_id: experiment_id.into(),
        }
    }

    /// `<name>_<YYYY-MM-DD_HH-MM-SS.micros>` with spaces replaced.
    pub fn timestamped_id(name: &str, at: DateTime<Local>) -> String {
        let name = name.trim().replace(' ', "_");
        let stamp = at.format("%Y-%m-%d_%H-%M-%S%.6f");
        if name.is_empty() {
            stamp.to_string()
        } else {
            format!("{}_{}", name, stamp)
        }
    }

    pub fn experiment_id(&self) -> &str {
        &self.experiment_id
    }

    pub fn experiment_dir(&self) -> PathBuf {
        self.base.join(&self.experiment_id)
    }

    pub fn time_point_dir(&self, time_point: u32) -> PathBuf {
        self.experiment_dir().join(time_point.to_string())
    }

    pub fn parameters_path(&self) -> PathBuf {
        self.experiment_dir().join("acquisition parameters.json")
    }

    pub fn tiles_path(&self) -> PathBuf {
        self.experiment_dir().join("tiles.json")
    }

    pub fn coordinates_path(&self, time_point: u32) -> PathBuf {
        self.time_point_dir(time_point).join("coordinates.csv")
    }

    /// `<region>_<i>_<j>_<k>_<channel>.<ext>`; an unnamed region drops the prefix.
    pub fn image_file_name(region: &str, i: u32, j: u32, k: u32, channel: &str, ext: &str) -> String {
        if region.is_empty() {
            format!("{}_{}_{}_{}.{}", i, j, k, channel, ext)
        } else {
            format!("{}_{}_{}_{}_{}.{}", region, i, j, k, channel, ext)
        }
    }

    pub fn image_path(
        &self,
        time_point: u32,
        region: &str,
        (i, j, k): (u32, u32, u32),
        channel: &str,
    ) -> PathBuf {
        self.time_point_dir(time_point)
            .join(Self::image_file_name(region, i, j, k, channel, IMAGE_EXTENSION))
    }

    pub fn base(&self) -> &Path {
        &self.base
    }
}
