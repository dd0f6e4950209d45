use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::output::{raster::epsg_code, DEFAULT_CRS};
use crate::position::Coordinate;
use crate::sensing::{PixelFormat, Resolution};
use crate::session::SessionConfig;

/// Which driver produces the channel frames.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SensorBackend {
    Synthetic,
    Camera,
}

impl Default for SensorBackend {
    fn default() -> Self {
        if cfg!(feature = "camera") {
            SensorBackend::Camera
        } else {
            SensorBackend::Synthetic
        }
    }
}

/// Everything the capture process is configured with. Built once at startup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CaptureSettings {
    pub output_dir: PathBuf,
    pub interval_secs: u64,
    pub max_duration_secs: u64,
    pub fix_timeout_secs: u64,
    /// Ground size of one pixel, in CRS units.
    pub pixel_size: f64,
    pub crs: String,
    pub resolution: Resolution,
    pub pixel_format: PixelFormat,
    pub nir_camera: i32,
    pub red_camera: i32,
    /// Serial device of the GPS receiver; `None` runs without one.
    pub gps_port: Option<PathBuf>,
    /// Reported when no receiver is configured.
    pub testing_coordinate: Coordinate,
    pub backend: SensorBackend,
    pub sample_core_current: bool,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("ndvi_captures"),
            interval_secs: 5,
            max_duration_secs: 300,
            fix_timeout_secs: 10,
            pixel_size: 1.0,
            crs: DEFAULT_CRS.into(),
            resolution: Resolution::default(),
            pixel_format: PixelFormat::Rgb888,
            nir_camera: 0,
            red_camera: 1,
            gps_port: Some(PathBuf::from("/dev/serial0")),
            testing_coordinate: Coordinate::new(40.0, -86.0),
            backend: SensorBackend::default(),
            sample_core_current: false,
        }
    }
}

impl CaptureSettings {
    /// Read settings from a JSON file; missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse settings in {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let serialized = serde_json::to_string_pretty(self)?;
        fs::write(path, serialized)
            .with_context(|| format!("Failed to write settings to {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.interval_secs == 0 {
            bail!("interval_secs must be greater than zero");
        }
        if !(self.pixel_size.is_finite() && self.pixel_size > 0.0) {
            bail!("pixel_size must be a positive number, got {}", self.pixel_size);
        }
        if self.resolution.pixel_count() == 0 {
            bail!("resolution must be non-empty, got {}", self.resolution);
        }
        if self.nir_camera == self.red_camera && self.backend == SensorBackend::Camera {
            bail!("NIR and RED must be different cameras (both are {})", self.nir_camera);
        }
        epsg_code(&self.crs).with_context(|| format!("invalid crs '{}'", self.crs))?;

        if self.gps_port.is_some() && self.fix_timeout_secs >= self.interval_secs {
            log::warn!(
                "fix timeout ({}s) is not shorter than the capture interval ({}s); cycles may overrun",
                self.fix_timeout_secs,
                self.interval_secs
            );
        }
        Ok(())
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            interval: Duration::from_secs(self.interval_secs),
            max_duration: Duration::from_secs(self.max_duration_secs),
            fix_timeout: Duration::from_secs(self.fix_timeout_secs),
            pixel_format: self.pixel_format,
            resolution: self.resolution,
            sample_core_current: self.sample_core_current,
        }
    }
}
