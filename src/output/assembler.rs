use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ndvi::IndexFrame;
use crate::position::PositionFix;

use super::preview::normalize_levels;

/// Default coordinate reference: WGS 84 geographic.
pub const DEFAULT_CRS: &str = "EPSG:4326";

const STEM_FORMAT: &str = "%Y%m%d_%H%M%S_%3f";

/// Affine pixel-to-world mapping in GDAL coefficient order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GeoTransform {
    pub origin_x: f64,
    pub pixel_width: f64,
    pub row_rotation: f64,
    pub origin_y: f64,
    pub column_rotation: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// Origin at (`lon`, `lat`); rows run south, so `pixel_height` is negative.
    pub fn north_up(lon: f64, lat: f64, pixel_size: f64) -> Self {
        Self {
            origin_x: lon,
            pixel_width: pixel_size,
            row_rotation: 0.0,
            origin_y: lat,
            column_rotation: 0.0,
            pixel_height: -pixel_size,
        }
    }

}

/// Record of one persisted cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OutputArtifact {
    pub timestamp: DateTime<Utc>,
    pub raster_path: PathBuf,
    pub preview_path: PathBuf,
    pub fix: PositionFix,
}

/// Everything the output writers need for one cycle.
#[derive(Debug, Clone)]
pub struct AssembledFrame {
    pub artifact: OutputArtifact,
    pub index: IndexFrame,
    pub transform: GeoTransform,
    pub crs: String,
    /// 8-bit preview levels, one per pixel.
    pub preview_levels: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct ArtifactAssembler {
    output_dir: PathBuf,
    pixel_size: f64,
    crs: String,
}

impl ArtifactAssembler {
    pub fn new(output_dir: impl Into<PathBuf>, pixel_size: f64, crs: impl Into<String>) -> Self {
        Self {
            output_dir: output_dir.into(),
            pixel_size,
            crs: crs.into(),
        }
    }

    pub fn assemble(
        &self,
        index: IndexFrame,
        fix: &PositionFix,
        timestamp: DateTime<Utc>,
    ) -> AssembledFrame {
        let stem = filename_stem(timestamp);
        let transform = GeoTransform::north_up(fix.longitude(), fix.latitude(), self.pixel_size);
        let preview_levels = normalize_levels(index.values());

        AssembledFrame {
            artifact: OutputArtifact {
                timestamp,
                raster_path: self.output_dir.join(format!("{stem}_ndvi.tif")),
                preview_path: self.output_dir.join(format!("{stem}_ndvi_color.png")),
                fix: *fix,
            },
            index,
            transform,
            crs: self.crs.clone(),
            preview_levels,
        }
    }
}

/// UTC stem that sorts lexically in capture order, e.g. `20261019_142501_083`.
pub fn filename_stem(timestamp: DateTime<Utc>) -> String {
    timestamp.format(STEM_FORMAT).to_string()
}
