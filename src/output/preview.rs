//! False-color preview of an index grid.

use std::path::Path;

use image::{ImageFormat, Rgb, RgbImage};

use super::raster::OutputError;

/// Map index values to 8 bits: `floor((clip(v, -1, 1) + 1) / 2 * 255)`. NaN maps to 0.
pub fn normalize_levels(values: &[f32]) -> Vec<u8> {
    values
        .iter()
        .map(|&v| {
            if v.is_nan() {
                return 0;
            }
            let unit = (v.clamp(-1.0, 1.0) + 1.0) / 2.0;
            (unit * 255.0) as u8
        })
        .collect()
}

/// Blue-cyan-yellow-red ramp: low vegetation blue, dense vegetation red.
pub fn jet(level: u8) -> Rgb<u8> {
    let v = level as f32 / 255.0;
    let channel = |center: f32| {
        let c = (1.5 - (4.0 * v - center).abs()).clamp(0.0, 1.0);
        (c * 255.0).round() as u8
    };
    Rgb([channel(3.0), channel(2.0), channel(1.0)])
}

/// Render 8-bit levels into a JET-colored image. Missing levels render black.
pub fn render_preview(width: u32, height: u32, levels: &[u8]) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        levels
            .get((y * width + x) as usize)
            .map(|&level| jet(level))
            .unwrap_or(Rgb([0, 0, 0]))
    })
}

pub trait PreviewWriter: Send + Sync {
    fn write_preview(&self, path: &Path, image: &RgbImage) -> Result<(), OutputError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PngPreviewWriter;

impl PreviewWriter for PngPreviewWriter {
    fn write_preview(&self, path: &Path, image: &RgbImage) -> Result<(), OutputError> {
        image.save_with_format(path, ImageFormat::Png)?;
        Ok(())
    }
}
