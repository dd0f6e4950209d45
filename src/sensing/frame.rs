//! Channel frames produced by the sensor drivers.
//!
//! A `ChannelFrame` is one sensor's image for one cycle, reduced to a single
//! intensity sample per pixel. Both frames of a cycle must share dimensions.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::source::CaptureError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum ChannelRole {
    Nir,
    Red,
}

impl ChannelRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelRole::Nir => "NIR",
            ChannelRole::Red => "RED",
        }
    }
}

impl fmt::Display for ChannelRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pixel layout requested from a sensor driver.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum PixelFormat {
    Gray8,
    #[default]
    Rgb888,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Gray8 => 1,
            PixelFormat::Rgb888 => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Self::new(640, 480)
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// One sensor's capture for one cycle, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelFrame {
    role: ChannelRole,
    width: u32,
    height: u32,
    samples: Vec<f32>,
}

impl ChannelFrame {
    pub fn new(
        role: ChannelRole,
        width: u32,
        height: u32,
        samples: Vec<f32>,
    ) -> Result<Self, CaptureError> {
        let expected = width as usize * height as usize;
        if samples.len() != expected {
            return Err(CaptureError::ReadFailed {
                role,
                reason: format!(
                    "frame has {} samples, expected {expected} for {width}x{height}",
                    samples.len()
                ),
            });
        }

        Ok(Self {
            role,
            width,
            height,
            samples,
        })
    }

    /// Frame where every pixel reads `value`.
    pub fn uniform(role: ChannelRole, width: u32, height: u32, value: f32) -> Self {
        Self {
            role,
            width,
            height,
            samples: vec![value; width as usize * height as usize],
        }
    }

    /// Reduce an interleaved 8-bit buffer to this role's intensity channel.
    ///
    /// `Gray8` is taken as-is. For `Rgb888` the NIR role uses 8-bit luma
    /// (`0.299R + 0.587G + 0.114B`, rounded) and the RED role uses the red component.
    pub fn from_interleaved(
        role: ChannelRole,
        format: PixelFormat,
        resolution: Resolution,
        pixels: &[u8],
    ) -> Result<Self, CaptureError> {
        let stride = format.bytes_per_pixel();
        let expected = resolution.pixel_count() * stride;
        if pixels.len() != expected {
            return Err(CaptureError::ReadFailed {
                role,
                reason: format!(
                    "buffer has {} bytes, expected {expected} for {resolution} {format:?}",
                    pixels.len()
                ),
            });
        }

        let samples = match (format, role) {
            (PixelFormat::Gray8, _) => pixels.iter().map(|&v| v as f32).collect(),
            (PixelFormat::Rgb888, ChannelRole::Nir) => pixels
                .chunks_exact(3)
                .map(|px| {
                    (0.299 * px[0] as f32 + 0.587 * px[1] as f32 + 0.114 * px[2] as f32).round()
                })
                .collect(),
            (PixelFormat::Rgb888, ChannelRole::Red) => {
                pixels.chunks_exact(3).map(|px| px[0] as f32).collect()
            }
        };

        Self::new(role, resolution.width, resolution.height, samples)
    }

    pub fn role(&self) -> ChannelRole {
        self.role
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    #[cfg(test)]
    pub(crate) fn sample(&self, x: u32, y: u32) -> f32 {
        self.samples[(y * self.width + x) as usize]
    }
}
