//! Normalized difference vegetation index over a NIR/RED frame pair.

use serde::{Deserialize, Serialize};

use crate::sensing::ChannelFrame;

/// Added to every denominator so dark pixels divide cleanly; zero/zero yields 0.
pub const INDEX_EPSILON: f32 = 1e-5;

/// Per-pixel NDVI values, row-major. Not clamped: noisy samples may land
/// marginally outside [-1, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct IndexFrame {
    width: u32,
    height: u32,
    values: Vec<f32>,
}

impl IndexFrame {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    #[cfg(test)]
    pub(crate) fn value(&self, x: u32, y: u32) -> f32 {
        self.values[(y * self.width + x) as usize]
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats::from_values(&self.values)
    }
}

/// `(nir - red) / (nir + red + ε)` per pixel.
///
/// # Panics
///
/// If the frames differ in size. The capture synchronizer rejects such pairs,
/// so reaching this is a caller bug.
pub fn compute_index(nir: &ChannelFrame, red: &ChannelFrame) -> IndexFrame {
    assert_eq!(
        nir.resolution(),
        red.resolution(),
        "NDVI inputs must share dimensions"
    );

    let values = nir
        .samples()
        .iter()
        .zip(red.samples())
        .map(|(&n, &r)| (n - r) / (n + r + INDEX_EPSILON))
        .collect();

    IndexFrame {
        width: nir.width(),
        height: nir.height(),
        values,
    }
}

/// Summary statistics over the finite values of an index grid.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IndexStats {
    pub min: f32,
    pub max: f32,
    pub mean: f64,
    pub std_dev: f64,
    pub finite: usize,
}

impl IndexStats {
    pub fn from_values(values: &[f32]) -> Self {
        let mut min = f32::INFINITY;
        let mut max = f32::NEG_INFINITY;
        let mut sum = 0.0f64;
        let mut finite = 0usize;

        for &v in values.iter().filter(|v| v.is_finite()) {
            min = min.min(v);
            max = max.max(v);
            sum += v as f64;
            finite += 1;
        }

        if finite == 0 {
            return Self {
                min: f32::NAN,
                max: f32::NAN,
                mean: f64::NAN,
                std_dev: f64::NAN,
                finite: 0,
            };
        }

        let mean = sum / finite as f64;
        let variance = values
            .iter()
            .filter(|v| v.is_finite())
            .map(|&v| (v as f64 - mean).powi(2))
            .sum::<f64>()
            / finite as f64;

        Self {
            min,
            max,
            mean,
            std_dev: variance.sqrt(),
            finite,
        }
    }
}
