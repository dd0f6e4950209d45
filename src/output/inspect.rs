//! Read back captured rasters: locate the newest one, summarize it, export it.

use std::{
    fmt::Write as _,
    fs,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};

use crate::ndvi::IndexStats;

use super::raster::{read_raster, RasterContents};

/// Newest `.tif` in `dir` by file name (names are timestamp-keyed).
pub fn latest_raster(dir: &Path) -> Result<PathBuf> {
    let mut rasters: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("Failed to list {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "tif"))
        .collect();

    rasters.sort();
    match rasters.pop() {
        Some(path) => Ok(path),
        None => bail!("no NDVI .tif files found in {}", dir.display()),
    }
}

pub struct RasterReport {
    pub path: PathBuf,
    pub contents: RasterContents,
    pub stats: IndexStats,
}

impl RasterReport {
    pub fn load(path: &Path) -> Result<Self> {
        let contents =
            read_raster(path).with_context(|| format!("Failed to read raster {}", path.display()))?;
        let stats = IndexStats::from_values(&contents.values);
        Ok(Self {
            path: path.to_path_buf(),
            contents,
            stats,
        })
    }

    /// Human-readable summary with the top-left `limit` x `limit` corner of the grid.
    pub fn render(&self, limit: usize) -> String {
        let c = &self.contents;
        let mut out = String::new();
        let _ = writeln!(out, "raster: {}", self.path.display());
        match c.epsg {
            Some(code) => {
                let _ = writeln!(out, "crs: EPSG:{code}");
            }
            None => {
                let _ = writeln!(out, "crs: unknown");
            }
        }
        let _ = writeln!(out, "shape: {} x {}", c.height, c.width);
        if let Some(t) = c.transform {
            let _ = writeln!(
                out,
                "resolution: ({}, {})  origin: ({:.6}, {:.6})",
                t.pixel_width,
                -t.pixel_height,
                t.origin_x,
                t.origin_y
            );
        }

        let s = &self.stats;
        let _ = writeln!(out, "min: {:.3}", s.min);
        let _ = writeln!(out, "max: {:.3}", s.max);
        let _ = writeln!(out, "mean: {:.3}", s.mean);
        let _ = writeln!(out, "std dev: {:.3}", s.std_dev);

        let width = c.width as usize;
        for row in c.values.chunks(width.max(1)).take(limit) {
            let cells: Vec<String> = row
                .iter()
                .take(limit)
                .map(|v| {
                    if v.is_finite() {
                        format!("{v:6.2}")
                    } else {
                        "  nan ".to_string()
                    }
                })
                .collect();
            let _ = writeln!(out, "{}", cells.join(" "));
        }
        let _ = writeln!(out, "... ({}x{} total pixels)", c.height, c.width);
        out
    }

    /// Write the full matrix next to the raster as `<stem>_matrix.csv`.
    pub fn export_csv(&self) -> Result<PathBuf> {
        let stem = self
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "raster".to_string());
        let csv_path = self.path.with_file_name(format!("{stem}_matrix.csv"));

        let file = fs::File::create(&csv_path)
            .with_context(|| format!("Failed to create {}", csv_path.display()))?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "# NDVI pixel matrix")?;
        for row in self.contents.values.chunks(self.contents.width.max(1) as usize) {
            let cells: Vec<String> = row.iter().map(|v| format!("{v:.5}")).collect();
            writeln!(writer, "{}", cells.join(","))?;
        }
        writer.flush()?;
        Ok(csv_path)
    }
}
