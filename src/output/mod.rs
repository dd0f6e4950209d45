//! Artifact assembly and the raster/preview writers.

pub mod assembler;
pub mod inspect;
pub mod preview;
pub mod raster;

pub use assembler::{
    filename_stem, ArtifactAssembler, AssembledFrame, GeoTransform, OutputArtifact, DEFAULT_CRS,
};
pub use inspect::{latest_raster, RasterReport};
pub use preview::{normalize_levels, render_preview, PngPreviewWriter, PreviewWriter};
pub use raster::{
    read_raster, GeoTiffWriter, OutputError, RasterContents, RasterSpec, RasterWriter,
};
