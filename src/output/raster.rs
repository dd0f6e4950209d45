//! Single-band float32 GeoTIFF output.

use std::{
    fs::File,
    io::{BufReader, BufWriter},
    path::{Path, PathBuf},
};

use thiserror::Error;
use tiff::{
    decoder::{Decoder, DecodingResult},
    encoder::{colortype, TiffEncoder},
    tags::Tag,
};

use super::assembler::GeoTransform;

const MODEL_PIXEL_SCALE_TAG: u16 = 33550;
const MODEL_TIEPOINT_TAG: u16 = 33922;
const GEO_KEY_DIRECTORY_TAG: u16 = 34735;

const GT_MODEL_TYPE_GEO_KEY: u16 = 1024;
const GT_RASTER_TYPE_GEO_KEY: u16 = 1025;
const GEOGRAPHIC_TYPE_GEO_KEY: u16 = 2048;
const PROJECTED_CS_TYPE_GEO_KEY: u16 = 3072;
const MODEL_TYPE_PROJECTED: u16 = 1;
const MODEL_TYPE_GEOGRAPHIC: u16 = 2;
const RASTER_PIXEL_IS_AREA: u16 = 1;

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("tiff encoding failed: {0}")]
    Tiff(#[from] tiff::TiffError),

    #[error("preview encoding failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("unsupported coordinate reference '{0}', expected EPSG:<code>")]
    UnsupportedCrs(String),

    #[error("raster {path} is not a single-band float32 image")]
    UnsupportedRaster { path: PathBuf },

    #[error("raster payload has {actual} values, expected {expected}")]
    ShapeMismatch { expected: usize, actual: usize },
}

impl OutputError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        OutputError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Everything the raster writer needs for one band.
#[derive(Debug, Clone, Copy)]
pub struct RasterSpec<'a> {
    pub path: &'a Path,
    pub width: u32,
    pub height: u32,
    pub crs: &'a str,
    pub transform: GeoTransform,
    pub data: &'a [f32],
}

pub trait RasterWriter: Send + Sync {
    fn write_raster(&self, raster: &RasterSpec<'_>) -> Result<(), OutputError>;
}

/// Writes a north-up GeoTIFF with pixel scale, tiepoint and an EPSG GeoKey directory.
#[derive(Debug, Default, Clone, Copy)]
pub struct GeoTiffWriter;

impl RasterWriter for GeoTiffWriter {
    fn write_raster(&self, raster: &RasterSpec<'_>) -> Result<(), OutputError> {
        let expected = raster.width as usize * raster.height as usize;
        if raster.data.len() != expected {
            return Err(OutputError::ShapeMismatch {
                expected,
                actual: raster.data.len(),
            });
        }
        let geo_keys = geo_key_directory(raster.crs)?;

        let file = File::create(raster.path).map_err(|err| OutputError::io(raster.path, err))?;
        let mut encoder = TiffEncoder::new(BufWriter::new(file))?;
        let mut image = encoder.new_image::<colortype::Gray32Float>(raster.width, raster.height)?;

        let t = raster.transform;
        image.encoder().write_tag(
            Tag::from_u16_exhaustive(MODEL_PIXEL_SCALE_TAG),
            &[t.pixel_width, -t.pixel_height, 0.0][..],
        )?;
        image.encoder().write_tag(
            Tag::from_u16_exhaustive(MODEL_TIEPOINT_TAG),
            &[0.0, 0.0, 0.0, t.origin_x, t.origin_y, 0.0][..],
        )?;
        image
            .encoder()
            .write_tag(Tag::from_u16_exhaustive(GEO_KEY_DIRECTORY_TAG), &geo_keys[..])?;

        image.write_data(raster.data)?;
        Ok(())
    }
}

/// Parse `EPSG:<code>`.
pub fn epsg_code(crs: &str) -> Result<u16, OutputError> {
    let (authority, code) = crs
        .split_once(':')
        .ok_or_else(|| OutputError::UnsupportedCrs(crs.to_string()))?;
    if !authority.eq_ignore_ascii_case("EPSG") {
        return Err(OutputError::UnsupportedCrs(crs.to_string()));
    }
    code.trim()
        .parse()
        .map_err(|_| OutputError::UnsupportedCrs(crs.to_string()))
}

/// GeoKeyDirectory for an EPSG code. Codes 4000-4999 are geographic CRSs,
/// everything else is written as a projected CRS.
fn geo_key_directory(crs: &str) -> Result<Vec<u16>, OutputError> {
    let code = epsg_code(crs)?;
    let (model_type, crs_key) = if (4000..5000).contains(&code) {
        (MODEL_TYPE_GEOGRAPHIC, GEOGRAPHIC_TYPE_GEO_KEY)
    } else {
        (MODEL_TYPE_PROJECTED, PROJECTED_CS_TYPE_GEO_KEY)
    };

    Ok(vec![
        1, 1, 0, 3, // version 1.1.0, three keys
        GT_MODEL_TYPE_GEO_KEY, 0, 1, model_type,
        GT_RASTER_TYPE_GEO_KEY, 0, 1, RASTER_PIXEL_IS_AREA,
        crs_key, 0, 1, code,
    ])
}

/// A raster read back from disk.
#[derive(Debug, Clone)]
pub struct RasterContents {
    pub width: u32,
    pub height: u32,
    pub values: Vec<f32>,
    pub transform: Option<GeoTransform>,
    pub epsg: Option<u16>,
}

pub fn read_raster(path: &Path) -> Result<RasterContents, OutputError> {
    let file = File::open(path).map_err(|err| OutputError::io(path, err))?;
    let mut decoder = Decoder::new(BufReader::new(file))?;
    let (width, height) = decoder.dimensions()?;

    let scale = decoder
        .find_tag(Tag::from_u16_exhaustive(MODEL_PIXEL_SCALE_TAG))?
        .map(|value| value.into_f64_vec())
        .transpose()?;
    let tiepoint = decoder
        .find_tag(Tag::from_u16_exhaustive(MODEL_TIEPOINT_TAG))?
        .map(|value| value.into_f64_vec())
        .transpose()?;
    let keys = decoder
        .find_tag(Tag::from_u16_exhaustive(GEO_KEY_DIRECTORY_TAG))?
        .map(|value| value.into_u16_vec())
        .transpose()?;

    let transform = match (scale, tiepoint) {
        (Some(scale), Some(tie)) if scale.len() >= 2 && tie.len() >= 6 => Some(GeoTransform {
            origin_x: tie[3] - tie[0] * scale[0],
            pixel_width: scale[0],
            row_rotation: 0.0,
            origin_y: tie[4] + tie[1] * scale[1],
            column_rotation: 0.0,
            pixel_height: -scale[1],
        }),
        _ => None,
    };
    let epsg = keys.and_then(|keys| {
        keys.chunks_exact(4)
            .skip(1)
            .find(|key| key[0] == GEOGRAPHIC_TYPE_GEO_KEY || key[0] == PROJECTED_CS_TYPE_GEO_KEY)
            .map(|key| key[3])
    });

    let values = match decoder.read_image()? {
        DecodingResult::F32(values) => values,
        _ => {
            return Err(OutputError::UnsupportedRaster {
                path: path.to_path_buf(),
            })
        }
    };

    Ok(RasterContents {
        width,
        height,
        values,
        transform,
        epsg,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transform() -> GeoTransform {
        GeoTransform::north_up(-86.0, 40.0, 0.5)
    }

    #[test]
    fn parses_epsg_identifiers() {
        assert_eq!(epsg_code("EPSG:4326").unwrap(), 4326);
        assert_eq!(epsg_code("epsg:32616").unwrap(), 32616);
        assert!(matches!(epsg_code("WGS84"), Err(OutputError::UnsupportedCrs(_))));
        assert!(matches!(epsg_code("ESRI:102003"), Err(OutputError::UnsupportedCrs(_))));
    }

    #[test]
    fn written_raster_reads_back_with_georeference() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample_ndvi.tif");
        let data: Vec<f32> = (0..12).map(|i| i as f32 / 12.0 - 0.5).collect();

        GeoTiffWriter
            .write_raster(&RasterSpec {
                path: &path,
                width: 4,
                height: 3,
                crs: "EPSG:4326",
                transform: transform(),
                data: &data,
            })
            .unwrap();

        let contents = read_raster(&path).unwrap();
        assert_eq!((contents.width, contents.height), (4, 3));
        assert_eq!(contents.values, data);
        assert_eq!(contents.epsg, Some(4326));
        assert_eq!(contents.transform, Some(transform()));
    }

    #[test]
    fn rejects_payload_of_wrong_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.tif");
        let err = GeoTiffWriter
            .write_raster(&RasterSpec {
                path: &path,
                width: 4,
                height: 4,
                crs: "EPSG:4326",
                transform: transform(),
                data: &[0.0; 15],
            })
            .unwrap_err();
        assert!(matches!(err, OutputError::ShapeMismatch { expected: 16, actual: 15 }));
        assert!(!path.exists());
    }

    #[test]
    fn missing_directory_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("x.tif");
        let err = GeoTiffWriter
            .write_raster(&RasterSpec {
                path: &path,
                width: 1,
                height: 1,
                crs: "EPSG:4326",
                transform: transform(),
                data: &[0.0],
            })
            .unwrap_err();
        assert!(matches!(err, OutputError::Io { .. }));
    }
}
