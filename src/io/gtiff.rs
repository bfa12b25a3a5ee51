//! GeoTIFF driver on top of the `tiff` codec. Bands map to pages of a
//! grayscale multipage file; geo-referencing travels in the GeoTIFF tags
//! of the first page.

use std::{
    fs::File,
    io::{BufReader, BufWriter, Seek, Write},
    path::Path,
};

use geo::AffineTransform;
use log::warn;
use ndarray::{Array2, ArrayView3, Axis};
use num_traits::ToPrimitive;
use tiff::{
    decoder::{Decoder, DecodingResult, Limits},
    encoder::{
        colortype::{Gray16, Gray32, Gray32Float, Gray64Float, Gray8},
        DirectoryEncoder, TiffEncoder, TiffKind,
    },
    tags::Tag,
};

use crate::{
    components::metadata::{DType, Metadata},
    crs::Crs,
    errors::{RasterstackError, Result},
    io::{Dataset, MemDataset},
};

const TAG_GEOKEY_DIRECTORY: u16 = 34735;
const TAG_GEO_ASCII_PARAMS: u16 = 34737;
const TAG_GDAL_NODATA: u16 = 42113;

const KEY_MODEL_TYPE: u16 = 1024;
const KEY_RASTER_TYPE: u16 = 1025;
const KEY_CITATION: u16 = 1026;
const KEY_GEOGRAPHIC_CRS: u16 = 2048;
const KEY_PROJECTED_CRS: u16 = 3072;

pub(crate) fn open(path: &Path) -> Result<Box<dyn Dataset>> {
    let mut decoder =
        Decoder::new(BufReader::new(File::open(path)?))?.with_limits(Limits::unlimited());

    let transform = read_transform(&mut decoder).unwrap_or_else(|| {
        warn!(
            "{}: no geo-referencing tags, using an identity transform",
            path.display()
        );
        AffineTransform::new(1.0, 0.0, 0.0, 0.0, 1.0, 0.0)
    });
    let crs = read_crs(&mut decoder).unwrap_or_else(|| {
        warn!("{}: no usable CRS geokeys, assuming EPSG:4326", path.display());
        Crs::wgs84()
    });
    let nodata = decoder
        .get_tag_ascii_string(Tag::Unknown(TAG_GDAL_NODATA))
        .ok()
        .and_then(|raw| raw.trim_matches('\0').trim().parse::<f32>().ok());

    let (width, height) = decoder.dimensions()?;
    let mut pages: Vec<Array2<f32>> = Vec::new();
    let mut dtype: Option<DType> = None;
    loop {
        if decoder.dimensions()? != (width, height) {
            return Err(RasterstackError::Driver(
                "GTiff pages must share one shape".to_string(),
            ));
        }
        let (page_dtype, samples) = decode_page(decoder.read_image()?)?;
        match dtype {
            None => dtype = Some(page_dtype),
            Some(dtype) if dtype == page_dtype => {}
            Some(_) => {
                return Err(RasterstackError::Driver(
                    "GTiff pages must share one sample format".to_string(),
                ))
            }
        }
        pages.push(Array2::from_shape_vec(
            (height as usize, width as usize),
            samples,
        )?);
        if !decoder.more_images() {
            break;
        }
        decoder.next_image()?;
    }

    let dtype = dtype.ok_or_else(|| {
        RasterstackError::Driver("GTiff file has no pages".to_string())
    })?;
    let metadata = Metadata {
        crs,
        transform,
        width: width as usize,
        height: height as usize,
        count: pages.len(),
        dtype,
        nodata,
    };
    let views = pages.iter().map(|page| page.view()).collect::<Vec<_>>();
    let stack = ndarray::stack(Axis(0), &views)?;
    Ok(Box::new(MemDataset::new(stack, metadata)?))
}

fn read_transform<R: std::io::Read + Seek>(decoder: &mut Decoder<R>) -> Option<AffineTransform<f64>> {
    let scale = decoder.get_tag_f64_vec(Tag::ModelPixelScaleTag).ok()?;
    let tiepoint = decoder.get_tag_f64_vec(Tag::ModelTiepointTag).ok()?;
    if scale.len() < 2 || tiepoint.len() < 6 {
        return None;
    }
    // tiepoint maps pixel (i, j) onto world (x, y)
    Some(AffineTransform::new(
        scale[0],
        0.0,
        tiepoint[3] - tiepoint[0] * scale[0],
        0.0,
        -scale[1],
        tiepoint[4] + tiepoint[1] * scale[1],
    ))
}

fn read_crs<R: std::io::Read + Seek>(decoder: &mut Decoder<R>) -> Option<Crs> {
    let keys = decoder
        .get_tag_u64_vec(Tag::Unknown(TAG_GEOKEY_DIRECTORY))
        .ok()?;
    let code = crs_from_geokeys(&keys)?;
    Crs::from_epsg(u32::from(code)).ok()
}

/// EPSG code out of a GeoKeyDirectory, preferring the projected CRS key
/// over the geographic one a projected file also carries.
fn crs_from_geokeys(keys: &[u64]) -> Option<u16> {
    if keys.len() < 4 {
        return None;
    }
    let entries = keys[4..].chunks_exact(4);
    let lookup = |key: u64| {
        entries
            .clone()
            .find(|entry| entry[0] == key && entry[1] == 0)
            .and_then(|entry| u16::try_from(entry[3]).ok())
    };
    lookup(u64::from(KEY_PROJECTED_CRS)).or_else(|| lookup(u64::from(KEY_GEOGRAPHIC_CRS)))
}

fn decode_page(result: DecodingResult) -> Result<(DType, Vec<f32>)> {
    Ok(match result {
        DecodingResult::U8(samples) => {
            (DType::UInt8, samples.into_iter().map(f32::from).collect())
        }
        DecodingResult::U16(samples) => {
            (DType::UInt16, samples.into_iter().map(f32::from).collect())
        }
        DecodingResult::U32(samples) => {
            (DType::UInt32, samples.into_iter().map(|value| value as f32).collect())
        }
        DecodingResult::F32(samples) => (DType::Float32, samples),
        DecodingResult::F64(samples) => {
            (DType::Float64, samples.into_iter().map(|value| value as f32).collect())
        }
        _ => {
            return Err(RasterstackError::Driver(
                "unsupported TIFF sample format".to_string(),
            ))
        }
    })
}

pub(crate) fn write(path: &Path, metadata: &Metadata, stack: ArrayView3<f32>) -> Result<()> {
    if stack.dim() != metadata.shape() {
        return Err(RasterstackError::ShapeMismatch {
            expected: metadata.shape(),
            actual: stack.dim(),
        });
    }
    if stack.dim().0 == 0 {
        return Err(RasterstackError::Driver(
            "GTiff needs at least one band".to_string(),
        ));
    }
    let transform = &metadata.transform;
    if transform.b() != 0.0 || transform.d() != 0.0 {
        return Err(RasterstackError::Driver(
            "GTiff driver cannot express rotated transforms".to_string(),
        ));
    }
    if transform.a() <= 0.0 || transform.e() >= 0.0 {
        return Err(RasterstackError::Driver(
            "GTiff driver requires a north-up transform".to_string(),
        ));
    }
    let width = u32::try_from(metadata.width).map_err(|_| {
        RasterstackError::Driver("raster dimensions exceed the TIFF limit".to_string())
    })?;
    let height = u32::try_from(metadata.height).map_err(|_| {
        RasterstackError::Driver("raster dimensions exceed the TIFF limit".to_string())
    })?;

    let mut encoder = TiffEncoder::new(BufWriter::new(File::create(path)?))?;
    for (index, band) in stack.axis_iter(Axis(0)).enumerate() {
        let samples = band.iter().copied().collect::<Vec<f32>>();
        match metadata.dtype {
            DType::UInt8 => {
                let data = samples
                    .iter()
                    .map(|value| value.to_u8().unwrap_or(0))
                    .collect::<Vec<_>>();
                let mut image = encoder.new_image::<Gray8>(width, height)?;
                if index == 0 {
                    write_geo_tags(image.encoder(), metadata)?;
                }
                image.write_data(&data)?;
            }
            DType::UInt16 => {
                let data = samples
                    .iter()
                    .map(|value| value.to_u16().unwrap_or(0))
                    .collect::<Vec<_>>();
                let mut image = encoder.new_image::<Gray16>(width, height)?;
                if index == 0 {
                    write_geo_tags(image.encoder(), metadata)?;
                }
                image.write_data(&data)?;
            }
            DType::UInt32 => {
                let data = samples
                    .iter()
                    .map(|value| value.to_u32().unwrap_or(0))
                    .collect::<Vec<_>>();
                let mut image = encoder.new_image::<Gray32>(width, height)?;
                if index == 0 {
                    write_geo_tags(image.encoder(), metadata)?;
                }
                image.write_data(&data)?;
            }
            DType::Float32 => {
                let mut image = encoder.new_image::<Gray32Float>(width, height)?;
                if index == 0 {
                    write_geo_tags(image.encoder(), metadata)?;
                }
                image.write_data(&samples)?;
            }
            DType::Float64 => {
                let data = samples.iter().map(|&value| f64::from(value)).collect::<Vec<_>>();
                let mut image = encoder.new_image::<Gray64Float>(width, height)?;
                if index == 0 {
                    write_geo_tags(image.encoder(), metadata)?;
                }
                image.write_data(&data)?;
            }
        }
    }
    Ok(())
}

fn write_geo_tags<W: Write + Seek, K: TiffKind>(
    directory: &mut DirectoryEncoder<W, K>,
    metadata: &Metadata,
) -> Result<()> {
    let transform = &metadata.transform;
    let scale = [transform.a(), -transform.e(), 0.0];
    let tiepoint = [0.0, 0.0, 0.0, transform.xoff(), transform.yoff(), 0.0];
    directory.write_tag(Tag::ModelPixelScaleTag, &scale[..])?;
    directory.write_tag(Tag::ModelTiepointTag, &tiepoint[..])?;

    let citation = format!("{}|", metadata.crs.proj_string());
    let citation_len = u16::try_from(citation.len()).unwrap_or(u16::MAX);
    let (model, code_key) = if metadata.crs.is_geographic() {
        (2, KEY_GEOGRAPHIC_CRS)
    } else {
        (1, KEY_PROJECTED_CRS)
    };
    let keys: Vec<u16> = vec![
        1, 1, 0, 4,
        KEY_MODEL_TYPE, 0, 1, model,
        KEY_RASTER_TYPE, 0, 1, 1,
        KEY_CITATION, TAG_GEO_ASCII_PARAMS, citation_len, 0,
        code_key, 0, 1, metadata.crs.epsg(),
    ];
    directory.write_tag(Tag::Unknown(TAG_GEOKEY_DIRECTORY), &keys[..])?;
    directory.write_tag(Tag::Unknown(TAG_GEO_ASCII_PARAMS), citation.as_str())?;

    if let Some(nodata) = metadata.nodata {
        directory.write_tag(Tag::Unknown(TAG_GDAL_NODATA), nodata.to_string().as_str())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn metadata(count: usize, dtype: DType) -> Metadata {
        Metadata {
            crs: Crs::wgs84(),
            transform: AffineTransform::new(0.5, 0.0, 10.0, 0.0, -0.5, 52.0),
            width: 4,
            height: 3,
            count,
            dtype,
            nodata: Some(-1.0),
        }
    }

    fn stack(count: usize) -> Array3<f32> {
        Array3::from_shape_fn((count, 3, 4), |(band, row, col)| {
            (band * 50 + row * 4 + col) as f32
        })
    }

    #[test]
    fn float_roundtrip_keeps_metadata_and_pixels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scene.tif");
        let metadata = metadata(2, DType::Float32);
        let stack = stack(2);
        write(&path, &metadata, stack.view()).unwrap();

        let dataset = open(&path).unwrap();
        assert_eq!(dataset.metadata(), metadata);
        assert_eq!(dataset.read_band(0).unwrap(), stack.index_axis(Axis(0), 0));
        assert_eq!(dataset.read_band(1).unwrap(), stack.index_axis(Axis(0), 1));
    }

    #[test]
    fn uint8_pages_come_back_as_uint8() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bytes.tif");
        let metadata = metadata(1, DType::UInt8);
        let stack = stack(1);
        write(&path, &metadata, stack.view()).unwrap();

        let dataset = open(&path).unwrap();
        assert_eq!(dataset.dtype(), DType::UInt8);
        assert_eq!(dataset.read_band(0).unwrap(), stack.index_axis(Axis(0), 0));
    }

    #[test]
    fn projected_crs_survives_the_geokeys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("utm.tif");
        let utm = Crs::from_epsg(32633).unwrap();
        let metadata = Metadata {
            crs: utm,
            transform: AffineTransform::new(10.0, 0.0, 500_000.0, 0.0, -10.0, 5_000_000.0),
            ..metadata(1, DType::Float32)
        };
        write(&path, &metadata, stack(1).view()).unwrap();

        let dataset = open(&path).unwrap();
        assert_eq!(dataset.crs(), utm);
        assert_eq!(dataset.transform(), metadata.transform);
    }

    #[test]
    fn band_count_mismatch_is_a_shape_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.tif");
        let result = write(&path, &metadata(2, DType::Float32), stack(1).view());
        assert!(matches!(
            result,
            Err(RasterstackError::ShapeMismatch {
                expected: (2, 3, 4),
                actual: (1, 3, 4),
            })
        ));
    }

    #[test]
    fn rotated_transforms_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rotated.tif");
        let metadata = Metadata {
            transform: AffineTransform::new(0.5, 0.1, 10.0, 0.0, -0.5, 52.0),
            ..metadata(1, DType::Float32)
        };
        let result = write(&path, &metadata, stack(1).view());
        assert!(matches!(result, Err(RasterstackError::Driver(_))));
    }

    #[test]
    fn missing_nodata_stays_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clean.tif");
        let metadata = Metadata {
            nodata: None,
            ..metadata(1, DType::Float32)
        };
        write(&path, &metadata, stack(1).view()).unwrap();
        let dataset = open(&path).unwrap();
        assert_eq!(dataset.nodata(), None);
    }
}
