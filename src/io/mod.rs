use std::{
    fs::File,
    io::Read,
    path::Path,
    sync::LazyLock,
};

use geo::AffineTransform;
use itertools::Itertools;
use log::debug;
use ndarray::{Array2, Array3, ArrayView3, Axis};

use crate::{
    components::metadata::{DType, Metadata},
    crs::Crs,
    errors::{RasterstackError, Result},
};

pub mod gtiff;

/// Band-oriented pixel source. File drivers and in-memory stacks both
/// come through here so `Raster` never cares where pixels live.
pub trait Dataset {
    fn band_count(&self) -> usize;

    /// Grid shape (H, W).
    fn shape(&self) -> (usize, usize);

    fn dtype(&self) -> DType;

    fn nodata(&self) -> Option<f32>;

    fn crs(&self) -> Crs;

    fn transform(&self) -> AffineTransform<f64>;

    fn read_band(&self, index: usize) -> Result<Array2<f32>>;

    fn metadata(&self) -> Metadata {
        let (height, width) = self.shape();
        Metadata {
            crs: self.crs(),
            transform: self.transform(),
            width,
            height,
            count: self.band_count(),
            dtype: self.dtype(),
            nodata: self.nodata(),
        }
    }
}

/// Dataset over an owned (C, H, W) stack.
pub struct MemDataset {
    stack: Array3<f32>,
    metadata: Metadata,
}

impl MemDataset {
    pub fn new(stack: Array3<f32>, metadata: Metadata) -> Result<Self> {
        if stack.dim() != metadata.shape() {
            return Err(RasterstackError::ShapeMismatch {
                expected: metadata.shape(),
                actual: stack.dim(),
            });
        }
        Ok(Self { stack, metadata })
    }
}

impl Dataset for MemDataset {
    fn band_count(&self) -> usize {
        self.metadata.count
    }

    fn shape(&self) -> (usize, usize) {
        (self.metadata.height, self.metadata.width)
    }

    fn dtype(&self) -> DType {
        self.metadata.dtype
    }

    fn nodata(&self) -> Option<f32> {
        self.metadata.nodata
    }

    fn crs(&self) -> Crs {
        self.metadata.crs
    }

    fn transform(&self) -> AffineTransform<f64> {
        self.metadata.transform
    }

    fn read_band(&self, index: usize) -> Result<Array2<f32>> {
        if index >= self.metadata.count {
            return Err(RasterstackError::IndexOutOfRange {
                kind: "band",
                index,
                len: self.metadata.count,
            });
        }
        Ok(self.stack.index_axis(Axis(0), index).to_owned())
    }
}

pub type OpenFn = fn(&Path) -> Result<Box<dyn Dataset>>;
pub type WriteFn = fn(&Path, &Metadata, ArrayView3<f32>) -> Result<()>;

/// One file format the crate can read and write.
pub struct Driver {
    pub name: &'static str,
    pub extensions: &'static [&'static str],
    magic: &'static [&'static [u8; 4]],
    pub open: OpenFn,
    pub write: WriteFn,
}

static DRIVERS: LazyLock<Vec<Driver>> = LazyLock::new(|| {
    vec![Driver {
        name: "GTiff",
        extensions: &["tif", "tiff"],
        magic: &[b"II*\0", b"MM\0*"],
        open: gtiff::open,
        write: gtiff::write,
    }]
});

/// Pick a driver by explicit name, else by file extension.
pub fn resolve_driver(path: &Path, explicit: Option<&str>) -> Result<&'static Driver> {
    if let Some(name) = explicit {
        return DRIVERS
            .iter()
            .find(|driver| driver.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| RasterstackError::DriverResolution {
                extension: name.to_string(),
            });
    }
    let extension = path
        .extension()
        .map(|extension| extension.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    DRIVERS
        .iter()
        .find(|driver| driver.extensions.contains(&extension.as_str()))
        .ok_or_else(|| {
            debug!(
                "no driver for extension {extension:?}, known: {}",
                DRIVERS.iter().map(|driver| driver.name).join(", ")
            );
            RasterstackError::DriverResolution { extension }
        })
}

/// Like [`resolve_driver`], with a magic-bytes sniff as the last resort
/// when the extension resolves nothing.
pub fn resolve_driver_for_open(path: &Path, explicit: Option<&str>) -> Result<&'static Driver> {
    match resolve_driver(path, explicit) {
        Err(RasterstackError::DriverResolution { extension }) if explicit.is_none() => {
            sniff(path)?.ok_or(RasterstackError::DriverResolution { extension })
        }
        other => other,
    }
}

fn sniff(path: &Path) -> Result<Option<&'static Driver>> {
    let mut header = [0u8; 4];
    File::open(path)?.read_exact(&mut header)?;
    let resolved = DRIVERS
        .iter()
        .find(|driver| driver.magic.iter().any(|magic| **magic == header));
    if let Some(driver) = resolved {
        debug!("resolved {} for {} by magic bytes", driver.name, path.display());
    }
    Ok(resolved)
}

#[derive(Clone, Debug, Default)]
pub struct OpenOptions {
    /// Driver name, skipping extension and magic-byte resolution.
    pub driver: Option<String>,
    /// Reproject onto this CRS right after reading.
    pub crs: Option<Crs>,
}

#[derive(Clone, Debug, Default)]
pub struct WriteOptions {
    pub driver: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::AffineTransform;

    fn metadata() -> Metadata {
        Metadata {
            crs: Crs::wgs84(),
            transform: AffineTransform::new(1.0, 0.0, 0.0, 0.0, -1.0, 2.0),
            width: 3,
            height: 2,
            count: 2,
            dtype: DType::Float32,
            nodata: None,
        }
    }

    #[test]
    fn resolves_by_extension() {
        let driver = resolve_driver(Path::new("scene.TIF"), None).unwrap();
        assert_eq!(driver.name, "GTiff");
        assert!(resolve_driver(Path::new("scene.png"), None).is_err());
        assert!(matches!(
            resolve_driver(Path::new("scene"), None),
            Err(RasterstackError::DriverResolution { extension }) if extension.is_empty()
        ));
    }

    #[test]
    fn explicit_name_beats_the_extension() {
        let driver = resolve_driver(Path::new("scene.dat"), Some("gtiff")).unwrap();
        assert_eq!(driver.name, "GTiff");
        assert!(matches!(
            resolve_driver(Path::new("scene.tif"), Some("netcdf")),
            Err(RasterstackError::DriverResolution { extension }) if extension == "netcdf"
        ));
    }

    #[test]
    fn sniffs_magic_bytes_without_an_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("headerless");
        std::fs::write(&path, b"II*\0rest-of-the-file").unwrap();
        let driver = resolve_driver_for_open(&path, None).unwrap();
        assert_eq!(driver.name, "GTiff");

        std::fs::write(&path, b"notatiff").unwrap();
        assert!(resolve_driver_for_open(&path, None).is_err());
    }

    #[test]
    fn mem_dataset_checks_the_stack_shape() {
        let transposed = Array3::zeros((2, 3, 2));
        assert!(matches!(
            MemDataset::new(transposed, metadata()),
            Err(RasterstackError::ShapeMismatch {
                expected: (2, 2, 3),
                actual: (2, 3, 2),
            })
        ));

        let matching = Array3::zeros((2, 2, 3));
        assert!(MemDataset::new(matching, metadata()).is_ok());
    }

    #[test]
    fn mem_dataset_reads_bands_by_index() {
        let stack = Array3::from_shape_fn((2, 2, 3), |(band, row, col)| {
            (band * 10 + row * 3 + col) as f32
        });
        let dataset = MemDataset::new(stack, metadata()).unwrap();
        assert_eq!(dataset.metadata(), metadata());
        let band = dataset.read_band(1).unwrap();
        assert_eq!(band[[0, 0]], 10.0);
        assert_eq!(band[[1, 2]], 15.0);
        assert!(matches!(
            dataset.read_band(2),
            Err(RasterstackError::IndexOutOfRange { kind: "band", index: 2, len: 2 })
        ));
    }
}
