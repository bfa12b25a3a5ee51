use std::{
    fmt::Debug,
    ops::{Index, IndexMut},
    path::Path,
};

use either::Either;
use geo::Coord;
use log::{info, warn};
use ndarray::{Array2, Array3, ArrayView2, Axis};
use rayon::prelude::*;

use crate::{
    components::{geometry::GeometrySource, layer::Layer, metadata::Metadata},
    crs::{Crs, TryIntoCrs},
    errors::{RasterstackError, Result},
    io::{self, Dataset, OpenOptions, WriteOptions},
    mask::CropOptions,
    selection::BandSelection,
    warp::TargetGrid,
};

/// Stack of layers sharing one grid and one CRS.
///
/// The shared metadata is the single source of truth for the grid; the 3D
/// view of the stack is derived on demand by [`Raster::bands`], never
/// stored.
#[derive(Clone, PartialEq)]
pub struct Raster {
    bands: Vec<Layer>,
    metadata: Metadata,
}

impl Debug for Raster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Raster")
            .field("shape", &self.shape())
            .field("crs", &self.metadata.crs)
            .field("dtype", &self.metadata.dtype)
            .field("nodata", &self.metadata.nodata)
            .finish()
    }
}

/// Everything nearest-pixel knows about one cell of one band.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PixelInfo {
    pub band: usize,
    pub latitude: f64,
    pub longitude: f64,
    pub value: f32,
}

impl Raster {
    fn init(bands: Vec<Layer>, metadata: Metadata) -> Result<Self> {
        if bands.is_empty() {
            return Err(RasterstackError::EmptyData("raster has no bands"));
        }
        if bands.len() != metadata.count {
            return Err(RasterstackError::ShapeMismatch {
                expected: metadata.shape(),
                actual: (bands.len(), metadata.height, metadata.width),
            });
        }
        for layer in &bands {
            let (height, width) = layer.shape();
            if (height, width) != (metadata.height, metadata.width) {
                return Err(RasterstackError::ShapeMismatch {
                    expected: metadata.shape(),
                    actual: (bands.len(), height, width),
                });
            }
        }
        let raster = Self { bands, metadata };
        info!("new {raster:?}");
        Ok(raster)
    }

    /// Split a dataset into layers, one per band. Metadata defaults to
    /// what the dataset reports.
    pub fn from_dataset(dataset: &dyn Dataset, metadata: Option<Metadata>) -> Result<Self> {
        let metadata = metadata.unwrap_or_else(|| dataset.metadata());
        let bands = (0..metadata.count)
            .map(|index| Layer::new(dataset.read_band(index)?, metadata.clone()))
            .collect::<Result<Vec<_>>>()?;
        Self::init(bands, metadata)
    }

    /// Build from ready-made layers. The metadata is authoritative and the
    /// layers must already sit on its grid.
    pub fn from_layers(layers: Vec<Layer>, metadata: Metadata) -> Result<Self> {
        Self::init(layers, metadata)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_file_with(path, &OpenOptions::default())
    }

    pub fn from_file_with(path: impl AsRef<Path>, options: &OpenOptions) -> Result<Self> {
        let path = path.as_ref();
        let driver = io::resolve_driver_for_open(path, options.driver.as_deref())?;
        let dataset = (driver.open)(path)?;
        let mut raster = Self::from_dataset(dataset.as_ref(), None)?;
        if let Some(crs) = options.crs {
            raster.set_crs(crs)?;
        }
        Ok(raster)
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn crs(&self) -> Crs {
        self.metadata.crs
    }

    /// Array shape (C, H, W).
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.bands.len(), self.metadata.height, self.metadata.width)
    }

    pub fn len(&self) -> usize {
        self.bands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bands.is_empty()
    }

    pub fn layers(&self) -> &[Layer] {
        &self.bands
    }

    pub fn get(&self, index: usize) -> Result<&Layer> {
        self.bands.get(index).ok_or(RasterstackError::IndexOutOfRange {
            kind: "band",
            index,
            len: self.bands.len(),
        })
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Layer> {
        self.bands.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Layer> {
        self.bands.iter_mut()
    }

    /// Reproject the whole stack. The target grid is computed once from
    /// the shared metadata and every band is resampled onto it, so the
    /// stack stays homogeneous; on any error the raster is unchanged.
    pub fn set_crs(&mut self, crs: impl TryIntoCrs) -> Result<()> {
        let target = crs.try_into_crs()?;
        if target == self.metadata.crs {
            return Ok(());
        }
        let grid = TargetGrid::for_metadata(&self.metadata, target)?;
        info!("reprojecting {} bands onto {grid:?}", self.bands.len());
        let staged = self
            .bands
            .par_iter()
            .map(|layer| layer.reprojected_onto(&grid))
            .collect::<Result<Vec<_>>>()?;
        self.bands = staged;
        self.metadata.crs = grid.crs;
        self.metadata.transform = grid.transform;
        self.metadata.width = grid.width;
        self.metadata.height = grid.height;
        Ok(())
    }

    /// Crop the selected bands (default all) against the geometry source.
    ///
    /// All cropped states are staged first and must agree with each other
    /// and with any unselected band on shape and transform; then the whole
    /// stack commits at once and the shared metadata takes the last
    /// processed band's metadata. On any error the raster is unchanged.
    pub fn crop(
        &mut self,
        source: &GeometrySource,
        bands: Option<BandSelection>,
        options: &CropOptions,
    ) -> Result<()> {
        let selected = bands.unwrap_or_default().resolve(self.bands.len())?;
        let staged = selected
            .par_iter()
            .map(|&index| Ok((index, self.bands[index].cropped(source, options)?)))
            .collect::<Result<Vec<_>>>()?;
        let Some((_, reference)) = staged.first() else {
            return Err(RasterstackError::EmptyData("band selection is empty"));
        };

        let shape = reference.shape();
        let transform = reference.metadata().transform;
        let homogeneous = |layer: &Layer| {
            layer.shape() == shape && layer.metadata().transform == transform
        };
        if !staged.iter().all(|(_, layer)| homogeneous(layer)) {
            return Err(RasterstackError::Construction(
                "bands crop to different grids".to_string(),
            ));
        }
        // an untouched band off the cropped grid would leave the stack torn
        let untouched_fits = self
            .bands
            .iter()
            .enumerate()
            .filter(|(index, _)| !selected.contains(index))
            .all(|(_, layer)| homogeneous(layer));
        if !untouched_fits {
            return Err(RasterstackError::ShapeMismatch {
                expected: (self.bands.len(), shape.0, shape.1),
                actual: (self.bands.len(), self.metadata.height, self.metadata.width),
            });
        }

        let count = self.metadata.count;
        let mut last_metadata = None;
        for (index, layer) in staged {
            last_metadata = Some(layer.metadata().clone());
            self.bands[index] = layer;
        }
        if let Some(metadata) = last_metadata {
            self.metadata = metadata;
            self.metadata.count = count;
        }
        Ok(())
    }

    /// Dense per-pixel cell-center coordinates, (latitudes, longitudes),
    /// each shaped (H, W). Costs O(H * W).
    pub fn coordinates(&self) -> Result<(Array2<f64>, Array2<f64>)> {
        let (height, width) = (self.metadata.height, self.metadata.width);
        if height == 0 || width == 0 {
            return Ok((Array2::zeros((height, width)), Array2::zeros((height, width))));
        }
        let transform = self.metadata.transform;
        let mut latitudes = vec![0f64; height * width];
        let mut longitudes = vec![0f64; height * width];
        latitudes
            .par_chunks_mut(width)
            .zip(longitudes.par_chunks_mut(width))
            .enumerate()
            .for_each(|(row, (lat_row, lon_row))| {
                for col in 0..width {
                    let center = transform.apply(Coord {
                        x: col as f64 + 0.5,
                        y: row as f64 + 0.5,
                    });
                    lat_row[col] = center.y;
                    lon_row[col] = center.x;
                }
            });
        Ok((
            Array2::from_shape_vec((height, width), latitudes)?,
            Array2::from_shape_vec((height, width), longitudes)?,
        ))
    }

    /// Cell nearest to (latitude, longitude) through the inverse
    /// transform, clamped to the grid. Returns the row-major flat index
    /// and the cell-center coordinates.
    pub fn nearest_pixel(&self, latitude: f64, longitude: f64) -> Result<(usize, (f64, f64))> {
        let (height, width) = (self.metadata.height, self.metadata.width);
        if height == 0 || width == 0 {
            return Err(RasterstackError::EmptyData("raster has no pixels"));
        }
        let inverse = self.metadata.transform.inverse().ok_or_else(|| {
            RasterstackError::Construction("raster transform is not invertible".to_string())
        })?;
        let pixel = inverse.apply(Coord {
            x: longitude,
            y: latitude,
        });
        let col = pixel.x.floor().clamp(0.0, (width - 1) as f64) as usize;
        let row = pixel.y.floor().clamp(0.0, (height - 1) as f64) as usize;
        let center = self.metadata.transform.apply(Coord {
            x: col as f64 + 0.5,
            y: row as f64 + 0.5,
        });
        Ok((row * width + col, (center.y, center.x)))
    }

    pub fn pixel_info(&self, latitude: f64, longitude: f64, band: usize) -> Result<PixelInfo> {
        let (flat, (lat, lon)) = self.nearest_pixel(latitude, longitude)?;
        let row = flat / self.metadata.width;
        let col = flat % self.metadata.width;
        let value = self.get(band)?.get_by_index(row, col)?;
        Ok(PixelInfo {
            band,
            latitude: lat,
            longitude: lon,
            value,
        })
    }

    /// Pixel data as one array: merged, the full (C, H, W) stack; not
    /// merged, band 0 alone as (H, W).
    pub fn bands(&self, merge: bool) -> Result<Either<Array2<f32>, Array3<f32>>> {
        if merge {
            let all = (0..self.bands.len()).collect::<Vec<_>>();
            Ok(Either::Right(self.stack(&all)?))
        } else {
            let first = self.get(0)?;
            Ok(Either::Left(first.pixels().clone()))
        }
    }

    pub fn min(&self, band: usize) -> Result<f32> {
        self.get(band)?.min()
    }

    pub fn max(&self, band: usize) -> Result<f32> {
        self.get(band)?.max()
    }

    pub fn mean(&self, band: usize) -> Result<f32> {
        self.get(band)?.mean()
    }

    fn stack(&self, indexes: &[usize]) -> Result<Array3<f32>> {
        let views = indexes
            .iter()
            .map(|&index| Ok(self.get(index)?.pixels().view()))
            .collect::<Result<Vec<ArrayView2<f32>>>>()?;
        Ok(ndarray::stack(Axis(0), &views)?)
    }

    pub fn to_file(&self, path: impl AsRef<Path>, bands_to_save: Option<BandSelection>) -> Result<()> {
        self.to_file_with(path, bands_to_save, &WriteOptions::default())
    }

    /// Save the selected bands (default all). The stacked write carries
    /// the shared metadata; if the driver rejects the band count, fall
    /// back to saving only the first selected band.
    pub fn to_file_with(
        &self,
        path: impl AsRef<Path>,
        bands_to_save: Option<BandSelection>,
        options: &WriteOptions,
    ) -> Result<()> {
        let path = path.as_ref();
        let driver = io::resolve_driver(path, options.driver.as_deref())?;
        let selected = bands_to_save.unwrap_or_default().resolve(self.bands.len())?;
        let Some(&first) = selected.first() else {
            return Err(RasterstackError::EmptyData("band selection is empty"));
        };
        let stack = self.stack(&selected)?;
        match (driver.write)(path, &self.metadata, stack.view()) {
            Err(RasterstackError::ShapeMismatch { expected, actual }) => {
                warn!(
                    "stacked write expected {expected:?}, got {actual:?}; saving band {first} alone"
                );
                let metadata = self.bands[first].metadata().with_count(1);
                let single = self.stack(&selected[..1])?;
                (driver.write)(path, &metadata, single.view())
            }
            other => other,
        }
    }
}

impl Index<usize> for Raster {
    type Output = Layer;

    fn index(&self, index: usize) -> &Layer {
        &self.bands[index]
    }
}

impl IndexMut<usize> for Raster {
    fn index_mut(&mut self, index: usize) -> &mut Layer {
        &mut self.bands[index]
    }
}

impl IntoIterator for Raster {
    type Item = Layer;
    type IntoIter = std::vec::IntoIter<Layer>;

    fn into_iter(self) -> Self::IntoIter {
        self.bands.into_iter()
    }
}

impl<'a> IntoIterator for &'a Raster {
    type Item = &'a Layer;
    type IntoIter = std::slice::Iter<'a, Layer>;

    fn into_iter(self) -> Self::IntoIter {
        self.bands.iter()
    }
}

impl<'a> IntoIterator for &'a mut Raster {
    type Item = &'a mut Layer;
    type IntoIter = std::slice::IterMut<'a, Layer>;

    fn into_iter(self) -> Self::IntoIter {
        self.bands.iter_mut()
    }
}

/// Construction entry point mirroring the one rule the constructors cannot
/// express on their own: a raster is built from exactly one pixel source.
#[derive(Default)]
pub struct RasterBuilder {
    dataset: Option<Box<dyn Dataset>>,
    layers: Option<Vec<Layer>>,
    metadata: Option<Metadata>,
    crs: Option<Crs>,
}

impl RasterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dataset(mut self, dataset: Box<dyn Dataset>) -> Self {
        self.dataset = Some(dataset);
        self
    }

    pub fn layers(mut self, layers: Vec<Layer>) -> Self {
        self.layers = Some(layers);
        self
    }

    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Reproject right after construction.
    pub fn crs(mut self, crs: Crs) -> Self {
        self.crs = Some(crs);
        self
    }

    pub fn build(self) -> Result<Raster> {
        let mut raster = match (self.dataset, self.layers) {
            (Some(dataset), None) => Raster::from_dataset(dataset.as_ref(), self.metadata),
            (None, Some(layers)) => {
                let metadata = self.metadata.ok_or_else(|| {
                    RasterstackError::Construction(
                        "explicit layers need explicit metadata".to_string(),
                    )
                })?;
                Raster::from_layers(layers, metadata)
            }
            (Some(_), Some(_)) => Err(RasterstackError::Construction(
                "raster takes a dataset or layers, not both".to_string(),
            )),
            (None, None) => Err(RasterstackError::Construction(
                "raster needs a dataset or layers".to_string(),
            )),
        }?;
        if let Some(crs) = self.crs {
            raster.set_crs(crs)?;
        }
        Ok(raster)
    }
}
