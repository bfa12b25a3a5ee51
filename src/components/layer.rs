use std::fmt::Debug;

use log::{debug, info};
use ndarray::{Array2, Array3, Axis};

use crate::{
    components::{geometry::GeometrySource, metadata::Metadata},
    crs::{Crs, TryIntoCrs},
    errors::{RasterstackError, Result},
    mask::{self, CropOptions},
    warp::{self, TargetGrid},
};

/// One band of pixels with its geo-referencing.
///
/// Pixels are always held as f32; the metadata records the stored dtype
/// and keeps the band count of the stack the layer came from.
#[derive(Clone, PartialEq)]
pub struct Layer {
    pixels: Array2<f32>,
    metadata: Metadata,
}

impl Debug for Layer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Layer")
            .field("shape", &self.shape())
            .field("crs", &self.metadata.crs)
            .field("nodata", &self.metadata.nodata)
            .finish()
    }
}

impl Layer {
    pub fn new(pixels: Array2<f32>, metadata: Metadata) -> Result<Self> {
        let (height, width) = pixels.dim();
        if (height, width) != (metadata.height, metadata.width) {
            return Err(RasterstackError::ShapeMismatch {
                expected: (1, metadata.height, metadata.width),
                actual: (1, height, width),
            });
        }
        Ok(Self { pixels, metadata })
    }

    /// Unpack a single-band (1, H, W) stack into a layer.
    pub fn from_stack(stack: Array3<f32>, metadata: Metadata) -> Result<Self> {
        let (count, _, _) = stack.dim();
        if count != 1 {
            return Err(RasterstackError::Construction(format!(
                "cannot build a layer from a stack of {count} bands"
            )));
        }
        Self::new(stack.index_axis_move(Axis(0), 0), metadata)
    }

    pub fn pixels(&self) -> &Array2<f32> {
        &self.pixels
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Replace the metadata. The pixel grid must still fit it.
    pub fn set_metadata(&mut self, metadata: Metadata) -> Result<()> {
        let (height, width) = self.pixels.dim();
        if (height, width) != (metadata.height, metadata.width) {
            return Err(RasterstackError::ShapeMismatch {
                expected: (1, metadata.height, metadata.width),
                actual: (1, height, width),
            });
        }
        self.metadata = metadata;
        Ok(())
    }

    pub fn crs(&self) -> Crs {
        self.metadata.crs
    }

    /// Pixel shape (H, W).
    pub fn shape(&self) -> (usize, usize) {
        self.pixels.dim()
    }

    pub fn get_by_index(&self, row: usize, col: usize) -> Result<f32> {
        let (height, width) = self.shape();
        self.pixels
            .get([row, col])
            .copied()
            .ok_or(RasterstackError::PixelIndexOutOfRange {
                row,
                col,
                height,
                width,
            })
    }

    pub fn min(&self) -> Result<f32> {
        self.finite_values()
            .reduce(f32::min)
            .ok_or(RasterstackError::EmptyData("layer has no pixels to aggregate"))
    }

    pub fn max(&self) -> Result<f32> {
        self.finite_values()
            .reduce(f32::max)
            .ok_or(RasterstackError::EmptyData("layer has no pixels to aggregate"))
    }

    pub fn mean(&self) -> Result<f32> {
        let mut sum = 0f64;
        let mut seen = 0usize;
        for value in self.finite_values() {
            sum += f64::from(value);
            seen += 1;
        }
        if seen == 0 {
            return Err(RasterstackError::EmptyData("layer has no pixels to aggregate"));
        }
        Ok((sum / seen as f64) as f32)
    }

    /// NaN pixels are unfilled nodata and never aggregate.
    fn finite_values(&self) -> impl Iterator<Item = f32> + '_ {
        self.pixels.iter().copied().filter(|value| !value.is_nan())
    }

    /// Reproject onto a grid for `crs`, replacing pixels and metadata
    /// together. No-op when the CRS already matches; an invalid CRS leaves
    /// the layer untouched.
    pub fn set_crs(&mut self, crs: impl TryIntoCrs) -> Result<()> {
        let target = crs.try_into_crs()?;
        if target == self.metadata.crs {
            return Ok(());
        }
        info!("reprojecting {self:?} to {target}");
        let grid = TargetGrid::for_metadata(&self.metadata, target)?;
        *self = self.reprojected_onto(&grid)?;
        Ok(())
    }

    pub(crate) fn reprojected_onto(&self, grid: &TargetGrid) -> Result<Layer> {
        let fill = self.metadata.nodata.unwrap_or(f32::NAN);
        let pixels = warp::reproject_band(&self.pixels, &self.metadata, grid, fill)?;
        let mut metadata = self.metadata.clone();
        metadata.crs = grid.crs;
        metadata.transform = grid.transform;
        metadata.width = grid.width;
        metadata.height = grid.height;
        Layer::new(pixels, metadata)
    }

    /// Crop to the source geometries, each one narrowing the previous
    /// result. The layer only changes if every step succeeds.
    pub fn crop(&mut self, source: &GeometrySource, options: &CropOptions) -> Result<()> {
        *self = self.cropped(source, options)?;
        Ok(())
    }

    pub(crate) fn cropped(&self, source: &GeometrySource, options: &CropOptions) -> Result<Layer> {
        let geometries = source.geometries(options.features.as_ref())?;
        if geometries.is_empty() {
            return Err(RasterstackError::EmptyData("geometry source has no features"));
        }
        let fill = options.nodata.or(self.metadata.nodata).unwrap_or(f32::NAN);

        let mut pixels = self.pixels.clone();
        let mut transform = self.metadata.transform;
        for polygon in geometries {
            let (masked, masked_transform) =
                mask::mask_band(&pixels, &transform, polygon, fill, options.all_touched)?;
            debug!("masked to {:?}", masked.dim());
            pixels = masked;
            transform = masked_transform;
        }

        let mut metadata = self.metadata.clone();
        metadata.update_after_crop(transform, &pixels);
        Layer::new(pixels, metadata)
    }
}
