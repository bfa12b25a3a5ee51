use geo::{AffineTransform, Coord};
use itertools::iproduct;
use ndarray::Array2;

use crate::{
    components::metadata::Metadata,
    crs::{Crs, CrsTransformer},
    errors::{RasterstackError, Result},
};

/// Destination grid of a reprojection, computed once per raster so every
/// band lands on the same pixels.
#[derive(Clone, Debug, PartialEq)]
pub struct TargetGrid {
    pub crs: Crs,
    pub transform: AffineTransform<f64>,
    pub width: usize,
    pub height: usize,
}

impl TargetGrid {
    /// Bounds from projecting a ring of boundary samples, square pixels,
    /// dimensions rounded to roughly preserve the source pixel count.
    pub fn for_metadata(metadata: &Metadata, target: Crs) -> Result<TargetGrid> {
        let transformer = CrsTransformer::new(metadata.crs, target)?;
        let width = metadata.width as f64;
        let height = metadata.height as f64;

        let mut x_min = f64::INFINITY;
        let mut x_max = f64::NEG_INFINITY;
        let mut y_min = f64::INFINITY;
        let mut y_max = f64::NEG_INFINITY;
        for (fx, fy) in iproduct!([0.0, 0.5, 1.0], [0.0, 0.5, 1.0]) {
            let world = metadata.transform.apply(Coord {
                x: fx * width,
                y: fy * height,
            });
            // boundary samples outside the target projection domain are skipped
            let Ok((x, y)) = transformer.project(world.x, world.y) else {
                continue;
            };
            if !(x.is_finite() && y.is_finite()) {
                continue;
            }
            x_min = x_min.min(x);
            x_max = x_max.max(x);
            y_min = y_min.min(y);
            y_max = y_max.max(y);
        }
        if !(x_min < x_max && y_min < y_max) {
            return Err(RasterstackError::EmptyData(
                "raster extent does not project into the target crs",
            ));
        }

        let resolution = ((x_max - x_min) / width).max((y_max - y_min) / height);
        let out_width = (((x_max - x_min) / resolution).round() as usize).max(1);
        let out_height = (((y_max - y_min) / resolution).round() as usize).max(1);
        Ok(TargetGrid {
            crs: target,
            transform: AffineTransform::new(resolution, 0.0, x_min, 0.0, -resolution, y_max),
            width: out_width,
            height: out_height,
        })
    }
}

/// Resample one band onto `grid` by inverse projection with
/// nearest-neighbour sampling. Destination cells that project outside the
/// source, or fail to project at all, take `fill`.
pub fn reproject_band(
    pixels: &Array2<f32>,
    source: &Metadata,
    grid: &TargetGrid,
    fill: f32,
) -> Result<Array2<f32>> {
    let transformer = CrsTransformer::new(grid.crs, source.crs)?;
    let inverse = source.transform.inverse().ok_or_else(|| {
        RasterstackError::Construction("raster transform is not invertible".to_string())
    })?;
    let (source_height, source_width) = pixels.dim();

    let mut data = vec![fill; grid.height * grid.width];
    for (row, out_row) in data.chunks_mut(grid.width).enumerate() {
        for (col, out) in out_row.iter_mut().enumerate() {
            let world = grid.transform.apply(Coord {
                x: col as f64 + 0.5,
                y: row as f64 + 0.5,
            });
            let Ok((x, y)) = transformer.project(world.x, world.y) else {
                continue;
            };
            let pixel = inverse.apply(Coord { x, y });
            let source_col = pixel.x.floor();
            let source_row = pixel.y.floor();
            if source_col >= 0.0
                && source_col < source_width as f64
                && source_row >= 0.0
                && source_row < source_height as f64
            {
                *out = pixels[[source_row as usize, source_col as usize]];
            }
        }
    }
    Ok(Array2::from_shape_vec((grid.height, grid.width), data)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::metadata::DType;

    // 4x4 quarter-degree grid over lon [10, 11], lat [51, 52]
    fn source_metadata() -> Metadata {
        Metadata {
            crs: Crs::wgs84(),
            transform: AffineTransform::new(0.25, 0.0, 10.0, 0.0, -0.25, 52.0),
            width: 4,
            height: 4,
            count: 1,
            dtype: DType::Float32,
            nodata: None,
        }
    }

    #[test]
    fn same_crs_grid_is_the_source_grid() {
        let metadata = source_metadata();
        let grid = TargetGrid::for_metadata(&metadata, metadata.crs).unwrap();
        assert_eq!(grid.width, 4);
        assert_eq!(grid.height, 4);
        assert_eq!(grid.transform, metadata.transform);
    }

    #[test]
    fn same_crs_resampling_is_lossless() {
        let metadata = source_metadata();
        let pixels = Array2::from_shape_fn((4, 4), |(row, col)| (row * 4 + col) as f32);
        let grid = TargetGrid::for_metadata(&metadata, metadata.crs).unwrap();
        let resampled = reproject_band(&pixels, &metadata, &grid, -1.0).unwrap();
        assert_eq!(resampled, pixels);
    }

    #[test]
    fn mercator_grid_covers_the_source_extent() {
        let metadata = source_metadata();
        let mercator = Crs::from_epsg(3857).unwrap();
        let grid = TargetGrid::for_metadata(&metadata, mercator).unwrap();
        assert_eq!(grid.crs, mercator);
        assert!(grid.width >= 1 && grid.height >= 1);

        let forward = CrsTransformer::new(metadata.crs, mercator).unwrap();
        let resolution = grid.transform.a();
        let x_min = grid.transform.xoff();
        let y_max = grid.transform.yoff();
        let x_max = x_min + resolution * grid.width as f64;
        let y_min = y_max - resolution * grid.height as f64;
        for (lon, lat) in [(10.0, 52.0), (11.0, 52.0), (10.0, 51.0), (11.0, 51.0)] {
            let (x, y) = forward.project(lon, lat).unwrap();
            assert!(x >= x_min - resolution && x <= x_max + resolution);
            assert!(y >= y_min - resolution && y <= y_max + resolution);
        }
    }

    #[test]
    fn constant_band_stays_constant_or_fill() {
        let metadata = source_metadata();
        let pixels = Array2::from_elem((4, 4), 7.0f32);
        let grid =
            TargetGrid::for_metadata(&metadata, Crs::from_epsg(3857).unwrap()).unwrap();
        let resampled = reproject_band(&pixels, &metadata, &grid, -1.0).unwrap();
        assert!(resampled.iter().all(|&value| value == 7.0 || value == -1.0));
        assert!(resampled.iter().any(|&value| value == 7.0));
    }
}
