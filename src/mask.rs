use geo::{AffineTransform, BoundingRect, Contains, Coord, Intersects, Point, Polygon, Rect};
use ndarray::Array2;
use rayon::prelude::*;

use crate::{
    errors::{RasterstackError, Result},
    selection::FeatureSelection,
};

/// Knobs forwarded to the masking routine by crop operations.
#[derive(Clone, Debug, Default)]
pub struct CropOptions {
    /// Feature subset, legal only against a feature-provider source.
    pub features: Option<FeatureSelection>,
    /// Keep cells whose extent touches the polygon instead of only cells
    /// whose center lies inside it.
    pub all_touched: bool,
    /// Fill for cells outside the polygon. Defaults to the layer nodata,
    /// then NaN.
    pub nodata: Option<f32>,
}

/// Crop `pixels` to the polygon's bounding window and fill cells outside
/// the polygon. Returns the windowed pixels and their transform.
///
/// The window never grows: it is the intersection of the polygon's
/// bounding rectangle with the pixel grid. No overlap is an error.
pub fn mask_band(
    pixels: &Array2<f32>,
    transform: &AffineTransform<f64>,
    polygon: &Polygon<f64>,
    fill: f32,
    all_touched: bool,
) -> Result<(Array2<f32>, AffineTransform<f64>)> {
    let (height, width) = pixels.dim();
    let bounds = polygon
        .bounding_rect()
        .ok_or(RasterstackError::EmptyData("polygon has no extent"))?;
    let inverse = transform.inverse().ok_or_else(|| {
        RasterstackError::Construction("raster transform is not invertible".to_string())
    })?;

    let (col_range, row_range) = pixel_window(&inverse, &bounds, width, height)
        .ok_or(RasterstackError::EmptyData(
            "geometry does not overlap the raster extent",
        ))?;
    let (col_start, col_end) = col_range;
    let (row_start, row_end) = row_range;
    let out_width = col_end - col_start;
    let out_height = row_end - row_start;

    let origin = transform.apply(Coord {
        x: col_start as f64,
        y: row_start as f64,
    });
    let window_transform = AffineTransform::new(
        transform.a(),
        transform.b(),
        origin.x,
        transform.d(),
        transform.e(),
        origin.y,
    );

    let mut data = vec![fill; out_height * out_width];
    data.par_chunks_mut(out_width)
        .enumerate()
        .for_each(|(row, out_row)| {
            for (col, out) in out_row.iter_mut().enumerate() {
                let full_col = col_start + col;
                let full_row = row_start + row;
                if covers_cell(polygon, transform, full_col, full_row, all_touched) {
                    *out = pixels[[full_row, full_col]];
                }
            }
        });

    Ok((
        Array2::from_shape_vec((out_height, out_width), data)?,
        window_transform,
    ))
}

/// Grid window of the polygon bounds: ((col_start, col_end), (row_start,
/// row_end)), clamped to the grid. `None` when disjoint or degenerate.
fn pixel_window(
    inverse: &AffineTransform<f64>,
    bounds: &Rect<f64>,
    width: usize,
    height: usize,
) -> Option<((usize, usize), (usize, usize))> {
    let corners = [
        Coord { x: bounds.min().x, y: bounds.min().y },
        Coord { x: bounds.min().x, y: bounds.max().y },
        Coord { x: bounds.max().x, y: bounds.min().y },
        Coord { x: bounds.max().x, y: bounds.max().y },
    ];
    let mut col_min = f64::INFINITY;
    let mut col_max = f64::NEG_INFINITY;
    let mut row_min = f64::INFINITY;
    let mut row_max = f64::NEG_INFINITY;
    for corner in corners {
        let pixel = inverse.apply(corner);
        col_min = col_min.min(pixel.x);
        col_max = col_max.max(pixel.x);
        row_min = row_min.min(pixel.y);
        row_max = row_max.max(pixel.y);
    }

    let col_start = col_min.floor().max(0.0);
    let col_end = col_max.ceil().min(width as f64);
    let row_start = row_min.floor().max(0.0);
    let row_end = row_max.ceil().min(height as f64);
    if !(col_start < col_end && row_start < row_end) {
        return None;
    }
    Some((
        (col_start as usize, col_end as usize),
        (row_start as usize, row_end as usize),
    ))
}

fn covers_cell(
    polygon: &Polygon<f64>,
    transform: &AffineTransform<f64>,
    col: usize,
    row: usize,
    all_touched: bool,
) -> bool {
    if all_touched {
        let corner_a = transform.apply(Coord { x: col as f64, y: row as f64 });
        let corner_b = transform.apply(Coord {
            x: col as f64 + 1.0,
            y: row as f64 + 1.0,
        });
        polygon.intersects(&Rect::new(corner_a, corner_b))
    } else {
        let center = transform.apply(Coord {
            x: col as f64 + 0.5,
            y: row as f64 + 0.5,
        });
        polygon.contains(&Point::from(center))
    }
}
