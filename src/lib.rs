pub mod components;
pub mod crs;
pub mod errors;
pub mod io;
pub mod mask;
pub mod selection;
pub mod warp;

pub use components::{
    DType, GeometrySource, Layer, Metadata, PixelInfo, PolygonFeatures, Raster, RasterBuilder,
};
pub use crs::{Crs, CrsTransformer, TryIntoCrs};
pub use errors::{RasterstackError, Result};
pub use io::{Dataset, MemDataset, OpenOptions, WriteOptions};
pub use mask::CropOptions;
pub use selection::{BandSelection, FeatureSelection};
pub use warp::TargetGrid;

pub use geo::{AffineTransform, MultiPolygon, Polygon};
