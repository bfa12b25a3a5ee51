pub mod geometry;
pub mod layer;
pub mod metadata;
pub mod raster;

pub use geometry::{GeometrySource, PolygonFeatures};
pub use layer::Layer;
pub use metadata::{DType, Metadata};
pub use raster::{PixelInfo, Raster, RasterBuilder};
