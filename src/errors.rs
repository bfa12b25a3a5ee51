pub type Result<T> = std::result::Result<T, RasterstackError>;

#[derive(thiserror::Error, Debug)]
pub enum RasterstackError {
    #[error(transparent)]
    ProjError(#[from] proj4rs::errors::Error),
    #[error(transparent)]
    TiffError(#[from] tiff::TiffError),
    #[error(transparent)]
    NdarrayError(#[from] ndarray::ShapeError),
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error("construction failed: {0}")]
    Construction(String),
    #[error("unsupported crs: {0}")]
    CrsType(String),
    #[error("empty data: {0}")]
    EmptyData(&'static str),
    #[error("pixel index ({row}, {col}) out of range for {height}x{width} pixels")]
    PixelIndexOutOfRange {
        row: usize,
        col: usize,
        height: usize,
        width: usize,
    },
    #[error("{kind} index {index} out of range, len {len}")]
    IndexOutOfRange {
        kind: &'static str,
        index: usize,
        len: usize,
    },
    #[error("no driver resolves {extension:?}")]
    DriverResolution { extension: String },
    #[error("shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: (usize, usize, usize),
        actual: (usize, usize, usize),
    },
    #[error("driver error: {0}")]
    Driver(String),
}
