use std::{collections::HashMap, fmt, str::FromStr};

use geo::AffineTransform;
use ndarray::Array2;

use crate::{
    crs::Crs,
    errors::{RasterstackError, Result},
};

/// Stored pixel format of a dataset. In memory every band is f32,
/// `DType` is what drivers write and read.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum DType {
    UInt8,
    UInt16,
    UInt32,
    Float32,
    Float64,
}

impl DType {
    pub fn name(&self) -> &'static str {
        match self {
            Self::UInt8 => "uint8",
            Self::UInt16 => "uint16",
            Self::UInt32 => "uint32",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DType {
    type Err = RasterstackError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim() {
            "uint8" => Ok(Self::UInt8),
            "uint16" => Ok(Self::UInt16),
            "uint32" => Ok(Self::UInt32),
            "float32" => Ok(Self::Float32),
            "float64" => Ok(Self::Float64),
            other => Err(RasterstackError::Construction(format!(
                "unknown dtype {other:?}"
            ))),
        }
    }
}

/// Geo-referencing and shape shared by the bands of a stack.
///
/// `transform` maps fractional (col, row) pixel coordinates to world
/// coordinates in `crs`, pixel (0, 0) sitting at the top-left corner.
#[derive(Clone, Debug, PartialEq)]
pub struct Metadata {
    pub crs: Crs,
    pub transform: AffineTransform<f64>,
    pub width: usize,
    pub height: usize,
    pub count: usize,
    pub dtype: DType,
    pub nodata: Option<f32>,
}

impl Metadata {
    /// Array shape (C, H, W).
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.count, self.height, self.width)
    }

    pub fn update(&mut self, other: Metadata) {
        *self = other;
    }

    /// New grid after a crop: transform replaced, width and height taken
    /// from the cropped pixels.
    pub fn update_after_crop(&mut self, transform: AffineTransform<f64>, pixels: &Array2<f32>) {
        let (height, width) = pixels.dim();
        self.transform = transform;
        self.height = height;
        self.width = width;
    }

    pub fn with_count(&self, count: usize) -> Metadata {
        let mut metadata = self.clone();
        metadata.count = count;
        metadata
    }

    /// Key/value form consumed by drivers and callers holding plain maps.
    /// Transform coefficients serialize as `a,b,xoff,d,e,yoff`.
    pub fn to_map(&self) -> HashMap<String, String> {
        let transform = &self.transform;
        HashMap::from([
            ("crs".to_string(), self.crs.to_string()),
            (
                "transform".to_string(),
                format!(
                    "{},{},{},{},{},{}",
                    transform.a(),
                    transform.b(),
                    transform.xoff(),
                    transform.d(),
                    transform.e(),
                    transform.yoff()
                ),
            ),
            ("width".to_string(), self.width.to_string()),
            ("height".to_string(), self.height.to_string()),
            ("count".to_string(), self.count.to_string()),
            ("dtype".to_string(), self.dtype.to_string()),
            (
                "nodata".to_string(),
                self.nodata.map(|value| value.to_string()).unwrap_or_default(),
            ),
        ])
    }

    pub fn from_map(map: &HashMap<String, String>) -> Result<Metadata> {
        let coefficients = require(map, "transform")?
            .split(',')
            .map(|part| part.trim().parse::<f64>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|err| {
                RasterstackError::Construction(format!("malformed transform: {err}"))
            })?;
        let [a, b, xoff, d, e, yoff] = coefficients[..] else {
            return Err(RasterstackError::Construction(format!(
                "transform needs 6 coefficients, got {}",
                coefficients.len()
            )));
        };
        let nodata = match require(map, "nodata")? {
            "" => None,
            value => Some(value.parse::<f32>().map_err(|err| {
                RasterstackError::Construction(format!("malformed nodata: {err}"))
            })?),
        };
        Ok(Metadata {
            crs: Crs::from_user_input(require(map, "crs")?)?,
            transform: AffineTransform::new(a, b, xoff, d, e, yoff),
            width: parse_dimension(map, "width")?,
            height: parse_dimension(map, "height")?,
            count: parse_dimension(map, "count")?,
            dtype: require(map, "dtype")?.parse()?,
            nodata,
        })
    }
}

fn require<'m>(map: &'m HashMap<String, String>, key: &str) -> Result<&'m str> {
    map.get(key)
        .map(String::as_str)
        .ok_or_else(|| RasterstackError::Construction(format!("metadata map is missing {key:?}")))
}

fn parse_dimension(map: &HashMap<String, String>, key: &str) -> Result<usize> {
    require(map, key)?.parse::<usize>().map_err(|err| {
        RasterstackError::Construction(format!("malformed {key}: {err}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn north_up(origin_x: f64, origin_y: f64, resolution: f64) -> AffineTransform<f64> {
        AffineTransform::new(resolution, 0.0, origin_x, 0.0, -resolution, origin_y)
    }

    fn sample() -> Metadata {
        Metadata {
            crs: Crs::wgs84(),
            transform: north_up(10.0, 52.0, 0.25),
            width: 4,
            height: 3,
            count: 2,
            dtype: DType::Float32,
            nodata: Some(-9999.0),
        }
    }

    #[test]
    fn map_roundtrip() {
        let metadata = sample();
        assert_eq!(Metadata::from_map(&metadata.to_map()).unwrap(), metadata);
    }

    #[test]
    fn map_roundtrip_without_nodata() {
        let mut metadata = sample();
        metadata.nodata = None;
        assert_eq!(metadata.to_map()["nodata"], "");
        assert_eq!(Metadata::from_map(&metadata.to_map()).unwrap(), metadata);
    }

    #[test]
    fn missing_key_fails_construction() {
        let mut map = sample().to_map();
        map.remove("width");
        assert!(matches!(
            Metadata::from_map(&map),
            Err(RasterstackError::Construction(_))
        ));
    }

    #[test]
    fn short_transform_fails_construction() {
        let mut map = sample().to_map();
        map.insert("transform".to_string(), "1,0,0".to_string());
        assert!(matches!(
            Metadata::from_map(&map),
            Err(RasterstackError::Construction(_))
        ));
    }

    #[test]
    fn update_replaces_wholesale() {
        let mut metadata = sample();
        let replacement = Metadata {
            crs: Crs::from_epsg(3857).unwrap(),
            transform: north_up(1_113_194.0, 6_800_125.0, 27_830.0),
            width: 8,
            height: 6,
            count: 1,
            dtype: DType::UInt16,
            nodata: None,
        };
        metadata.update(replacement.clone());
        assert_eq!(metadata, replacement);
    }

    #[test]
    fn update_after_crop_tracks_pixels() {
        let mut metadata = sample();
        let cropped = Array2::<f32>::zeros((2, 2));
        let transform = north_up(10.5, 51.75, 0.25);
        metadata.update_after_crop(transform, &cropped);
        assert_eq!(metadata.height, 2);
        assert_eq!(metadata.width, 2);
        assert_eq!(metadata.transform, transform);
        assert_eq!(metadata.count, 2);
    }

    #[test]
    fn dtype_names_roundtrip() {
        for dtype in [
            DType::UInt8,
            DType::UInt16,
            DType::UInt32,
            DType::Float32,
            DType::Float64,
        ] {
            assert_eq!(dtype.name().parse::<DType>().unwrap(), dtype);
        }
        assert!("int7".parse::<DType>().is_err());
    }
}
