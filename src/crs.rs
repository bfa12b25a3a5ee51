use std::fmt;

use proj4rs::proj::Proj;

use crate::errors::{RasterstackError, Result};

/// Coordinate reference system, identified by an EPSG code known to the
/// crs-definitions database.
#[derive(Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct Crs {
    code: u16,
}

impl Crs {
    pub fn from_epsg(code: u32) -> Result<Self> {
        u16::try_from(code)
            .ok()
            .filter(|code| crs_definitions::from_code(*code).is_some())
            .map(|code| Crs { code })
            .ok_or_else(|| {
                RasterstackError::CrsType(format!(
                    "EPSG:{code} is not in the crs-definitions database"
                ))
            })
    }

    /// Accepts `"EPSG:4326"` (authority case-insensitive) or a bare code.
    pub fn from_user_input(value: &str) -> Result<Self> {
        let trimmed = value.trim();
        let code = match trimmed.split_once(':') {
            Some((authority, code)) if authority.trim().eq_ignore_ascii_case("epsg") => {
                code.trim()
            }
            Some((authority, _)) => {
                return Err(RasterstackError::CrsType(format!(
                    "unsupported authority {:?} in {trimmed:?}",
                    authority.trim()
                )))
            }
            None => trimmed,
        };
        let code = code.parse::<u32>().map_err(|_| {
            RasterstackError::CrsType(format!("cannot parse {trimmed:?} as an EPSG code"))
        })?;
        Self::from_epsg(code)
    }

    pub fn wgs84() -> Self {
        Crs { code: 4326 }
    }

    pub fn epsg(&self) -> u16 {
        self.code
    }

    pub fn proj_string(&self) -> &'static str {
        crs_definitions::from_code(self.code)
            .map(|def| def.proj4)
            .unwrap_or_default()
    }

    /// proj4rs works in radians for these.
    pub fn is_geographic(&self) -> bool {
        self.proj_string().contains("+proj=longlat")
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.code)
    }
}

impl fmt::Debug for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.code)
    }
}

impl std::str::FromStr for Crs {
    type Err = RasterstackError;

    fn from_str(value: &str) -> Result<Self> {
        Self::from_user_input(value)
    }
}

impl TryFrom<u16> for Crs {
    type Error = RasterstackError;

    fn try_from(code: u16) -> Result<Self> {
        Self::from_epsg(u32::from(code))
    }
}

impl From<Crs> for u16 {
    fn from(crs: Crs) -> u16 {
        crs.code
    }
}

/// Fallible conversion into [`Crs`], so setters take codes, strings or
/// ready-made values alike.
pub trait TryIntoCrs {
    fn try_into_crs(self) -> Result<Crs>;
}

impl TryIntoCrs for Crs {
    fn try_into_crs(self) -> Result<Crs> {
        Ok(self)
    }
}

impl TryIntoCrs for &Crs {
    fn try_into_crs(self) -> Result<Crs> {
        Ok(*self)
    }
}

impl TryIntoCrs for &str {
    fn try_into_crs(self) -> Result<Crs> {
        Crs::from_user_input(self)
    }
}

impl TryIntoCrs for String {
    fn try_into_crs(self) -> Result<Crs> {
        Crs::from_user_input(&self)
    }
}

impl TryIntoCrs for u32 {
    fn try_into_crs(self) -> Result<Crs> {
        Crs::from_epsg(self)
    }
}

/// Point projector between two CRSs with the proj4rs state built once,
/// not per point.
pub struct CrsTransformer {
    source: Proj,
    target: Proj,
    source_is_geographic: bool,
    target_is_geographic: bool,
    identity: bool,
}

impl CrsTransformer {
    pub fn new(source: Crs, target: Crs) -> Result<Self> {
        Ok(CrsTransformer {
            source: Proj::from_proj_string(source.proj_string())?,
            target: Proj::from_proj_string(target.proj_string())?,
            source_is_geographic: source.is_geographic(),
            target_is_geographic: target.is_geographic(),
            identity: source == target,
        })
    }

    pub fn project(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        if self.identity {
            return Ok((x, y));
        }
        let (x_in, y_in) = if self.source_is_geographic {
            (x.to_radians(), y.to_radians())
        } else {
            (x, y)
        };
        let mut point = (x_in, y_in, 0.0);
        proj4rs::transform::transform(&self.source, &self.target, &mut point)?;
        if self.target_is_geographic {
            Ok((point.0.to_degrees(), point.1.to_degrees()))
        } else {
            Ok((point.0, point.1))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const EPS: f64 = 1e-6;

    fn approx_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < EPS
    }

    #[rstest]
    #[case("EPSG:4326", 4326)]
    #[case("epsg:32633", 32633)]
    #[case(" EPSG : 3857 ", 3857)]
    #[case("4326", 4326)]
    fn parses_user_input(#[case] input: &str, #[case] code: u16) {
        assert_eq!(Crs::from_user_input(input).unwrap().epsg(), code);
    }

    #[rstest]
    #[case("ESRI:102003")]
    #[case("EPSG:999999")]
    #[case("not a crs")]
    #[case("")]
    fn rejects_bad_input(#[case] input: &str) {
        assert!(matches!(
            Crs::from_user_input(input),
            Err(RasterstackError::CrsType(_))
        ));
    }

    #[test]
    fn displays_with_authority() {
        assert_eq!(Crs::wgs84().to_string(), "EPSG:4326");
    }

    #[test]
    fn serde_roundtrips_the_bare_code() {
        let crs = Crs::from_epsg(32633).unwrap();
        assert_eq!(serde_json::to_string(&crs).unwrap(), "32633");
        assert_eq!(serde_json::from_str::<Crs>("32633").unwrap(), crs);
    }

    #[test]
    fn deserialization_rejects_unknown_codes() {
        let error = serde_json::from_str::<Crs>("0").unwrap_err();
        assert!(error.to_string().contains("EPSG:0"));
    }

    #[test]
    fn geographic_flag() {
        assert!(Crs::wgs84().is_geographic());
        assert!(!Crs::from_epsg(3857).unwrap().is_geographic());
        assert!(!Crs::from_epsg(32633).unwrap().is_geographic());
    }

    #[test]
    fn projects_origin_to_mercator() {
        let transformer = CrsTransformer::new(Crs::wgs84(), Crs::from_epsg(3857).unwrap()).unwrap();
        let (x, y) = transformer.project(0.0, 0.0).unwrap();
        assert!(approx_eq(x, 0.0));
        assert!(approx_eq(y, 0.0));
    }

    #[test]
    fn roundtrips_through_utm() {
        let utm = Crs::from_epsg(32633).unwrap();
        let forward = CrsTransformer::new(Crs::wgs84(), utm).unwrap();
        let back = CrsTransformer::new(utm, Crs::wgs84()).unwrap();

        let (x, y) = forward.project(15.0, 52.0).unwrap();
        assert!(x > 400_000.0 && x < 600_000.0, "easting {x}");
        assert!(y > 5_000_000.0 && y < 6_000_000.0, "northing {y}");

        let (lon, lat) = back.project(x, y).unwrap();
        assert!((lon - 15.0).abs() < 1e-5);
        assert!((lat - 52.0).abs() < 1e-5);
    }

    #[test]
    fn same_crs_is_identity() {
        let transformer = CrsTransformer::new(Crs::wgs84(), Crs::wgs84()).unwrap();
        let (x, y) = transformer.project(10.0, 51.5).unwrap();
        assert!(approx_eq(x, 10.0));
        assert!(approx_eq(y, 51.5));
    }
}
