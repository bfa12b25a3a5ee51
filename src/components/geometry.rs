use geo::{MultiPolygon, Polygon};

use crate::{
    errors::{RasterstackError, Result},
    selection::FeatureSelection,
};

/// Ordered list of polygon features, the shapefile-like source cropping
/// can pick individual features from.
#[derive(Clone, Debug, PartialEq)]
pub struct PolygonFeatures {
    polygons: Vec<Polygon<f64>>,
}

impl PolygonFeatures {
    pub fn new(polygons: Vec<Polygon<f64>>) -> Self {
        Self { polygons }
    }

    pub fn len(&self) -> usize {
        self.polygons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.polygons.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Polygon<f64>> {
        self.polygons.get(index)
    }
}

impl From<Vec<Polygon<f64>>> for PolygonFeatures {
    fn from(polygons: Vec<Polygon<f64>>) -> Self {
        Self::new(polygons)
    }
}

/// What a crop runs against: one polygon, the parts of a multi-polygon,
/// or a feature provider. Only the provider supports feature selection.
#[derive(Clone, Debug, PartialEq)]
pub enum GeometrySource {
    Single(Polygon<f64>),
    Collection(MultiPolygon<f64>),
    Features(PolygonFeatures),
}

impl GeometrySource {
    /// Geometry sequence a crop iterates over, in source order. With a
    /// `features` selection the source must be the `Features` variant.
    pub fn geometries(&self, features: Option<&FeatureSelection>) -> Result<Vec<&Polygon<f64>>> {
        match (self, features) {
            (Self::Single(polygon), None) => Ok(vec![polygon]),
            (Self::Collection(multi), None) => Ok(multi.iter().collect()),
            (Self::Features(provider), None) => Ok(provider.polygons.iter().collect()),
            (Self::Features(provider), Some(selection)) => {
                let indexes = selection.resolve(provider.len())?;
                Ok(indexes
                    .into_iter()
                    .filter_map(|index| provider.get(index))
                    .collect())
            }
            (_, Some(_)) => Err(RasterstackError::Construction(
                "feature selection needs a feature-provider geometry source".to_string(),
            )),
        }
    }
}

impl From<Polygon<f64>> for GeometrySource {
    fn from(polygon: Polygon<f64>) -> Self {
        Self::Single(polygon)
    }
}

impl From<MultiPolygon<f64>> for GeometrySource {
    fn from(multi: MultiPolygon<f64>) -> Self {
        Self::Collection(multi)
    }
}

impl From<Vec<Polygon<f64>>> for GeometrySource {
    fn from(polygons: Vec<Polygon<f64>>) -> Self {
        Self::Features(PolygonFeatures::new(polygons))
    }
}
