use crate::errors::{RasterstackError, Result};

/// Band subset for crop, stacking and save operations.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum BandSelection {
    #[default]
    All,
    Single(usize),
    Many(Vec<usize>),
}

impl BandSelection {
    /// Concrete indexes, in selection order.
    pub fn resolve(&self, count: usize) -> Result<Vec<usize>> {
        let indexes = match self {
            Self::All => (0..count).collect(),
            Self::Single(index) => vec![*index],
            Self::Many(indexes) => indexes.clone(),
        };
        check_bounds("band", &indexes, count)?;
        Ok(indexes)
    }
}

impl From<usize> for BandSelection {
    fn from(index: usize) -> Self {
        Self::Single(index)
    }
}

impl From<Vec<usize>> for BandSelection {
    fn from(indexes: Vec<usize>) -> Self {
        Self::Many(indexes)
    }
}

impl<const N: usize> From<[usize; N]> for BandSelection {
    fn from(indexes: [usize; N]) -> Self {
        Self::Many(indexes.to_vec())
    }
}

impl From<std::ops::Range<usize>> for BandSelection {
    fn from(range: std::ops::Range<usize>) -> Self {
        Self::Many(range.collect())
    }
}

/// Feature subset for cropping against a feature-provider geometry source.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum FeatureSelection {
    Single(usize),
    Many(Vec<usize>),
}

impl FeatureSelection {
    pub fn resolve(&self, count: usize) -> Result<Vec<usize>> {
        let indexes = match self {
            Self::Single(index) => vec![*index],
            Self::Many(indexes) => indexes.clone(),
        };
        check_bounds("feature", &indexes, count)?;
        Ok(indexes)
    }
}

impl From<usize> for FeatureSelection {
    fn from(index: usize) -> Self {
        Self::Single(index)
    }
}

impl From<Vec<usize>> for FeatureSelection {
    fn from(indexes: Vec<usize>) -> Self {
        Self::Many(indexes)
    }
}

fn check_bounds(kind: &'static str, indexes: &[usize], len: usize) -> Result<()> {
    for &index in indexes {
        if index >= len {
            return Err(RasterstackError::IndexOutOfRange { kind, index, len });
        }
    }
    Ok(())
}
