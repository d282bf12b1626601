//! Batch computations behind `custom` features.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::trace;

use super::value_at::to_feature_value;
use crate::catalog::SourceRef;
use crate::error::DataSourceError;
use crate::store::{FeatureBatch, FeatureValueStore, GridPoint, SpatialStore};

/// Stores a custom computation may read from.
/// `values` exposes features computed in earlier stages.
#[derive(Clone, Copy)]
pub struct DataSources<'a> {
    pub spatial: &'a dyn SpatialStore,
    pub values: &'a dyn FeatureValueStore,
}

/// A `custom` feature: one call over the full candidate point set.
///
/// Points missing from the returned batch are stored as null.
pub trait CustomComputation: Send + Sync {
    fn compute(&self, points: &[GridPoint], sources: DataSources<'_>) -> Result<FeatureBatch, DataSourceError>;
}

impl<F> CustomComputation for F
where
    F: Fn(&[GridPoint], DataSources<'_>) -> Result<FeatureBatch, DataSourceError> + Send + Sync,
{
    fn compute(&self, points: &[GridPoint], sources: DataSources<'_>) -> Result<FeatureBatch, DataSourceError> {
        self(points, sources)
    }
}

/// One source tried by [`FallbackMatch`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchCandidate {
    pub source: SourceRef,
    pub value_column: String,
    /// Search radius in metres.
    pub tolerance: f64,
}

/// Attribute of the first candidate source with a non-null match within its
/// tolerance, tried in order. Points matching none are null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackMatch {
    pub candidates: Vec<MatchCandidate>,
    #[serde(default)]
    pub hashed: bool,
}

impl FallbackMatch {
    /// Bedrock class: bedrock lines within 112.5 m, else bedrock polygons
    /// within 12.5 m.
    pub fn bedrock() -> Self {
        Self {
            candidates: vec![
                MatchCandidate {
                    source: SourceRef::table("berggrundslinjer"),
                    value_column: "brg".into(),
                    tolerance: 112.5,
                },
                MatchCandidate {
                    source: SourceRef::table("berggrundsytor"),
                    value_column: "brg".into(),
                    tolerance: 12.5,
                },
            ],
            hashed: false,
        }
    }
}

impl CustomComputation for FallbackMatch {
    fn compute(&self, points: &[GridPoint], sources: DataSources<'_>) -> Result<FeatureBatch, DataSourceError> {
        let mut out: FeatureBatch = HashMap::with_capacity(points.len());
        let mut remaining: Vec<GridPoint> = points.to_vec();

        for candidate in &self.candidates {
            if remaining.is_empty() {
                break;
            }
            let found = sources.spatial.attribute_within(
                &candidate.source,
                &candidate.value_column,
                candidate.tolerance,
                &remaining,
            )?;
            let before = remaining.len();
            remaining.retain(|p| {
                match found.get(&p.id).cloned().flatten().and_then(|v| to_feature_value(v, self.hashed)) {
                    Some(value) => {
                        out.insert(p.id, Some(value));
                        false
                    }
                    None => true,
                }
            });
            trace!(
                table = %candidate.source.table,
                matched = before - remaining.len(),
                "fallback candidate evaluated"
            );
        }

        out.extend(remaining.into_iter().map(|p| (p.id, None)));
        Ok(out)
    }
}
