//! Collaborator interfaces consumed by the core and the records they carry.
//!
//! Every trait is batched: one call covers a whole point set for one feature
//! or source, never a single point.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::catalog::SourceRef;
use crate::error::DataSourceError;
use crate::geometry::{Point, Polygon};

/// Stable identifier of a grid point. Survives across runs so cached feature
/// values stay valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GridPointId(pub u64);

impl fmt::Display for GridPointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A sampled location at which features are computed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridPoint {
    pub id: GridPointId,
    pub location: Point,
}

/// A computed feature value. A stored `None` means "computed, no data", which
/// still counts as present for the update policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Flag(bool),
    Code(i64),
    Number(f64),
    Text(String),
}

impl FeatureValue {
    /// Numeric encoding used for training tables.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FeatureValue::Number(v) => Some(*v),
            FeatureValue::Flag(b) => Some(if *b { 1.0 } else { 0.0 }),
            FeatureValue::Code(c) => Some(*c as f64),
            FeatureValue::Text(_) => None,
        }
    }
}

/// Results of one feature computation, keyed by grid point.
pub type FeatureBatch = HashMap<GridPointId, Option<FeatureValue>>;

/// Training label of a sampled cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Label {
    High,
    Low,
}

impl Label {
    /// Classifier target: high → 1, low → 0.
    pub fn target(self) -> u8 {
        match self {
            Label::High => 1,
            Label::Low => 0,
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Label::High => f.write_str("high"),
            Label::Low => f.write_str("low"),
        }
    }
}

/// Identity of a model a training corpus is collected for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelKey {
    pub id: String,
    pub version: u32,
}

impl ModelKey {
    pub fn new(id: impl Into<String>, version: u32) -> Self {
        Self { id: id.into(), version }
    }

    /// Artifact file name: `model_{id}_{version}_{suffix}{extension}`.
    pub fn file_name(&self, suffix: &str, extension: Option<&str>) -> String {
        format!("model_{}_{}_{}{}", self.id, self.version, suffix, extension.unwrap_or(""))
    }
}

/// One training row. Unique on the full tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrainingSample {
    pub model: ModelKey,
    pub grid_point_id: GridPointId,
    pub label: Label,
}

// ── Collaborators ─────────────────────────────────────────────────────────────

/// Vector and raster sources, addressed by table / layer name.
pub trait SpatialStore: Send + Sync {
    /// Distance from each point to the nearest geometry of `source`.
    /// `None` when the filtered source is empty.
    fn nearest_distance(
        &self,
        source: &SourceRef,
        points: &[GridPoint],
    ) -> Result<HashMap<GridPointId, Option<f64>>, DataSourceError>;

    /// Whether each point intersects at least one geometry of `source`.
    /// Points left out of the map are read as `false`.
    fn intersects(
        &self,
        source: &SourceRef,
        points: &[GridPoint],
    ) -> Result<HashMap<GridPointId, bool>, DataSourceError>;

    /// Value of raster `layer` at each point; `None` outside its extent.
    fn sample_raster(
        &self,
        layer: &str,
        points: &[GridPoint],
    ) -> Result<HashMap<GridPointId, Option<f64>>, DataSourceError>;

    /// `column` of the nearest geometry of `source` within `tolerance` of
    /// each point. A tolerance of 0 means "intersecting".
    fn attribute_within(
        &self,
        source: &SourceRef,
        column: &str,
        tolerance: f64,
        points: &[GridPoint],
    ) -> Result<HashMap<GridPointId, Option<serde_json::Value>>, DataSourceError>;
}

/// Materializes the grid of a polygon with stable ids.
pub trait GridPointStore: Send + Sync {
    fn grid_from_polygon(&self, polygon: &Polygon) -> Result<Vec<GridPoint>, DataSourceError>;
}

/// Per-(point, feature) value cache.
pub trait FeatureValueStore: Send + Sync {
    /// Ids among `ids` that already hold a value for `feature`.
    fn present(&self, feature: &str, ids: &[GridPointId]) -> Result<HashSet<GridPointId>, DataSourceError>;

    /// Insert or overwrite values for `feature`.
    fn write(&self, feature: &str, values: FeatureBatch) -> Result<(), DataSourceError>;

    /// Stored values for `feature`; ids never computed are absent from the map.
    fn values(&self, feature: &str, ids: &[GridPointId]) -> Result<FeatureBatch, DataSourceError>;
}

/// Training label persistence.
pub trait TrainingLabelStore: Send + Sync {
    /// Atomic insert-if-absent. Returns `true` if the row was new.
    fn insert_if_absent(&self, sample: &TrainingSample) -> Result<bool, DataSourceError>;

    /// All rows for a model, in no particular order.
    fn samples(&self, model: &ModelKey) -> Result<Vec<TrainingSample>, DataSourceError>;
}

/// Locale enrichment. The corpus builder only relies on its grid-feature
/// side effect and always passes `include_full_enrichment = false`.
pub trait Enricher: Send + Sync {
    fn load(&self, polygon: &Polygon, include_full_enrichment: bool) -> Result<(), DataSourceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_matches_artifact_layout() {
        let model = ModelKey::new("forest", 2);
        assert_eq!(model.file_name("high", None), "model_forest_2_high");
        assert_eq!(model.file_name("sklearn", Some(".pkl")), "model_forest_2_sklearn.pkl");
    }

    #[test]
    fn numeric_encoding() {
        assert_eq!(FeatureValue::Flag(true).as_f64(), Some(1.0));
        assert_eq!(FeatureValue::Code(42).as_f64(), Some(42.0));
        assert_eq!(FeatureValue::Text("x".into()).as_f64(), None);
    }
}
