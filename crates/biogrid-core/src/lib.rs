//! Grid feature extraction and training-corpus building for biodiversity
//! models.
//!
//! Pipeline:
//!   labeled polygon → `tiler` → grid points (`store::GridPointStore`) →
//!   `engine` (gated by `policy`) → feature values + training labels.

pub mod builder;
pub mod catalog;
pub mod config;
pub mod dataset;
pub mod engine;
pub mod error;
pub mod geometry;
pub mod memory;
pub mod policy;
pub mod raster;
pub mod store;
pub mod tiler;

pub use builder::{CorpusBuilder, CorpusReport, LabeledPolygon};
pub use catalog::{Cadence, CustomRegistry, FeatureCatalog, FeatureSpec, Filter, SourceRef, Strategy};
pub use config::{BuilderConfig, PipelineConfig};
pub use engine::{EngineReport, GridFeatureLoader, StrategyEngine};
pub use error::{BuildError, ConfigError, DataSourceError, GeometryError};
pub use geometry::{Geometry, Point, Polygon};
pub use policy::{Action, UpdatePolicy};
pub use store::{FeatureValue, GridPoint, GridPointId, Label, ModelKey, TrainingSample};
