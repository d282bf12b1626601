use thiserror::Error;

/// Invalid or incomplete feature catalog / pipeline configuration.
/// Raised once while loading; nothing runs after it.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("feature name must not be empty")]
    EmptyName,

    #[error("duplicate feature `{0}`")]
    DuplicateFeature(String),

    /// A strategy-specific mandatory field is missing or blank.
    #[error("feature `{feature}`: missing `{field}`")]
    MissingField { feature: String, field: &'static str },

    #[error("feature `{feature}`: `in` filter on `{column}` has no values")]
    EmptyFilter { feature: String, column: String },

    #[error("feature `{feature}`: custom computation `{computation}` is not registered")]
    UnknownComputation { feature: String, computation: String },

    #[error("feature `{feature}` depends on unknown feature `{dependency}`")]
    UnknownDependency { feature: String, dependency: String },

    #[error("dependency cycle involving `{0}`")]
    DependencyCycle(String),

    #[error("invalid setting `{field}`: {reason}")]
    InvalidSetting { field: &'static str, reason: String },

    #[error("malformed configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("cannot read configuration: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure talking to a spatial source or one of the stores.
/// Isolated per feature by the engine.
#[derive(Debug, Clone, Error)]
pub enum DataSourceError {
    #[error("unknown source table `{0}`")]
    UnknownTable(String),

    #[error("unknown raster layer `{0}`")]
    UnknownLayer(String),

    #[error("source `{table}` has no column `{column}`")]
    UnknownColumn { table: String, column: String },

    #[error("source unreachable: {0}")]
    Unreachable(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("feature `{feature}` skipped: dependency `{dependency}` failed")]
    DependencyFailed { feature: String, dependency: String },
}

/// Degenerate or invalid polygon input. Aborts that polygon only.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GeometryError {
    #[error("polygon has {0} distinct vertices, need at least 3")]
    TooFewVertices(usize),

    #[error("polygon has non-finite coordinates")]
    NonFinite,

    #[error("polygon has zero area")]
    ZeroArea,

    #[error("polygon ring crosses itself")]
    SelfIntersecting,

    #[error("max dimension must be positive and finite, got {0}")]
    InvalidThreshold(f64),
}

/// Why a single labeled polygon was abandoned by the corpus builder.
#[derive(Debug, Clone, Error)]
pub enum BuildError {
    #[error(transparent)]
    Geometry(#[from] GeometryError),

    #[error(transparent)]
    DataSource(#[from] DataSourceError),
}
