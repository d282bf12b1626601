//! Operator configuration, loaded from JSON.
//!
//! Every section has defaults, so `{}` is a complete configuration that runs
//! the built-in catalog.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::catalog::{default_catalog, CustomRegistry, FeatureCatalog, FeatureSpec};
use crate::engine::custom::FallbackMatch;
use crate::error::ConfigError;
use crate::memory::DEFAULT_CELL_SIZE;
use crate::policy::UpdatePolicy;

/// Tiling and sampling of labeled polygons.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderConfig {
    /// Longest allowed tile side, in metres.
    pub max_dimension: f64,
    /// Tiles sampled per polygon.
    pub sample_size: usize,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self { max_dimension: 300.0, sample_size: 10 }
    }
}

impl BuilderConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.max_dimension.is_finite() || self.max_dimension <= 0.0 {
            return Err(ConfigError::InvalidSetting {
                field: "builder.max_dimension",
                reason: format!("must be positive and finite, got {}", self.max_dimension),
            });
        }
        if self.sample_size == 0 {
            return Err(ConfigError::InvalidSetting {
                field: "builder.sample_size",
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }
}

/// Per-model training-table options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Features left out of this model's training table.
    pub exclude_columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub policy: UpdatePolicy,
    pub builder: BuilderConfig,
    /// Grid lattice spacing, in metres.
    pub cell_size: f64,
    /// Fraction of rows assigned to the training split.
    pub train_fraction: f64,
    pub features: Vec<FeatureSpec>,
    /// Extra `custom` computations by name; a name shared with a built-in
    /// replaces it.
    pub fallback_matches: BTreeMap<String, FallbackMatch>,
    /// Keyed by model id.
    pub models: BTreeMap<String, ModelConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            policy: UpdatePolicy::default(),
            builder: BuilderConfig::default(),
            cell_size: DEFAULT_CELL_SIZE,
            train_fraction: 0.75,
            features: default_catalog(),
            fallback_matches: BTreeMap::new(),
            models: BTreeMap::new(),
        }
    }
}

impl PipelineConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let config = Self::from_json(&std::fs::read_to_string(path)?)?;
        info!(
            path = %path.display(),
            features = config.features.len(),
            models = config.models.len(),
            "pipeline configuration loaded"
        );
        Ok(config)
    }

    /// Check scalar settings. The catalog is checked by [`Self::catalog`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.builder.validate()?;
        if !self.cell_size.is_finite() || self.cell_size <= 0.0 {
            return Err(ConfigError::InvalidSetting {
                field: "cell_size",
                reason: format!("must be positive and finite, got {}", self.cell_size),
            });
        }
        if !(self.train_fraction > 0.0 && self.train_fraction < 1.0) {
            return Err(ConfigError::InvalidSetting {
                field: "train_fraction",
                reason: format!("must lie strictly between 0 and 1, got {}", self.train_fraction),
            });
        }
        Ok(())
    }

    /// Built-in computations plus the configured fallback matches.
    pub fn registry(&self) -> CustomRegistry {
        let mut registry = CustomRegistry::with_builtins();
        for (name, matcher) in &self.fallback_matches {
            registry.register(name.clone(), matcher.clone());
        }
        registry
    }

    /// Validated catalog for the configured features.
    pub fn catalog(&self) -> Result<FeatureCatalog, ConfigError> {
        FeatureCatalog::new(self.features.clone(), &self.registry())
    }

    pub fn model(&self, id: &str) -> ModelConfig {
        self.models.get(id).cloned().unwrap_or_default()
    }
}
