//! Strategy engine: computes catalog features over a batch of grid points.
//!
//! Per feature, in dependency-stage order:
//!   presence query → update policy → one batched strategy call → write.
//!
//! A failing feature is reported and left absent; siblings still run.

mod boolean;
pub mod custom;
mod distance;
mod raster;
pub mod value_at;

use std::collections::{BTreeMap, HashSet};

use tracing::{debug, info, instrument, warn};

use crate::catalog::{FeatureCatalog, FeatureSpec, Strategy};
use crate::error::DataSourceError;
use crate::geometry::Polygon;
use crate::policy::UpdatePolicy;
use crate::store::{
    Enricher, FeatureBatch, FeatureValueStore, GridPoint, GridPointId, GridPointStore, SpatialStore,
};
use custom::DataSources;

/// A feature that could not be computed in a run.
#[derive(Debug, Clone)]
pub struct FeatureFailure {
    pub feature: String,
    pub error: DataSourceError,
}

/// Outcome of one engine run.
#[derive(Debug, Clone, Default)]
pub struct EngineReport {
    /// Feature name → number of points written (0 when the policy skipped all).
    pub computed: BTreeMap<String, usize>,
    pub failures: Vec<FeatureFailure>,
}

impl EngineReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn written(&self) -> usize {
        self.computed.values().sum()
    }

    /// Fold another run into this one.
    pub fn merge(&mut self, other: EngineReport) {
        for (name, n) in other.computed {
            *self.computed.entry(name).or_default() += n;
        }
        self.failures.extend(other.failures);
    }
}

/// Computes every catalog feature for a point batch.
pub struct StrategyEngine<'a> {
    catalog: &'a FeatureCatalog,
    spatial: &'a dyn SpatialStore,
    values: &'a dyn FeatureValueStore,
}

impl<'a> StrategyEngine<'a> {
    pub fn new(catalog: &'a FeatureCatalog, spatial: &'a dyn SpatialStore, values: &'a dyn FeatureValueStore) -> Self {
        Self { catalog, spatial, values }
    }

    /// Run all features over `points` under `policy`.
    #[instrument(skip_all, fields(points = points.len()))]
    pub fn run(&self, points: &[GridPoint], policy: UpdatePolicy) -> EngineReport {
        let mut report = EngineReport::default();
        if points.is_empty() {
            return report;
        }

        let mut failed: HashSet<String> = HashSet::new();
        for stage in self.catalog.stages() {
            for (spec, outcome) in self.run_stage(&stage, points, policy, &failed) {
                match outcome {
                    Ok(n) => {
                        report.computed.insert(spec.name.clone(), n);
                    }
                    Err(error) => {
                        warn!(feature = %spec.name, strategy = spec.strategy.kind(), %error, "feature failed");
                        failed.insert(spec.name.clone());
                        report.failures.push(FeatureFailure { feature: spec.name.clone(), error });
                    }
                }
            }
        }
        report
    }

    #[cfg(feature = "threading")]
    fn run_stage<'s>(
        &self,
        stage: &[&'s FeatureSpec],
        points: &[GridPoint],
        policy: UpdatePolicy,
        failed: &HashSet<String>,
    ) -> Vec<(&'s FeatureSpec, Result<usize, DataSourceError>)> {
        use rayon::prelude::*;
        stage
            .par_iter()
            .map(|&spec| (spec, self.run_feature(spec, points, policy, failed)))
            .collect()
    }

    #[cfg(not(feature = "threading"))]
    fn run_stage<'s>(
        &self,
        stage: &[&'s FeatureSpec],
        points: &[GridPoint],
        policy: UpdatePolicy,
        failed: &HashSet<String>,
    ) -> Vec<(&'s FeatureSpec, Result<usize, DataSourceError>)> {
        stage
            .iter()
            .map(|&spec| (spec, self.run_feature(spec, points, policy, failed)))
            .collect()
    }

    fn run_feature(
        &self,
        spec: &FeatureSpec,
        points: &[GridPoint],
        policy: UpdatePolicy,
        failed: &HashSet<String>,
    ) -> Result<usize, DataSourceError> {
        if let Some(dependency) = spec.depends_on().iter().find(|d| failed.contains(*d)) {
            return Err(DataSourceError::DependencyFailed {
                feature: spec.name.clone(),
                dependency: dependency.clone(),
            });
        }

        let ids: Vec<GridPointId> = points.iter().map(|p| p.id).collect();
        let present = self.values.present(&spec.name, &ids)?;
        let selected = policy.select(spec, points, &present);
        if selected.is_empty() {
            debug!(feature = %spec.name, "all points cached, skipped");
            return Ok(0);
        }

        let batch = self.compute(spec, &selected)?;
        let written = batch.len();
        self.values.write(&spec.name, batch)?;
        debug!(feature = %spec.name, strategy = spec.strategy.kind(), written, "feature computed");
        Ok(written)
    }

    /// Compute one feature for exactly `points`, without consulting the
    /// policy or writing. Every point gets an entry; no data is `None`.
    pub fn compute(&self, spec: &FeatureSpec, points: &[GridPoint]) -> Result<FeatureBatch, DataSourceError> {
        let mut batch = match &spec.strategy {
            Strategy::Distance { source } => distance::compute(self.spatial, source, points)?,
            Strategy::Boolean { source } => boolean::compute(self.spatial, source, points)?,
            Strategy::Raster { layer } => raster::compute(self.spatial, layer, points)?,
            Strategy::ValueAt { source, value_column, hashed } => {
                value_at::compute(self.spatial, source, value_column, *hashed, points)?
            }
            Strategy::Custom { computation, .. } => {
                let custom = self.catalog.computation(computation).ok_or_else(|| {
                    DataSourceError::Query(format!("custom computation `{computation}` is not registered"))
                })?;
                let sources = DataSources { spatial: self.spatial, values: self.values };
                custom.compute(points, sources)?
            }
        };

        // Stores may omit points they found nothing for.
        for p in points {
            batch.entry(p.id).or_insert(None);
        }
        // Never write points outside the selection.
        if batch.len() != points.len() {
            let wanted: HashSet<GridPointId> = points.iter().map(|p| p.id).collect();
            batch.retain(|id, _| wanted.contains(id));
        }
        Ok(batch)
    }
}

// ── Enrichment ────────────────────────────────────────────────────────────────

/// [`Enricher`] that materializes a polygon's grid and computes its features.
pub struct GridFeatureLoader<'a> {
    engine: StrategyEngine<'a>,
    grid: &'a dyn GridPointStore,
    policy: UpdatePolicy,
}

impl<'a> GridFeatureLoader<'a> {
    pub fn new(engine: StrategyEngine<'a>, grid: &'a dyn GridPointStore, policy: UpdatePolicy) -> Self {
        Self { engine, grid, policy }
    }

    /// Grid + features for `polygon`, returning the engine report.
    pub fn load_grid(&self, polygon: &Polygon) -> Result<EngineReport, DataSourceError> {
        let points = self.grid.grid_from_polygon(polygon)?;
        Ok(self.engine.run(&points, self.policy))
    }
}

impl Enricher for GridFeatureLoader<'_> {
    fn load(&self, polygon: &Polygon, include_full_enrichment: bool) -> Result<(), DataSourceError> {
        if include_full_enrichment {
            debug!("full locale enrichment requested; computing grid features only");
        }
        let report = self.load_grid(polygon)?;
        info!(
            features = report.computed.len(),
            written = report.written(),
            failures = report.failures.len(),
            "grid features loaded"
        );
        Ok(())
    }
}
