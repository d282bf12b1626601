//! Training corpus collection from labeled polygons.
//!
//! Each polygon is tiled, a random subset of tiles is kept, and every grid
//! point of a kept tile is recorded as a training row with the polygon's
//! label. Feature values for those points are produced through the
//! [`Enricher`].

use rand::seq::index;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::config::BuilderConfig;
use crate::error::BuildError;
use crate::geometry::Polygon;
use crate::store::{Enricher, GridPointStore, Label, ModelKey, TrainingLabelStore, TrainingSample};
use crate::tiler;

/// A user-drawn polygon with its habitat label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledPolygon {
    pub id: String,
    pub polygon: Polygon,
    pub label: Label,
}

impl LabeledPolygon {
    pub fn new(id: impl Into<String>, polygon: Polygon, label: Label) -> Self {
        Self { id: id.into(), polygon, label }
    }
}

/// What happened to one labeled polygon.
#[derive(Debug, Clone, Default)]
pub struct PolygonOutcome {
    pub id: String,
    /// Pieces produced by the tiler.
    pub tiles: usize,
    /// Pieces processed (sampled, or all when few enough).
    pub selected: usize,
    pub grid_points: usize,
    /// Training rows that were new.
    pub inserted: usize,
    /// Training rows that were already stored.
    pub existing: usize,
    /// Set when the polygon was abandoned; counts above reflect work done
    /// before the failure.
    pub error: Option<BuildError>,
}

impl PolygonOutcome {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Result of one [`CorpusBuilder::collect`] call, one entry per polygon in
/// input order.
#[derive(Debug, Clone, Default)]
pub struct CorpusReport {
    pub polygons: Vec<PolygonOutcome>,
}

impl CorpusReport {
    pub fn failed(&self) -> impl Iterator<Item = &PolygonOutcome> {
        self.polygons.iter().filter(|p| !p.is_ok())
    }

    pub fn inserted(&self) -> usize {
        self.polygons.iter().map(|p| p.inserted).sum()
    }

    pub fn grid_points(&self) -> usize {
        self.polygons.iter().map(|p| p.grid_points).sum()
    }
}

/// Collects training rows for one model.
pub struct CorpusBuilder<'a> {
    model: ModelKey,
    config: BuilderConfig,
    grid: &'a dyn GridPointStore,
    labels: &'a dyn TrainingLabelStore,
    enricher: &'a dyn Enricher,
}

impl<'a> CorpusBuilder<'a> {
    pub fn new(
        model: ModelKey,
        config: BuilderConfig,
        grid: &'a dyn GridPointStore,
        labels: &'a dyn TrainingLabelStore,
        enricher: &'a dyn Enricher,
    ) -> Self {
        Self { model, config, grid, labels, enricher }
    }

    pub fn model(&self) -> &ModelKey {
        &self.model
    }

    /// Process every polygon. A failing polygon is recorded in its outcome
    /// and the rest still run.
    #[instrument(skip_all, fields(model = %self.model.id, version = self.model.version, polygons = polygons.len()))]
    pub fn collect<R: Rng + ?Sized>(&self, polygons: &[LabeledPolygon], rng: &mut R) -> CorpusReport {
        let mut report = CorpusReport { polygons: Vec::with_capacity(polygons.len()) };

        for labeled in polygons {
            let mut outcome = PolygonOutcome { id: labeled.id.clone(), ..Default::default() };
            if let Err(error) = self.collect_polygon(labeled, rng, &mut outcome) {
                warn!(polygon = %labeled.id, %error, "polygon abandoned");
                outcome.error = Some(error);
            }
            report.polygons.push(outcome);
        }

        info!(
            inserted = report.inserted(),
            grid_points = report.grid_points(),
            failed = report.failed().count(),
            "corpus collected"
        );
        report
    }

    fn collect_polygon<R: Rng + ?Sized>(
        &self,
        labeled: &LabeledPolygon,
        rng: &mut R,
        outcome: &mut PolygonOutcome,
    ) -> Result<(), BuildError> {
        let pieces = tiler::tile(&labeled.polygon, self.config.max_dimension)?;
        outcome.tiles = pieces.len();

        let chosen = self.choose(&pieces, rng);
        outcome.selected = chosen.len();
        debug!(polygon = %labeled.id, tiles = pieces.len(), selected = chosen.len(), "polygon tiled");

        for piece in chosen {
            let points = self.grid.grid_from_polygon(piece)?;
            outcome.grid_points += points.len();

            for point in &points {
                let sample = TrainingSample {
                    model: self.model.clone(),
                    grid_point_id: point.id,
                    label: labeled.label,
                };
                if self.labels.insert_if_absent(&sample)? {
                    outcome.inserted += 1;
                } else {
                    outcome.existing += 1;
                }
            }

            self.enricher.load(piece, false)?;
        }
        Ok(())
    }

    /// Uniform sample of `sample_size` pieces without replacement, kept in
    /// tile order; all pieces when there are no more than that.
    fn choose<'p, R: Rng + ?Sized>(&self, pieces: &'p [Polygon], rng: &mut R) -> Vec<&'p Polygon> {
        let k = self.config.sample_size;
        if pieces.len() <= k {
            return pieces.iter().collect();
        }
        let mut picked = index::sample(rng, pieces.len(), k).into_vec();
        picked.sort_unstable();
        picked.into_iter().map(|i| &pieces[i]).collect()
    }
}
