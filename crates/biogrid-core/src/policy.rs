//! Recompute-vs-skip decision for cached feature values.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::catalog::{Cadence, FeatureSpec};
use crate::store::{GridPoint, GridPointId};

/// Whether to (re)compute a feature value for a point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Compute,
    Skip,
}

/// Update flags passed explicitly into every engine run.
///
/// | existing | apply_updates | dynamic_only | action                     |
/// |----------|---------------|--------------|----------------------------|
/// | absent   | any           | any          | compute                    |
/// | present  | false         | any          | skip                       |
/// | present  | true          | true         | compute iff cadence dynamic|
/// | present  | true          | false        | compute (overwrite)        |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdatePolicy {
    /// Recompute values that already exist. Off speeds up corpus collection.
    pub apply_updates: bool,
    /// When updating, only touch dynamic features.
    pub dynamic_only: bool,
}

impl Default for UpdatePolicy {
    fn default() -> Self {
        Self { apply_updates: true, dynamic_only: true }
    }
}

impl UpdatePolicy {
    /// Fill-only policy: never overwrite a stored value.
    pub fn fill_missing() -> Self {
        Self { apply_updates: false, dynamic_only: false }
    }

    /// Overwrite everything.
    pub fn refresh_all() -> Self {
        Self { apply_updates: true, dynamic_only: false }
    }

    pub fn decide(&self, cadence: Cadence, existing: bool) -> Action {
        match (existing, self.apply_updates, self.dynamic_only) {
            (false, _, _) => Action::Compute,
            (true, false, _) => Action::Skip,
            (true, true, true) if cadence == Cadence::Dynamic => Action::Compute,
            (true, true, true) => Action::Skip,
            (true, true, false) => Action::Compute,
        }
    }

    /// Points of the batch that need `spec` computed, given the ids that
    /// already hold a value. One decision per outcome group, not per point.
    pub fn select(&self, spec: &FeatureSpec, points: &[GridPoint], present: &HashSet<GridPointId>) -> Vec<GridPoint> {
        let recompute_present = self.decide(spec.cadence, true) == Action::Compute;
        if recompute_present {
            return points.to_vec();
        }
        points.iter().filter(|p| !present.contains(&p.id)).copied().collect()
    }
}
