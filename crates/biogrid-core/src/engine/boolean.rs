//! Membership: does the point lie on or inside any source geometry.

use crate::catalog::SourceRef;
use crate::error::DataSourceError;
use crate::store::{FeatureBatch, FeatureValue, GridPoint, SpatialStore};

/// Every point gets a flag; points the store does not report are misses.
pub(crate) fn compute(
    store: &dyn SpatialStore,
    source: &SourceRef,
    points: &[GridPoint],
) -> Result<FeatureBatch, DataSourceError> {
    let hits = store.intersects(source, points)?;
    Ok(points
        .iter()
        .map(|p| {
            let hit = hits.get(&p.id).copied().unwrap_or(false);
            (p.id, Some(FeatureValue::Flag(hit)))
        })
        .collect())
}
