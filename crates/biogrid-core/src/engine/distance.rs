//! Distance to the nearest source geometry, unbounded search radius.

use crate::catalog::SourceRef;
use crate::error::DataSourceError;
use crate::store::{FeatureBatch, FeatureValue, GridPoint, SpatialStore};

/// Null (not zero) when the filtered source holds no geometry.
pub(crate) fn compute(
    store: &dyn SpatialStore,
    source: &SourceRef,
    points: &[GridPoint],
) -> Result<FeatureBatch, DataSourceError> {
    let distances = store.nearest_distance(source, points)?;
    Ok(distances
        .into_iter()
        .map(|(id, d)| (id, d.map(FeatureValue::Number)))
        .collect())
}
