use crate::error::DataSourceError;
use crate::store::{FeatureBatch, FeatureValue, GridPoint, SpatialStore};

/// Raster layer value at each point; null outside the layer extent.
pub(crate) fn compute(
    store: &dyn SpatialStore,
    layer: &str,
    points: &[GridPoint],
) -> Result<FeatureBatch, DataSourceError> {
    let samples = store.sample_raster(layer, points)?;
    Ok(samples
        .into_iter()
        .map(|(id, v)| (id, v.map(FeatureValue::Number)))
        .collect())
}
