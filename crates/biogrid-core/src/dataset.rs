//! Numeric training tables built from stored feature values and a model's
//! training samples.

use rand::Rng;
use tracing::debug;

use crate::catalog::FeatureCatalog;
use crate::engine::value_at::category_code;
use crate::error::DataSourceError;
use crate::store::{FeatureValue, FeatureValueStore, GridPointId, ModelKey, TrainingLabelStore};

/// Stored value meaning "no data".
pub const MISSING_SENTINEL: f64 = -1.0;

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingRow {
    pub grid_point_id: GridPointId,
    /// One value per [`TrainingSet::feature_names`] entry.
    pub features: Vec<f64>,
    /// 1 for high, 0 for low.
    pub target: u8,
}

/// Complete rows only: every feature of every row is a finite, non-sentinel
/// number.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingSet {
    pub feature_names: Vec<String>,
    pub rows: Vec<TrainingRow>,
}

impl TrainingSet {
    /// Join `model`'s samples with their stored feature values.
    ///
    /// Columns follow catalog order, minus `exclude`. Rows with any missing
    /// value are dropped. Rows are ordered by grid point id.
    pub fn assemble(
        catalog: &FeatureCatalog,
        model: &ModelKey,
        labels: &dyn TrainingLabelStore,
        values: &dyn FeatureValueStore,
        exclude: &[String],
    ) -> Result<Self, DataSourceError> {
        let feature_names: Vec<String> = catalog
            .all()
            .iter()
            .map(|spec| spec.name.clone())
            .filter(|name| !exclude.contains(name))
            .collect();

        let mut samples = labels.samples(model)?;
        samples.sort_by_key(|s| (s.grid_point_id, s.label.target()));
        let ids: Vec<GridPointId> = samples.iter().map(|s| s.grid_point_id).collect();

        let columns = feature_names
            .iter()
            .map(|name| values.values(name, &ids))
            .collect::<Result<Vec<_>, _>>()?;

        let total = samples.len();
        let rows: Vec<TrainingRow> = samples
            .into_iter()
            .filter_map(|sample| {
                let features = columns
                    .iter()
                    .map(|column| column.get(&sample.grid_point_id).and_then(|v| encode(v.as_ref()?)))
                    .collect::<Option<Vec<f64>>>()?;
                Some(TrainingRow { grid_point_id: sample.grid_point_id, features, target: sample.label.target() })
            })
            .collect();

        debug!(
            model = %model.id,
            version = model.version,
            samples = total,
            dropped = total - rows.len(),
            "training set assembled"
        );
        Ok(Self { feature_names, rows })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Per-row Bernoulli split: a row goes to training when a uniform draw in
    /// `[0, 1)` is at most `train_fraction`. Returns `(train, test)`.
    pub fn split<R: Rng + ?Sized>(self, train_fraction: f64, rng: &mut R) -> (TrainingSet, TrainingSet) {
        let mut train = TrainingSet { feature_names: self.feature_names.clone(), rows: Vec::new() };
        let mut test = TrainingSet { feature_names: self.feature_names, rows: Vec::new() };
        for row in self.rows {
            if rng.gen::<f64>() <= train_fraction {
                train.rows.push(row);
            } else {
                test.rows.push(row);
            }
        }
        (train, test)
    }
}

fn encode(value: &FeatureValue) -> Option<f64> {
    let v = match value {
        FeatureValue::Text(s) => category_code(s) as f64,
        other => other.as_f64()?,
    };
    (v.is_finite() && v != MISSING_SENTINEL).then_some(v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Cadence, CustomRegistry, FeatureSpec};
    use crate::memory::MemoryStore;
    use crate::store::{FeatureBatch, Label, TrainingSample};
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn catalog() -> FeatureCatalog {
        FeatureCatalog::new(
            vec![
                FeatureSpec::distance("dist_road", "roads", Cadence::Static),
                FeatureSpec::boolean("in_forest", "forest", Cadence::Dynamic),
                FeatureSpec::value_at("soil", "soils", "jg2", false, Cadence::Static),
            ],
            &CustomRegistry::new(),
        )
        .unwrap()
    }

    fn label(store: &MemoryStore, model: &ModelKey, id: u64, label: Label) {
        let sample = TrainingSample { model: model.clone(), grid_point_id: GridPointId(id), label };
        store.insert_if_absent(&sample).unwrap();
    }

    fn write(store: &MemoryStore, feature: &str, entries: &[(u64, Option<FeatureValue>)]) {
        let batch: FeatureBatch = entries.iter().map(|(id, v)| (GridPointId(*id), v.clone())).collect();
        store.write(feature, batch).unwrap();
    }

    #[test]
    fn incomplete_rows_are_dropped() {
        let store = MemoryStore::default();
        let model = ModelKey::new("forest", 1);
        for (id, l) in [(1, Label::High), (2, Label::Low), (3, Label::High), (4, Label::Low), (5, Label::High)] {
            label(&store, &model, id, l);
        }
        write(
            &store,
            "dist_road",
            &[
                (1, Some(FeatureValue::Number(12.5))),
                (2, Some(FeatureValue::Number(-1.0))),
                (3, Some(FeatureValue::Number(8.0))),
                (4, None),
                (5, Some(FeatureValue::Number(3.0))),
            ],
        );
        write(
            &store,
            "in_forest",
            &[
                (1, Some(FeatureValue::Flag(true))),
                (2, Some(FeatureValue::Flag(false))),
                (3, Some(FeatureValue::Flag(false))),
                (4, Some(FeatureValue::Flag(true))),
            ],
        );
        write(
            &store,
            "soil",
            &[
                (1, Some(FeatureValue::Text("MO".into()))),
                (2, Some(FeatureValue::Code(7))),
                (3, Some(FeatureValue::Code(7))),
                (4, Some(FeatureValue::Code(7))),
                (5, Some(FeatureValue::Code(7))),
            ],
        );

        let set = TrainingSet::assemble(&catalog(), &model, &store, &store, &[]).unwrap();
        assert_eq!(set.feature_names, ["dist_road", "in_forest", "soil"]);
        // 2: sentinel, 4: null, 5: never computed.
        let ids: Vec<u64> = set.rows.iter().map(|r| r.grid_point_id.0).collect();
        assert_eq!(ids, [1, 3]);

        let first = &set.rows[0];
        assert_eq!(first.target, 1);
        assert_relative_eq!(first.features[0], 12.5);
        assert_relative_eq!(first.features[1], 1.0);
        assert_relative_eq!(first.features[2], category_code("MO") as f64);
        assert_eq!(set.rows[1].features, vec![8.0, 0.0, 7.0]);
    }

    #[test]
    fn excluded_columns_do_not_drop_rows() {
        let store = MemoryStore::default();
        let model = ModelKey::new("wetland", 2);
        label(&store, &model, 1, Label::Low);
        write(&store, "dist_road", &[(1, Some(FeatureValue::Number(4.0)))]);
        write(&store, "in_forest", &[(1, Some(FeatureValue::Flag(false)))]);
        write(&store, "soil", &[(1, None)]);

        let set = TrainingSet::assemble(&catalog(), &model, &store, &store, &["soil".to_string()]).unwrap();
        assert_eq!(set.feature_names, ["dist_road", "in_forest"]);
        assert_eq!(set.len(), 1);
        assert_eq!(set.rows[0].target, 0);

        let other = TrainingSet::assemble(&catalog(), &ModelKey::new("wetland", 3), &store, &store, &[]).unwrap();
        assert!(other.is_empty());
    }

    #[test]
    fn split_is_seeded_and_complete() {
        let set = TrainingSet {
            feature_names: vec!["a".into()],
            rows: (0..200)
                .map(|i| TrainingRow { grid_point_id: GridPointId(i), features: vec![i as f64], target: (i % 2) as u8 })
                .collect(),
        };

        let (train, test) = set.clone().split(0.75, &mut StdRng::seed_from_u64(11));
        assert_eq!(train.len() + test.len(), 200);
        assert!(train.len() > 120 && train.len() < 180, "train size {}", train.len());
        assert_eq!(train.feature_names, test.feature_names);

        let (again, _) = set.split(0.75, &mut StdRng::seed_from_u64(11));
        assert_eq!(train, again);
    }
}
