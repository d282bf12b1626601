//! Builder, loader and engine wired together over the in-memory store.

use anyhow::Result;
use biogrid_core::catalog::{Cadence, FeatureSpec};
use biogrid_core::dataset::TrainingSet;
use biogrid_core::geometry::{Geometry, Point, Polygon};
use biogrid_core::memory::{MemoryStore, SourceFeature};
use biogrid_core::store::{FeatureValue, GridPointStore, TrainingLabelStore};
use biogrid_core::{
    BuilderConfig, CorpusBuilder, GridFeatureLoader, Label, LabeledPolygon, ModelKey, PipelineConfig,
    StrategyEngine, UpdatePolicy,
};
use rand::rngs::StdRng;
use rand::SeedableRng;

fn sources() -> MemoryStore {
    let store = MemoryStore::new(50.0);
    store.add_features(
        "roads",
        [SourceFeature::new(Geometry::LineString(vec![Point::new(0.0, -10.0), Point::new(2000.0, -10.0)]))],
    );
    store.add_features(
        "wetlands",
        [SourceFeature::new(Geometry::Polygon(Polygon::rectangle(0.0, 0.0, 300.0, 300.0))).with("hydrtext", "Blöt")],
    );
    store
}

fn config() -> Result<PipelineConfig> {
    let config = PipelineConfig {
        features: vec![
            FeatureSpec::distance("dist_road", "roads", Cadence::Static),
            FeatureSpec::boolean("in_wetland", "wetlands", Cadence::Dynamic),
            FeatureSpec::value_at("wetness", "wetlands", "hydrtext", true, Cadence::Static),
        ],
        ..PipelineConfig::default()
    };
    config.validate()?;
    Ok(config)
}

#[test]
fn collected_cells_get_features_and_labels() -> Result<()> {
    let store = sources();
    let config = config()?;
    let catalog = config.catalog()?;
    let loader = GridFeatureLoader::new(StrategyEngine::new(&catalog, &store, &store), &store, config.policy);
    let model = ModelKey::new("wetland", 1);
    let builder = CorpusBuilder::new(model.clone(), config.builder, &store, &store, &loader);

    let polygons = [
        LabeledPolygon::new("high-1", Polygon::rectangle(0.0, 0.0, 900.0, 300.0), Label::High),
        LabeledPolygon::new("low-1", Polygon::rectangle(1000.0, 0.0, 1200.0, 200.0), Label::Low),
    ];
    let report = builder.collect(&polygons, &mut StdRng::seed_from_u64(5));
    assert_eq!(report.failed().count(), 0);
    assert_eq!(report.polygons[0].tiles, 3);
    assert_eq!(report.polygons[0].selected, 3);
    assert_eq!(report.inserted(), 108 + 16);

    let samples = store.samples(&model)?;
    assert_eq!(samples.iter().filter(|s| s.label == Label::High).count(), 108);

    let set = TrainingSet::assemble(&catalog, &model, &store, &store, &["wetness".to_string()])?;
    assert_eq!(set.len(), 124);
    assert_eq!(set.rows.iter().filter(|r| r.target == 1).count(), 108);

    // Every point of the first tile lies in the wetland.
    let first_tile = store.grid_from_polygon(&Polygon::rectangle(0.0, 0.0, 300.0, 300.0))?;
    for point in &first_tile {
        assert_eq!(store.value("in_wetland", point.id), Some(Some(FeatureValue::Flag(true))));
    }
    Ok(())
}

#[test]
fn retry_after_partial_run_only_fills_gaps() -> Result<()> {
    let store = sources();
    let config = config()?;
    let catalog = config.catalog()?;
    let model = ModelKey::new("wetland", 2);
    let polygon = [LabeledPolygon::new("p", Polygon::rectangle(0.0, 0.0, 600.0, 100.0), Label::High)];

    // First pass with the roads table missing: dist_road fails, siblings land.
    store.drop_table("roads");
    let loader = GridFeatureLoader::new(StrategyEngine::new(&catalog, &store, &store), &store, UpdatePolicy::fill_missing());
    let first = CorpusBuilder::new(model.clone(), BuilderConfig::default(), &store, &store, &loader)
        .collect(&polygon, &mut StdRng::seed_from_u64(9));
    assert_eq!(first.inserted(), 24);

    let grid = store.grid_from_polygon(&polygon[0].polygon)?;
    assert!(grid.iter().all(|p| store.value("dist_road", p.id).is_none()));
    assert!(grid.iter().all(|p| store.value("in_wetland", p.id).is_some()));

    store.add_features(
        "roads",
        [SourceFeature::new(Geometry::LineString(vec![Point::new(0.0, -10.0), Point::new(2000.0, -10.0)]))],
    );
    let engine = StrategyEngine::new(&catalog, &store, &store);
    let retry = engine.run(&grid, UpdatePolicy::fill_missing());
    assert!(retry.is_clean());
    assert_eq!(retry.computed["dist_road"], 24);
    assert_eq!(retry.computed["in_wetland"], 0);
    assert_eq!(retry.computed["wetness"], 0);

    let again = CorpusBuilder::new(model.clone(), BuilderConfig::default(), &store, &store, &loader)
        .collect(&polygon, &mut StdRng::seed_from_u64(9));
    assert_eq!(again.inserted(), 0);
    assert_eq!(store.samples(&model)?.len(), 24);
    Ok(())
}
