//! In-process implementation of every store trait.
//!
//! Vector tables are R-tree indexed so nearest / within-distance queries stay
//! logarithmic per point. Grid ids come from a fixed lattice and are handed out
//! once per cell, so re-materializing a polygon yields the same ids.

use std::collections::{HashMap, HashSet};

use parking_lot::{Mutex, RwLock};
use rstar::{PointDistance, RTree, RTreeObject, AABB};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::catalog::SourceRef;
use crate::error::DataSourceError;
use crate::geometry::{Geometry, Point, Polygon, EPSILON};
use crate::raster::RasterLayer;
use crate::store::{
    FeatureBatch, FeatureValue, FeatureValueStore, GridPoint, GridPointId, GridPointStore, ModelKey, SpatialStore,
    TrainingLabelStore, TrainingSample,
};

/// Default lattice spacing of materialized grids, in metres.
pub const DEFAULT_CELL_SIZE: f64 = 25.0;

/// A geometry with its attribute row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceFeature {
    pub geometry: Geometry,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl SourceFeature {
    pub fn new(geometry: Geometry) -> Self {
        Self { geometry, attributes: Map::new() }
    }

    pub fn with(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.attributes.insert(column.to_string(), value.into());
        self
    }
}

// ── R-tree entries ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct IndexedGeometry {
    geometry: Geometry,
    /// Row position in the table.
    position: usize,
    envelope: AABB<[f64; 2]>,
}

impl RTreeObject for IndexedGeometry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

impl PointDistance for IndexedGeometry {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let d = self.geometry.distance_to(Point::new(point[0], point[1]));
        d * d
    }
}

#[derive(Debug, Default)]
struct VectorTable {
    rows: Vec<SourceFeature>,
    columns: HashSet<String>,
    tree: RTree<IndexedGeometry>,
}

impl VectorTable {
    fn build(rows: Vec<SourceFeature>) -> Self {
        let columns = rows.iter().flat_map(|r| r.attributes.keys().cloned()).collect();
        let indexed: Vec<IndexedGeometry> = rows
            .iter()
            .enumerate()
            .filter_map(|(position, row)| {
                let bb = row.geometry.bbox()?;
                Some(IndexedGeometry {
                    geometry: row.geometry.clone(),
                    position,
                    envelope: AABB::from_corners([bb.min_x, bb.min_y], [bb.max_x, bb.max_y]),
                })
            })
            .collect();
        Self { rows, columns, tree: RTree::bulk_load(indexed) }
    }

    fn passes(&self, entry: &IndexedGeometry, source: &SourceRef) -> bool {
        source
            .filter
            .as_ref()
            .map_or(true, |f| f.matches(&self.rows[entry.position].attributes))
    }

    fn nearest(&self, p: Point, source: &SourceRef) -> Option<f64> {
        self.tree
            .nearest_neighbor_iter(&[p.x, p.y])
            .find(|entry| self.passes(entry, source))
            .map(|entry| entry.geometry.distance_to(p))
    }

    /// Nearest filtered row within `radius` of `p`; ties go to the lower
    /// row position.
    fn nearest_within(&self, p: Point, radius: f64, source: &SourceRef) -> Option<&SourceFeature> {
        let r = radius.max(EPSILON);
        self.tree
            .locate_within_distance([p.x, p.y], r * r)
            .filter(|entry| self.passes(entry, source))
            .map(|entry| (entry.geometry.distance_to(p), entry.position))
            .min_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)))
            .map(|(_, position)| &self.rows[position])
    }
}

// ── Store ─────────────────────────────────────────────────────────────────────

/// Spatial, grid, feature-value and training-label store held in memory.
#[derive(Debug)]
pub struct MemoryStore {
    cell_size: f64,
    tables: RwLock<HashMap<String, VectorTable>>,
    rasters: RwLock<HashMap<String, RasterLayer>>,
    grid_ids: Mutex<GridIds>,
    values: RwLock<HashMap<String, FeatureBatch>>,
    samples: Mutex<HashSet<TrainingSample>>,
}

#[derive(Debug, Default)]
struct GridIds {
    by_cell: HashMap<(i64, i64), GridPointId>,
    next: u64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_CELL_SIZE)
    }
}

impl MemoryStore {
    pub fn new(cell_size: f64) -> Self {
        Self {
            cell_size,
            tables: RwLock::new(HashMap::new()),
            rasters: RwLock::new(HashMap::new()),
            grid_ids: Mutex::new(GridIds::default()),
            values: RwLock::new(HashMap::new()),
            samples: Mutex::new(HashSet::new()),
        }
    }

    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    /// Append rows to a vector table, creating it if needed.
    pub fn add_features(&self, table: &str, rows: impl IntoIterator<Item = SourceFeature>) {
        let mut tables = self.tables.write();
        let mut all = tables.remove(table).map(|t| t.rows).unwrap_or_default();
        all.extend(rows);
        tables.insert(table.to_string(), VectorTable::build(all));
    }

    /// Register an empty table so queries against it succeed.
    pub fn create_table(&self, table: &str) {
        self.tables.write().entry(table.to_string()).or_default();
    }

    pub fn drop_table(&self, table: &str) {
        self.tables.write().remove(table);
    }

    pub fn add_raster(&self, name: &str, layer: RasterLayer) {
        self.rasters.write().insert(name.to_string(), layer);
    }

    /// Stored value of one cell, if computed.
    pub fn value(&self, feature: &str, id: GridPointId) -> Option<Option<FeatureValue>> {
        self.values.read().get(feature).and_then(|m| m.get(&id).cloned())
    }

    pub fn sample_count(&self) -> usize {
        self.samples.lock().len()
    }

    fn with_table<T>(
        &self,
        table: &str,
        f: impl FnOnce(&VectorTable) -> Result<T, DataSourceError>,
    ) -> Result<T, DataSourceError> {
        let tables = self.tables.read();
        let t = tables.get(table).ok_or_else(|| DataSourceError::UnknownTable(table.to_string()))?;
        f(t)
    }
}

impl SpatialStore for MemoryStore {
    fn nearest_distance(
        &self,
        source: &SourceRef,
        points: &[GridPoint],
    ) -> Result<HashMap<GridPointId, Option<f64>>, DataSourceError> {
        self.with_table(&source.table, |t| {
            Ok(points.iter().map(|p| (p.id, t.nearest(p.location, source))).collect())
        })
    }

    fn intersects(
        &self,
        source: &SourceRef,
        points: &[GridPoint],
    ) -> Result<HashMap<GridPointId, bool>, DataSourceError> {
        self.with_table(&source.table, |t| {
            Ok(points
                .iter()
                .map(|p| (p.id, t.nearest_within(p.location, 0.0, source).is_some()))
                .collect())
        })
    }

    fn sample_raster(
        &self,
        layer: &str,
        points: &[GridPoint],
    ) -> Result<HashMap<GridPointId, Option<f64>>, DataSourceError> {
        let rasters = self.rasters.read();
        let raster = rasters.get(layer).ok_or_else(|| DataSourceError::UnknownLayer(layer.to_string()))?;
        Ok(points.iter().map(|p| (p.id, raster.sample(p.location))).collect())
    }

    fn attribute_within(
        &self,
        source: &SourceRef,
        column: &str,
        tolerance: f64,
        points: &[GridPoint],
    ) -> Result<HashMap<GridPointId, Option<Value>>, DataSourceError> {
        self.with_table(&source.table, |t| {
            if !t.rows.is_empty() && !t.columns.contains(column) {
                return Err(DataSourceError::UnknownColumn {
                    table: source.table.clone(),
                    column: column.to_string(),
                });
            }
            Ok(points
                .iter()
                .map(|p| {
                    let value = t
                        .nearest_within(p.location, tolerance, source)
                        .and_then(|row| row.attributes.get(column))
                        .filter(|v| !v.is_null())
                        .cloned();
                    (p.id, value)
                })
                .collect())
        })
    }
}

impl GridPointStore for MemoryStore {
    /// Cell centres of the lattice that fall inside `polygon`, row by row.
    fn grid_from_polygon(&self, polygon: &Polygon) -> Result<Vec<GridPoint>, DataSourceError> {
        let Some(bb) = polygon.bbox() else {
            return Ok(Vec::new());
        };
        let cs = self.cell_size;
        let (i0, i1) = ((bb.min_x / cs).floor() as i64, (bb.max_x / cs).ceil() as i64);
        let (j0, j1) = ((bb.min_y / cs).floor() as i64, (bb.max_y / cs).ceil() as i64);

        let mut ids = self.grid_ids.lock();
        let mut points = Vec::new();
        for j in j0..j1 {
            for i in i0..i1 {
                let centre = Point::new((i as f64 + 0.5) * cs, (j as f64 + 0.5) * cs);
                if !polygon.contains(centre) {
                    continue;
                }
                let GridIds { by_cell, next } = &mut *ids;
                let id = *by_cell.entry((i, j)).or_insert_with(|| {
                    *next += 1;
                    GridPointId(*next)
                });
                points.push(GridPoint { id, location: centre });
            }
        }
        Ok(points)
    }
}

impl FeatureValueStore for MemoryStore {
    fn present(&self, feature: &str, ids: &[GridPointId]) -> Result<HashSet<GridPointId>, DataSourceError> {
        let values = self.values.read();
        Ok(match values.get(feature) {
            Some(stored) => ids.iter().filter(|id| stored.contains_key(id)).copied().collect(),
            None => HashSet::new(),
        })
    }

    fn write(&self, feature: &str, batch: FeatureBatch) -> Result<(), DataSourceError> {
        self.values.write().entry(feature.to_string()).or_default().extend(batch);
        Ok(())
    }

    fn values(&self, feature: &str, ids: &[GridPointId]) -> Result<FeatureBatch, DataSourceError> {
        let values = self.values.read();
        Ok(match values.get(feature) {
            Some(stored) => ids
                .iter()
                .filter_map(|id| stored.get(id).map(|v| (*id, v.clone())))
                .collect(),
            None => FeatureBatch::new(),
        })
    }
}

impl TrainingLabelStore for MemoryStore {
    fn insert_if_absent(&self, sample: &TrainingSample) -> Result<bool, DataSourceError> {
        Ok(self.samples.lock().insert(sample.clone()))
    }

    fn samples(&self, model: &ModelKey) -> Result<Vec<TrainingSample>, DataSourceError> {
        Ok(self.samples.lock().iter().filter(|s| &s.model == model).cloned().collect())
    }
}
