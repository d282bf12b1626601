//! Feature catalog: the validated, immutable set of grid features.
//!
//! Each feature names exactly one computation strategy and carries only the
//! fields that strategy needs. The catalog is checked once when it is built;
//! afterwards lookups cannot fail on a malformed definition.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::custom::{CustomComputation, FallbackMatch};
use crate::error::ConfigError;

/// How often a feature's sources change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cadence {
    /// Computed once, rarely refreshed.
    Static,
    /// Eligible for periodic refresh.
    Dynamic,
}

/// Attribute predicate restricting a source table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Filter {
    NotNull { column: String },
    Equals { column: String, value: Value },
    In { column: String, values: Vec<Value> },
}

impl Filter {
    pub fn column(&self) -> &str {
        match self {
            Filter::NotNull { column } | Filter::Equals { column, .. } | Filter::In { column, .. } => column.as_str(),
        }
    }

    /// Evaluate against a geometry's attributes. Missing columns read as null.
    pub fn matches(&self, attributes: &serde_json::Map<String, Value>) -> bool {
        let attr = attributes.get(self.column()).unwrap_or(&Value::Null);
        match self {
            Filter::NotNull { .. } => !attr.is_null(),
            Filter::Equals { value, .. } => values_equal(attr, value),
            Filter::In { values, .. } => values.iter().any(|v| values_equal(attr, v)),
        }
    }
}

/// JSON equality that treats `5561` and `5561.0` as the same number.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// A vector source table, optionally filtered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    pub table: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Filter>,
}

impl SourceRef {
    pub fn table(table: impl Into<String>) -> Self {
        Self { table: table.into(), filter: None }
    }

    pub fn filtered(table: impl Into<String>, filter: Filter) -> Self {
        Self { table: table.into(), filter: Some(filter) }
    }
}

/// Computation strategy and its strategy-specific fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Strategy {
    /// Distance to the nearest source geometry.
    Distance { source: SourceRef },
    /// Whether the point lies on or in any source geometry.
    Boolean { source: SourceRef },
    /// Raster layer value at the point.
    Raster { layer: String },
    /// Attribute of the intersecting source geometry.
    ValueAt {
        source: SourceRef,
        value_column: String,
        #[serde(default)]
        hashed: bool,
    },
    /// Registered batch computation.
    Custom {
        computation: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        depends_on: Vec<String>,
    },
}

impl Strategy {
    pub fn kind(&self) -> &'static str {
        match self {
            Strategy::Distance { .. } => "distance",
            Strategy::Boolean { .. } => "boolean",
            Strategy::Raster { .. } => "raster",
            Strategy::ValueAt { .. } => "value_at",
            Strategy::Custom { .. } => "custom",
        }
    }
}

/// One grid feature definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSpec {
    pub name: String,
    pub cadence: Cadence,
    pub strategy: Strategy,
}

impl FeatureSpec {
    pub fn new(name: impl Into<String>, cadence: Cadence, strategy: Strategy) -> Self {
        Self { name: name.into(), cadence, strategy }
    }

    pub fn distance(name: &str, table: &str, cadence: Cadence) -> Self {
        Self::new(name, cadence, Strategy::Distance { source: SourceRef::table(table) })
    }

    pub fn boolean(name: &str, table: &str, cadence: Cadence) -> Self {
        Self::new(name, cadence, Strategy::Boolean { source: SourceRef::table(table) })
    }

    pub fn raster(name: &str, layer: &str, cadence: Cadence) -> Self {
        Self::new(name, cadence, Strategy::Raster { layer: layer.to_string() })
    }

    pub fn value_at(name: &str, table: &str, value_column: &str, hashed: bool, cadence: Cadence) -> Self {
        Self::new(
            name,
            cadence,
            Strategy::ValueAt { source: SourceRef::table(table), value_column: value_column.to_string(), hashed },
        )
    }

    pub fn custom(name: &str, computation: &str, cadence: Cadence) -> Self {
        Self::new(name, cadence, Strategy::Custom { computation: computation.to_string(), depends_on: Vec::new() })
    }

    /// Restrict the source of a distance / boolean / value_at feature.
    /// No-op for other strategies.
    pub fn with_filter(mut self, filter: Filter) -> Self {
        match &mut self.strategy {
            Strategy::Distance { source } | Strategy::Boolean { source } | Strategy::ValueAt { source, .. } => {
                source.filter = Some(filter);
            }
            Strategy::Raster { .. } | Strategy::Custom { .. } => {}
        }
        self
    }

    /// Features that must be computed before this one.
    pub fn depends_on(&self) -> &[String] {
        match &self.strategy {
            Strategy::Custom { depends_on, .. } => depends_on.as_slice(),
            _ => &[],
        }
    }

    fn validate(&self, registry: &CustomRegistry) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::EmptyName);
        }
        let missing = |field: &'static str| ConfigError::MissingField { feature: self.name.clone(), field };
        match &self.strategy {
            Strategy::Distance { source } | Strategy::Boolean { source } => self.validate_source(source),
            Strategy::Raster { layer } => {
                if layer.trim().is_empty() {
                    return Err(missing("layer"));
                }
                Ok(())
            }
            Strategy::ValueAt { source, value_column, .. } => {
                self.validate_source(source)?;
                if value_column.trim().is_empty() {
                    return Err(missing("value_column"));
                }
                Ok(())
            }
            Strategy::Custom { computation, .. } => {
                if computation.trim().is_empty() {
                    return Err(missing("computation"));
                }
                if !registry.contains(computation) {
                    return Err(ConfigError::UnknownComputation {
                        feature: self.name.clone(),
                        computation: computation.clone(),
                    });
                }
                Ok(())
            }
        }
    }

    fn validate_source(&self, source: &SourceRef) -> Result<(), ConfigError> {
        if source.table.trim().is_empty() {
            return Err(ConfigError::MissingField { feature: self.name.clone(), field: "table" });
        }
        match &source.filter {
            Some(filter) if filter.column().trim().is_empty() => {
                Err(ConfigError::MissingField { feature: self.name.clone(), field: "filter.column" })
            }
            Some(Filter::In { column, values }) if values.is_empty() => {
                Err(ConfigError::EmptyFilter { feature: self.name.clone(), column: column.clone() })
            }
            _ => Ok(()),
        }
    }
}

// ── Custom computations ───────────────────────────────────────────────────────

/// Name → batch computation lookup for `custom` features.
#[derive(Clone, Default)]
pub struct CustomRegistry {
    computations: HashMap<String, Arc<dyn CustomComputation>>,
}

impl CustomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the computations used by the built-in catalog.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("berggrund", FallbackMatch::bedrock());
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, computation: impl CustomComputation + 'static) {
        self.computations.insert(name.into(), Arc::new(computation));
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn CustomComputation>> {
        self.computations.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.computations.contains_key(name)
    }
}

impl fmt::Debug for CustomRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.computations.keys().collect();
        names.sort();
        f.debug_struct("CustomRegistry").field("computations", &names).finish()
    }
}

// ── Catalog ───────────────────────────────────────────────────────────────────

/// Validated, ordered feature definitions.
#[derive(Debug, Clone)]
pub struct FeatureCatalog {
    specs: Vec<FeatureSpec>,
    index: HashMap<String, usize>,
    /// Execution levels: every feature's dependencies sit in earlier levels.
    stages: Vec<Vec<usize>>,
    registry: CustomRegistry,
}

impl FeatureCatalog {
    /// Validate `specs` and build the catalog.
    pub fn new(specs: Vec<FeatureSpec>, registry: &CustomRegistry) -> Result<Self, ConfigError> {
        let mut index = HashMap::with_capacity(specs.len());
        for (i, spec) in specs.iter().enumerate() {
            spec.validate(registry)?;
            if index.insert(spec.name.clone(), i).is_some() {
                return Err(ConfigError::DuplicateFeature(spec.name.clone()));
            }
        }
        for spec in &specs {
            for dep in spec.depends_on() {
                if !index.contains_key(dep) {
                    return Err(ConfigError::UnknownDependency {
                        feature: spec.name.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }
        let stages = compute_stages(&specs, &index)?;
        Ok(Self { specs, index, stages, registry: registry.clone() })
    }

    /// Parse a JSON array of feature definitions and validate it.
    pub fn from_json(json: &str, registry: &CustomRegistry) -> Result<Self, ConfigError> {
        let specs: Vec<FeatureSpec> = serde_json::from_str(json)?;
        Self::new(specs, registry)
    }

    /// The built-in catalog, validated against the built-in registry.
    pub fn builtin() -> Result<Self, ConfigError> {
        Self::new(default_catalog(), &CustomRegistry::with_builtins())
    }

    pub fn lookup(&self, name: &str) -> Option<&FeatureSpec> {
        self.index.get(name).map(|&i| &self.specs[i])
    }

    /// All features in catalog order.
    pub fn all(&self) -> &[FeatureSpec] {
        &self.specs
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Batch computation behind a `custom` feature.
    pub fn computation(&self, name: &str) -> Option<&Arc<dyn CustomComputation>> {
        self.registry.get(name)
    }

    /// Features grouped into dependency-ordered stages. Features within one
    /// stage are independent of each other.
    pub fn stages(&self) -> Vec<Vec<&FeatureSpec>> {
        self.stages
            .iter()
            .map(|stage| stage.iter().map(|&i| &self.specs[i]).collect())
            .collect()
    }
}

fn compute_stages(specs: &[FeatureSpec], index: &HashMap<String, usize>) -> Result<Vec<Vec<usize>>, ConfigError> {
    let mut placed: HashSet<usize> = HashSet::with_capacity(specs.len());
    let mut stages = Vec::new();
    while placed.len() < specs.len() {
        let stage: Vec<usize> = (0..specs.len())
            .filter(|i| !placed.contains(i))
            .filter(|&i| specs[i].depends_on().iter().all(|dep| placed.contains(&index[dep])))
            .collect();
        if stage.is_empty() {
            let stuck = (0..specs.len()).find(|i| !placed.contains(i)).map(|i| specs[i].name.clone());
            return Err(ConfigError::DependencyCycle(stuck.unwrap_or_default()));
        }
        placed.extend(stage.iter().copied());
        stages.push(stage);
    }
    Ok(stages)
}

// ── Built-in feature set ──────────────────────────────────────────────────────

/// Distances to observation, protection and infrastructure layers, boolean
/// membership layers, forest / climate / terrain rasters, soil and wetland
/// attributes, and bedrock class.
pub fn default_catalog() -> Vec<FeatureSpec> {
    use Cadence::{Dynamic, Static};

    vec![
        FeatureSpec::distance("artobservation_signalart_dist", "ps_mview_signalarter", Dynamic),
        FeatureSpec::distance("artobservation_rodlista_dist", "ps_mview_signalarter", Dynamic)
            .with_filter(Filter::NotNull { column: "rodlista".into() }),
        FeatureSpec::distance("biotopskydd_dist", "ps_mview_biotopskydd", Dynamic),
        FeatureSpec::distance("naturreservat_dist", "naturreservat", Static),
        FeatureSpec::distance("naturvarde_dist", "ps_mview_naturvarden", Dynamic),
        FeatureSpec::distance("naturvardsavtal_dist", "ps_mview_naturvardsavtal", Dynamic),
        FeatureSpec::distance("nyckelbiotop_dist", "ps_mview_nyckelbiotoper", Dynamic),
        FeatureSpec::distance("vag_dist", "vagkartan_vl", Static),
        FeatureSpec::distance("vandringsled_dist", "oversiktskartan_bo", Static)
            .with_filter(Filter::In { column: "kkod".into(), values: vec![5561.into(), 5571.into()] }),
        FeatureSpec::distance("vattenyta_dist", "vattenytor", Static),
        FeatureSpec::distance("vattendrag_dist", "vattendragslinjer", Static),
        FeatureSpec::distance("tatort_dist", "tatorter", Static),
        FeatureSpec::distance("smaort_dist", "smaorter", Static),
        FeatureSpec::distance("kalla_dist", "kallor", Static),
        FeatureSpec::distance("sumpskog_dist", "sumpskogar", Static),
        FeatureSpec::distance("utford_avverkning_dist", "ps_mview_utford_avverkning", Dynamic),
        FeatureSpec::boolean("myrskyddsplan", "myrskyddsplan", Static),
        FeatureSpec::boolean("kontinuitetsskog_boreal", "kontinuitetsskog_boreal", Static),
        FeatureSpec::boolean("riksintresse_friluftsliv", "riksintresse_friluftsliv", Static),
        FeatureSpec::boolean("riksintresse_naturvard", "riksintresse_naturvard", Static),
        FeatureSpec::boolean("riksintresse_vattendrag", "riksintresse_vattendrag", Static),
        FeatureSpec::raster("hojd", "ris_height", Static),
        FeatureSpec::raster("alder", "ris_age_auto", Static),
        FeatureSpec::raster("granvol", "ris_pinevol", Static),
        FeatureSpec::raster("tallvol", "ris_sprucevol", Static),
        FeatureSpec::raster("lovvol", "ris_deciduousvol", Static),
        FeatureSpec::raster("bokvol", "ris_beechvol_auto", Static),
        FeatureSpec::raster("bjorkvol", "ris_birchvol", Static),
        FeatureSpec::raster("medeldiameter", "medeldiameter", Static),
        FeatureSpec::raster("medelhojd", "medelhojd", Static),
        FeatureSpec::raster("grundyta", "grundyta", Static),
        FeatureSpec::raster("arsnederbord", "arsnederbord", Static),
        FeatureSpec::raster("arsmedeltemperatur", "arsmedeltemperatur", Static),
        FeatureSpec::raster("markhojd", "nh_riks", Static),
        FeatureSpec::raster("lutning", "lutning", Static),
        FeatureSpec::value_at("jordart", "jordarter", "jg2", false, Static),
        FeatureSpec::value_at("sumpskog", "sumpskogar", "hydrtext", true, Static),
        FeatureSpec::custom("berggrund", "berggrund", Static),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> CustomRegistry {
        CustomRegistry::with_builtins()
    }

    #[test]
    fn builtin_catalog_is_valid() {
        let catalog = FeatureCatalog::builtin().unwrap();
        assert_eq!(catalog.len(), default_catalog().len());
        assert_eq!(catalog.stages().len(), 1);

        let rodlista = catalog.lookup("artobservation_rodlista_dist").unwrap();
        assert_eq!(rodlista.cadence, Cadence::Dynamic);
        assert!(matches!(
            &rodlista.strategy,
            Strategy::Distance { source } if source.filter == Some(Filter::NotNull { column: "rodlista".into() })
        ));
        assert!(catalog.lookup("no_such_feature").is_none());
    }

    #[test]
    fn all_preserves_definition_order() {
        let catalog = FeatureCatalog::builtin().unwrap();
        let names: Vec<&str> = catalog.all().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names.first(), Some(&"artobservation_signalart_dist"));
        assert_eq!(names.last(), Some(&"berggrund"));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let specs = vec![
            FeatureSpec::distance("a", "t", Cadence::Static),
            FeatureSpec::boolean("a", "u", Cadence::Static),
        ];
        let err = FeatureCatalog::new(specs, &registry()).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateFeature(name) if name == "a"));
    }

    #[test]
    fn missing_strategy_fields_are_rejected() {
        let no_table = FeatureSpec::distance("a", " ", Cadence::Static);
        assert!(matches!(
            FeatureCatalog::new(vec![no_table], &registry()),
            Err(ConfigError::MissingField { field: "table", .. })
        ));

        let no_column = FeatureSpec::value_at("b", "t", "", false, Cadence::Static);
        assert!(matches!(
            FeatureCatalog::new(vec![no_column], &registry()),
            Err(ConfigError::MissingField { field: "value_column", .. })
        ));

        let empty_in = FeatureSpec::distance("c", "t", Cadence::Static)
            .with_filter(Filter::In { column: "k".into(), values: vec![] });
        assert!(matches!(
            FeatureCatalog::new(vec![empty_in], &registry()),
            Err(ConfigError::EmptyFilter { .. })
        ));
    }

    #[test]
    fn unregistered_custom_computation_is_rejected() {
        let spec = FeatureSpec::custom("x", "nope", Cadence::Static);
        assert!(matches!(
            FeatureCatalog::new(vec![spec], &registry()),
            Err(ConfigError::UnknownComputation { .. })
        ));
    }

    #[test]
    fn dependencies_are_staged_after_their_inputs() {
        let mut derived = FeatureSpec::custom("derived", "berggrund", Cadence::Static);
        derived.strategy = Strategy::Custom { computation: "berggrund".into(), depends_on: vec!["base".into()] };
        let specs = vec![derived, FeatureSpec::distance("base", "t", Cadence::Static)];

        let catalog = FeatureCatalog::new(specs, &registry()).unwrap();
        let stages = catalog.stages();
        assert_eq!(stages.len(), 2);
        assert_eq!(stages[0][0].name, "base");
        assert_eq!(stages[1][0].name, "derived");
    }

    #[test]
    fn dependency_cycles_and_unknown_dependencies_are_rejected() {
        let custom = |name: &str, dep: &str| {
            FeatureSpec::new(
                name,
                Cadence::Static,
                Strategy::Custom { computation: "berggrund".into(), depends_on: vec![dep.into()] },
            )
        };
        assert!(matches!(
            FeatureCatalog::new(vec![custom("a", "b"), custom("b", "a")], &registry()),
            Err(ConfigError::DependencyCycle(_))
        ));
        assert!(matches!(
            FeatureCatalog::new(vec![custom("a", "missing")], &registry()),
            Err(ConfigError::UnknownDependency { .. })
        ));
    }

    #[test]
    fn from_json_parses_tagged_strategies() {
        let json = r#"[
            {"name": "road", "cadence": "static",
             "strategy": {"type": "distance", "source": {"table": "roads"}}},
            {"name": "trail", "cadence": "static",
             "strategy": {"type": "distance",
                          "source": {"table": "map", "filter": {"op": "in", "column": "kkod", "values": [5561, 5571]}}}},
            {"name": "soil", "cadence": "dynamic",
             "strategy": {"type": "value_at", "source": {"table": "soils"}, "value_column": "jg2", "hashed": true}},
            {"name": "height", "cadence": "static", "strategy": {"type": "raster", "layer": "dem"}}
        ]"#;
        let catalog = FeatureCatalog::from_json(json, &registry()).unwrap();
        assert_eq!(catalog.len(), 4);
        assert_eq!(catalog.lookup("soil").unwrap().strategy.kind(), "value_at");
        assert_eq!(catalog.lookup("height").unwrap().strategy.kind(), "raster");
    }

    #[test]
    fn from_json_reports_malformed_input() {
        let json = r#"[{"name": "x", "cadence": "sometimes", "strategy": {"type": "raster", "layer": "l"}}]"#;
        assert!(matches!(FeatureCatalog::from_json(json, &registry()), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn filter_matching() {
        let mut attrs = serde_json::Map::new();
        attrs.insert("kkod".into(), 5561.0.into());
        attrs.insert("rodlista".into(), Value::Null);

        assert!(Filter::In { column: "kkod".into(), values: vec![5561.into()] }.matches(&attrs));
        assert!(!Filter::Equals { column: "kkod".into(), value: 1.into() }.matches(&attrs));
        assert!(!Filter::NotNull { column: "rodlista".into() }.matches(&attrs));
        assert!(!Filter::NotNull { column: "absent".into() }.matches(&attrs));
    }
}
