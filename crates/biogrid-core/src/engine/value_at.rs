//! Attribute of the geometry under the point, optionally hashed to a bounded
//! categorical code.

use serde_json::Value;

use crate::catalog::SourceRef;
use crate::error::DataSourceError;
use crate::store::{FeatureBatch, FeatureValue, GridPoint, SpatialStore};

/// Hashed categorical codes fall in `0..CATEGORY_CODE_SPACE`.
pub const CATEGORY_CODE_SPACE: u64 = 1 << 24;

/// Stable code for a categorical string.
///
/// FxHash is seedless, so the same string maps to the same code on every run
/// of the same build and platform. Input is read in native byte order, so
/// little- and big-endian hosts disagree.
pub fn category_code(raw: &str) -> i64 {
    (fxhash::hash64(raw) % CATEGORY_CODE_SPACE) as i64
}

/// Convert a source attribute to a stored value. Nulls stay null.
pub(crate) fn to_feature_value(raw: Value, hashed: bool) -> Option<FeatureValue> {
    match raw {
        Value::Null => None,
        Value::String(s) if hashed => Some(FeatureValue::Code(category_code(&s))),
        other if hashed => Some(FeatureValue::Code(category_code(&other.to_string()))),
        Value::String(s) => Some(FeatureValue::Text(s)),
        Value::Bool(b) => Some(FeatureValue::Flag(b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Some(FeatureValue::Code(i)),
            None => n.as_f64().map(FeatureValue::Number),
        },
        other => Some(FeatureValue::Text(other.to_string())),
    }
}

pub(crate) fn compute(
    store: &dyn SpatialStore,
    source: &SourceRef,
    value_column: &str,
    hashed: bool,
    points: &[GridPoint],
) -> Result<FeatureBatch, DataSourceError> {
    let attributes = store.attribute_within(source, value_column, 0.0, points)?;
    Ok(attributes
        .into_iter()
        .map(|(id, raw)| (id, raw.and_then(|v| to_feature_value(v, hashed))))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_code_is_deterministic_and_bounded() {
        let inputs = ["Fuktig", "Blöt", "Frisk", "", "a much longer categorical label with spaces"];
        for raw in inputs {
            let code = category_code(raw);
            assert_eq!(code, category_code(raw));
            assert!((0..CATEGORY_CODE_SPACE as i64).contains(&code), "{raw}: {code}");
        }
        assert_ne!(category_code("Fuktig"), category_code("Blöt"));
    }

    #[test]
    #[cfg(target_endian = "little")]
    fn category_codes_match_stored_values() {
        assert_eq!(category_code(""), 15_239_787);
        assert_eq!(category_code("Fuktig"), 7_041_541);
        assert_eq!(category_code("Sumpskog"), 7_890_447);
    }

    #[test]
    fn hashed_values_become_codes() {
        let v = to_feature_value(Value::String("Fuktig".into()), true);
        assert_eq!(v, Some(FeatureValue::Code(category_code("Fuktig"))));
        assert_eq!(to_feature_value(Value::Null, true), None);
    }

    #[test]
    fn raw_values_keep_their_type() {
        assert_eq!(to_feature_value(Value::String("MO".into()), false), Some(FeatureValue::Text("MO".into())));
        assert_eq!(to_feature_value(7.into(), false), Some(FeatureValue::Code(7)));
        assert_eq!(to_feature_value(2.5.into(), false), Some(FeatureValue::Number(2.5)));
    }
}
