use serde_json::{Map, Value as JsonValue};
use thiserror::Error;

pub const CURRENT_STRUCTURE_TYPE: i64 = 6;
pub const LEGACY_STRUCTURE_TYPE: i64 = 5;

const REQUIRED_INT_FIELDS: [&str; 4] = ["pm_1_last", "pm_2p5_last", "pm_10_last", "last_report_time"];

// Observed in the field as null while the device is still filling its windows.
const NULLABLE_INT_FIELDS: [&str; 4] = [
    "pct_pm_data_last_1_hour",
    "pct_pm_data_last_3_hours",
    "pct_pm_data_nowcast",
    "pct_pm_data_last_24_hours",
];

const REQUIRED_FLOAT_FIELDS: [&str; 5] = ["temp", "hum", "dew_point", "wet_bulb", "heat_index"];

const NULLABLE_FLOAT_FIELDS: [&str; 11] = [
    "pm_1",
    "pm_2p5",
    "pm_2p5_last_1_hour",
    "pm_2p5_last_3_hours",
    "pm_2p5_last_24_hours",
    "pm_2p5_nowcast",
    "pm_10",
    "pm_10_last_1_hour",
    "pm_10_last_3_hours",
    "pm_10_last_24_hours",
    "pm_10_nowcast",
];

const V5_RENAMES: [(&str, &str); 5] = [
    ("pm_10p0", "pm_10"),
    ("pm_10p0_last_1_hour", "pm_10_last_1_hour"),
    ("pm_10p0_last_3_hours", "pm_10_last_3_hours"),
    ("pm_10p0_last_24_hours", "pm_10_last_24_hours"),
    ("pm_10p0_nowcast", "pm_10_nowcast"),
];

/// Why a decoded `current_conditions` document was rejected.
///
/// The `Display` strings are relied on by operators grepping logs; keep them stable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SanityError {
    #[error("Error: {0}")]
    DeviceError(String),
    #[error("Missing or malformed \"{0}\" field")]
    Malformed(&'static str),
    #[error("Expected one element in conditions array.")]
    NoConditions,
    #[error("Expected data_structure_type of 6 (or type 5 auto converted to 6), found {0}.")]
    UnsupportedStructureType(i64),
}

#[derive(Clone, Copy, Debug)]
enum FieldKind {
    Str,
    Int,
    Number,
    Array,
    Object,
}

impl FieldKind {
    fn matches(self, value: &JsonValue) -> bool {
        match self {
            FieldKind::Str => value.is_string(),
            FieldKind::Int => value.is_i64() || value.is_u64(),
            FieldKind::Number => value.is_number(),
            FieldKind::Array => value.is_array(),
            FieldKind::Object => value.is_object(),
        }
    }
}

fn check_field(
    object: &Map<String, JsonValue>,
    name: &'static str,
    kind: FieldKind,
    nullable: bool,
) -> Result<(), SanityError> {
    let Some(value) = object.get(name) else {
        tracing::debug!(field = name, "field missing from payload");
        return Err(SanityError::Malformed(name));
    };
    if value.is_null() && nullable {
        return Ok(());
    }
    if !kind.matches(value) {
        tracing::debug!(field = name, value = %value, expected = ?kind, "field has the wrong type");
        return Err(SanityError::Malformed(name));
    }
    Ok(())
}

/// First element of `data.conditions`, if the document has one.
pub fn conditions(doc: &JsonValue) -> Option<&Map<String, JsonValue>> {
    doc.pointer("/data/conditions/0").and_then(JsonValue::as_object)
}

pub fn structure_type(doc: &JsonValue) -> Option<i64> {
    doc.pointer("/data/conditions/0/data_structure_type")
        .and_then(JsonValue::as_i64)
}

/// Rewrites a structure type 5 document into type 6 in place.
///
/// Type 5 firmware reports PM10 as `pm_10p0*`. If any legacy field is missing the
/// document is left with its original structure type and `is_sane` rejects it.
pub fn migrate_v5_to_v6(doc: &mut JsonValue) {
    let Some(conditions) = doc
        .pointer_mut("/data/conditions/0")
        .and_then(JsonValue::as_object_mut)
    else {
        tracing::info!("type 5 conversion skipped: payload has no conditions");
        return;
    };

    for (legacy, current) in V5_RENAMES {
        let Some(value) = conditions.get_mut(legacy).map(JsonValue::take) else {
            tracing::info!(field = legacy, "type 5 conversion stopped: legacy field missing");
            return;
        };
        conditions.insert(current.to_string(), value);
    }

    conditions.insert(
        "data_structure_type".to_string(),
        JsonValue::from(CURRENT_STRUCTURE_TYPE),
    );
    tracing::debug!("converted type 5 record to type 6");
}

/// Checks the structural contract of a type 6 `current_conditions` document.
pub fn is_sane(doc: &JsonValue) -> Result<(), SanityError> {
    if let Some(error) = doc.get("error").filter(|error| !error.is_null()) {
        return Err(SanityError::DeviceError(error.to_string()));
    }

    let root = doc.as_object().ok_or(SanityError::Malformed("data"))?;
    check_field(root, "data", FieldKind::Object, false)?;
    let data = root
        .get("data")
        .and_then(JsonValue::as_object)
        .ok_or(SanityError::Malformed("data"))?;

    check_field(data, "name", FieldKind::Str, false)?;
    check_field(data, "ts", FieldKind::Int, false)?;
    check_field(data, "conditions", FieldKind::Array, false)?;

    let first = data
        .get("conditions")
        .and_then(JsonValue::as_array)
        .and_then(|conditions| conditions.first())
        .ok_or(SanityError::NoConditions)?;
    let conditions = first
        .as_object()
        .ok_or(SanityError::Malformed("data_structure_type"))?;

    check_field(conditions, "data_structure_type", FieldKind::Int, false)?;
    let structure = conditions
        .get("data_structure_type")
        .and_then(JsonValue::as_i64)
        .ok_or(SanityError::Malformed("data_structure_type"))?;
    if structure != CURRENT_STRUCTURE_TYPE {
        return Err(SanityError::UnsupportedStructureType(structure));
    }

    for name in REQUIRED_INT_FIELDS {
        check_field(conditions, name, FieldKind::Int, false)?;
    }
    for name in NULLABLE_INT_FIELDS {
        check_field(conditions, name, FieldKind::Int, true)?;
    }
    check_field(conditions, "lsid", FieldKind::Int, true)?;
    for name in REQUIRED_FLOAT_FIELDS {
        check_field(conditions, name, FieldKind::Number, false)?;
    }
    for name in NULLABLE_FLOAT_FIELDS {
        check_field(conditions, name, FieldKind::Number, true)?;
    }

    Ok(())
}
