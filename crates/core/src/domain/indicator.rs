use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single lab value with its reference range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndicatorReading {
    pub name: String,
    pub value: f64,
    pub unit: String,
    pub reference_min: f64,
    pub reference_max: f64,
    pub is_normal: bool,
}

impl IndicatorReading {
    pub fn is_abnormal(&self) -> bool {
        !self.is_normal
    }

    pub fn is_below_reference(&self) -> bool {
        self.value < self.reference_min
    }

    pub fn is_above_reference(&self) -> bool {
        self.value > self.reference_max
    }
}

/// Parses the raw text form of a stored results blob.
pub fn parse_results(raw: &str) -> Result<Vec<IndicatorReading>, serde_json::Error> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    let blob = serde_json::from_str::<Value>(trimmed)?;
    Ok(normalize(&blob))
}

/// Extracts uniform readings from an analysis results blob.
///
/// Accepts an array of reading-like objects, a `name -> fields` map, or either of
/// those wrapped under an `indicators` key. Anything else yields no readings.
/// Entries whose numeric fields cannot be coerced are dropped.
pub fn normalize(blob: &Value) -> Vec<IndicatorReading> {
    match blob {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| {
                let fields = item.as_object()?;
                let name = fields.get("name").and_then(Value::as_str)?;
                reading_from_fields(name, fields)
            })
            .collect(),
        Value::Object(map) => {
            if let Some(inner @ (Value::Array(_) | Value::Object(_))) = map.get("indicators") {
                return normalize(inner);
            }
            map.iter()
                .filter_map(|(name, entry)| reading_from_fields(name, entry.as_object()?))
                .collect()
        }
        _ => Vec::new(),
    }
}

fn reading_from_fields(name: &str, fields: &Map<String, Value>) -> Option<IndicatorReading> {
    let name = name.trim();
    if name.is_empty() {
        return None;
    }

    let value = field(fields, &["value"]).and_then(coerce_number)?;
    let reference_min = field(fields, &["referenceMin", "reference_min"]).and_then(coerce_number)?;
    let reference_max = field(fields, &["referenceMax", "reference_max"]).and_then(coerce_number)?;

    let unit = field(fields, &["unit"])
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .unwrap_or_default();

    // Older uploads carry `normal` instead of `isNormal`.
    let is_normal = field(fields, &["isNormal", "is_normal", "normal"])
        .and_then(coerce_bool)
        .unwrap_or(true);

    Some(IndicatorReading {
        name: name.to_string(),
        value,
        unit,
        reference_min,
        reference_max,
        is_normal,
    })
}

fn field<'a>(fields: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .find_map(|k| fields.get(*k))
        .filter(|v| !v.is_null())
}

fn coerce_number(v: &Value) -> Option<f64> {
    let n = match v {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().replace(',', ".").parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

fn coerce_bool(v: &Value) -> Option<bool> {
    match v {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}
