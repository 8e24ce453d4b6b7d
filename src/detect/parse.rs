//! Extract detected objects from free-form model text.
//!
//! The model is asked for a JSON array but may wrap it in prose, emit several
//! bracketed fragments, or return garbage. The first bracketed fragment that
//! parses as a non-empty array of records carrying every mandatory field wins.
//! When nothing qualifies, two fixed fallback objects are used. Every record
//! is then validated field by field; a bad field is replaced, never the
//! whole record.

use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::OnceLock;

use super::result::{DetectedObject, DEFAULT_OBJECT_TYPE};

const MANDATORY_FIELDS: [&str; 7] = ["id", "x", "y", "z", "width", "height", "depth"];
const GEOMETRY_FIELDS: [&str; 6] = ["x", "y", "z", "width", "height", "depth"];

/// Replacement for a missing, non-numeric, or non-positive geometry field.
pub const DEFAULT_GEOMETRY: f64 = 0.3;
/// Replacement for a missing or non-numeric confidence.
pub const DEFAULT_CONFIDENCE: f64 = 0.8;

/// Objects used when the response holds no usable array.
pub fn fallback_objects() -> Vec<DetectedObject> {
    vec![
        DetectedObject {
            id: "box_1".to_string(),
            x: 0.1,
            y: 0.2,
            z: 0.05,
            width: 0.3,
            height: 0.4,
            depth: 0.2,
            confidence: 0.85,
            object_type: DEFAULT_OBJECT_TYPE.to_string(),
        },
        DetectedObject {
            id: "box_2".to_string(),
            x: 0.5,
            y: 0.3,
            z: 0.1,
            width: 0.4,
            height: 0.3,
            depth: 0.25,
            confidence: 0.92,
            object_type: DEFAULT_OBJECT_TYPE.to_string(),
        },
    ]
}

/// Parse and validate a raw model response.
pub fn parse_model_response(response: &str) -> Vec<DetectedObject> {
    let Some(records) = find_records(response) else {
        log::warn!("no usable object array in model response; using fallback objects");
        return fallback_objects();
    };

    let mut objects: Vec<DetectedObject> = records.iter().map(validate_record).collect();
    dedupe_ids(&mut objects);
    objects
}

fn find_records(response: &str) -> Option<Vec<Map<String, Value>>> {
    static ARRAY_RE: OnceLock<Regex> = OnceLock::new();
    let re = ARRAY_RE.get_or_init(|| Regex::new(r"(?s)\[.*?\]").unwrap());
    re.find_iter(response).find_map(|candidate| {
        let Ok(Value::Array(items)) = serde_json::from_str::<Value>(candidate.as_str()) else {
            return None;
        };
        if items.is_empty() {
            return None;
        }
        items
            .into_iter()
            .map(|item| match item {
                Value::Object(map) if MANDATORY_FIELDS.iter().all(|f| map.contains_key(*f)) => {
                    Some(map)
                }
                _ => None,
            })
            .collect()
    })
}

fn validate_record(record: &Map<String, Value>) -> DetectedObject {
    let geometry = |field: &str| {
        record
            .get(field)
            .and_then(Value::as_f64)
            .filter(|v| v.is_finite() && *v > 0.0)
            .unwrap_or(DEFAULT_GEOMETRY)
    };
    let confidence = record
        .get("confidence")
        .and_then(Value::as_f64)
        .filter(|v| !v.is_nan())
        .unwrap_or(DEFAULT_CONFIDENCE)
        .clamp(0.0, 1.0);
    let object_type = match record.get("object_type") {
        Some(Value::String(s)) if !s.trim().is_empty() => s.clone(),
        _ => DEFAULT_OBJECT_TYPE.to_string(),
    };
    let id = match record.get("id") {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    };

    let [x, y, z, width, height, depth] = GEOMETRY_FIELDS.map(geometry);
    DetectedObject {
        id,
        x,
        y,
        z,
        width,
        height,
        depth,
        confidence,
        object_type,
    }
}

/// Suffix repeated ids with `_2`, `_3`, ... in order of appearance.
fn dedupe_ids(objects: &mut [DetectedObject]) {
    let mut seen: HashMap<String, usize> = HashMap::new();
    for object in objects.iter_mut() {
        let count = {
            let count = seen.entry(object.id.clone()).or_insert(0);
            *count += 1;
            *count
        };
        if count > 1 {
            let mut n = count;
            let mut candidate = format!("{}_{}", object.id, n);
            while seen.contains_key(&candidate) {
                n += 1;
                candidate = format!("{}_{}", object.id, n);
            }
            seen.insert(object.id.clone(), n);
            seen.insert(candidate.clone(), 1);
            object.id = candidate;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_array_wrapped_in_prose() {
        let text = r#"I see: [{"id": "a", "x": 0.1, "y": 0.2, "z": 0.3, "width": 0.4, "height": 0.5, "depth": 0.6, "confidence": 0.7, "object_type": "crate"}] done"#;
        let objects = parse_model_response(text);
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].id, "a");
        assert_eq!(objects[0].object_type, "crate");
        assert_eq!(objects[0].depth, 0.6);
        assert_eq!(objects[0].confidence, 0.7);
    }

    #[test]
    fn malformed_response_yields_two_fallbacks() {
        for text in ["", "no json here", "[not, json]", "[]", r#"[{"id": "a"}]"#] {
            assert_eq!(parse_model_response(text), fallback_objects(), "input {:?}", text);
        }
        assert_eq!(fallback_objects().len(), 2);
    }

    #[test]
    fn skips_unusable_fragments() {
        let text = r#"coords [1, 2] then [{"id": "b", "x": 1, "y": 1, "z": 1, "width": 1, "height": 1, "depth": 1}]"#;
        let objects = parse_model_response(text);
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].id, "b");
    }

    #[test]
    fn invalid_fields_are_replaced_not_rejected() {
        let text = r#"[{"id": "c", "x": -1, "y": "tall", "z": 0, "width": null, "height": 0.2, "depth": 0.1, "confidence": 4.5, "object_type": ""}]"#;
        let objects = parse_model_response(text);
        let obj = &objects[0];
        assert_eq!(obj.x, DEFAULT_GEOMETRY);
        assert_eq!(obj.y, DEFAULT_GEOMETRY);
        assert_eq!(obj.z, DEFAULT_GEOMETRY);
        assert_eq!(obj.width, DEFAULT_GEOMETRY);
        assert_eq!(obj.height, 0.2);
        assert_eq!(obj.confidence, 1.0);
        assert_eq!(obj.object_type, DEFAULT_OBJECT_TYPE);
    }

    #[test]
    fn confidence_defaults_and_clamps() {
        let text = r#"[{"id": "d", "x": 1, "y": 1, "z": 1, "width": 1, "height": 1, "depth": 1, "confidence": "high"},
                       {"id": "e", "x": 1, "y": 1, "z": 1, "width": 1, "height": 1, "depth": 1, "confidence": -0.5}]"#;
        let objects = parse_model_response(text);
        assert_eq!(objects[0].confidence, DEFAULT_CONFIDENCE);
        assert_eq!(objects[1].confidence, 0.0);
    }

    #[test]
    fn duplicate_ids_are_suffixed() {
        let text = r#"[{"id": "x", "x": 1, "y": 1, "z": 1, "width": 1, "height": 1, "depth": 1},
                       {"id": "x", "x": 1, "y": 1, "z": 1, "width": 1, "height": 1, "depth": 1},
                       {"id": "x_2", "x": 1, "y": 1, "z": 1, "width": 1, "height": 1, "depth": 1}]"#;
        let ids: Vec<String> = parse_model_response(text).into_iter().map(|o| o.id).collect();
        assert_eq!(ids, vec!["x", "x_2", "x_2_2"]);
    }
}
