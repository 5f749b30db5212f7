// src/analyze/schema.rs
//! Batch response schema and its validating decoder.

use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};

use crate::error::SchemaError;
use crate::model::{MetricType, RiskCategory, Urgency};

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ExtractedMetric {
    /// e.g. "Lithium Price", "Market Share %"
    pub name: String,
    /// Numeric value; zero means "not a real figure" and is never stored.
    pub value: f64,
    /// e.g. "$", "%", "units"
    pub unit: String,
    /// Brand or company the figure belongs to, or "Market" if general.
    pub company: String,
    pub data_type: MetricType,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ArticleAnalysis {
    pub summary: String,
    /// 0 = very negative, 5 = neutral, 10 = very positive.
    pub sentiment_score: f64,
    /// Business importance for the industry, 0..=10.
    pub impact_score: f64,
    pub urgency: Urgency,
    pub risk_type: RiskCategory,
    pub action_recommendation: String,
    /// Publication date if the text states one (ISO-ish).
    #[serde(default)]
    pub published_date: Option<String>,
    #[serde(default)]
    pub extracted_metrics: Vec<ExtractedMetric>,
}

/// One analysis per input article, in input order.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct BatchAnalysis {
    pub analyses: Vec<ArticleAnalysis>,
}

/// Decode and validate a provider response as a whole. Any invalid entry
/// rejects the entire batch.
pub fn decode_batch(raw: &str) -> Result<BatchAnalysis, SchemaError> {
    let body = strip_code_fence(raw);
    let value: serde_json::Value =
        serde_json::from_str(body).map_err(|e| SchemaError::Malformed(e.to_string()))?;

    if !value.get("analyses").is_some_and(|v| v.is_array()) {
        return Err(SchemaError::invalid("analyses", "missing or not an array"));
    }
    let batch: BatchAnalysis = serde_json::from_value(value)
        .map_err(|e| SchemaError::invalid("analyses", e.to_string()))?;

    for (i, a) in batch.analyses.iter().enumerate() {
        validate_analysis(i, a)?;
    }
    Ok(batch)
}

fn validate_analysis(i: usize, a: &ArticleAnalysis) -> Result<(), SchemaError> {
    let at = |field: &str| format!("analyses[{i}].{field}");
    check_score(&at("sentiment_score"), a.sentiment_score)?;
    check_score(&at("impact_score"), a.impact_score)?;
    if a.summary.trim().is_empty() {
        return Err(SchemaError::invalid(at("summary"), "empty"));
    }
    for (j, m) in a.extracted_metrics.iter().enumerate() {
        if !m.value.is_finite() {
            return Err(SchemaError::invalid(
                at(&format!("extracted_metrics[{j}].value")),
                "not a finite number",
            ));
        }
        if m.name.trim().is_empty() {
            return Err(SchemaError::invalid(
                at(&format!("extracted_metrics[{j}].name")),
                "empty",
            ));
        }
    }
    Ok(())
}

fn check_score(path: &str, v: f64) -> Result<(), SchemaError> {
    if v.is_finite() && (0.0..=10.0).contains(&v) {
        Ok(())
    } else {
        Err(SchemaError::invalid(path, format!("{v} outside [0, 10]")))
    }
}

/// Models sometimes wrap JSON in ```json fences despite instructions.
fn strip_code_fence(raw: &str) -> &str {
    let t = raw.trim();
    let Some(rest) = t.strip_prefix("```") else {
        return t;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// JSON schema for structured-output providers: every object closed
/// (`additionalProperties: false`), every property required, no `$ref`s.
pub fn batch_json_schema() -> serde_json::Value {
    let schema = schema_for!(BatchAnalysis);
    let mut value = serde_json::to_value(schema).unwrap_or_default();
    let definitions = value.get("definitions").cloned();
    if let Some(defs) = definitions {
        inline_refs(&mut value, &defs);
    }
    close_objects(&mut value);
    if let serde_json::Value::Object(map) = &mut value {
        map.remove("definitions");
        map.remove("$schema");
        map.remove("title");
    }
    value
}

fn close_objects(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            if map.get("type").and_then(|t| t.as_str()) == Some("object") {
                map.insert("additionalProperties".into(), serde_json::Value::Bool(false));
                let keys: Option<Vec<serde_json::Value>> = map
                    .get("properties")
                    .and_then(|p| p.as_object())
                    .map(|p| p.keys().cloned().map(serde_json::Value::String).collect());
                if let Some(keys) = keys {
                    map.insert("required".into(), serde_json::Value::Array(keys));
                }
            }
            for (_, v) in map.iter_mut() {
                close_objects(v);
            }
        }
        serde_json::Value::Array(arr) => arr.iter_mut().for_each(close_objects),
        _ => {}
    }
}

fn inline_refs(value: &mut serde_json::Value, defs: &serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            let target = map
                .get("$ref")
                .and_then(|r| r.as_str())
                .and_then(|r| r.strip_prefix("#/definitions/"))
                .and_then(|name| defs.get(name))
                .cloned();
            if let Some(def) = target {
                *value = def;
                inline_refs(value, defs);
                return;
            }
            if let Some(serde_json::Value::Array(all_of)) = map.get("allOf").cloned() {
                if let [only] = all_of.as_slice() {
                    *value = only.clone();
                    inline_refs(value, defs);
                    return;
                }
            }
            for (_, v) in map.iter_mut() {
                inline_refs(v, defs);
            }
        }
        serde_json::Value::Array(arr) => arr.iter_mut().for_each(|v| inline_refs(v, defs)),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(impact: f64) -> serde_json::Value {
        serde_json::json!({
            "summary": "Battery prices eased.",
            "sentiment_score": 6.5,
            "impact_score": impact,
            "urgency": "Medium",
            "risk_type": "Supply Chain",
            "action_recommendation": "Lock in supply contracts.",
            "published_date": null,
            "extracted_metrics": [
                {"name": "Lithium Price", "value": 10500.0, "unit": "$", "company": "Market", "data_type": "absolute"}
            ]
        })
    }

    #[test]
    fn decodes_valid_batch() {
        let raw = serde_json::json!({"analyses": [entry(7.0), entry(9.0)]}).to_string();
        let b = decode_batch(&raw).unwrap();
        assert_eq!(b.analyses.len(), 2);
        assert_eq!(b.analyses[0].risk_type, RiskCategory::SupplyChain);
        assert_eq!(b.analyses[1].extracted_metrics[0].data_type, MetricType::Absolute);
    }

    #[test]
    fn fenced_json_is_accepted() {
        let raw = format!(
            "```json\n{}\n```",
            serde_json::json!({"analyses": [entry(1.0)]})
        );
        assert_eq!(decode_batch(&raw).unwrap().analyses.len(), 1);
    }

    #[test]
    fn one_out_of_range_entry_rejects_whole_batch() {
        let raw = serde_json::json!({"analyses": [entry(7.0), entry(11.0), entry(3.0)]}).to_string();
        match decode_batch(&raw) {
            Err(SchemaError::Invalid { path, .. }) => assert_eq!(path, "analyses[1].impact_score"),
            other => panic!("expected invalid, got {other:?}"),
        }
    }

    #[test]
    fn bad_enum_rejects_batch() {
        let mut bad = entry(5.0);
        bad["urgency"] = serde_json::json!("Critical");
        let raw = serde_json::json!({"analyses": [entry(5.0), bad]}).to_string();
        assert!(matches!(decode_batch(&raw), Err(SchemaError::Invalid { .. })));
    }

    #[test]
    fn malformed_and_missing_root() {
        assert!(matches!(decode_batch("not json"), Err(SchemaError::Malformed(_))));
        assert!(matches!(
            decode_batch(r#"{"items": []}"#),
            Err(SchemaError::Invalid { .. })
        ));
    }

    #[test]
    fn optional_fields_default() {
        let raw = r#"{"analyses":[{"summary":"s","sentiment_score":5,"impact_score":5,
            "urgency":"Low","risk_type":"None","action_recommendation":"a"}]}"#;
        let b = decode_batch(raw).unwrap();
        assert!(b.analyses[0].extracted_metrics.is_empty());
        assert_eq!(b.analyses[0].published_date, None);
    }

    #[test]
    fn schema_is_closed_and_inlined() {
        let s = batch_json_schema();
        let text = s.to_string();
        assert!(!text.contains("$ref"));
        assert!(s.get("definitions").is_none());
        assert_eq!(s["additionalProperties"], serde_json::Value::Bool(false));
        let item = &s["properties"]["analyses"]["items"];
        let required: Vec<&str> = item["required"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|v| v.as_str())
            .collect();
        assert!(required.contains(&"published_date"));
        assert!(required.contains(&"extracted_metrics"));
    }
}
