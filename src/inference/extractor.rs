//! Locates and parses the structured payload inside a backend answer.
//!
//! Extraction never validates or fills in content; that is the validator's job.

use serde_json::{Map, Value};

use super::{ExtractionError, RawOutput, RawPart};

/// Extracts the JSON object carried by a raw backend answer.
pub fn extract(raw: &RawOutput) -> Result<Map<String, Value>, ExtractionError> {
    match raw {
        RawOutput::Structured(map) => Ok(map.clone()),
        RawOutput::Text(text) => parse_payload(text),
        RawOutput::Parts(parts) => {
            let joined = join_parts(parts);
            match parse_payload(&joined) {
                Ok(map) => Ok(map),
                Err(err) => first_structured_part(parts).cloned().ok_or(err),
            }
        }
    }
}

/// Flattens a raw backend answer into plain text for the text and audio capabilities.
pub fn extract_text(raw: &RawOutput) -> Result<String, ExtractionError> {
    let text = match raw {
        RawOutput::Text(text) => text.clone(),
        RawOutput::Structured(map) => part_text(map),
        RawOutput::Parts(parts) => join_parts(parts),
    };

    let text = text.trim();
    if text.is_empty() {
        return Err(ExtractionError::Empty);
    }
    Ok(text.to_string())
}

/// Removes markdown code fences (```json / ```) and surrounding whitespace.
pub fn strip_code_fences(text: &str) -> &str {
    let mut trimmed = text.trim();

    if let Some(rest) = trimmed.strip_prefix("```") {
        let rest = rest.strip_prefix("json").or_else(|| rest.strip_prefix("JSON")).unwrap_or(rest);
        trimmed = rest.trim_start();
    }
    if let Some(rest) = trimmed.strip_suffix("```") {
        trimmed = rest.trim_end();
    }

    trimmed
}

fn parse_payload(text: &str) -> Result<Map<String, Value>, ExtractionError> {
    let cleaned = strip_code_fences(text);
    if cleaned.is_empty() {
        return Err(ExtractionError::Empty);
    }

    match serde_json::from_str::<Value>(cleaned) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(ExtractionError::NotAnObject(json_kind(&other))),
        Err(e) => Err(ExtractionError::Malformed(e.to_string())),
    }
}

fn join_parts(parts: &[RawPart]) -> String {
    parts
        .iter()
        .map(|part| match part {
            RawPart::Text(text) => text.clone(),
            RawPart::Structured(map) => part_text(map),
        })
        .collect()
}

/// Text carried by a mapping part: its `text` or `content` string, or the mapping
/// itself serialized as JSON.
fn part_text(map: &Map<String, Value>) -> String {
    for key in ["text", "content"] {
        if let Some(Value::String(text)) = map.get(key) {
            return text.clone();
        }
    }
    Value::Object(map.clone()).to_string()
}

fn first_structured_part(parts: &[RawPart]) -> Option<&Map<String, Value>> {
    parts.iter().find_map(|part| match part {
        RawPart::Structured(map) => Some(map),
        RawPart::Text(_) => None,
    })
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("not an object: {}", other),
        }
    }

    #[test]
    fn test_structured_output_returned_as_is() {
        let map = object(json!({"food_name": "Soup", "calories": 120}));
        let extracted = extract(&RawOutput::Structured(map.clone())).unwrap();
        assert_eq!(extracted, map);
    }

    #[test]
    fn test_fenced_json_text() {
        let raw = RawOutput::Text(
            "```json\n{\"food_name\":\"Apple\",\"calories\":95,\"protein_g\":0.5,\"carbs_g\":25.0,\"fats_g\":0.3,\"confidence\":0.9}\n```"
                .to_string(),
        );
        let map = extract(&raw).unwrap();
        assert_eq!(map["food_name"], json!("Apple"));
        assert_eq!(map["calories"], json!(95));
    }

    #[test]
    fn test_bare_fence_without_tag() {
        let raw = RawOutput::Text("```\n{\"a\": 1}\n```".to_string());
        assert_eq!(extract(&raw).unwrap()["a"], json!(1));
    }

    #[test]
    fn test_unparsable_text_is_malformed() {
        let raw = RawOutput::Text("I think this is a sandwich.".to_string());
        assert!(matches!(extract(&raw), Err(ExtractionError::Malformed(_))));
    }

    #[test]
    fn test_json_array_text_is_not_an_object() {
        let raw = RawOutput::Text("[1, 2, 3]".to_string());
        assert_eq!(extract(&raw), Err(ExtractionError::NotAnObject("array")));
    }

    #[test]
    fn test_blank_text_is_empty() {
        let raw = RawOutput::Text("```json\n```".to_string());
        assert_eq!(extract(&raw), Err(ExtractionError::Empty));
    }

    #[test]
    fn test_parts_with_leading_text_fall_back_to_mapping() {
        let rice = object(json!({
            "food_name": "Rice",
            "calories": 200,
            "protein_g": 4,
            "carbs_g": 45,
            "fats_g": 0.5,
            "confidence": 0.8
        }));
        let raw = RawOutput::Parts(vec![
            RawPart::Text("here is the data: ".to_string()),
            RawPart::Structured(rice.clone()),
        ]);
        assert_eq!(extract(&raw).unwrap(), rice);
    }

    #[test]
    fn test_parts_joined_into_single_payload() {
        let raw = RawOutput::Parts(vec![
            RawPart::Text("{\"food_name\": \"Pizza\",".to_string()),
            RawPart::Structured(object(json!({"type": "text", "text": " \"calories\": 650}"}))),
        ]);
        let map = extract(&raw).unwrap();
        assert_eq!(map["food_name"], json!("Pizza"));
        assert_eq!(map["calories"], json!(650));
    }

    #[test]
    fn test_text_only_parts_that_do_not_parse_fail() {
        let raw = RawOutput::Parts(vec![RawPart::Text("no json here".to_string())]);
        assert!(matches!(extract(&raw), Err(ExtractionError::Malformed(_))));
    }

    #[test]
    fn test_extract_is_repeatable() {
        let raw = RawOutput::Text("```json {\"food_name\": \"Tea\", \"calories\": 2} ```".to_string());
        assert_eq!(extract(&raw).unwrap(), extract(&raw).unwrap());
    }

    #[test]
    fn test_extract_text_joins_parts() {
        let raw = RawOutput::Parts(vec![
            RawPart::Text("Drink ".to_string()),
            RawPart::Structured(object(json!({"text": "more water."}))),
        ]);
        assert_eq!(extract_text(&raw).unwrap(), "Drink more water.");
    }

    #[test]
    fn test_extract_text_rejects_whitespace() {
        assert_eq!(
            extract_text(&RawOutput::Text("  \n".to_string())),
            Err(ExtractionError::Empty)
        );
    }
}
