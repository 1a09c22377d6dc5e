use serde_json::{Map, Value};

use super::ValidationError;
use crate::models::NutritionRecord;

/// Keys every nutrition answer must carry.
pub const NUTRITION_FIELDS: [&str; 6] = [
    "food_name",
    "calories",
    "protein_g",
    "carbs_g",
    "fats_g",
    "confidence",
];

/// Checks a parsed payload against the nutrition schema and coerces its field types.
///
/// Fails on the first missing key. Extra keys are ignored. Value ranges are not checked
/// here, see [`NutritionRecord::check_ranges`].
pub fn validate_nutrition(payload: &Map<String, Value>) -> Result<NutritionRecord, ValidationError> {
    for field in NUTRITION_FIELDS {
        if !payload.contains_key(field) {
            // `{"error": "Not food detected"}` is how the prompt asks models to decline.
            if let Some(reason) = payload.get("error") {
                let reason = match reason {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                return Err(ValidationError::ModelReported(reason));
            }
            return Err(ValidationError::MissingField(field));
        }
    }

    Ok(NutritionRecord {
        food_name: coerce_text("food_name", &payload["food_name"])?,
        calories: coerce_integer("calories", &payload["calories"])?,
        protein_g: coerce_real("protein_g", &payload["protein_g"])?,
        carbs_g: coerce_real("carbs_g", &payload["carbs_g"])?,
        fats_g: coerce_real("fats_g", &payload["fats_g"])?,
        confidence: coerce_real("confidence", &payload["confidence"])?,
    })
}

fn coerce_text(field: &'static str, value: &Value) -> Result<String, ValidationError> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Value::String(_) => Err(invalid(field, "empty text")),
        other => Err(invalid(field, format!("expected text, got {}", other))),
    }
}

/// Integer coercion: whole numbers pass, reals truncate toward zero,
/// numeric strings are parsed.
fn coerce_integer(field: &'static str, value: &Value) -> Result<i64, ValidationError> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(i)
            } else if let Some(f) = n.as_f64().filter(|f| f.is_finite()) {
                if f.abs() >= i64::MAX as f64 {
                    return Err(invalid(field, format!("{} does not fit an integer", f)));
                }
                Ok(f.trunc() as i64)
            } else {
                Err(invalid(field, format!("{} does not fit an integer", n)))
            }
        }
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|e| invalid(field, format!("{:?}: {}", s, e))),
        other => Err(invalid(field, format!("expected an integer, got {}", other))),
    }
}

fn coerce_real(field: &'static str, value: &Value) -> Result<f64, ValidationError> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => Some(
            s.trim()
                .parse::<f64>()
                .map_err(|e| invalid(field, format!("{:?}: {}", s, e)))?,
        ),
        other => return Err(invalid(field, format!("expected a number, got {}", other))),
    };

    match number {
        Some(f) if f.is_finite() => Ok(f),
        _ => Err(invalid(field, "not a finite number")),
    }
}

fn invalid(field: &'static str, reason: impl ToString) -> ValidationError {
    ValidationError::InvalidField {
        field,
        reason: reason.to_string(),
    }
}
