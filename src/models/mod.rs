use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::inference::ValidationError;

/// Validated nutrition estimate for one analysed meal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NutritionRecord {
    pub food_name: String,
    pub calories: i64,
    pub protein_g: f64,
    pub carbs_g: f64,
    pub fats_g: f64,
    pub confidence: f64,
}

impl NutritionRecord {
    /// Checks the value ranges a stored or displayed record must respect:
    /// non-negative calories and grams, confidence within [0, 1].
    ///
    /// Validation only coerces types, so callers that persist call this first.
    pub fn check_ranges(&self) -> Result<(), ValidationError> {
        if self.calories < 0 {
            return Err(ValidationError::OutOfRange {
                field: "calories",
                value: self.calories as f64,
            });
        }

        let grams = [
            ("protein_g", self.protein_g),
            ("carbs_g", self.carbs_g),
            ("fats_g", self.fats_g),
        ];
        for (field, value) in grams {
            if value < 0.0 {
                return Err(ValidationError::OutOfRange { field, value });
            }
        }

        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(ValidationError::OutOfRange {
                field: "confidence",
                value: self.confidence,
            });
        }

        Ok(())
    }
}

/// A stored analysis, as kept by the persistence collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoodLog {
    pub id: Option<i64>,
    pub user_id: String,
    pub food_name: String,
    pub calories: i64,
    pub nutrition: NutritionRecord,
    pub timestamp: DateTime<Utc>,
}

impl FoodLog {
    pub fn new(user_id: &str, nutrition: NutritionRecord) -> Self {
        Self {
            id: None,
            user_id: user_id.to_string(),
            food_name: nutrition.food_name.clone(),
            calories: nutrition.calories,
            nutrition,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitnessSyncStatus {
    pub status: String,
    pub synced_payload: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResponse {
    pub nutrition: NutritionRecord,
    pub message: String,
    pub fitness_sync_status: Option<FitnessSyncStatus>,
    pub model: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatReply {
    pub reply: String,
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct History {
    pub user_id: String,
    pub history: Vec<FoodLog>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apple() -> NutritionRecord {
        NutritionRecord {
            food_name: "Apple".to_string(),
            calories: 95,
            protein_g: 0.5,
            carbs_g: 25.0,
            fats_g: 0.3,
            confidence: 0.9,
        }
    }

    #[test]
    fn test_check_ranges_accepts_valid_record() {
        assert!(apple().check_ranges().is_ok());
    }

    #[test]
    fn test_check_ranges_rejects_negative_grams() {
        let record = NutritionRecord { fats_g: -1.0, ..apple() };
        let err = record.check_ranges().unwrap_err();
        assert!(err.to_string().contains("fats_g"));
    }

    #[test]
    fn test_check_ranges_rejects_confidence_above_one() {
        let record = NutritionRecord { confidence: 1.5, ..apple() };
        let err = record.check_ranges().unwrap_err();
        assert!(err.to_string().contains("confidence"));
    }

    #[test]
    fn test_food_log_copies_summary_fields() {
        let log = FoodLog::new("demo_user", apple());
        assert_eq!(log.food_name, "Apple");
        assert_eq!(log.calories, 95);
        assert!(log.id.is_none());
    }
}
