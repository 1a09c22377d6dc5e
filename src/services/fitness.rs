use chrono::Utc;
use serde_json::json;

use crate::models::FitnessSyncStatus;

/// Fitness platform sync. The platform integration is a stub: the payload is built
/// and logged, nothing is sent.
pub struct FitnessSync {
    platform: String,
}

impl Default for FitnessSync {
    fn default() -> Self {
        Self {
            platform: "Fitness API (v1)".to_string(),
        }
    }
}

impl FitnessSync {
    pub fn sync_intake(&self, user_id: &str, calories: i64, protein_g: f64) -> FitnessSyncStatus {
        let payload = json!({
            "platform": self.platform,
            "user_id": user_id,
            "metrics": {
                "calories_burned": 0,
                "calories_consumed": calories,
                "protein_g": protein_g,
            },
            "timestamp": Utc::now().to_rfc3339(),
        });

        log::info!("🏃 Syncing data to fitness platform: {}", payload);

        FitnessSyncStatus {
            status: "success".to_string(),
            synced_payload: payload,
        }
    }
}
