use std::sync::Arc;
use thiserror::Error;

use crate::inference::{prompts, ChainError, NutritionEngine};
use crate::models::{AnalysisResponse, ChatReply, FoodLog, History};
use crate::services::{FitnessSync, FoodLogStore};

const HISTORY_LIMIT: i64 = 10;

pub const DEFAULT_IMAGE_TYPE: &str = "image/jpeg";
pub const DEFAULT_AUDIO_TYPE: &str = "audio/wav";

/// Media type from a filename extension, `fallback` when it is unknown.
pub fn guess_media_type<'a>(filename: &str, fallback: &'a str) -> &'a str {
    let ext = filename.rsplit_once('.').map(|(_, ext)| ext.to_lowercase());
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("heic") => "image/heic",
        Some("wav") => "audio/wav",
        Some("mp3") => "audio/mp3",
        Some("ogg") => "audio/ogg",
        Some("m4a") => "audio/m4a",
        Some("webm") => "audio/webm",
        _ => fallback,
    }
}

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("AI analysis failed: {0}")]
    Inference(#[from] ChainError),

    #[error("Database not initialized")]
    StoreUnavailable,

    #[error("Database error: {0}")]
    Store(#[from] anyhow::Error),
}

/// Ties the engine to persistence and the fitness sync for one request.
pub struct AnalysisHandler {
    engine: NutritionEngine,
    store: Option<Arc<dyn FoodLogStore>>,
    fitness: FitnessSync,
}

impl AnalysisHandler {
    pub fn new(engine: NutritionEngine, store: Option<Arc<dyn FoodLogStore>>) -> Self {
        Self {
            engine,
            store,
            fitness: FitnessSync::default(),
        }
    }

    /// Analyses an uploaded meal photo, stores the estimate and syncs it.
    ///
    /// Storage problems are logged and never change the analysis result.
    pub async fn analyze_upload(
        &self,
        user_id: &str,
        bytes: &[u8],
        media_type: &str,
    ) -> Result<AnalysisResponse, HandlerError> {
        log::info!(
            "📸 Analysis request from {} ({}, {} bytes) via {}",
            user_id,
            media_type,
            bytes.len(),
            self.engine.provider()
        );

        let (nutrition, candidate) = self.engine.analyze_image(bytes, media_type).await.into_result()?;

        if let Err(e) = nutrition.check_ranges() {
            log::warn!("⚠️ {} returned an implausible estimate, not saving: {}", candidate.id, e);
            return Ok(AnalysisResponse {
                nutrition,
                message: format!("Food analyzed, but the estimate was not saved: {}", e),
                fitness_sync_status: None,
                model: candidate.id,
            });
        }

        match &self.store {
            Some(store) => match store.add_food_log(&FoodLog::new(user_id, nutrition.clone())).await {
                Ok(id) => log::info!("✅ Food log {} saved for {}", id, user_id),
                Err(e) => log::warn!("⚠️ Database write failed, continuing without saving: {}", e),
            },
            None => log::debug!("No database configured, skipping food log"),
        }

        let sync = self.fitness.sync_intake(user_id, nutrition.calories, nutrition.protein_g);

        Ok(AnalysisResponse {
            nutrition,
            message: "Food analyzed successfully".to_string(),
            fitness_sync_status: Some(sync),
            model: candidate.id,
        })
    }

    /// NutriChat: answers a free-text nutrition question.
    pub async fn chat(&self, message: &str) -> Result<ChatReply, HandlerError> {
        log::info!("💬 Chat request: '{}'", message);
        let (reply, candidate) = self
            .engine
            .generate_text(message, Some(prompts::COACH_INSTRUCTION))
            .await
            .into_result()?;

        Ok(ChatReply {
            reply,
            model: candidate.id,
        })
    }

    /// NutriVoice: answers a recorded voice note.
    pub async fn voice(&self, bytes: &[u8], media_type: &str, prompt: &str) -> Result<ChatReply, HandlerError> {
        log::info!("🎙️ Voice request ({}, {} bytes)", media_type, bytes.len());
        let (reply, candidate) = self
            .engine
            .analyze_audio(bytes, media_type, prompt)
            .await
            .into_result()?;

        Ok(ChatReply {
            reply,
            model: candidate.id,
        })
    }

    pub async fn history(&self, user_id: &str) -> Result<History, HandlerError> {
        let store = self.store.as_ref().ok_or(HandlerError::StoreUnavailable)?;
        let history = store.get_history(user_id, HISTORY_LIMIT).await?;
        Ok(History {
            user_id: user_id.to_string(),
            history,
        })
    }

    pub async fn food_log(&self, id: i64) -> Result<Option<FoodLog>, HandlerError> {
        let store = self.store.as_ref().ok_or(HandlerError::StoreUnavailable)?;
        Ok(store.get_food_log(id).await?)
    }
}
