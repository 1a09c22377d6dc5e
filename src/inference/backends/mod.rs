pub mod gemini;
pub mod openai_compat;

pub use gemini::GeminiBackend;
pub use openai_compat::ChatCompletionsBackend;

use base64::{engine::general_purpose, Engine};
use std::sync::Arc;

use super::{InferenceBackend, InvocationError, MediaInput};
use crate::config::AppConfig;

/// Builds one backend per provider, honouring base-URL overrides from the config.
pub fn default_backends(config: &AppConfig) -> Vec<Arc<dyn InferenceBackend>> {
    let gemini = match &config.gemini_base_url {
        Some(url) => GeminiBackend::new(url),
        None => GeminiBackend::default(),
    };

    let mut openai = ChatCompletionsBackend::openai();
    if let Some(url) = &config.openai_base_url {
        openai = openai.with_base_url(url);
    }
    let mut groq = ChatCompletionsBackend::groq();
    if let Some(url) = &config.groq_base_url {
        groq = groq.with_base_url(url);
    }
    let mut openrouter = ChatCompletionsBackend::openrouter();
    if let Some(url) = &config.openrouter_base_url {
        openrouter = openrouter.with_base_url(url);
    }

    let backends: Vec<Arc<dyn InferenceBackend>> = vec![
        Arc::new(gemini),
        Arc::new(openai),
        Arc::new(groq),
        Arc::new(openrouter),
    ];
    backends
}

fn encode_media(media: &MediaInput) -> String {
    general_purpose::STANDARD.encode(&media.bytes)
}

fn data_url(media: &MediaInput) -> String {
    let url = format!("data:{};base64,{}", media.media_type, encode_media(media));
    log::debug!("🖼️ Media data URL created: {}... ", url.get(..60).unwrap_or(&url));
    url
}

/// Reads the error body of a failed call and classifies it by status.
async fn read_failure(response: reqwest::Response) -> InvocationError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    log::error!("❌ Provider API error response ({}): {}", status, body);
    InvocationError::from_status(status, body)
}
