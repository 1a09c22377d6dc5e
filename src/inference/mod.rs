//! Inference fallback engine.
//!
//! A run asks the [`CapabilityCatalog`] for ranked model candidates, invokes them one at a
//! time through an [`InferenceBackend`], and turns the first usable answer into a typed
//! result. Every per-candidate fault advances the chain; only a missing credential stops
//! it before any call is made.

pub mod backends;
pub mod catalog;
pub mod engine;
pub mod error;
pub mod extractor;
pub mod invoker;
pub mod orchestrator;
pub mod prompts;
pub mod validator;

#[cfg(test)]
pub(crate) mod testing;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::models::NutritionRecord;

pub use catalog::CapabilityCatalog;
pub use engine::NutritionEngine;
pub use error::{CandidateFailure, ChainError, ExtractionError, FailureStage, InvocationError, ValidationError};
pub use invoker::InferenceBackend;
pub use orchestrator::FallbackOrchestrator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Gemini,
    OpenAi,
    Groq,
    OpenRouter,
}

impl Provider {
    /// Environment variable holding this provider's API key.
    pub fn credential_var(&self) -> &'static str {
        match self {
            Provider::Gemini => "GOOGLE_API_KEY",
            Provider::OpenAi => "OPENAI_API_KEY",
            Provider::Groq => "GROQ_API_KEY",
            Provider::OpenRouter => "OPENROUTER_API_KEY",
        }
    }

    pub fn all() -> [Provider; 4] {
        [Provider::Gemini, Provider::OpenAi, Provider::Groq, Provider::OpenRouter]
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "gemini" | "google" => Some(Provider::Gemini),
            "openai" => Some(Provider::OpenAi),
            "groq" => Some(Provider::Groq),
            "openrouter" => Some(Provider::OpenRouter),
            _ => None,
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Provider::Gemini => "gemini",
            Provider::OpenAi => "openai",
            Provider::Groq => "groq",
            Provider::OpenRouter => "openrouter",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    ImageToNutrition,
    TextToText,
    AudioToText,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Capability::ImageToNutrition => "image-to-nutrition",
            Capability::TextToText => "text-to-text",
            Capability::AudioToText => "audio-to-text",
        };
        write!(f, "{}", s)
    }
}

/// Uploaded media: raw bytes plus the declared media type.
#[derive(Debug, Clone)]
pub struct MediaInput {
    pub bytes: Arc<[u8]>,
    pub media_type: String,
}

/// The task to perform and its input. Fields are private so a request cannot change
/// once built.
#[derive(Debug, Clone)]
pub struct CapabilityRequest {
    capability: Capability,
    prompt: String,
    media: Option<MediaInput>,
    instruction: Option<String>,
}

impl CapabilityRequest {
    pub fn image_nutrition(bytes: impl Into<Arc<[u8]>>, media_type: &str) -> Self {
        Self {
            capability: Capability::ImageToNutrition,
            prompt: prompts::NUTRITION_PROMPT.to_string(),
            media: Some(MediaInput {
                bytes: bytes.into(),
                media_type: media_type.to_string(),
            }),
            instruction: None,
        }
    }

    pub fn audio(bytes: impl Into<Arc<[u8]>>, media_type: &str, prompt: &str) -> Self {
        let prompt = if prompt.trim().is_empty() {
            prompts::AUDIO_DEFAULT_PROMPT
        } else {
            prompt
        };

        Self {
            capability: Capability::AudioToText,
            prompt: prompt.to_string(),
            media: Some(MediaInput {
                bytes: bytes.into(),
                media_type: media_type.to_string(),
            }),
            instruction: None,
        }
    }

    pub fn text(prompt: &str) -> Self {
        Self {
            capability: Capability::TextToText,
            prompt: prompt.to_string(),
            media: None,
            instruction: None,
        }
    }

    pub fn with_instruction(mut self, instruction: &str) -> Self {
        self.instruction = Some(instruction.to_string());
        self
    }

    pub fn capability(&self) -> Capability {
        self.capability
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn media(&self) -> Option<&MediaInput> {
        self.media.as_ref()
    }

    pub fn instruction(&self) -> Option<&str> {
        self.instruction.as_deref()
    }
}

/// One model identifier considered for a run. Lower rank is tried first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelCandidate {
    pub id: String,
    pub provider: Provider,
    pub rank: usize,
}

/// Raw answer of a backend before extraction.
#[derive(Debug, Clone, PartialEq)]
pub enum RawOutput {
    Text(String),
    Structured(Map<String, Value>),
    Parts(Vec<RawPart>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum RawPart {
    Text(String),
    Structured(Map<String, Value>),
}

impl RawOutput {
    /// Classifies a JSON content value the way providers return it: a string, an
    /// object, or an array of strings and objects.
    pub fn from_json(content: Value) -> Result<Self, InvocationError> {
        match content {
            Value::String(text) => Ok(RawOutput::Text(text)),
            Value::Object(map) => Ok(RawOutput::Structured(map)),
            Value::Array(items) => {
                let parts = items
                    .into_iter()
                    .filter_map(|item| match item {
                        Value::String(text) => Some(RawPart::Text(text)),
                        Value::Object(map) => Some(RawPart::Structured(map)),
                        other => {
                            log::debug!("Skipping non-text response part: {}", other);
                            None
                        }
                    })
                    .collect();
                Ok(RawOutput::Parts(parts))
            }
            Value::Null => Err(InvocationError::MalformedResponse(
                "response content is null".to_string(),
            )),
            other => Err(InvocationError::MalformedResponse(format!(
                "unexpected response content: {}",
                other
            ))),
        }
    }
}

/// Artifact of a successful run: a nutrition record for image analysis,
/// plain text for the text and audio capabilities.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutput {
    Nutrition(NutritionRecord),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum FallbackResult<T> {
    Succeeded { value: T, candidate: ModelCandidate },
    AllFailed(ChainError),
}

impl<T> FallbackResult<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, FallbackResult::Succeeded { .. })
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> Option<U>) -> FallbackResult<U> {
        match self {
            FallbackResult::Succeeded { value, candidate } => match f(value) {
                Some(value) => FallbackResult::Succeeded { value, candidate },
                None => FallbackResult::AllFailed(ChainError::Exhausted(CandidateFailure::new(
                    &candidate.id,
                    FailureStage::Extraction,
                    "unexpected output kind for capability",
                ))),
            },
            FallbackResult::AllFailed(err) => FallbackResult::AllFailed(err),
        }
    }

    pub fn into_result(self) -> Result<(T, ModelCandidate), ChainError> {
        match self {
            FallbackResult::Succeeded { value, candidate } => Ok((value, candidate)),
            FallbackResult::AllFailed(err) => Err(err),
        }
    }
}

/// Per-run limits. The deadline bounds the whole chain; cancellation stops the chain
/// from advancing to further candidates.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub deadline: Option<Duration>,
    pub cancel: Option<CancellationToken>,
}

impl RunOptions {
    pub fn with_deadline(deadline: Duration) -> Self {
        Self {
            deadline: Some(deadline),
            cancel: None,
        }
    }
}
