use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{encode_media, read_failure};
use crate::inference::invoker::DiscoveredModel;
use crate::inference::{
    Capability, CapabilityRequest, InferenceBackend, InvocationError, Provider, RawOutput, RawPart,
};

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Finish reasons that mean the answer was withheld by a safety filter.
const BLOCKED_FINISH_REASONS: [&str; 4] = ["SAFETY", "PROHIBITED_CONTENT", "BLOCKLIST", "SPII"];

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(rename = "systemInstruction", skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
}

#[derive(Debug, Serialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: Blob,
    },
}

#[derive(Debug, Serialize)]
struct Blob {
    #[serde(rename = "mimeType")]
    mime_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(rename = "promptFeedback", default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(rename = "finishReason", default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct PromptFeedback {
    #[serde(rename = "blockReason", default)]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    models: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    name: String,
    #[serde(rename = "supportedGenerationMethods", default)]
    supported_generation_methods: Vec<String>,
}

/// Google Gemini `generateContent` calling convention.
pub struct GeminiBackend {
    base_url: String,
    client: reqwest::Client,
}

impl Default for GeminiBackend {
    fn default() -> Self {
        Self::new(GEMINI_BASE_URL)
    }
}

impl GeminiBackend {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn build_request(request: &CapabilityRequest) -> GenerateRequest {
        let mut parts = vec![Part::Text {
            text: request.prompt().to_string(),
        }];
        if let Some(media) = request.media() {
            parts.push(Part::InlineData {
                inline_data: Blob {
                    mime_type: media.media_type.clone(),
                    data: encode_media(media),
                },
            });
        }

        GenerateRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts,
            }],
            system_instruction: request.instruction().map(|instruction| Content {
                role: None,
                parts: vec![Part::Text {
                    text: instruction.to_string(),
                }],
            }),
        }
    }
}

fn into_raw_output(response: GenerateResponse) -> Result<RawOutput, InvocationError> {
    let Some(candidate) = response.candidates.into_iter().next() else {
        if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
            return Err(InvocationError::Refused(reason));
        }
        return Err(InvocationError::MalformedResponse("no candidates returned".to_string()));
    };

    if let Some(reason) = candidate.finish_reason.as_deref() {
        if BLOCKED_FINISH_REASONS.contains(&reason) {
            return Err(InvocationError::Refused(reason.to_string()));
        }
    }

    let mut parts: Vec<RawPart> = candidate
        .content
        .map(|c| c.parts)
        .unwrap_or_default()
        .into_iter()
        // Thinking-model reasoning parts are not part of the answer.
        .filter(|part| part.get("thought").and_then(Value::as_bool) != Some(true))
        .filter_map(|part| match part {
            Value::Object(map) => match map.get("text") {
                Some(Value::String(text)) => Some(RawPart::Text(text.clone())),
                _ => Some(RawPart::Structured(map)),
            },
            Value::String(text) => Some(RawPart::Text(text)),
            _ => None,
        })
        .collect();

    match parts.len() {
        0 => Err(InvocationError::MalformedResponse("empty response content".to_string())),
        1 => Ok(match parts.remove(0) {
            RawPart::Text(text) => RawOutput::Text(text),
            RawPart::Structured(map) => RawOutput::Structured(map),
        }),
        _ => Ok(RawOutput::Parts(parts)),
    }
}

#[async_trait::async_trait]
impl InferenceBackend for GeminiBackend {
    fn provider(&self) -> Provider {
        Provider::Gemini
    }

    fn static_models(&self, capability: Capability) -> Vec<String> {
        let models: &[&str] = match capability {
            Capability::ImageToNutrition | Capability::TextToText => {
                &["gemini-1.5-flash", "gemini-1.5-pro"]
            }
            Capability::AudioToText => &["gemini-1.5-flash", "gemini-1.5-pro-002"],
        };
        models.iter().map(|m| m.to_string()).collect()
    }

    fn supports_discovery(&self) -> bool {
        true
    }

    async fn discover_models(&self, api_key: &str) -> Result<Vec<DiscoveredModel>, InvocationError> {
        let response = self
            .client
            .get(format!("{}/v1beta/models", self.base_url))
            .query(&[("pageSize", "1000")])
            .header("x-goog-api-key", api_key)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(read_failure(response).await);
        }

        let list: ModelList = response
            .json()
            .await
            .map_err(|e| InvocationError::MalformedResponse(e.to_string()))?;
        log::debug!("📋 Gemini listed {} models", list.models.len());

        Ok(list
            .models
            .into_iter()
            .map(|m| DiscoveredModel {
                id: m.name,
                supported_methods: m.supported_generation_methods,
            })
            .collect())
    }

    async fn generate(
        &self,
        model: &str,
        request: &CapabilityRequest,
        api_key: &str,
    ) -> Result<RawOutput, InvocationError> {
        let body = Self::build_request(request);

        let response = self
            .client
            .post(format!("{}/v1beta/models/{}:generateContent", self.base_url, model))
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .await?;

        log::debug!("📥 Gemini response status: {}", response.status());
        if !response.status().is_success() {
            return Err(read_failure(response).await);
        }

        let response_text = response.text().await?;
        let parsed: GenerateResponse = serde_json::from_str(&response_text)
            .map_err(|e| InvocationError::MalformedResponse(e.to_string()))?;
        into_raw_output(parsed)
    }
}
