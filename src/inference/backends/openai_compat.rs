use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{data_url, encode_media, read_failure};
use crate::inference::{
    Capability, CapabilityRequest, InferenceBackend, InvocationError, Provider, RawOutput,
};

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: Vec<ContentPart>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum ContentPart {
    Text {
        #[serde(rename = "type")]
        content_type: String,
        text: String,
    },
    ImageUrl {
        #[serde(rename = "type")]
        content_type: String,
        image_url: ImageData,
    },
    InputAudio {
        #[serde(rename = "type")]
        content_type: String,
        input_audio: AudioData,
    },
}

impl ContentPart {
    fn text(text: &str) -> Self {
        ContentPart::Text {
            content_type: "text".to_string(),
            text: text.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ImageData {
    url: String,
}

#[derive(Debug, Serialize)]
struct AudioData {
    data: String,
    format: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: MessageContent,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageContent {
    #[serde(default)]
    content: Value,
    #[serde(default)]
    refusal: Option<String>,
}

/// Chat-completions calling convention shared by OpenAI, Groq and OpenRouter.
pub struct ChatCompletionsBackend {
    provider: Provider,
    base_url: String,
    json_mode: bool,
    client: reqwest::Client,
}

impl ChatCompletionsBackend {
    pub fn new(provider: Provider, base_url: &str, json_mode: bool) -> Self {
        Self {
            provider,
            base_url: base_url.trim_end_matches('/').to_string(),
            json_mode,
            client: reqwest::Client::new(),
        }
    }

    pub fn openai() -> Self {
        Self::new(Provider::OpenAi, OPENAI_BASE_URL, true)
    }

    pub fn groq() -> Self {
        Self::new(Provider::Groq, GROQ_BASE_URL, true)
    }

    pub fn openrouter() -> Self {
        Self::new(Provider::OpenRouter, OPENROUTER_BASE_URL, false)
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    fn build_request(&self, model: &str, request: &CapabilityRequest) -> Result<ChatRequest, InvocationError> {
        let mut messages = Vec::new();
        if let Some(instruction) = request.instruction() {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: vec![ContentPart::text(instruction)],
            });
        }

        let mut content = vec![ContentPart::text(request.prompt())];
        if let Some(media) = request.media() {
            if media.media_type.starts_with("image/") {
                content.push(ContentPart::ImageUrl {
                    content_type: "image_url".to_string(),
                    image_url: ImageData {
                        url: data_url(media),
                    },
                });
            } else if let Some(format) = audio_format(&media.media_type) {
                content.push(ContentPart::InputAudio {
                    content_type: "input_audio".to_string(),
                    input_audio: AudioData {
                        data: encode_media(media),
                        format: format.to_string(),
                    },
                });
            } else {
                return Err(InvocationError::Unsupported(format!(
                    "{} cannot take {} input",
                    self.provider, media.media_type
                )));
            }
        }
        messages.push(ChatMessage {
            role: "user".to_string(),
            content,
        });

        let nutrition = request.capability() == Capability::ImageToNutrition;
        Ok(ChatRequest {
            model: model.to_string(),
            messages,
            max_tokens: 500,
            temperature: nutrition.then_some(0.0),
            response_format: (nutrition && self.json_mode).then(|| ResponseFormat {
                format_type: "json_object".to_string(),
            }),
        })
    }
}

fn audio_format(media_type: &str) -> Option<&'static str> {
    match media_type {
        "audio/wav" | "audio/x-wav" | "audio/wave" => Some("wav"),
        "audio/mpeg" | "audio/mp3" => Some("mp3"),
        _ => None,
    }
}

#[async_trait::async_trait]
impl InferenceBackend for ChatCompletionsBackend {
    fn provider(&self) -> Provider {
        self.provider
    }

    fn static_models(&self, capability: Capability) -> Vec<String> {
        let models: &[&str] = match (self.provider, capability) {
            (Provider::OpenAi, Capability::ImageToNutrition) => &["gpt-4o"],
            (Provider::OpenAi, Capability::TextToText) => &["gpt-4o-mini", "gpt-4o"],
            (Provider::OpenAi, Capability::AudioToText) => &["gpt-4o-audio-preview"],
            (Provider::Groq, Capability::ImageToNutrition) => &["llama-3.2-90b-vision-preview"],
            (Provider::Groq, Capability::TextToText) => &["llama-3.1-8b-instant", "llama-3.3-70b-versatile"],
            (Provider::OpenRouter, Capability::ImageToNutrition | Capability::TextToText) => {
                &["meta-llama/llama-4-scout:free"]
            }
            _ => &[],
        };
        models.iter().map(|m| m.to_string()).collect()
    }

    async fn generate(
        &self,
        model: &str,
        request: &CapabilityRequest,
        api_key: &str,
    ) -> Result<RawOutput, InvocationError> {
        let body = self.build_request(model, request)?;
        log::debug!(
            "📤 {} request payload size: {} bytes",
            self.provider,
            serde_json::to_string(&body).map(|s| s.len()).unwrap_or(0)
        );

        let mut http = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json");
        if self.provider == Provider::OpenRouter {
            http = http
                .header("HTTP-Referer", "https://github.com/nutrisnap")
                .header("X-Title", "NutriSnap");
        }

        let response = http.json(&body).send().await?;
        log::debug!("📥 {} response status: {}", self.provider, response.status());
        if !response.status().is_success() {
            return Err(read_failure(response).await);
        }

        let response_text = response.text().await?;
        let chat_response: ChatResponse = serde_json::from_str(&response_text)
            .map_err(|e| InvocationError::MalformedResponse(e.to_string()))?;

        let choice = chat_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| InvocationError::MalformedResponse("no choices returned".to_string()))?;

        if let Some(refusal) = choice.message.refusal.filter(|r| !r.trim().is_empty()) {
            return Err(InvocationError::Refused(refusal));
        }
        if choice.finish_reason.as_deref() == Some("content_filter") {
            return Err(InvocationError::Refused("content_filter".to_string()));
        }

        RawOutput::from_json(choice.message.content)
    }
}
