use std::sync::Arc;

use super::{CapabilityRequest, FallbackOrchestrator, FallbackResult, Provider, RunOptions, TaskOutput};
use crate::models::NutritionRecord;

/// Per-capability entry points over the orchestrator, bound to one provider and one
/// set of run limits.
pub struct NutritionEngine {
    orchestrator: Arc<FallbackOrchestrator>,
    provider: Provider,
    options: RunOptions,
}

impl NutritionEngine {
    pub fn new(orchestrator: Arc<FallbackOrchestrator>, provider: Provider, options: RunOptions) -> Self {
        Self {
            orchestrator,
            provider,
            options,
        }
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    pub async fn analyze_image(&self, bytes: &[u8], media_type: &str) -> FallbackResult<NutritionRecord> {
        let request = CapabilityRequest::image_nutrition(bytes, media_type);
        self.orchestrator
            .run(&request, self.provider, &self.options)
            .await
            .map(|output| match output {
                TaskOutput::Nutrition(record) => Some(record),
                TaskOutput::Text(_) => None,
            })
    }

    pub async fn analyze_audio(&self, bytes: &[u8], media_type: &str, prompt: &str) -> FallbackResult<String> {
        let request = CapabilityRequest::audio(bytes, media_type, prompt);
        self.run_text(&request).await
    }

    pub async fn generate_text(&self, prompt: &str, instruction: Option<&str>) -> FallbackResult<String> {
        let mut request = CapabilityRequest::text(prompt);
        if let Some(instruction) = instruction {
            request = request.with_instruction(instruction);
        }
        self.run_text(&request).await
    }

    async fn run_text(&self, request: &CapabilityRequest) -> FallbackResult<String> {
        self.orchestrator
            .run(request, self.provider, &self.options)
            .await
            .map(|output| match output {
                TaskOutput::Text(text) => Some(text),
                TaskOutput::Nutrition(_) => None,
            })
    }
}
