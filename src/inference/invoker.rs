use std::time::Instant;

use super::{
    Capability, CandidateFailure, CapabilityRequest, FailureStage, InvocationError, ModelCandidate,
    Provider, RawOutput,
};

/// A model advertised by a provider's listing endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredModel {
    pub id: String,
    pub supported_methods: Vec<String>,
}

/// One provider's calling convention.
///
/// Implementations make a single round trip per call and never retry; moving on to
/// another model is the orchestrator's job.
#[async_trait::async_trait]
pub trait InferenceBackend: Send + Sync {
    fn provider(&self) -> Provider;

    /// Known-good model ids, used when discovery is unavailable or fails.
    fn static_models(&self, capability: Capability) -> Vec<String>;

    /// Whether [`discover_models`](Self::discover_models) queries the provider.
    fn supports_discovery(&self) -> bool {
        false
    }

    async fn discover_models(&self, _api_key: &str) -> Result<Vec<DiscoveredModel>, InvocationError> {
        Err(InvocationError::Unsupported(format!(
            "{} does not expose model discovery",
            self.provider()
        )))
    }

    async fn generate(
        &self,
        model: &str,
        request: &CapabilityRequest,
        api_key: &str,
    ) -> Result<RawOutput, InvocationError>;
}

/// Calls one candidate and normalizes any provider fault into a [`CandidateFailure`].
pub async fn invoke(
    backend: &dyn InferenceBackend,
    candidate: &ModelCandidate,
    request: &CapabilityRequest,
    api_key: &str,
) -> Result<RawOutput, CandidateFailure> {
    log::info!(
        "🤖 Trying AI model: {} ({}, rank {}) for {}",
        candidate.id,
        candidate.provider,
        candidate.rank,
        request.capability()
    );
    let started = Instant::now();

    match backend.generate(&candidate.id, request, api_key).await {
        Ok(raw) => {
            log::info!("✅ {} answered in {:?}", candidate.id, started.elapsed());
            Ok(raw)
        }
        Err(e) => {
            log::warn!("❌ {} failed after {:?}: {}", candidate.id, started.elapsed(), e);
            Err(CandidateFailure::new(&candidate.id, FailureStage::Invocation, e))
        }
    }
}
