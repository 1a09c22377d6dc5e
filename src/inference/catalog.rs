use super::invoker::DiscoveredModel;
use super::{Capability, InferenceBackend, ModelCandidate};

/// Generation method a discovered model must advertise to be tried.
const GENERATE_CONTENT: &str = "generateContent";

/// Identifier fragments of fast, lightweight model families. These are tried first.
const SPEED_MARKERS: [&str; 2] = ["flash", "instant"];

pub const DEFAULT_MAX_CANDIDATES: usize = 3;

/// Produces the ranked candidate list for one run.
#[derive(Debug, Clone)]
pub struct CapabilityCatalog {
    max_candidates: usize,
}

impl Default for CapabilityCatalog {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CANDIDATES)
    }
}

impl CapabilityCatalog {
    pub fn new(max_candidates: usize) -> Self {
        Self {
            max_candidates: max_candidates.max(1),
        }
    }

    /// Lists candidates for `capability`, fastest families first, capped at the
    /// configured length.
    ///
    /// Discovery failures degrade to the backend's static list and never surface as
    /// errors. The result is empty only when neither source has a model.
    pub async fn list_candidates(
        &self,
        capability: Capability,
        backend: &dyn InferenceBackend,
        api_key: &str,
    ) -> Vec<ModelCandidate> {
        let provider = backend.provider();

        let ids = if backend.supports_discovery() {
            match backend.discover_models(api_key).await {
                Ok(models) => {
                    let ids = capable_models(models);
                    if ids.is_empty() {
                        log::warn!(
                            "⚠️ {} listed no models supporting {}, using static candidates",
                            provider,
                            GENERATE_CONTENT
                        );
                        backend.static_models(capability)
                    } else {
                        ids
                    }
                }
                Err(e) => {
                    log::warn!(
                        "⚠️ Could not fetch {} models dynamically ({}), using static candidates",
                        provider,
                        e
                    );
                    backend.static_models(capability)
                }
            }
        } else {
            backend.static_models(capability)
        };

        let candidates: Vec<ModelCandidate> = rank(ids)
            .into_iter()
            .take(self.max_candidates)
            .enumerate()
            .map(|(rank, id)| ModelCandidate { id, provider, rank })
            .collect();

        log::info!(
            "🔍 Candidates for {} on {}: {:?}",
            capability,
            provider,
            candidates.iter().map(|c| c.id.as_str()).collect::<Vec<_>>()
        );

        candidates
    }
}

fn capable_models(models: Vec<DiscoveredModel>) -> Vec<String> {
    models
        .into_iter()
        .filter(|m| m.supported_methods.iter().any(|method| method == GENERATE_CONTENT))
        .map(|m| m.id.strip_prefix("models/").map(str::to_string).unwrap_or(m.id))
        .collect()
}

/// Stable partition: speed-marked ids first, provider order kept within each group.
fn rank(ids: Vec<String>) -> Vec<String> {
    let (mut fast, slow): (Vec<String>, Vec<String>) =
        ids.into_iter().partition(|id| is_fast(id));
    fast.extend(slow);
    fast
}

fn is_fast(id: &str) -> bool {
    let id = id.to_lowercase();
    SPEED_MARKERS.iter().any(|marker| id.contains(marker))
}
