//! Scripted backend and credential fakes shared by the engine and API tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use super::invoker::DiscoveredModel;
use super::{Capability, CapabilityRequest, InferenceBackend, InvocationError, Provider, RawOutput};
use crate::config::CredentialSource;

pub enum Step {
    Text(String),
    Raw(RawOutput),
    Fail(InvocationError),
    Slow(Duration, RawOutput),
}

/// Backend answering from a per-model script and recording every call.
pub struct ScriptedBackend {
    provider: Provider,
    steps: Mutex<HashMap<String, Step>>,
    calls: Mutex<Vec<String>>,
    static_models: Vec<String>,
    discovery: Option<Result<Vec<DiscoveredModel>, u16>>,
    discovery_calls: Mutex<usize>,
    discovery_delay: Option<Duration>,
}

impl ScriptedBackend {
    pub fn new(steps: Vec<(&str, Step)>) -> Self {
        let static_models = steps.iter().map(|(id, _)| id.to_string()).collect();
        Self {
            provider: Provider::Gemini,
            steps: Mutex::new(
                steps
                    .into_iter()
                    .map(|(id, step)| (id.to_string(), step))
                    .collect(),
            ),
            calls: Mutex::new(Vec::new()),
            static_models,
            discovery: None,
            discovery_calls: Mutex::new(0),
            discovery_delay: None,
        }
    }

    pub fn with_static_models(mut self, models: &[&str]) -> Self {
        self.static_models = models.iter().map(|m| m.to_string()).collect();
        self
    }

    pub fn with_discovery(mut self, discovery: Result<Vec<DiscoveredModel>, u16>) -> Self {
        self.discovery = Some(discovery);
        self
    }

    pub fn with_discovery_delay(mut self, delay: Duration) -> Self {
        self.discovery_delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn discovery_calls(&self) -> usize {
        *self.discovery_calls.lock().unwrap()
    }
}

#[async_trait::async_trait]
impl InferenceBackend for ScriptedBackend {
    fn provider(&self) -> Provider {
        self.provider
    }

    fn static_models(&self, _capability: Capability) -> Vec<String> {
        self.static_models.clone()
    }

    fn supports_discovery(&self) -> bool {
        self.discovery.is_some()
    }

    async fn discover_models(&self, _api_key: &str) -> Result<Vec<DiscoveredModel>, InvocationError> {
        *self.discovery_calls.lock().unwrap() += 1;
        if let Some(delay) = self.discovery_delay {
            tokio::time::sleep(delay).await;
        }
        match &self.discovery {
            Some(Ok(models)) => Ok(models.clone()),
            Some(Err(status)) => Err(InvocationError::from_status(*status, "discovery failed".to_string())),
            None => Err(InvocationError::Unsupported("no discovery".to_string())),
        }
    }

    async fn generate(
        &self,
        model: &str,
        _request: &CapabilityRequest,
        _api_key: &str,
    ) -> Result<RawOutput, InvocationError> {
        self.calls.lock().unwrap().push(model.to_string());
        let step = self.steps.lock().unwrap().remove(model);

        match step {
            Some(Step::Text(text)) => Ok(RawOutput::Text(text)),
            Some(Step::Raw(raw)) => Ok(raw),
            Some(Step::Fail(err)) => Err(err),
            Some(Step::Slow(delay, raw)) => {
                tokio::time::sleep(delay).await;
                Ok(raw)
            }
            None => Err(InvocationError::Api {
                status: 404,
                body: format!("no script for {}", model),
            }),
        }
    }
}

/// Credential source with fixed keys and a reload counter.
pub struct FixedCredentials {
    keys: HashMap<Provider, String>,
    reloads: Mutex<usize>,
}

impl FixedCredentials {
    pub fn new(keys: &[(Provider, &str)]) -> Self {
        Self {
            keys: keys.iter().map(|(p, k)| (*p, k.to_string())).collect(),
            reloads: Mutex::new(0),
        }
    }

    pub fn empty() -> Self {
        Self::new(&[])
    }

    pub fn reloads(&self) -> usize {
        *self.reloads.lock().unwrap()
    }
}

impl CredentialSource for FixedCredentials {
    fn reload(&self) {
        *self.reloads.lock().unwrap() += 1;
    }

    fn current_credential(&self, provider: Provider) -> Option<String> {
        self.keys.get(&provider).cloned()
    }
}

pub const APPLE_JSON: &str = r#"{"food_name":"Apple","calories":95,"protein_g":0.5,"carbs_g":25.0,"fats_g":0.3,"confidence":0.9}"#;
