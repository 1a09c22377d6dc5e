//! Sequential fallback across ranked candidates.
//!
//! A run moves through [`ChainState`] strictly forward: each candidate is tried once, the
//! first full success (invoke, extract, validate) ends the run, and exhausting the list
//! ends it with the last recorded failure.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::time::Instant;

use super::{
    extractor, invoker, validator, Capability, CapabilityCatalog, CapabilityRequest,
    CandidateFailure, ChainError, FailureStage, FallbackResult, InferenceBackend, ModelCandidate,
    Provider, RawOutput, RunOptions, TaskOutput,
};
use crate::config::CredentialSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainState {
    NotStarted,
    TryingCandidate(usize),
    Succeeded(usize),
    ExhaustedFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainEvent {
    Begin,
    CandidateSucceeded,
    CandidateFailed,
    Aborted,
}

impl ChainState {
    /// Transition table. Terminal states absorb every event.
    pub fn next(self, event: ChainEvent, candidate_count: usize) -> ChainState {
        use ChainEvent::*;
        use ChainState::*;

        match (self, event) {
            (NotStarted, Begin) if candidate_count > 0 => TryingCandidate(0),
            (NotStarted, Begin) => ExhaustedFailed,
            (TryingCandidate(i), CandidateSucceeded) => Succeeded(i),
            (TryingCandidate(i), CandidateFailed) if i + 1 < candidate_count => TryingCandidate(i + 1),
            (TryingCandidate(_), CandidateFailed) => ExhaustedFailed,
            (NotStarted | TryingCandidate(_), Aborted) => ExhaustedFailed,
            (state @ (Succeeded(_) | ExhaustedFailed), _) => state,
            // Out-of-order events never move the chain.
            (state @ TryingCandidate(_), Begin) => state,
            (NotStarted, CandidateSucceeded | CandidateFailed) => NotStarted,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ChainState::Succeeded(_) | ChainState::ExhaustedFailed)
    }
}

pub struct FallbackOrchestrator {
    catalog: CapabilityCatalog,
    backends: HashMap<Provider, Arc<dyn InferenceBackend>>,
    credentials: Arc<dyn CredentialSource>,
}

impl FallbackOrchestrator {
    pub fn new(catalog: CapabilityCatalog, credentials: Arc<dyn CredentialSource>) -> Self {
        Self {
            catalog,
            backends: HashMap::new(),
            credentials,
        }
    }

    pub fn with_backend(mut self, backend: Arc<dyn InferenceBackend>) -> Self {
        self.backends.insert(backend.provider(), backend);
        self
    }

    /// Runs the fallback chain for one request against one provider.
    pub async fn run(
        &self,
        request: &CapabilityRequest,
        provider: Provider,
        options: &RunOptions,
    ) -> FallbackResult<TaskOutput> {
        let started = Instant::now();
        let deadline = options.deadline.map(|d| started + d);

        // Credentials are re-read on every run so rotated keys apply without a restart.
        self.credentials.reload();
        let Some(api_key) = self.credentials.current_credential(provider) else {
            log::error!(
                "❌ No credential for {}. Please add {} to the environment",
                provider,
                provider.credential_var()
            );
            return FallbackResult::AllFailed(ChainError::CredentialMissing { provider });
        };

        let Some(backend) = self.backends.get(&provider) else {
            log::error!("❌ No backend registered for provider {}", provider);
            return FallbackResult::AllFailed(ChainError::NoCandidates);
        };

        if options.cancel.as_ref().is_some_and(|token| token.is_cancelled()) {
            log::warn!("🛑 Run cancelled before listing candidates");
            return FallbackResult::AllFailed(ChainError::Cancelled);
        }

        // The deadline covers discovery too.
        let listing = self.catalog.list_candidates(request.capability(), backend.as_ref(), &api_key);
        let candidates = match deadline {
            Some(d) => match tokio::time::timeout_at(d, listing).await {
                Ok(candidates) => candidates,
                Err(_) => {
                    log::warn!("⏰ Deadline exceeded while listing {} candidates", request.capability());
                    return FallbackResult::AllFailed(ChainError::DeadlineExceeded);
                }
            },
            None => listing.await,
        };

        let mut state = ChainState::NotStarted.next(ChainEvent::Begin, candidates.len());
        let mut last_failure: Option<CandidateFailure> = None;
        let mut abort: Option<ChainError> = None;

        while let ChainState::TryingCandidate(index) = state {
            let candidate = &candidates[index];

            if options.cancel.as_ref().is_some_and(|token| token.is_cancelled()) {
                log::warn!("🛑 Run cancelled before trying {}", candidate.id);
                abort = Some(ChainError::Cancelled);
                state = state.next(ChainEvent::Aborted, candidates.len());
                continue;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                log::warn!("⏰ Deadline exceeded before trying {}", candidate.id);
                abort = Some(ChainError::DeadlineExceeded);
                state = state.next(ChainEvent::Aborted, candidates.len());
                continue;
            }

            let attempt = self.attempt(backend.as_ref(), candidate, request, &api_key);
            let outcome = match deadline {
                Some(d) => match tokio::time::timeout_at(d, attempt).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        log::warn!("⏰ Deadline exceeded while waiting on {}", candidate.id);
                        abort = Some(ChainError::DeadlineExceeded);
                        state = state.next(ChainEvent::Aborted, candidates.len());
                        continue;
                    }
                },
                None => attempt.await,
            };

            match outcome {
                Ok(value) => {
                    log::debug!("Chain state: {:?}", state.next(ChainEvent::CandidateSucceeded, candidates.len()));
                    log::info!(
                        "🎯 {} succeeded with {} after {:?}",
                        request.capability(),
                        candidate.id,
                        started.elapsed()
                    );
                    return FallbackResult::Succeeded {
                        value,
                        candidate: candidate.clone(),
                    };
                }
                Err(failure) => {
                    log::warn!("❌ {}", failure);
                    last_failure = Some(failure);
                    state = state.next(ChainEvent::CandidateFailed, candidates.len());
                }
            }
        }

        let error = match (abort, last_failure) {
            (Some(abort), _) => abort,
            (None, Some(last)) => ChainError::Exhausted(last),
            (None, None) => ChainError::NoCandidates,
        };
        log::error!("❌ All models failed for {}: {}", request.capability(), error);
        FallbackResult::AllFailed(error)
    }

    /// Invoke, then extract and validate according to the capability. Any stage's
    /// failure is reported the same way.
    async fn attempt(
        &self,
        backend: &dyn InferenceBackend,
        candidate: &ModelCandidate,
        request: &CapabilityRequest,
        api_key: &str,
    ) -> Result<TaskOutput, CandidateFailure> {
        let raw = invoker::invoke(backend, candidate, request, api_key).await?;
        accept(request.capability(), &candidate.id, &raw)
    }
}

fn accept(capability: Capability, candidate: &str, raw: &RawOutput) -> Result<TaskOutput, CandidateFailure> {
    match capability {
        Capability::ImageToNutrition => {
            let payload = extractor::extract(raw)
                .map_err(|e| CandidateFailure::new(candidate, FailureStage::Extraction, e))?;
            let record = validator::validate_nutrition(&payload)
                .map_err(|e| CandidateFailure::new(candidate, FailureStage::Validation, e))?;
            Ok(TaskOutput::Nutrition(record))
        }
        Capability::TextToText | Capability::AudioToText => extractor::extract_text(raw)
            .map(TaskOutput::Text)
            .map_err(|e| CandidateFailure::new(candidate, FailureStage::Extraction, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::testing::{FixedCredentials, ScriptedBackend, Step, APPLE_JSON};
    use crate::inference::{InvocationError, RawPart};
    use serde_json::json;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn orchestrator(backend: Arc<ScriptedBackend>) -> FallbackOrchestrator {
        let credentials = Arc::new(FixedCredentials::new(&[(Provider::Gemini, "test-key")]));
        FallbackOrchestrator::new(CapabilityCatalog::new(5), credentials).with_backend(backend)
    }

    fn image_request() -> CapabilityRequest {
        CapabilityRequest::image_nutrition(vec![0xFFu8, 0xD8, 0xFF], "image/jpeg")
    }

    fn quota() -> Step {
        Step::Fail(InvocationError::Quota("quota exhausted".to_string()))
    }

    #[test]
    fn test_transition_table() {
        use ChainEvent::*;
        use ChainState::*;

        assert_eq!(NotStarted.next(Begin, 3), TryingCandidate(0));
        assert_eq!(NotStarted.next(Begin, 0), ExhaustedFailed);
        assert_eq!(TryingCandidate(0).next(CandidateFailed, 3), TryingCandidate(1));
        assert_eq!(TryingCandidate(2).next(CandidateFailed, 3), ExhaustedFailed);
        assert_eq!(TryingCandidate(1).next(CandidateSucceeded, 3), Succeeded(1));
        assert_eq!(TryingCandidate(1).next(Aborted, 3), ExhaustedFailed);
        assert_eq!(Succeeded(1).next(CandidateFailed, 3), Succeeded(1));
        assert_eq!(ExhaustedFailed.next(Begin, 3), ExhaustedFailed);
        assert_eq!(NotStarted.next(CandidateFailed, 3), NotStarted);
        assert!(Succeeded(0).is_terminal());
        assert!(!TryingCandidate(0).is_terminal());
    }

    #[tokio::test]
    async fn test_first_success_stops_the_chain() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            ("m1", quota()),
            ("m2", Step::Text("not json at all".to_string())),
            ("m3", Step::Text(APPLE_JSON.to_string())),
            ("m4", Step::Text(APPLE_JSON.to_string())),
        ]));

        let result = orchestrator(backend.clone())
            .run(&image_request(), Provider::Gemini, &RunOptions::default())
            .await;

        match result {
            FallbackResult::Succeeded { value: TaskOutput::Nutrition(record), candidate } => {
                assert_eq!(candidate.id, "m3");
                assert_eq!(candidate.rank, 2);
                assert_eq!(record.food_name, "Apple");
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(backend.calls(), vec!["m1", "m2", "m3"]);
    }

    #[tokio::test]
    async fn test_exhaustion_reports_last_cause() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            ("m1", quota()),
            ("m2", Step::Text(r#"{"food_name": "Rice", "calories": 200}"#.to_string())),
        ]));

        let result = orchestrator(backend.clone())
            .run(&image_request(), Provider::Gemini, &RunOptions::default())
            .await;

        match result {
            FallbackResult::AllFailed(ChainError::Exhausted(last)) => {
                assert_eq!(last.candidate, "m2");
                assert_eq!(last.stage, FailureStage::Validation);
                assert!(last.cause.contains("protein_g"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(backend.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_fenced_answer_validates_to_typed_record() {
        let fenced = format!("```json\n{}\n```", APPLE_JSON);
        let backend = Arc::new(ScriptedBackend::new(vec![("m1", Step::Text(fenced))]));

        let result = orchestrator(backend)
            .run(&image_request(), Provider::Gemini, &RunOptions::default())
            .await;

        let (output, _) = result.into_result().unwrap();
        match output {
            TaskOutput::Nutrition(record) => {
                assert_eq!(record.calories, 95);
                assert_eq!(record.protein_g, 0.5);
            }
            other => panic!("unexpected output: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_mixed_parts_answer_is_accepted() {
        let rice = json!({
            "food_name": "Rice", "calories": 200, "protein_g": 4,
            "carbs_g": 45, "fats_g": 0.5, "confidence": 0.8
        });
        let serde_json::Value::Object(rice) = rice else { unreachable!() };
        let raw = RawOutput::Parts(vec![
            RawPart::Text("here is the data: ".to_string()),
            RawPart::Structured(rice),
        ]);
        let backend = Arc::new(ScriptedBackend::new(vec![("m1", Step::Raw(raw))]));

        let result = orchestrator(backend)
            .run(&image_request(), Provider::Gemini, &RunOptions::default())
            .await;

        assert!(result.is_success());
    }

    #[tokio::test]
    async fn test_missing_credential_makes_no_calls() {
        let backend = Arc::new(ScriptedBackend::new(vec![("m1", Step::Text(APPLE_JSON.to_string()))]));
        let credentials = Arc::new(FixedCredentials::empty());
        let orchestrator = FallbackOrchestrator::new(CapabilityCatalog::default(), credentials.clone())
            .with_backend(backend.clone());

        let result = orchestrator
            .run(&image_request(), Provider::Gemini, &RunOptions::default())
            .await;

        assert_eq!(
            result,
            FallbackResult::AllFailed(ChainError::CredentialMissing { provider: Provider::Gemini })
        );
        assert_eq!(result_message(&result), "missing credential");
        assert!(backend.calls().is_empty());
        assert_eq!(credentials.reloads(), 1);
    }

    #[tokio::test]
    async fn test_empty_candidate_list() {
        let backend = Arc::new(ScriptedBackend::new(vec![]).with_discovery(Ok(vec![])));

        let result = orchestrator(backend.clone())
            .run(&image_request(), Provider::Gemini, &RunOptions::default())
            .await;

        assert_eq!(result, FallbackResult::AllFailed(ChainError::NoCandidates));
        assert_eq!(result_message(&result), "no candidates available");
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unregistered_provider_has_no_candidates() {
        let backend = Arc::new(ScriptedBackend::new(vec![]));
        let credentials = Arc::new(FixedCredentials::new(&[(Provider::Groq, "gsk")]));
        let orchestrator =
            FallbackOrchestrator::new(CapabilityCatalog::default(), credentials).with_backend(backend);

        let result = orchestrator
            .run(&CapabilityRequest::text("hi"), Provider::Groq, &RunOptions::default())
            .await;

        assert_eq!(result, FallbackResult::AllFailed(ChainError::NoCandidates));
    }

    #[tokio::test]
    async fn test_deadline_aborts_remaining_candidates() {
        let slow = Step::Slow(Duration::from_millis(500), RawOutput::Text(APPLE_JSON.to_string()));
        let backend = Arc::new(ScriptedBackend::new(vec![
            ("m1", slow),
            ("m2", Step::Text(APPLE_JSON.to_string())),
        ]));

        let result = orchestrator(backend.clone())
            .run(&image_request(), Provider::Gemini, &RunOptions::with_deadline(Duration::from_millis(50)))
            .await;

        assert_eq!(result, FallbackResult::AllFailed(ChainError::DeadlineExceeded));
        assert_eq!(result_message(&result), "deadline exceeded");
        assert_eq!(backend.calls(), vec!["m1"]);
    }

    #[tokio::test]
    async fn test_cancelled_run_does_not_advance() {
        let backend = Arc::new(ScriptedBackend::new(vec![("m1", Step::Text(APPLE_JSON.to_string()))]));
        let token = CancellationToken::new();
        token.cancel();
        let options = RunOptions {
            deadline: None,
            cancel: Some(token),
        };

        let result = orchestrator(backend.clone())
            .run(&image_request(), Provider::Gemini, &options)
            .await;

        assert_eq!(result, FallbackResult::AllFailed(ChainError::Cancelled));
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_deadline_bounds_slow_discovery() {
        let backend = Arc::new(
            ScriptedBackend::new(vec![("m1", Step::Text(APPLE_JSON.to_string()))])
                .with_discovery(Ok(vec![]))
                .with_discovery_delay(Duration::from_millis(1500)),
        );

        let started = std::time::Instant::now();
        let result = orchestrator(backend.clone())
            .run(&image_request(), Provider::Gemini, &RunOptions::with_deadline(Duration::from_millis(50)))
            .await;

        assert_eq!(result, FallbackResult::AllFailed(ChainError::DeadlineExceeded));
        assert!(started.elapsed() < Duration::from_millis(1000), "took {:?}", started.elapsed());
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_run_skips_discovery() {
        let backend = Arc::new(
            ScriptedBackend::new(vec![("m1", Step::Text(APPLE_JSON.to_string()))]).with_discovery(Ok(vec![])),
        );
        let token = CancellationToken::new();
        token.cancel();
        let options = RunOptions {
            deadline: None,
            cancel: Some(token),
        };

        let result = orchestrator(backend.clone())
            .run(&image_request(), Provider::Gemini, &options)
            .await;

        assert_eq!(result, FallbackResult::AllFailed(ChainError::Cancelled));
        assert_eq!(backend.discovery_calls(), 0);
    }

    #[tokio::test]
    async fn test_cancel_during_call_lets_it_finish_but_stops_the_chain() {
        let slow = Step::Slow(Duration::from_millis(200), RawOutput::Text("not json".to_string()));
        let backend = Arc::new(ScriptedBackend::new(vec![
            ("m1", slow),
            ("m2", Step::Text(APPLE_JSON.to_string())),
        ]));
        let token = CancellationToken::new();
        let options = RunOptions {
            deadline: None,
            cancel: Some(token.clone()),
        };

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            token.cancel();
        });

        let result = orchestrator(backend.clone())
            .run(&image_request(), Provider::Gemini, &options)
            .await;
        canceller.await.unwrap();

        assert_eq!(result, FallbackResult::AllFailed(ChainError::Cancelled));
        assert_eq!(backend.calls(), vec!["m1"]);
    }

    #[tokio::test]
    async fn test_text_capability_returns_trimmed_text() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            ("m1", Step::Text("   ".to_string())),
            ("m2", Step::Text("  Eat more greens.\n".to_string())),
        ]));

        let result = orchestrator(backend.clone())
            .run(&CapabilityRequest::text("tips?"), Provider::Gemini, &RunOptions::default())
            .await;

        let (output, candidate) = result.into_result().unwrap();
        assert_eq!(output, TaskOutput::Text("Eat more greens.".to_string()));
        assert_eq!(candidate.id, "m2");
    }

    fn result_message<T>(result: &FallbackResult<T>) -> String {
        match result {
            FallbackResult::AllFailed(err) => err.to_string(),
            FallbackResult::Succeeded { .. } => "ok".to_string(),
        }
    }
}
