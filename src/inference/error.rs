use thiserror::Error;

use super::Provider;

/// Faults raised by a provider call. These never leave the invoker:
/// they are flattened into a [`CandidateFailure`].
#[derive(Debug, Error)]
pub enum InvocationError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("authentication rejected ({status})")]
    Authentication { status: u16 },

    #[error("quota exceeded: {0}")]
    Quota(String),

    #[error("refused by content-safety filter: {0}")]
    Refused(String),

    #[error("provider API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("malformed provider response: {0}")]
    MalformedResponse(String),

    #[error("unsupported request: {0}")]
    Unsupported(String),
}

impl InvocationError {
    /// Maps a non-success HTTP status onto the fault taxonomy.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => InvocationError::Authentication { status },
            429 => InvocationError::Quota(body),
            _ => InvocationError::Api { status, body },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExtractionError {
    #[error("empty response")]
    Empty,

    #[error("could not parse structured payload: {0}")]
    Malformed(String),

    #[error("payload is a JSON {0}, expected an object")]
    NotAnObject(&'static str),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("missing key in response: {0}")]
    MissingField(&'static str),

    #[error("type coercion failed for {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("model reported an error: {0}")]
    ModelReported(String),

    #[error("{field} out of range: {value}")]
    OutOfRange { field: &'static str, value: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    Invocation,
    Extraction,
    Validation,
}

impl std::fmt::Display for FailureStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureStage::Invocation => "invocation",
            FailureStage::Extraction => "extraction",
            FailureStage::Validation => "validation",
        };
        write!(f, "{}", s)
    }
}

/// Normalized cause of one candidate's failure.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{candidate} {stage} failure: {cause}")]
pub struct CandidateFailure {
    pub candidate: String,
    pub stage: FailureStage,
    pub cause: String,
}

impl CandidateFailure {
    pub fn new(candidate: &str, stage: FailureStage, cause: impl ToString) -> Self {
        Self {
            candidate: candidate.to_string(),
            stage,
            cause: cause.to_string(),
        }
    }
}

/// Terminal failure of a whole fallback run.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ChainError {
    #[error("missing credential")]
    CredentialMissing { provider: Provider },

    #[error("no candidates available")]
    NoCandidates,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("cancelled")]
    Cancelled,

    #[error("all candidates failed; last error: {0}")]
    Exhausted(CandidateFailure),
}

impl ChainError {
    /// The failure recorded for the last candidate attempted, if any ran.
    pub fn last_cause(&self) -> Option<&CandidateFailure> {
        match self {
            ChainError::Exhausted(last) => Some(last),
            _ => None,
        }
    }
}
