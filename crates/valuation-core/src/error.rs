use std::time::Duration;
use thiserror::Error;

/// HTTP status codes the gateway treats as transient.
pub const RETRYABLE_STATUS_CODES: &[u16] = &[429, 500, 502, 503, 504];

pub fn is_retryable_status(code: u16) -> bool {
    RETRYABLE_STATUS_CODES.contains(&code)
}

/// Failure of a single gateway-mediated provider request.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("request timed out")]
    Timeout,

    #[error("HTTP {code}")]
    HttpStatus { code: u16 },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("circuit open; retry after {:.1}s", .retry_after.as_secs_f64())]
    CircuitOpen { retry_after: Duration },

    #[error("missing credentials: {0}")]
    MissingCredentials(String),

    #[error("cancelled")]
    Cancelled,
}

/// Coarse failure taxonomy used for retry and reporting decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Timeout, transport failure, 429 or 5xx. Retried, then counted toward the breaker.
    Transient,
    /// Any other HTTP error, malformed payload, missing key. Never retried.
    Terminal,
    /// Fast-fail while the provider's breaker is open.
    CircuitOpen,
    Cancelled,
}

impl ProviderError {
    pub fn class(&self) -> FailureClass {
        match self {
            ProviderError::Timeout | ProviderError::Transport(_) => FailureClass::Transient,
            ProviderError::HttpStatus { code } if is_retryable_status(*code) => FailureClass::Transient,
            ProviderError::HttpStatus { .. }
            | ProviderError::Malformed(_)
            | ProviderError::MissingCredentials(_) => FailureClass::Terminal,
            ProviderError::CircuitOpen { .. } => FailureClass::CircuitOpen,
            ProviderError::Cancelled => FailureClass::Cancelled,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class() == FailureClass::Transient
    }
}

#[derive(Error, Debug)]
pub enum ValuationError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Every tier (live adapters, caches, bootstrap) failed for one dataset.
    /// Carries the warnings accumulated on the way down so callers can keep them.
    #[error("acquisition exhausted for {dataset} ({subject})")]
    AcquisitionExhausted {
        dataset: String,
        subject: String,
        warnings: Vec<String>,
    },

    #[error("Monte Carlo produced no valid samples: {0}")]
    InvalidSampleSet(String),

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
