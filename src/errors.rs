//! Closed error taxonomy for the ingestion & accounting engine.
//!
//! Every fallible boundary in this crate returns (a variant of) [`IngestError`].
//! The set is intentionally closed — see spec §7 — so that callers can exhaustively
//! match on retryability without guessing.

use thiserror::Error;

/// The closed error taxonomy. Adding a new network-facing failure mode means
/// adding a variant here, not reaching for a generic `Other(String)`.
#[derive(Debug, Clone, Error)]
pub enum IngestError {
    #[error("validation failed for {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("authentication failed for provider {provider}: {reason}")]
    Authentication { provider: String, reason: String },

    #[error("rate limited by {provider}: retry after {retry_after_ms:?}ms")]
    RateLimited {
        provider: String,
        retry_after_ms: Option<u64>,
    },

    #[error("provider {provider} timed out after {timeout_ms}ms")]
    ProviderTimeout { provider: String, timeout_ms: u64 },

    #[error("provider {provider} returned server error {status}: {message}")]
    ProviderServerError {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("provider {provider} returned client error {status}: {message}")]
    ProviderClientError {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("not found: {what}")]
    NotFound { what: String },

    #[error("cancelled")]
    Cancelled,

    #[error("precision loss computing {operation}: {detail}")]
    PrecisionLoss { operation: String, detail: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl IngestError {
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        IngestError::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        IngestError::Internal(message.into())
    }

    /// Whether the *single provider call* that produced this error should be retried
    /// with backoff before failing over (spec §7 propagation policy).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            IngestError::RateLimited { .. }
                | IngestError::ProviderTimeout { .. }
                | IngestError::ProviderServerError { .. }
        )
    }

    /// Whether this error should quarantine the provider for the remainder of the
    /// session (fatal), rather than merely failing over this one call.
    pub fn is_fatal_for_provider(&self) -> bool {
        matches!(self, IngestError::Authentication { .. })
    }

    /// Non-retryable client errors fail over to the next provider immediately,
    /// without burning retry budget on the same provider.
    pub fn is_client_error(&self) -> bool {
        matches!(self, IngestError::ProviderClientError { .. })
    }
}

impl From<rusqlite::Error> for IngestError {
    fn from(err: rusqlite::Error) -> Self {
        IngestError::Internal(format!("sqlite: {err}"))
    }
}

impl From<serde_json::Error> for IngestError {
    fn from(err: serde_json::Error) -> Self {
        IngestError::Validation {
            field: "json".to_string(),
            reason: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for IngestError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            IngestError::ProviderTimeout {
                provider: "unknown".to_string(),
                timeout_ms: 0,
            }
        } else if let Some(status) = err.status() {
            let status_code = status.as_u16();
            if status_code >= 500 {
                IngestError::ProviderServerError {
                    provider: "unknown".to_string(),
                    status: status_code,
                    message: err.to_string(),
                }
            } else {
                IngestError::ProviderClientError {
                    provider: "unknown".to_string(),
                    status: status_code,
                    message: err.to_string(),
                }
            }
        } else {
            IngestError::Internal(format!("http: {err}"))
        }
    }
}

pub type IngestResult<T> = Result<T, IngestError>;
