//! Error types shared by handlers across the worker runtime.

use std::fmt;
use thiserror::Error;

/// Ergonomic classification a handler may attach to a [`ProcessingError::Custom`].
///
/// The job processor's own retry/DLQ decision is driven by the envelope's
/// `retry`/`dead` fields and the broker's delivery count (see
/// `JobEnvelope` and the job processor's backoff formula), not by this
/// category. `ErrorCategory` exists so a handler can still tag an error for
/// its own tracing fields, or so a stream handler can use it however it
/// likes when deciding whether to ack, nak, or term a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Temporary failure (network timeout, service unavailable).
    Transient,
    /// Permanent failure (invalid data, missing required fields).
    Permanent,
    /// Rate limited by an upstream service.
    RateLimited,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Transient => write!(f, "transient"),
            ErrorCategory::Permanent => write!(f, "permanent"),
            ErrorCategory::RateLimited => write!(f, "rate_limited"),
        }
    }
}

/// Error returned by a [`crate::registry::JobHandler`] or
/// [`crate::registry::StreamHandler`].
///
/// A job handler returning `Err` here always means "this invocation
/// failed"; the job processor decides retry vs. dead-letter vs. term from
/// the envelope, not from the variant below. Stream handlers may use
/// `category()` to pick their own ack/nak/term response.
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("transient error: {message}")]
    Transient {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("permanent error: {message}")]
    Permanent {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after_ms: Option<u64>,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{message}")]
    Custom {
        category: ErrorCategory,
        message: String,
    },
}

impl ProcessingError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
            source: None,
        }
    }

    pub fn transient_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transient {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent {
            message: message.into(),
            source: None,
        }
    }

    pub fn permanent_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Permanent {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::RateLimited {
            message: message.into(),
            retry_after_ms: None,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            ProcessingError::Transient { .. } => ErrorCategory::Transient,
            ProcessingError::Permanent { .. } => ErrorCategory::Permanent,
            ProcessingError::RateLimited { .. } => ErrorCategory::RateLimited,
            ProcessingError::Serialization(_) => ErrorCategory::Permanent,
            ProcessingError::Config(_) => ErrorCategory::Permanent,
            ProcessingError::Custom { category, .. } => *category,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_matches_constructor() {
        assert_eq!(
            ProcessingError::transient("x").category(),
            ErrorCategory::Transient
        );
        assert_eq!(
            ProcessingError::permanent("x").category(),
            ErrorCategory::Permanent
        );
        assert_eq!(
            ProcessingError::rate_limited("x").category(),
            ErrorCategory::RateLimited
        );
    }

    #[test]
    fn display_formats_category() {
        assert_eq!(ErrorCategory::Transient.to_string(), "transient");
        assert_eq!(ErrorCategory::RateLimited.to_string(), "rate_limited");
    }
}
