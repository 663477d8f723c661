//! Unified error type for the workflow engine.
//!
//! Validation, permission and transition errors are caller mistakes and are never
//! retried. Transport and storage errors are infrastructure failures; they are
//! surfaced with enough context for a manual retry, the engine itself never retries.

use crate::services::TransportError;
use sea_orm::DbErr;
use thiserror::Error;

/// Every failure the engine reports
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or missing input (blank invoice number, invalid email, ...)
    #[error("Validation error: {message}")]
    Validation {
        /// What was wrong
        message: String,
    },

    /// A role-gated action was attempted by an ineligible actor
    #[error("Permission denied: {message}")]
    Permission {
        /// Who tried what
        message: String,
    },

    /// A state machine guard rejected the transition
    #[error("Cannot {action} {entity} {id} while it is {current}")]
    InvalidTransition {
        /// Kind of record
        entity: &'static str,
        /// Record id
        id: i64,
        /// Attempted transition
        action: &'static str,
        /// State the record was found in
        current: String,
    },

    /// The record does not exist
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of record
        entity: &'static str,
        /// Missing id
        id: i64,
    },

    /// Mail delivery failed or timed out
    #[error("Mail transport error: {message}")]
    Transport {
        /// Transport failure description
        message: String,
    },

    /// The database failed or is unreachable
    #[error("Storage error: {0}")]
    Storage(#[from] DbErr),

    /// Settings could not be loaded or are invalid
    #[error("Configuration error: {message}")]
    Config {
        /// What was wrong
        message: String,
    },

    /// A message template failed to render
    #[error("Template error: {0}")]
    Template(#[from] tera::Error),
}

impl Error {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub(crate) fn permission(message: impl Into<String>) -> Self {
        Self::Permission {
            message: message.into(),
        }
    }

    /// Infrastructure failures the caller may retry by hand.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Storage(_))
    }
}

impl From<TransportError> for Error {
    fn from(err: TransportError) -> Self {
        Self::Transport {
            message: err.to_string(),
        }
    }
}

/// Convenience `Result` type
pub type Result<T> = std::result::Result<T, Error>;
