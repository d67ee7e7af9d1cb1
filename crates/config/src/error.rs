//! Error types for profile parsing and validation.

use std::result::Result as StdResult;

use thiserror::Error;

/// Convenient result type for the config crate.
pub type Result<T> = StdResult<T, Error>;

/// Errors produced while parsing or validating a profile.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// The JSON payload could not be parsed at all.
    #[error("parse error: {message}")]
    Parse {
        /// Human-readable parser message.
        message: String,
    },

    /// A field failed validation; the original live state is untouched.
    #[error("{field}: {message}")]
    Validation {
        /// Dotted path to the offending field, e.g. `profile.layers.Base.81.color`.
        field: String,
        /// Human-readable error message.
        message: String,
    },
}

impl Error {
    /// Build a validation error for `field`.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }
}
