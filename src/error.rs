//! Error taxonomy for enrollment and visit synchronization.
//!
//! Validation and connectivity errors are local and never reach the network.
//! Remote rejections, transport failures and format errors describe what
//! happened to a request that was actually sent.

use reqwest::StatusCode;
use std::fmt;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Validation(ValidationErrors),

    #[error("No Internet Connection: please check your internet connection and try again.")]
    Connectivity,

    #[error("{operation} failed with status {status}: {body}")]
    RemoteRejection {
        operation: String,
        status: StatusCode,
        body: String,
    },

    #[error("{operation} failed: {message}")]
    Transport { operation: String, message: String },

    #[error("unexpected response format: {0}")]
    Format(String),
}

impl Error {
    pub(crate) fn transport(operation: &str, err: reqwest::Error) -> Self {
        let message = if err.is_timeout() {
            format!("request timed out ({err})")
        } else {
            err.to_string()
        };

        Error::Transport {
            operation: operation.to_string(),
            message,
        }
    }
}

/// A single missing or invalid input field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: &'static str,
}

/// All field errors found by one validation pass, in input order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValidationErrors(Vec<FieldError>);

impl ValidationErrors {
    pub fn push(&mut self, field: &'static str, message: &'static str) {
        self.0.push(FieldError { field, message });
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn errors(&self) -> &[FieldError] {
        &self.0
    }

    pub fn fields(&self) -> Vec<&'static str> {
        self.0.iter().map(|e| e.field).collect()
    }

    /// Ok when nothing was collected, otherwise the collected errors.
    pub fn into_result(self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation(self))
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<&str> = self.0.iter().map(|e| e.message).collect();
        write!(f, "{}", messages.join(" "))
    }
}
