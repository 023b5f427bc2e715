//! Error types surfaced by the synchronization layer.
//!
//! Every failure a view can observe is an [`ApiError`]. The variants follow
//! the failure taxonomy callers branch on: no response at all, a 4xx, a 5xx,
//! a local validation failure that never reached the network, and a 2xx whose
//! body could not be read.

use std::time::Duration;

use thiserror::Error;

/// Coarse classification of an [`ApiError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  /// No response: timeout or connection failure.
  Network,
  /// 4xx response.
  Client,
  /// 5xx response.
  Server,
  /// Local form-level failure.
  Validation,
  /// Successful response with an unreadable body.
  Decode,
  /// Local session storage could not be written.
  Storage,
}

/// Errors returned by the transport, the services, the cache and the
/// mutation coordinator.
///
/// `Clone` so one in-flight result can be handed to every caller that joined
/// the same request.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
  /// The request did not complete within the configured timeout.
  #[error("request timed out after {}s", .0.as_secs())]
  Timeout(Duration),

  /// The request never produced a response.
  #[error("network error: {0}")]
  Network(String),

  /// The server rejected the request (4xx).
  #[error("{message}")]
  Client {
    status: u16,
    message: String,
    code: Option<String>,
  },

  /// The server failed to process the request (5xx).
  #[error("{message}")]
  Server {
    status: u16,
    message: String,
    code: Option<String>,
  },

  /// Input rejected before any request was issued.
  #[error("invalid {field}: {message}")]
  Validation {
    field: &'static str,
    message: String,
  },

  /// A successful response carried a body we could not decode.
  #[error("failed to decode response: {0}")]
  Decode(String),

  /// The session could not be persisted locally.
  #[error("session storage error: {0}")]
  Storage(String),
}

impl ApiError {
  /// Build the error for a non-2xx response.
  pub fn from_status(status: u16, message: String, code: Option<String>) -> Self {
    if status >= 500 {
      ApiError::Server {
        status,
        message,
        code,
      }
    } else {
      ApiError::Client {
        status,
        message,
        code,
      }
    }
  }

  pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
    ApiError::Validation {
      field,
      message: message.into(),
    }
  }

  pub fn decode(err: impl std::fmt::Display) -> Self {
    ApiError::Decode(err.to_string())
  }

  pub fn kind(&self) -> ErrorKind {
    match self {
      ApiError::Timeout(_) | ApiError::Network(_) => ErrorKind::Network,
      ApiError::Client { .. } => ErrorKind::Client,
      ApiError::Server { .. } => ErrorKind::Server,
      ApiError::Validation { .. } => ErrorKind::Validation,
      ApiError::Decode(_) => ErrorKind::Decode,
      ApiError::Storage(_) => ErrorKind::Storage,
    }
  }

  /// HTTP status, when the server answered.
  pub fn status(&self) -> Option<u16> {
    match self {
      ApiError::Client { status, .. } | ApiError::Server { status, .. } => Some(*status),
      _ => None,
    }
  }

  /// Machine-readable error code from the API's error envelope.
  pub fn code(&self) -> Option<&str> {
    match self {
      ApiError::Client { code, .. } | ApiError::Server { code, .. } => code.as_deref(),
      _ => None,
    }
  }

  pub fn message(&self) -> String {
    match self {
      ApiError::Client { message, .. }
      | ApiError::Server { message, .. }
      | ApiError::Validation { message, .. } => message.clone(),
      other => other.to_string(),
    }
  }

  pub fn is_unauthorized(&self) -> bool {
    self.status() == Some(401)
  }

  /// Short title suitable for a toast or status line.
  pub fn headline(&self) -> &'static str {
    match self {
      ApiError::Timeout(_) => "Request timed out",
      ApiError::Network(_) => "Network error",
      ApiError::Client { status: 401, .. } => "Not signed in",
      ApiError::Client { status: 403, .. } => "Not allowed",
      ApiError::Client { status: 404, .. } => "Not found",
      ApiError::Client { .. } => "Request rejected",
      ApiError::Server { .. } => "Server error",
      ApiError::Validation { .. } => "Invalid input",
      ApiError::Decode(_) => "Unexpected response",
      ApiError::Storage(_) => "Could not save session",
    }
  }

  /// Optional longer text shown under the headline.
  pub fn description(&self) -> Option<String> {
    match self {
      ApiError::Timeout(_) | ApiError::Network(_) | ApiError::Decode(_) | ApiError::Storage(_) => {
        Some(self.to_string())
      }
      ApiError::Client { message, .. }
      | ApiError::Server { message, .. }
      | ApiError::Validation { message, .. } => {
        if message.is_empty() {
          None
        } else {
          Some(message.clone())
        }
      }
    }
  }
}
