//! Serde types matching the todo API's request and response bodies.
//!
//! Every successful response is wrapped in `{ message, data, status }`; the
//! services unwrap `data` before anything reaches the cache.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use super::types::{Priority, Status, Todo, User};
use crate::error::ApiError;

/// Success envelope around every payload.
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
  #[serde(default)]
  pub message: String,
  pub data: T,
  #[serde(default)]
  pub status: Option<u16>,
}

/// Unwrap `data` from an enveloped response body.
pub fn unwrap_data<T: DeserializeOwned>(body: Value) -> Result<T, ApiError> {
  serde_json::from_value::<ApiResponse<T>>(body)
    .map(|envelope| envelope.data)
    .map_err(ApiError::decode)
}

// ============================================================================
// Responses
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TodoList {
  pub todos: Vec<Todo>,
  /// Filters as echoed back by the server
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub filters: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct TodoEnvelope {
  pub todo: Todo,
}

#[derive(Debug, Deserialize)]
pub struct UsersEnvelope {
  pub users: Vec<User>,
}

/// Response to `login` and `register`.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthPayload {
  pub user: User,
  pub token: String,
}

// ============================================================================
// Requests
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSubtask {
  pub title: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub completed: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubtaskChange {
  /// Absent for subtasks added by this update
  #[serde(skip_serializing_if = "Option::is_none")]
  pub id: Option<u64>,
  pub title: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub completed: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTodoRequest {
  pub title: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  pub due_date: DateTime<Utc>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub reminder_date: Option<DateTime<Utc>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub status: Option<Status>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub priority: Option<Priority>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub starred: Option<bool>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub assigned_to: Option<Vec<u64>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub subtasks: Option<Vec<NewSubtask>>,
}

impl CreateTodoRequest {
  pub fn new(title: impl Into<String>, due_date: DateTime<Utc>) -> Self {
    Self {
      title: title.into(),
      description: None,
      due_date,
      reminder_date: None,
      status: None,
      priority: None,
      starred: None,
      assigned_to: None,
      subtasks: None,
    }
  }

  pub fn validate(&self) -> Result<(), ApiError> {
    if self.title.trim().is_empty() {
      return Err(ApiError::validation("title", "Title is required"));
    }
    Ok(())
  }
}

/// Partial update; only fields that are `Some` are sent.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTodoRequest {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub title: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub due_date: Option<DateTime<Utc>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub reminder_date: Option<DateTime<Utc>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub status: Option<Status>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub priority: Option<Priority>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub starred: Option<bool>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub assigned_to: Option<Vec<u64>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub subtasks: Option<Vec<SubtaskChange>>,
}

impl UpdateTodoRequest {
  pub fn status(status: Status) -> Self {
    Self {
      status: Some(status),
      ..Default::default()
    }
  }

  pub fn starred(starred: bool) -> Self {
    Self {
      starred: Some(starred),
      ..Default::default()
    }
  }

  pub fn validate(&self) -> Result<(), ApiError> {
    if self.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
      return Err(ApiError::validation("title", "Title cannot be empty"));
    }
    Ok(())
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
  pub email: String,
  pub password: String,
}

impl LoginRequest {
  pub fn validate(&self) -> Result<(), ApiError> {
    if self.email.trim().is_empty() {
      return Err(ApiError::validation("email", "Email is required"));
    }
    if self.password.is_empty() {
      return Err(ApiError::validation("password", "Password is required"));
    }
    Ok(())
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest {
  pub username: String,
  pub email: String,
  pub password: String,
}

/// Shortest password the registration form accepts
pub const MIN_PASSWORD_LEN: usize = 6;

impl RegisterRequest {
  pub fn validate(&self) -> Result<(), ApiError> {
    if self.username.trim().is_empty() {
      return Err(ApiError::validation("username", "Name is required"));
    }
    if self.email.trim().is_empty() {
      return Err(ApiError::validation("email", "Email is required"));
    }
    if !looks_like_email(self.email.trim()) {
      return Err(ApiError::validation("email", "Email is invalid"));
    }
    if self.password.chars().count() < MIN_PASSWORD_LEN {
      return Err(ApiError::validation(
        "password",
        format!("Password must be at least {} characters", MIN_PASSWORD_LEN),
      ));
    }
    Ok(())
  }
}

/// `local@domain.tld` with no whitespace.
fn looks_like_email(email: &str) -> bool {
  if email.chars().any(char::is_whitespace) {
    return false;
  }
  match email.rsplit_once('@') {
    Some((local, domain)) => {
      !local.is_empty()
        && domain
          .rsplit_once('.')
          .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty())
    }
    None => false,
  }
}
