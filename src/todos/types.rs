use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Workflow status of a todo
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
  Pending,
  InProgress,
  Completed,
}

impl Status {
  pub const ALL: [Status; 3] = [Status::Pending, Status::InProgress, Status::Completed];

  /// Wire spelling, as used in bodies and query strings
  pub fn as_str(&self) -> &'static str {
    match self {
      Status::Pending => "PENDING",
      Status::InProgress => "IN_PROGRESS",
      Status::Completed => "COMPLETED",
    }
  }
}

impl fmt::Display for Status {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Status {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let normalized = s.trim().to_ascii_uppercase().replace(['-', ' '], "_");
    Status::ALL
      .into_iter()
      .find(|status| status.as_str() == normalized)
      .ok_or_else(|| format!("unknown status '{}' (expected pending, in-progress or completed)", s))
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
  High,
  Medium,
  Low,
}

impl Priority {
  pub const ALL: [Priority; 3] = [Priority::High, Priority::Medium, Priority::Low];

  pub fn as_str(&self) -> &'static str {
    match self {
      Priority::High => "HIGH",
      Priority::Medium => "MEDIUM",
      Priority::Low => "LOW",
    }
  }
}

impl fmt::Display for Priority {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Priority {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let normalized = s.trim().to_ascii_uppercase();
    Priority::ALL
      .into_iter()
      .find(|priority| priority.as_str() == normalized)
      .ok_or_else(|| format!("unknown priority '{}' (expected high, medium or low)", s))
  }
}

/// A user as returned by the directory and embedded in todos
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
  pub id: u64,
  pub username: String,
  pub email: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub created_at: Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subtask {
  pub id: u64,
  pub title: String,
  #[serde(default)]
  pub completed: bool,
  pub todo_id: u64,
}

/// Full todo as owned by the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Todo {
  pub id: u64,
  pub title: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  pub due_date: DateTime<Utc>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub reminder_date: Option<DateTime<Utc>>,
  pub status: Status,
  pub priority: Priority,
  #[serde(default)]
  pub starred: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub creator_id: Option<u64>,
  #[serde(default)]
  pub assigned_to: Vec<User>,
  #[serde(default)]
  pub subtasks: Vec<Subtask>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl Todo {
  pub fn assigned_user_ids(&self) -> Vec<u64> {
    self.assigned_to.iter().map(|u| u.id).collect()
  }

  /// Completed subtasks out of the total
  pub fn subtask_progress(&self) -> (usize, usize) {
    let done = self.subtasks.iter().filter(|s| s.completed).count();
    (done, self.subtasks.len())
  }
}
