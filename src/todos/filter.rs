//! Filter state and its canonical cache key.

use crate::cache::{EntityKind, QueryKey};

use super::types::{Priority, Status, Todo};

/// Filter criteria selected in a list view.
///
/// `search_text` narrows the fetched list locally and never reaches the
/// server, so it is not part of the key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterState {
  pub status: Vec<Status>,
  pub priority: Vec<Priority>,
  pub assigned_to: Vec<u64>,
  pub starred: Option<bool>,
  pub search_text: String,
}

impl FilterState {
  pub fn with_status(mut self, status: Status) -> Self {
    self.status.push(status);
    self
  }

  pub fn with_priority(mut self, priority: Priority) -> Self {
    self.priority.push(priority);
    self
  }

  pub fn with_assignee(mut self, user_id: u64) -> Self {
    self.assigned_to.push(user_id);
    self
  }

  pub fn starred_only(mut self) -> Self {
    self.starred = Some(true);
    self
  }

  pub fn with_search(mut self, text: impl Into<String>) -> Self {
    self.search_text = text.into();
    self
  }

  /// Canonical `(field, value)` pairs, used both for the cache key and the
  /// request's query string.
  ///
  /// Fields appear in a fixed order; list values are sorted, de-duplicated
  /// and comma-joined; empty lists are omitted; `starred` only appears when
  /// it is `true`.
  pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
    let mut pairs = Vec::new();

    if let Some(value) = join_sorted(self.status.iter().map(Status::as_str)) {
      pairs.push(("status", value));
    }
    if let Some(value) = join_sorted(self.priority.iter().map(Priority::as_str)) {
      pairs.push(("priority", value));
    }

    let mut assigned = self.assigned_to.clone();
    assigned.sort_unstable();
    assigned.dedup();
    if !assigned.is_empty() {
      let value = assigned
        .iter()
        .map(u64::to_string)
        .collect::<Vec<_>>()
        .join(",");
      pairs.push(("assignedTo", value));
    }

    if self.starred == Some(true) {
      pairs.push(("starred", "true".to_string()));
    }

    pairs
  }

  /// Cache key for the list this filter selects.
  pub fn key(&self) -> QueryKey {
    to_key(self)
  }

  /// Whether `todo` passes the local search. An empty search matches all.
  pub fn matches(&self, todo: &Todo) -> bool {
    let needle = self.search_text.trim().to_lowercase();
    if needle.is_empty() {
      return true;
    }
    todo.title.to_lowercase().contains(&needle)
      || todo
        .description
        .as_deref()
        .is_some_and(|d| d.to_lowercase().contains(&needle))
  }

  /// Keep only the todos that pass the local search.
  pub fn apply_search(&self, todos: Vec<Todo>) -> Vec<Todo> {
    todos.into_iter().filter(|t| self.matches(t)).collect()
  }
}

/// Map a filter state to its canonical `("todos", params)` key.
pub fn to_key(filter: &FilterState) -> QueryKey {
  let params = filter
    .query_pairs()
    .into_iter()
    .map(|(field, value)| format!("{}={}", field, value))
    .collect::<Vec<_>>()
    .join("&");
  QueryKey::new(EntityKind::Todos, params)
}

fn join_sorted<'a>(values: impl Iterator<Item = &'a str>) -> Option<String> {
  let mut values: Vec<&str> = values.collect();
  values.sort_unstable();
  values.dedup();
  if values.is_empty() {
    None
  } else {
    Some(values.join(","))
  }
}
