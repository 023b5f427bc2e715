//! Cache keys.

use std::fmt;

/// Kind of entity collection a key refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
  /// Filtered todo list
  Todos,
  /// Todos created by or assigned to the signed-in user
  MyTodos,
  /// A single todo
  Todo,
  /// User directory
  Users,
}

impl EntityKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      EntityKind::Todos => "todos",
      EntityKind::MyTodos => "my-todos",
      EntityKind::Todo => "todo",
      EntityKind::Users => "users",
    }
  }
}

impl fmt::Display for EntityKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Canonical identifier of a cached fetch result: `(kind, params)`.
///
/// `params` must already be canonical (stable field order, normalized
/// values); two keys are the same entry iff they are byte-identical.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey {
  kind: EntityKind,
  params: String,
}

impl QueryKey {
  pub fn new(kind: EntityKind, params: impl Into<String>) -> Self {
    Self {
      kind,
      params: params.into(),
    }
  }

  /// Key with no parameters. As a prefix it matches every key of `kind`.
  pub fn kind(kind: EntityKind) -> Self {
    Self::new(kind, "")
  }

  pub fn todo(id: u64) -> Self {
    Self::new(EntityKind::Todo, format!("id={}", id))
  }

  pub fn users() -> Self {
    Self::kind(EntityKind::Users)
  }

  pub fn my_todos() -> Self {
    Self::kind(EntityKind::MyTodos)
  }

  pub fn entity_kind(&self) -> EntityKind {
    self.kind
  }

  pub fn params(&self) -> &str {
    &self.params
  }

  pub fn as_tuple(&self) -> (&'static str, &str) {
    (self.kind.as_str(), &self.params)
  }

  /// Whether `self` falls under `prefix`: same kind, params extending the
  /// prefix params.
  pub fn starts_with(&self, prefix: &QueryKey) -> bool {
    self.kind == prefix.kind && self.params.starts_with(&prefix.params)
  }
}

impl fmt::Display for QueryKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.params.is_empty() {
      write!(f, "{}", self.kind)
    } else {
      write!(f, "{}?{}", self.kind, self.params)
    }
  }
}
