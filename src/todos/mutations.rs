//! Writes against the todo API.
//!
//! Each operation issues exactly one call through the transport and, once
//! that call has settled, invalidates every cached list. Invalidation runs
//! whether the write succeeded or not, since a failed write may still have
//! been partially applied on the server.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use super::api_types::{CreateTodoRequest, UpdateTodoRequest};
use super::service::TodoService;
use super::types::{Status, Todo};
use crate::cache::{EntityKind, QueryCache, QueryKey};
use crate::error::ApiError;

/// Kind of write, for [`MutationCoordinator::pending`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
  Create,
  Update,
  Remove,
}

impl MutationKind {
  fn index(self) -> usize {
    match self {
      MutationKind::Create => 0,
      MutationKind::Update => 1,
      MutationKind::Remove => 2,
    }
  }
}

#[derive(Default)]
struct PendingCounts([AtomicUsize; 3]);

/// Decrements its counter when the mutation settles or is dropped.
struct PendingGuard {
  counts: Arc<PendingCounts>,
  kind: MutationKind,
}

impl PendingGuard {
  fn new(counts: &Arc<PendingCounts>, kind: MutationKind) -> Self {
    counts.0[kind.index()].fetch_add(1, Ordering::SeqCst);
    Self {
      counts: counts.clone(),
      kind,
    }
  }
}

impl Drop for PendingGuard {
  fn drop(&mut self) {
    self.counts.0[self.kind.index()].fetch_sub(1, Ordering::SeqCst);
  }
}

#[derive(Clone)]
pub struct MutationCoordinator {
  service: TodoService,
  cache: QueryCache,
  pending: Arc<PendingCounts>,
}

impl MutationCoordinator {
  pub fn new(service: TodoService, cache: QueryCache) -> Self {
    Self {
      service,
      cache,
      pending: Arc::new(PendingCounts::default()),
    }
  }

  /// Number of mutations of `kind` currently in flight.
  pub fn pending(&self, kind: MutationKind) -> usize {
    self.pending.0[kind.index()].load(Ordering::SeqCst)
  }

  pub async fn create(&self, request: &CreateTodoRequest) -> Result<Todo, ApiError> {
    request.validate()?;

    let result = {
      let _pending = PendingGuard::new(&self.pending, MutationKind::Create);
      self.service.create_todo(request).await
    };
    self.settled(MutationKind::Create, None, result.is_ok());
    result
  }

  pub async fn update(&self, id: u64, patch: &UpdateTodoRequest) -> Result<Todo, ApiError> {
    patch.validate()?;

    let result = {
      let _pending = PendingGuard::new(&self.pending, MutationKind::Update);
      self.service.update_todo(id, patch).await
    };
    self.settled(MutationKind::Update, Some(id), result.is_ok());
    result
  }

  pub async fn remove(&self, id: u64) -> Result<(), ApiError> {
    let result = {
      let _pending = PendingGuard::new(&self.pending, MutationKind::Remove);
      self.service.delete_todo(id).await
    };
    self.settled(MutationKind::Remove, Some(id), result.is_ok());
    result
  }

  /// Flip the starred flag of `todo`.
  pub async fn toggle_starred(&self, todo: &Todo) -> Result<Todo, ApiError> {
    self.update(todo.id, &UpdateTodoRequest::starred(!todo.starred)).await
  }

  pub async fn update_status(&self, id: u64, status: Status) -> Result<Todo, ApiError> {
    self.update(id, &UpdateTodoRequest::status(status)).await
  }

  fn settled(&self, kind: MutationKind, id: Option<u64>, succeeded: bool) {
    let lists = self.cache.invalidate(&QueryKey::kind(EntityKind::Todos))
      + self.cache.invalidate(&QueryKey::kind(EntityKind::MyTodos));
    if let Some(id) = id {
      self.cache.invalidate_key(&QueryKey::todo(id));
    }

    if succeeded {
      info!(?kind, ?id, "Mutation succeeded");
    } else {
      info!(?kind, ?id, "Mutation failed");
    }
    debug!(lists, "Invalidated cached lists");
  }
}
