//! Todo reads routed through the query cache.

use super::api_types::TodoList;
use super::filter::FilterState;
use super::service::TodoService;
use super::types::{Todo, User};
use crate::cache::{CacheResult, QueryCache, QueryKey};
use crate::error::ApiError;
use crate::query::Query;

/// Read side of the todo API with transparent caching.
///
/// Exposes the same reads as [`TodoService`], but answers from the
/// [`QueryCache`] when it can and shares in-flight requests.
#[derive(Clone)]
pub struct CachedTodoClient {
  service: TodoService,
  cache: QueryCache,
}

impl CachedTodoClient {
  pub fn new(service: TodoService, cache: QueryCache) -> Self {
    Self { service, cache }
  }

  pub fn cache(&self) -> &QueryCache {
    &self.cache
  }

  /// Todos matching `filter`, with the search text applied locally.
  pub async fn todos(&self, filter: &FilterState) -> Result<CacheResult<Vec<Todo>>, ApiError> {
    let result = self
      .cache
      .fetch_result(&filter.key(), || {
        let service = self.service.clone();
        let filter = filter.clone();
        async move { service.list_todos(&filter).await }
      })
      .await?;

    Ok(result.map(|list: TodoList| filter.apply_search(list.todos)))
  }

  /// Bypass freshness and reload the list for `filter`.
  pub async fn refetch_todos(&self, filter: &FilterState) -> Result<Vec<Todo>, ApiError> {
    let list: TodoList = self
      .cache
      .refetch(&filter.key(), || {
        let service = self.service.clone();
        let filter = filter.clone();
        async move { service.list_todos(&filter).await }
      })
      .await?;

    Ok(filter.apply_search(list.todos))
  }

  pub async fn my_todos(&self) -> Result<Vec<Todo>, ApiError> {
    let list: TodoList = self
      .cache
      .fetch(&QueryKey::my_todos(), || {
        let service = self.service.clone();
        async move { service.my_todos().await }
      })
      .await?;

    Ok(list.todos)
  }

  pub async fn todo(&self, id: u64) -> Result<Todo, ApiError> {
    self
      .cache
      .fetch(&QueryKey::todo(id), || {
        let service = self.service.clone();
        async move { service.get_todo(id).await }
      })
      .await
  }

  pub async fn users(&self) -> Result<Vec<User>, ApiError> {
    self
      .cache
      .fetch(&QueryKey::users(), || {
        let service = self.service.clone();
        async move { service.list_users().await }
      })
      .await
  }

  /// Poll-driven view handle for the list selected by `filter`.
  ///
  /// The handle holds the unsearched list; apply
  /// [`FilterState::apply_search`] when rendering.
  pub fn todos_query(&self, filter: &FilterState) -> Query<TodoList> {
    let service = self.service.clone();
    let loader_filter = filter.clone();
    Query::new(self.cache.clone(), filter.key(), move || {
      let service = service.clone();
      let filter = loader_filter.clone();
      async move { service.list_todos(&filter).await }
    })
  }

  pub fn users_query(&self) -> Query<Vec<User>> {
    let service = self.service.clone();
    Query::new(self.cache.clone(), QueryKey::users(), move || {
      let service = service.clone();
      async move { service.list_users().await }
    })
  }
}
