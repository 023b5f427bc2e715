//! Typed endpoints of the todo API.

use serde_json::Value;

use super::api_types::{
  unwrap_data, AuthPayload, CreateTodoRequest, LoginRequest, RegisterRequest, TodoEnvelope,
  TodoList, UpdateTodoRequest, UsersEnvelope,
};
use super::filter::FilterState;
use super::types::{Todo, User};
use crate::error::ApiError;
use crate::transport::TransportClient;

fn to_body(value: &impl serde::Serialize) -> Result<Value, ApiError> {
  serde_json::to_value(value)
    .map_err(|e| ApiError::validation("body", format!("cannot encode request: {}", e)))
}

/// Todo and user endpoints
#[derive(Clone)]
pub struct TodoService {
  transport: TransportClient,
}

impl TodoService {
  pub fn new(transport: TransportClient) -> Self {
    Self { transport }
  }

  /// List todos matching the server-side part of `filters`
  pub async fn list_todos(&self, filters: &FilterState) -> Result<TodoList, ApiError> {
    let body = self
      .transport
      .request_with_query(reqwest::Method::GET, "todos", &filters.query_pairs(), None)
      .await?;
    unwrap_data(body)
  }

  /// Todos created by or assigned to the signed-in user
  pub async fn my_todos(&self) -> Result<TodoList, ApiError> {
    unwrap_data(self.transport.get("my-todos").await?)
  }

  pub async fn get_todo(&self, id: u64) -> Result<Todo, ApiError> {
    let envelope: TodoEnvelope = unwrap_data(self.transport.get(&format!("todos/{}", id)).await?)?;
    Ok(envelope.todo)
  }

  pub async fn create_todo(&self, request: &CreateTodoRequest) -> Result<Todo, ApiError> {
    let body = to_body(request)?;
    let envelope: TodoEnvelope = unwrap_data(self.transport.post("todos", Some(&body)).await?)?;
    Ok(envelope.todo)
  }

  pub async fn update_todo(&self, id: u64, patch: &UpdateTodoRequest) -> Result<Todo, ApiError> {
    let body = to_body(patch)?;
    let envelope: TodoEnvelope =
      unwrap_data(self.transport.put(&format!("todos/{}", id), &body).await?)?;
    Ok(envelope.todo)
  }

  pub async fn delete_todo(&self, id: u64) -> Result<(), ApiError> {
    // The body only carries a confirmation message
    self.transport.delete(&format!("todos/{}", id)).await?;
    Ok(())
  }

  pub async fn list_users(&self) -> Result<Vec<User>, ApiError> {
    let envelope: UsersEnvelope = unwrap_data(self.transport.get("users").await?)?;
    Ok(envelope.users)
  }
}

/// Authentication endpoints
#[derive(Clone)]
pub struct AuthService {
  transport: TransportClient,
}

impl AuthService {
  pub fn new(transport: TransportClient) -> Self {
    Self { transport }
  }

  pub async fn login(&self, request: &LoginRequest) -> Result<AuthPayload, ApiError> {
    let body = to_body(request)?;
    unwrap_data(self.transport.post("login", Some(&body)).await?)
  }

  pub async fn register(&self, request: &RegisterRequest) -> Result<AuthPayload, ApiError> {
    let body = to_body(request)?;
    unwrap_data(self.transport.post("register", Some(&body)).await?)
  }

  pub async fn logout(&self) -> Result<(), ApiError> {
    self.transport.post("logout", None).await?;
    Ok(())
  }
}
