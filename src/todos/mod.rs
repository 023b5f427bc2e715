//! Todo domain: types, API services, the filter-to-key mapper, cached reads
//! and the mutation coordinator.

pub mod api_types;
mod auth;
mod cached_client;
mod filter;
mod mutations;
mod service;
pub mod types;

pub use api_types::{CreateTodoRequest, TodoList, UpdateTodoRequest};
pub use auth::AuthClient;
pub use cached_client::CachedTodoClient;
pub use filter::{to_key, FilterState};
pub use mutations::{MutationCoordinator, MutationKind};
pub use service::{AuthService, TodoService};
pub use types::{Priority, Status, Subtask, Todo, User};
