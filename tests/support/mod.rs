//! In-process mock of the todo API for integration tests.
#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
  extract::{Path, Query, State},
  http::{header, HeaderMap, Method, StatusCode},
  response::{IntoResponse, Response},
  routing::{get, post},
  Json, Router,
};
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use url::Url;

use todo_sync::todos::{Priority, Status, Todo, User};

/// Password accepted for every seeded account
pub const PASSWORD: &str = "secret1";

pub struct MockState {
  users: RwLock<Vec<User>>,
  todos: RwLock<BTreeMap<u64, Todo>>,
  hits: Mutex<HashMap<String, usize>>,
  pub logout_fails: AtomicBool,
}

impl MockState {
  fn hit(&self, route: impl Into<String>) -> usize {
    let mut hits = self.hits.lock().unwrap();
    let count = hits.entry(route.into()).or_insert(0);
    *count += 1;
    *count
  }

  /// Requests seen for `route`, e.g. `"GET /todos"`
  pub fn hits(&self, route: &str) -> usize {
    self.hits.lock().unwrap().get(route).copied().unwrap_or(0)
  }

  async fn authenticate(&self, headers: &HeaderMap) -> Result<u64, Response> {
    let user_id = headers
      .get(header::AUTHORIZATION)
      .and_then(|v| v.to_str().ok())
      .and_then(|v| v.strip_prefix("Bearer token-"))
      .and_then(|id| id.parse::<u64>().ok());

    match user_id {
      Some(id) if self.users.read().await.iter().any(|u| u.id == id) => Ok(id),
      _ => Err(error(StatusCode::UNAUTHORIZED, "Invalid or missing token")),
    }
  }
}

pub struct MockApi {
  pub state: Arc<MockState>,
  url: Url,
}

impl MockApi {
  /// Base URL including the `/api` prefix, without a trailing slash
  pub fn url(&self) -> Url {
    self.url.clone()
  }
}

fn date(day: u32) -> DateTime<Utc> {
  Utc.with_ymd_and_hms(2024, 5, day, 9, 0, 0).unwrap()
}

fn user(id: u64, username: &str) -> User {
  User {
    id,
    username: username.to_string(),
    email: format!("{}@example.com", username),
    created_at: None,
    updated_at: None,
  }
}

fn seed_todo(
  id: u64,
  title: &str,
  status: Status,
  priority: Priority,
  creator: u64,
  assigned: Vec<User>,
) -> Todo {
  Todo {
    id,
    title: title.to_string(),
    description: None,
    due_date: date(20),
    reminder_date: None,
    status,
    priority,
    starred: false,
    creator_id: Some(creator),
    assigned_to: assigned,
    subtasks: vec![],
    created_at: date(1),
    updated_at: date(1),
  }
}

/// Start the mock on an ephemeral port.
///
/// Seed data: users 1 `alice` and 2 `bob`; todos 7 and 8 are HIGH priority,
/// 9 is LOW and starred, 10 is MEDIUM and completed.
pub async fn spawn() -> MockApi {
  let alice = user(1, "alice");
  let bob = user(2, "bob");

  let mut plants = seed_todo(9, "Water plants", Status::Pending, Priority::Low, 1, vec![]);
  plants.starred = true;
  plants.description = Some("Balcony and kitchen".to_string());

  let todos = [
    seed_todo(7, "Ship release", Status::Pending, Priority::High, 1, vec![bob.clone()]),
    seed_todo(8, "Fix login bug", Status::InProgress, Priority::High, 2, vec![alice.clone()]),
    plants,
    seed_todo(10, "Write report", Status::Completed, Priority::Medium, 2, vec![]),
  ];

  let state = Arc::new(MockState {
    users: RwLock::new(vec![alice, bob]),
    todos: RwLock::new(todos.into_iter().map(|t| (t.id, t)).collect()),
    hits: Mutex::new(HashMap::new()),
    logout_fails: AtomicBool::new(false),
  });

  let api = Router::new()
    .route("/login", post(login))
    .route("/register", post(register))
    .route("/logout", post(logout))
    .route("/todos", get(list_todos).post(create_todo))
    .route("/todos/{id}", get(get_todo).put(update_todo).delete(delete_todo))
    .route("/my-todos", get(my_todos))
    .route("/users", get(list_users))
    .route("/fail/{code}/{times}", get(fail).post(fail).put(fail))
    .route("/text/{code}", get(text_error))
    .route("/slow", get(slow))
    .route("/retry-after", get(retry_after))
    .route("/echo-auth", get(echo_auth))
    .with_state(state.clone());

  let app = Router::new().nest("/api", api);

  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let addr = listener.local_addr().unwrap();
  tokio::spawn(async move { axum::serve(listener, app).await });

  MockApi {
    state,
    url: Url::parse(&format!("http://{}/api", addr)).unwrap(),
  }
}

fn ok(data: Value) -> Response {
  Json(json!({ "message": "Success", "data": data, "status": 200 })).into_response()
}

fn error(status: StatusCode, message: &str) -> Response {
  let body = json!({
    "error": status.canonical_reason().unwrap_or("Error"),
    "message": message,
    "status": status.as_u16(),
  });
  (status, Json(body)).into_response()
}

fn not_found(id: u64) -> Response {
  error(StatusCode::NOT_FOUND, &format!("Todo {} not found", id))
}

// ============================================================================
// Auth
// ============================================================================

#[derive(Deserialize)]
struct Credentials {
  email: String,
  password: String,
}

#[derive(Deserialize)]
struct Registration {
  username: String,
  email: String,
  password: String,
}

async fn login(State(state): State<Arc<MockState>>, Json(input): Json<Credentials>) -> Response {
  state.hit("POST /login");
  let users = state.users.read().await;
  match users.iter().find(|u| u.email == input.email) {
    Some(user) if input.password == PASSWORD => ok(json!({
      "user": user,
      "token": format!("token-{}", user.id),
    })),
    _ => error(StatusCode::UNAUTHORIZED, "Invalid credentials"),
  }
}

async fn register(
  State(state): State<Arc<MockState>>,
  Json(input): Json<Registration>,
) -> Response {
  state.hit("POST /register");
  let mut users = state.users.write().await;
  if users.iter().any(|u| u.email == input.email) {
    return error(StatusCode::CONFLICT, "Email already registered");
  }
  if input.password.len() < 6 {
    return error(StatusCode::BAD_REQUEST, "Password too short");
  }

  let id = users.iter().map(|u| u.id).max().unwrap_or(0) + 1;
  let created = User {
    id,
    username: input.username,
    email: input.email,
    created_at: Some(Utc::now()),
    updated_at: Some(Utc::now()),
  };
  users.push(created.clone());
  (
    StatusCode::CREATED,
    Json(json!({
      "message": "Registered",
      "data": { "user": created, "token": format!("token-{}", id) },
      "status": 201,
    })),
  )
    .into_response()
}

async fn logout(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Response {
  state.hit("POST /logout");
  if let Err(response) = state.authenticate(&headers).await {
    return response;
  }
  if state.logout_fails.load(Ordering::SeqCst) {
    return error(StatusCode::INTERNAL_SERVER_ERROR, "Session store unavailable");
  }
  ok(json!({ "message": "Logged out" }))
}

// ============================================================================
// Todos
// ============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TodoInput {
  title: Option<String>,
  description: Option<String>,
  due_date: Option<DateTime<Utc>>,
  status: Option<Status>,
  priority: Option<Priority>,
  starred: Option<bool>,
  assigned_to: Option<Vec<u64>>,
}

fn csv<T>(
  params: &HashMap<String, String>,
  field: &str,
  parse: impl Fn(&str) -> Option<T>,
) -> Option<Vec<T>> {
  params
    .get(field)
    .map(|raw| raw.split(',').filter_map(|v| parse(v.trim())).collect())
}

async fn list_todos(
  State(state): State<Arc<MockState>>,
  headers: HeaderMap,
  Query(params): Query<HashMap<String, String>>,
) -> Response {
  state.hit("GET /todos");
  if let Err(response) = state.authenticate(&headers).await {
    return response;
  }

  let status = csv(&params, "status", |v| v.parse::<Status>().ok());
  let priority = csv(&params, "priority", |v| v.parse::<Priority>().ok());
  let assigned = csv(&params, "assignedTo", |v| v.parse::<u64>().ok());
  let starred_only = params.get("starred").map(String::as_str) == Some("true");

  let todos: Vec<Todo> = state
    .todos
    .read()
    .await
    .values()
    .filter(|t| status.as_ref().map_or(true, |s| s.contains(&t.status)))
    .filter(|t| priority.as_ref().map_or(true, |p| p.contains(&t.priority)))
    .filter(|t| {
      assigned
        .as_ref()
        .map_or(true, |ids| t.assigned_to.iter().any(|u| ids.contains(&u.id)))
    })
    .filter(|t| !starred_only || t.starred)
    .cloned()
    .collect();

  ok(json!({ "todos": todos, "filters": params }))
}

async fn my_todos(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Response {
  state.hit("GET /my-todos");
  let user_id = match state.authenticate(&headers).await {
    Ok(id) => id,
    Err(response) => return response,
  };

  let todos: Vec<Todo> = state
    .todos
    .read()
    .await
    .values()
    .filter(|t| t.creator_id == Some(user_id) || t.assigned_to.iter().any(|u| u.id == user_id))
    .cloned()
    .collect();
  ok(json!({ "todos": todos }))
}

async fn get_todo(
  State(state): State<Arc<MockState>>,
  headers: HeaderMap,
  Path(id): Path<u64>,
) -> Response {
  state.hit("GET /todos/{id}");
  if let Err(response) = state.authenticate(&headers).await {
    return response;
  }
  match state.todos.read().await.get(&id) {
    Some(todo) => ok(json!({ "todo": todo })),
    None => not_found(id),
  }
}

async fn create_todo(
  State(state): State<Arc<MockState>>,
  headers: HeaderMap,
  Json(input): Json<TodoInput>,
) -> Response {
  state.hit("POST /todos");
  let user_id = match state.authenticate(&headers).await {
    Ok(id) => id,
    Err(response) => return response,
  };
  let (Some(title), Some(due_date)) = (input.title, input.due_date) else {
    return error(StatusCode::BAD_REQUEST, "title and dueDate are required");
  };

  let users = state.users.read().await;
  let assigned_to = assignees(&users, input.assigned_to.unwrap_or_default());

  let mut todos = state.todos.write().await;
  let id = todos.keys().max().copied().unwrap_or(0) + 1;
  let todo = Todo {
    id,
    title,
    description: input.description,
    due_date,
    reminder_date: None,
    status: input.status.unwrap_or(Status::Pending),
    priority: input.priority.unwrap_or(Priority::Medium),
    starred: input.starred.unwrap_or(false),
    creator_id: Some(user_id),
    assigned_to,
    subtasks: vec![],
    created_at: Utc::now(),
    updated_at: Utc::now(),
  };
  todos.insert(id, todo.clone());

  (
    StatusCode::CREATED,
    Json(json!({ "message": "Created", "data": { "todo": todo }, "status": 201 })),
  )
    .into_response()
}

fn assignees(users: &[User], ids: Vec<u64>) -> Vec<User> {
  users.iter().filter(|u| ids.contains(&u.id)).cloned().collect()
}

async fn update_todo(
  State(state): State<Arc<MockState>>,
  headers: HeaderMap,
  Path(id): Path<u64>,
  Json(input): Json<TodoInput>,
) -> Response {
  state.hit("PUT /todos/{id}");
  if let Err(response) = state.authenticate(&headers).await {
    return response;
  }

  let users = state.users.read().await;
  let mut todos = state.todos.write().await;
  let Some(todo) = todos.get_mut(&id) else {
    return not_found(id);
  };

  if let Some(title) = input.title {
    todo.title = title;
  }
  if let Some(description) = input.description {
    todo.description = Some(description);
  }
  if let Some(due_date) = input.due_date {
    todo.due_date = due_date;
  }
  if let Some(status) = input.status {
    todo.status = status;
  }
  if let Some(priority) = input.priority {
    todo.priority = priority;
  }
  if let Some(starred) = input.starred {
    todo.starred = starred;
  }
  if let Some(ids) = input.assigned_to {
    todo.assigned_to = assignees(&users, ids);
  }
  todo.updated_at = Utc::now();

  ok(json!({ "todo": todo }))
}

async fn delete_todo(
  State(state): State<Arc<MockState>>,
  headers: HeaderMap,
  Path(id): Path<u64>,
) -> Response {
  state.hit("DELETE /todos/{id}");
  if let Err(response) = state.authenticate(&headers).await {
    return response;
  }
  match state.todos.write().await.remove(&id) {
    Some(_) => ok(json!({ "message": "Todo deleted" })),
    None => not_found(id),
  }
}

async fn list_users(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Response {
  state.hit("GET /users");
  if let Err(response) = state.authenticate(&headers).await {
    return response;
  }
  let users = state.users.read().await.clone();
  ok(json!({ "users": users }))
}

// ============================================================================
// Transport behavior
// ============================================================================

/// Fails with `code` for the first `times` requests of each method, then
/// succeeds.
async fn fail(
  State(state): State<Arc<MockState>>,
  method: Method,
  Path((code, times)): Path<(u16, usize)>,
) -> Response {
  let seen = state.hit(format!("{} /fail/{}/{}", method, code, times));
  if seen <= times {
    let status = StatusCode::from_u16(code).unwrap();
    return error(status, "Scripted failure");
  }
  ok(json!({ "attempts": seen }))
}

/// Always fails with a non-JSON body.
async fn text_error(State(state): State<Arc<MockState>>, Path(code): Path<u16>) -> Response {
  state.hit(format!("GET /text/{}", code));
  let status = StatusCode::from_u16(code).unwrap();
  (status, "<html><body>upstream unavailable</body></html>").into_response()
}

async fn slow(State(state): State<Arc<MockState>>) -> Response {
  state.hit("GET /slow");
  tokio::time::sleep(Duration::from_millis(500)).await;
  ok(json!({ "slow": true }))
}

/// 429 with `Retry-After: 1` once, then success.
async fn retry_after(State(state): State<Arc<MockState>>) -> Response {
  if state.hit("GET /retry-after") == 1 {
    let mut response = error(StatusCode::TOO_MANY_REQUESTS, "Slow down");
    response
      .headers_mut()
      .insert(header::RETRY_AFTER, "1".parse().unwrap());
    return response;
  }
  ok(json!({ "ok": true }))
}

async fn echo_auth(headers: HeaderMap) -> Response {
  let authorization = headers
    .get(header::AUTHORIZATION)
    .and_then(|v| v.to_str().ok())
    .map(String::from);
  ok(json!({ "authorization": authorization }))
}
