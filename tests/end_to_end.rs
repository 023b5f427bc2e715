mod support;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use todo_sync::cache::{CacheConfig, CacheSource, QueryKey};
use todo_sync::session::{AuthState, SessionStore, SqliteSessionStorage};
use todo_sync::todos::{
  CreateTodoRequest, FilterState, MutationKind, Priority, Status, TodoList, TodoService,
};
use todo_sync::transport::{RetryPolicy, TransportConfig};
use todo_sync::{ApiError, App, ErrorKind};

fn transport(api: &support::MockApi) -> TransportConfig {
  TransportConfig::new(api.url()).with_retry(RetryPolicy {
    initial_backoff: Duration::from_millis(10),
    max_backoff: Duration::from_millis(50),
    ..RetryPolicy::default()
  })
}

fn app(api: &support::MockApi, session: SessionStore) -> App {
  App::from_parts(transport(api), CacheConfig::default(), session).unwrap()
}

async fn signed_in_app(api: &support::MockApi) -> App {
  let app = app(api, SessionStore::in_memory());
  app
    .auth
    .login("alice@example.com", support::PASSWORD)
    .await
    .unwrap();
  app
}

fn high_priority() -> FilterState {
  FilterState {
    status: vec![],
    priority: vec![Priority::High],
    assigned_to: vec![],
    starred: None,
    search_text: String::new(),
  }
}

#[tokio::test]
async fn test_update_refreshes_filtered_list() {
  let api = support::spawn().await;
  let app = signed_in_app(&api).await;
  let filter = high_priority();
  assert_eq!(filter.key().as_tuple(), ("todos", "priority=HIGH"));

  let first = app.todos.todos(&filter).await.unwrap();
  assert_eq!(first.source, CacheSource::Network);
  assert_eq!(first.data.len(), 2);
  assert!(first.data.iter().all(|t| t.priority == Priority::High));

  let cached = app.todos.todos(&filter).await.unwrap();
  assert_eq!(cached.source, CacheSource::CacheFresh);
  assert_eq!(api.state.hits("GET /todos"), 1);

  let updated = app.mutations.update_status(7, Status::Completed).await.unwrap();
  assert_eq!(updated.status, Status::Completed);

  let refreshed = app.todos.todos(&filter).await.unwrap();
  assert_eq!(refreshed.source, CacheSource::Network);
  assert_eq!(api.state.hits("GET /todos"), 2);
  assert_eq!(refreshed.data.len(), 2);
  let seven = refreshed.data.iter().find(|t| t.id == 7).unwrap();
  assert_eq!(seven.status, Status::Completed);
}

#[tokio::test]
async fn test_failed_update_still_invalidates_lists() {
  let api = support::spawn().await;
  let app = signed_in_app(&api).await;
  let filter = FilterState::default();

  app.todos.todos(&filter).await.unwrap();
  app.todos.my_todos().await.unwrap();

  let err = app
    .mutations
    .update_status(999, Status::Completed)
    .await
    .unwrap_err();
  assert_eq!(err.status(), Some(404));
  assert_eq!(err.message(), "Todo 999 not found");
  assert_eq!(app.mutations.pending(MutationKind::Update), 0);

  let again = app.todos.todos(&filter).await.unwrap();
  assert_eq!(again.source, CacheSource::Network);
  assert_eq!(api.state.hits("GET /todos"), 2);

  app.todos.my_todos().await.unwrap();
  assert_eq!(api.state.hits("GET /my-todos"), 2);
}

#[tokio::test]
async fn test_invalid_create_never_reaches_network() {
  let api = support::spawn().await;
  let app = signed_in_app(&api).await;

  let err = app
    .mutations
    .create(&CreateTodoRequest::new("  ", Utc::now()))
    .await
    .unwrap_err();

  assert_eq!(err.kind(), ErrorKind::Validation);
  assert_eq!(api.state.hits("POST /todos"), 0);
}

#[tokio::test]
async fn test_create_and_remove_refresh_my_todos() {
  let api = support::spawn().await;
  let app = signed_in_app(&api).await;

  let before = app.todos.my_todos().await.unwrap();
  assert_eq!(
    before.iter().map(|t| t.id).collect::<Vec<_>>(),
    vec![7, 8, 9]
  );

  let request = CreateTodoRequest {
    priority: Some(Priority::Low),
    ..CreateTodoRequest::new("Book flights", Utc::now())
  };
  let created = app.mutations.create(&request).await.unwrap();
  assert_eq!(created.creator_id, Some(1));

  let after_create = app.todos.my_todos().await.unwrap();
  assert!(after_create.iter().any(|t| t.id == created.id));

  app.mutations.remove(9).await.unwrap();
  let after_remove = app.todos.my_todos().await.unwrap();
  assert!(after_remove.iter().all(|t| t.id != 9));
  assert_eq!(api.state.hits("GET /my-todos"), 3);
}

#[tokio::test]
async fn test_toggle_starred_invalidates_detail() {
  let api = support::spawn().await;
  let app = signed_in_app(&api).await;

  let todo = app.todos.todo(9).await.unwrap();
  assert!(todo.starred);

  let toggled = app.mutations.toggle_starred(&todo).await.unwrap();
  assert!(!toggled.starred);

  let reread = app.todos.todo(9).await.unwrap();
  assert!(!reread.starred);
  assert_eq!(api.state.hits("GET /todos/{id}"), 2);
}

#[tokio::test]
async fn test_concurrent_list_reads_share_one_request() {
  let api = support::spawn().await;
  let app = signed_in_app(&api).await;
  let filter = FilterState::default().with_status(Status::Pending);

  let (a, b) = tokio::join!(app.todos.todos(&filter), app.todos.todos(&filter));
  assert_eq!(a.unwrap().data, b.unwrap().data);
  assert_eq!(api.state.hits("GET /todos"), 1);
}

#[tokio::test]
async fn test_search_is_local_and_shares_the_list_entry() {
  let api = support::spawn().await;
  let app = signed_in_app(&api).await;

  let all = app.todos.todos(&FilterState::default()).await.unwrap();
  assert_eq!(all.data.len(), 4);

  let search = FilterState::default().with_search("BALCONY");
  let found = app.todos.todos(&search).await.unwrap();
  assert_eq!(found.source, CacheSource::CacheFresh);
  assert_eq!(found.data.len(), 1);
  assert_eq!(found.data[0].id, 9);
  assert_eq!(api.state.hits("GET /todos"), 1);
}

#[tokio::test]
async fn test_starred_and_assignee_filters_reach_the_server() {
  let api = support::spawn().await;
  let app = signed_in_app(&api).await;

  let starred = app
    .todos
    .todos(&FilterState::default().starred_only())
    .await
    .unwrap();
  assert_eq!(starred.data.iter().map(|t| t.id).collect::<Vec<_>>(), vec![9]);

  let assigned_to_bob = app
    .todos
    .todos(&FilterState::default().with_assignee(2))
    .await
    .unwrap();
  assert_eq!(
    assigned_to_bob.data.iter().map(|t| t.id).collect::<Vec<_>>(),
    vec![7]
  );
}

#[tokio::test]
async fn test_failed_login_returns_to_unauthenticated() {
  let api = support::spawn().await;
  let app = app(&api, SessionStore::in_memory());

  let err = app
    .auth
    .login("alice@example.com", "wrong-password")
    .await
    .unwrap_err();
  assert!(err.is_unauthorized());
  assert_eq!(err.message(), "Invalid credentials");
  assert_eq!(app.session.state(), AuthState::Unauthenticated);
}

#[tokio::test]
async fn test_register_validates_then_signs_in() {
  let api = support::spawn().await;
  let app = app(&api, SessionStore::in_memory());

  let err = app
    .auth
    .register("carol", "carol@example.com", "123")
    .await
    .unwrap_err();
  assert!(matches!(err, ApiError::Validation { field: "password", .. }));
  assert_eq!(api.state.hits("POST /register"), 0);

  let session = app
    .auth
    .register("carol", "carol@example.com", "hunter22")
    .await
    .unwrap();
  assert_eq!(session.user_id, 3);
  assert_eq!(session.token, "token-3");
  assert_eq!(app.session.state(), AuthState::Authenticated);

  let users = app.todos.users().await.unwrap();
  assert_eq!(users.len(), 3);
}

#[tokio::test]
async fn test_logout_clears_state_even_when_server_fails() {
  let api = support::spawn().await;
  let app = signed_in_app(&api).await;
  app.todos.todos(&high_priority()).await.unwrap();
  assert!(!app.cache.is_empty());

  api.state.logout_fails.store(true, Ordering::SeqCst);
  let err = app.auth.logout().await.unwrap_err();
  assert_eq!(err.kind(), ErrorKind::Server);

  assert!(!app.session.is_authenticated());
  assert!(app.cache.is_empty());
}

#[tokio::test]
async fn test_read_in_flight_across_relogin_never_reaches_new_identity() {
  let api = support::spawn().await;
  let app = signed_in_app(&api).await;
  let service = TodoService::new(app.transport.clone());
  let key = QueryKey::my_todos();

  // Alice's response is fetched now but only delivered after bob signs in
  let alice_read = {
    let cache = app.cache.clone();
    let service = service.clone();
    let key = key.clone();
    tokio::spawn(async move {
      cache
        .fetch(&key, move || async move {
          let list = service.my_todos().await;
          tokio::time::sleep(Duration::from_millis(300)).await;
          list
        })
        .await
    })
  };
  tokio::time::sleep(Duration::from_millis(50)).await;

  app.auth.logout().await.unwrap();
  app
    .auth
    .login("bob@example.com", support::PASSWORD)
    .await
    .unwrap();

  // Bob's read outlives alice's, so alice's lands while it is in flight
  let bob_read = {
    let cache = app.cache.clone();
    let service = service.clone();
    let key = key.clone();
    tokio::spawn(async move {
      cache
        .fetch(&key, move || async move {
          let list = service.my_todos().await;
          tokio::time::sleep(Duration::from_millis(600)).await;
          list
        })
        .await
    })
  };

  let alice: TodoList = alice_read.await.unwrap().unwrap();
  let bob: TodoList = bob_read.await.unwrap().unwrap();

  let ids = |list: &TodoList| {
    let mut ids: Vec<u64> = list.todos.iter().map(|t| t.id).collect();
    ids.sort();
    ids
  };
  let expected = ids(&service.my_todos().await.unwrap());
  assert_ne!(ids(&alice), expected);
  assert_eq!(ids(&bob), expected);

  let cached = app.todos.my_todos().await.unwrap();
  let mut cached_ids: Vec<u64> = cached.iter().map(|t| t.id).collect();
  cached_ids.sort();
  assert_eq!(cached_ids, expected);
  assert_eq!(api.state.hits("GET /my-todos"), 3);
}

#[tokio::test]
async fn test_rejected_relogin_leaves_memory_and_storage_in_agreement() {
  let api = support::spawn().await;
  let storage = Arc::new(SqliteSessionStorage::open_in_memory().unwrap());
  let app = app(&api, SessionStore::open(storage.clone()));
  app
    .auth
    .login("alice@example.com", support::PASSWORD)
    .await
    .unwrap();

  let err = app
    .auth
    .login("alice@example.com", "wrong-password")
    .await
    .unwrap_err();
  assert!(err.is_unauthorized());

  // The 401 expires the credential everywhere, not only in memory
  assert_eq!(app.session.state(), AuthState::Unauthenticated);
  let restarted = SessionStore::open(storage);
  assert_eq!(restarted.state(), AuthState::Unauthenticated);
}

#[tokio::test]
async fn test_session_survives_restart() {
  let api = support::spawn().await;
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("session.db");

  {
    let storage = Arc::new(SqliteSessionStorage::open(&path).unwrap());
    let app = app(&api, SessionStore::open(storage));
    app
      .auth
      .login("bob@example.com", support::PASSWORD)
      .await
      .unwrap();
    app.teardown();
  }

  let storage = Arc::new(SqliteSessionStorage::open(&path).unwrap());
  let restored = SessionStore::open(storage);
  let session = restored.current().unwrap();
  assert_eq!(session.user_id, 2);
  assert_eq!(session.display_name, "bob");
  assert_eq!(session.token, "token-2");

  // The restored token is accepted by the server
  let app = app(&api, restored);
  let mine = app.todos.my_todos().await.unwrap();
  assert_eq!(mine.iter().map(|t| t.id).collect::<Vec<_>>(), vec![7, 8, 10]);
}

#[tokio::test]
async fn test_view_query_follows_invalidation() {
  let api = support::spawn().await;
  let app = signed_in_app(&api).await;
  let filter = high_priority();

  let mut query = app.todos.todos_query(&filter);
  query.fetch();
  tokio::time::sleep(Duration::from_millis(200)).await;
  assert!(query.poll());
  assert_eq!(query.data().unwrap().todos.len(), 2);

  app.mutations.update_status(8, Status::Completed).await.unwrap();
  assert!(query.poll());
  assert!(query.is_stale());

  query.fetch();
  tokio::time::sleep(Duration::from_millis(200)).await;
  query.poll();
  let list = query.data().unwrap();
  let eight = list.todos.iter().find(|t| t.id == 8).unwrap();
  assert_eq!(eight.status, Status::Completed);
  assert_eq!(api.state.hits("GET /todos"), 2);
}

#[tokio::test]
async fn test_teardown_empties_cache() {
  let api = support::spawn().await;
  let app = signed_in_app(&api).await;
  app.cache.start_gc();
  app.todos.users().await.unwrap();
  assert!(app.cache.read(&QueryKey::users()).data.is_some());

  app.teardown();
  assert!(app.cache.is_empty());
  assert!(app.session.is_authenticated());
}
