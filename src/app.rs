//! Composition root owning the session, transport, cache and services.

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tracing::info;

use crate::cache::{CacheConfig, QueryCache};
use crate::config::Config;
use crate::session::{MemorySessionStorage, SessionStorage, SessionStore, SqliteSessionStorage};
use crate::todos::{AuthClient, AuthService, CachedTodoClient, MutationCoordinator, TodoService};
use crate::transport::{TransportClient, TransportConfig};

/// Every piece of shared state a front end needs, constructed explicitly.
///
/// Build one per process (or per test); there are no globals.
#[derive(Clone)]
pub struct App {
  pub session: SessionStore,
  pub transport: TransportClient,
  pub cache: QueryCache,
  pub todos: CachedTodoClient,
  pub mutations: MutationCoordinator,
  pub auth: AuthClient,
}

impl App {
  /// Build the app from configuration and start the cache's GC sweep.
  ///
  /// Must be called from within a Tokio runtime.
  pub fn init(config: &Config) -> Result<Self> {
    let storage: Arc<dyn SessionStorage> = if config.session.persist {
      let path = config.session_path()?;
      Arc::new(SqliteSessionStorage::open(&path)?)
    } else {
      Arc::new(MemorySessionStorage::new())
    };

    let session = SessionStore::open(storage);
    let app = Self::from_parts(config.transport()?, config.cache(), session)?;
    app.cache.start_gc();

    info!(
      api = %app.transport.config().base_url,
      authenticated = app.session.is_authenticated(),
      "Initialized"
    );
    Ok(app)
  }

  /// Wire the components together without starting background work.
  pub fn from_parts(
    transport: TransportConfig,
    cache: CacheConfig,
    session: SessionStore,
  ) -> Result<Self> {
    let transport = TransportClient::new(transport, session.clone())
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;
    let cache = QueryCache::new(cache);

    let todo_service = TodoService::new(transport.clone());
    let auth_service = AuthService::new(transport.clone());

    Ok(Self {
      todos: CachedTodoClient::new(todo_service.clone(), cache.clone()),
      mutations: MutationCoordinator::new(todo_service, cache.clone()),
      auth: AuthClient::new(auth_service, session.clone(), cache.clone()),
      session,
      transport,
      cache,
    })
  }

  /// Stop background work and drop cached data. The session is kept.
  pub fn teardown(&self) {
    self.cache.teardown();
    info!("Torn down");
  }
}
