//! Authenticated-session lifecycle.
//!
//! The [`SessionStore`] owns the current identity and bearer token. It is
//! restored from durable storage when constructed and falls back to
//! logged-out whenever the persisted payload cannot be trusted.
//!
//! ```text
//! Unauthenticated --begin_authenticating--> Authenticating --establish--> Authenticated
//!        ^                                        |                           |
//!        +--------------abort_authenticating------+                           |
//!        +------------------------clear / expire (401)------------------------+
//! ```
//!
//! An attempt started while signed in keeps the previous session (which is
//! still the persisted one) active until it is replaced, and restores it if
//! the attempt is aborted.

mod storage;

pub use storage::{
  MemorySessionStorage, PersistedSession, SessionStorage, SqliteSessionStorage, ACCESS_TOKEN,
  CURRENT_USER, REFRESH_TOKEN,
};

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::watch;
use tracing::{info, warn};

/// The authenticated identity and its credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
  pub user_id: u64,
  pub display_name: String,
  pub email: String,
  pub token: String,
  pub issued_at: DateTime<Utc>,
}

/// Observable authentication state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
  Unauthenticated,
  Authenticating,
  Authenticated,
}

#[derive(Debug, Clone)]
enum SessionState {
  Unauthenticated,
  Authenticating { previous: Option<Session> },
  Authenticated(Session),
}

impl SessionState {
  fn auth_state(&self) -> AuthState {
    match self {
      SessionState::Unauthenticated => AuthState::Unauthenticated,
      SessionState::Authenticating { .. } => AuthState::Authenticating,
      SessionState::Authenticated(_) => AuthState::Authenticated,
    }
  }

  /// Session whose token authorizes requests right now.
  fn active(&self) -> Option<&Session> {
    match self {
      SessionState::Authenticated(session) => Some(session),
      SessionState::Authenticating { previous } => previous.as_ref(),
      SessionState::Unauthenticated => None,
    }
  }
}

/// User object as persisted under [`CURRENT_USER`].
#[derive(Debug, Serialize, Deserialize)]
struct PersistedUser {
  id: String,
  name: String,
  email: String,
  #[serde(rename = "issuedAt", default = "Utc::now")]
  issued_at: DateTime<Utc>,
}

impl Session {
  fn to_persisted(&self) -> Result<PersistedSession> {
    let user = PersistedUser {
      id: self.user_id.to_string(),
      name: self.display_name.clone(),
      email: self.email.clone(),
      issued_at: self.issued_at,
    };
    let current_user =
      serde_json::to_string(&user).map_err(|e| eyre!("Failed to serialize user: {}", e))?;

    Ok(PersistedSession {
      access_token: self.token.clone(),
      refresh_token: String::new(),
      current_user: Some(current_user),
    })
  }

  fn from_persisted(persisted: PersistedSession) -> Result<Self> {
    if persisted.access_token.trim().is_empty() {
      return Err(eyre!("Persisted access token is empty"));
    }
    let raw_user = persisted
      .current_user
      .ok_or_else(|| eyre!("Persisted session has no user"))?;
    let user: PersistedUser =
      serde_json::from_str(&raw_user).map_err(|e| eyre!("Persisted user is malformed: {}", e))?;
    let user_id = user
      .id
      .parse()
      .map_err(|e| eyre!("Persisted user id '{}' is invalid: {}", user.id, e))?;

    Ok(Session {
      user_id,
      display_name: user.name,
      email: user.email,
      token: persisted.access_token,
      issued_at: user.issued_at,
    })
  }
}

struct Inner {
  state: RwLock<SessionState>,
  storage: Arc<dyn SessionStorage>,
  changes: watch::Sender<AuthState>,
}

/// Process-wide session holder. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SessionStore {
  inner: Arc<Inner>,
}

impl SessionStore {
  /// Create a store over `storage`, restoring any persisted session.
  ///
  /// Never fails: unreadable or malformed storage is wiped and the store
  /// starts logged out.
  pub fn open(storage: Arc<dyn SessionStorage>) -> Self {
    let state = match storage.load() {
      Ok(Some(persisted)) => match Session::from_persisted(persisted) {
        Ok(session) => {
          info!(user_id = session.user_id, "Restored persisted session");
          SessionState::Authenticated(session)
        }
        Err(e) => {
          warn!("Discarding persisted session: {}", e);
          wipe(storage.as_ref());
          SessionState::Unauthenticated
        }
      },
      Ok(None) => SessionState::Unauthenticated,
      Err(e) => {
        warn!("Failed to load persisted session: {}", e);
        wipe(storage.as_ref());
        SessionState::Unauthenticated
      }
    };

    let (changes, _) = watch::channel(state.auth_state());

    Self {
      inner: Arc::new(Inner {
        state: RwLock::new(state),
        storage,
        changes,
      }),
    }
  }

  /// Store with no durable backing.
  pub fn in_memory() -> Self {
    Self::open(Arc::new(MemorySessionStorage::new()))
  }

  /// The signed-in identity. While a new attempt is under way this is the
  /// session it would replace.
  pub fn current(&self) -> Option<Session> {
    self.read().active().cloned()
  }

  pub fn token(&self) -> Option<String> {
    self.read().active().map(|session| session.token.clone())
  }

  pub fn is_authenticated(&self) -> bool {
    matches!(&*self.read(), SessionState::Authenticated(_))
  }

  pub fn state(&self) -> AuthState {
    self.read().auth_state()
  }

  /// Receiver that observes every state transition.
  pub fn watch(&self) -> watch::Receiver<AuthState> {
    self.inner.changes.subscribe()
  }

  /// Mark a login/registration attempt as started.
  pub fn begin_authenticating(&self) {
    let mut state = self.write();
    let previous = match &*state {
      SessionState::Unauthenticated => None,
      SessionState::Authenticating { previous } => previous.clone(),
      SessionState::Authenticated(session) => Some(session.clone()),
    };
    *state = SessionState::Authenticating { previous };
    self.inner.changes.send_replace(AuthState::Authenticating);
  }

  /// Return to the state before a failed attempt: the previous session if
  /// there was one, logged-out otherwise. No-op in any other state.
  pub fn abort_authenticating(&self) {
    let mut state = self.write();
    if let SessionState::Authenticating { previous } = &mut *state {
      let next = match previous.take() {
        Some(session) => SessionState::Authenticated(session),
        None => SessionState::Unauthenticated,
      };
      let auth_state = next.auth_state();
      *state = next;
      self.inner.changes.send_replace(auth_state);
    }
  }

  /// Persist and activate `session`.
  ///
  /// The durable copy is written first; if that fails the in-memory state is
  /// left untouched.
  pub fn establish(&self, session: Session) -> Result<()> {
    let persisted = session.to_persisted()?;

    let mut state = self.write();
    self.inner.storage.save(&persisted)?;

    info!(user_id = session.user_id, "Session established");
    *state = SessionState::Authenticated(session);
    self.inner.changes.send_replace(AuthState::Authenticated);
    Ok(())
  }

  /// Drop the session from memory and storage. Idempotent.
  pub fn clear(&self) {
    let mut state = self.write();
    let had_session = state.active().is_some();
    *state = SessionState::Unauthenticated;
    wipe(self.inner.storage.as_ref());

    if had_session {
      info!("Session cleared");
    }
    self.inner.changes.send_replace(AuthState::Unauthenticated);
  }

  /// Clear after the server rejected the credential.
  pub fn expire(&self) {
    if self.is_authenticated() {
      warn!("Server rejected the session token; signing out");
    }
    self.clear();
  }

  fn read(&self) -> std::sync::RwLockReadGuard<'_, SessionState> {
    self.inner.state.read().unwrap_or_else(PoisonError::into_inner)
  }

  fn write(&self) -> std::sync::RwLockWriteGuard<'_, SessionState> {
    self
      .inner
      .state
      .write()
      .unwrap_or_else(PoisonError::into_inner)
  }
}

impl std::fmt::Debug for SessionStore {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("SessionStore")
      .field("state", &self.state())
      .finish_non_exhaustive()
  }
}

fn wipe(storage: &dyn SessionStorage) {
  if let Err(e) = storage.clear() {
    warn!("Failed to clear persisted session: {}", e);
  }
}
