//! Durable session storage: trait, in-memory and SQLite implementations.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

/// Storage key of the bearer token.
pub const ACCESS_TOKEN: &str = "accessToken";
/// Storage key of the refresh token. The API does not issue one yet; an empty
/// string is stored so the layout stays stable.
pub const REFRESH_TOKEN: &str = "refreshToken";
/// Storage key of the serialized user object.
pub const CURRENT_USER: &str = "currentUser";

/// The raw persisted layout, before any parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedSession {
  pub access_token: String,
  pub refresh_token: String,
  /// JSON-encoded user object. `None` when the row is missing.
  pub current_user: Option<String>,
}

/// Trait for session storage backends.
pub trait SessionStorage: Send + Sync {
  /// Load the persisted session, if any token was stored.
  fn load(&self) -> Result<Option<PersistedSession>>;

  /// Replace the persisted session. Either all keys are written or none.
  fn save(&self, session: &PersistedSession) -> Result<()>;

  /// Remove every persisted key. Succeeds when nothing is stored.
  fn clear(&self) -> Result<()>;
}

/// Storage that lives only as long as the process.
/// Used when persistence is disabled.
#[derive(Default)]
pub struct MemorySessionStorage {
  slot: Mutex<Option<PersistedSession>>,
}

impl MemorySessionStorage {
  pub fn new() -> Self {
    Self::default()
  }

  /// Seed storage with a session, as if a previous run had persisted it.
  pub fn with_session(session: PersistedSession) -> Self {
    Self {
      slot: Mutex::new(Some(session)),
    }
  }
}

impl SessionStorage for MemorySessionStorage {
  fn load(&self) -> Result<Option<PersistedSession>> {
    let slot = self
      .slot
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(slot.clone())
  }

  fn save(&self, session: &PersistedSession) -> Result<()> {
    let mut slot = self
      .slot
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    *slot = Some(session.clone());
    Ok(())
  }

  fn clear(&self) -> Result<()> {
    let mut slot = self
      .slot
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    *slot = None;
    Ok(())
  }
}

/// SQLite-based session storage: one key/value row per persisted key.
pub struct SqliteSessionStorage {
  conn: Mutex<Connection>,
}

impl SqliteSessionStorage {
  /// Open (or create) the session database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create session directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open session database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  /// Session storage that disappears with the connection.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory session database: {}", e))?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(SESSION_SCHEMA)
      .map_err(|e| eyre!("Failed to run session migrations: {}", e))?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn get(conn: &Connection, key: &str) -> Result<Option<String>> {
    conn
      .query_row(
        "SELECT value FROM session_store WHERE key = ?",
        params![key],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read session key {}: {}", key, e))
  }

  /// Overwrite a single key, bypassing the all-or-nothing `save`.
  #[cfg(test)]
  pub(crate) fn put_raw(&self, key: &str, value: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    conn
      .execute(
        "INSERT OR REPLACE INTO session_store (key, value) VALUES (?, ?)",
        params![key, value],
      )
      .map_err(|e| eyre!("Failed to write session key {}: {}", key, e))?;
    Ok(())
  }
}

/// Schema for the session table.
const SESSION_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS session_store (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

impl SessionStorage for SqliteSessionStorage {
  fn load(&self) -> Result<Option<PersistedSession>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let access_token = match Self::get(&conn, ACCESS_TOKEN)? {
      Some(token) => token,
      None => return Ok(None),
    };
    let refresh_token = Self::get(&conn, REFRESH_TOKEN)?.unwrap_or_default();
    let current_user = Self::get(&conn, CURRENT_USER)?;

    Ok(Some(PersistedSession {
      access_token,
      refresh_token,
      current_user,
    }))
  }

  fn save(&self, session: &PersistedSession) -> Result<()> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute("DELETE FROM session_store", [])
      .map_err(|e| eyre!("Failed to clear old session: {}", e))?;

    let mut rows = vec![
      (ACCESS_TOKEN, session.access_token.as_str()),
      (REFRESH_TOKEN, session.refresh_token.as_str()),
    ];
    if let Some(user) = &session.current_user {
      rows.push((CURRENT_USER, user.as_str()));
    }

    for (key, value) in rows {
      tx.execute(
        "INSERT INTO session_store (key, value, updated_at) VALUES (?, ?, datetime('now'))",
        params![key, value],
      )
      .map_err(|e| eyre!("Failed to store session key {}: {}", key, e))?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn clear(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("DELETE FROM session_store", [])
      .map_err(|e| eyre!("Failed to clear session: {}", e))?;

    Ok(())
  }
}
