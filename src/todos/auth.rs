//! Login, registration and logout wired to the session and the cache.

use chrono::Utc;
use tracing::{info, warn};

use super::api_types::{AuthPayload, LoginRequest, RegisterRequest};
use super::service::AuthService;
use crate::cache::QueryCache;
use crate::error::ApiError;
use crate::session::{Session, SessionStore};

#[derive(Clone)]
pub struct AuthClient {
  service: AuthService,
  session: SessionStore,
  cache: QueryCache,
}

impl AuthClient {
  pub fn new(service: AuthService, session: SessionStore, cache: QueryCache) -> Self {
    Self {
      service,
      session,
      cache,
    }
  }

  pub fn session(&self) -> &SessionStore {
    &self.session
  }

  pub async fn login(&self, email: &str, password: &str) -> Result<Session, ApiError> {
    let request = LoginRequest {
      email: email.trim().to_string(),
      password: password.to_string(),
    };
    request.validate()?;

    self.session.begin_authenticating();
    let result = self.service.login(&request).await;
    self.complete(result)
  }

  pub async fn register(
    &self,
    username: &str,
    email: &str,
    password: &str,
  ) -> Result<Session, ApiError> {
    let request = RegisterRequest {
      username: username.trim().to_string(),
      email: email.trim().to_string(),
      password: password.to_string(),
    };
    request.validate()?;

    self.session.begin_authenticating();
    let result = self.service.register(&request).await;
    self.complete(result)
  }

  /// Sign out.
  ///
  /// The session and every cached entry are dropped even when the server
  /// call fails; the server's error is still returned.
  pub async fn logout(&self) -> Result<(), ApiError> {
    let result = if self.session.is_authenticated() {
      self.service.logout().await
    } else {
      Ok(())
    };

    if let Err(e) = &result {
      warn!("Logout request failed, clearing local session anyway: {}", e);
    }
    self.session.clear();
    self.cache.clear();
    info!("Signed out");
    result
  }

  fn complete(&self, result: Result<AuthPayload, ApiError>) -> Result<Session, ApiError> {
    let payload = match result {
      Ok(payload) => payload,
      Err(e) => {
        self.session.abort_authenticating();
        return Err(e);
      }
    };

    let session = Session {
      user_id: payload.user.id,
      display_name: payload.user.username,
      email: payload.user.email,
      token: payload.token,
      issued_at: Utc::now(),
    };

    if let Err(e) = self.session.establish(session.clone()) {
      self.session.abort_authenticating();
      return Err(ApiError::Storage(e.to_string()));
    }

    // Entries fetched under a previous identity must not leak into this one
    self.cache.clear();
    Ok(session)
  }
}
