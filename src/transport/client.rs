use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use super::retry::RetryPolicy;
use crate::error::ApiError;
use crate::session::SessionStore;

/// Settings for one [`TransportClient`] instance.
#[derive(Debug, Clone)]
pub struct TransportConfig {
  /// API root; request paths are resolved against it.
  pub base_url: Url,
  /// Per-attempt timeout.
  pub timeout: Duration,
  pub retry: RetryPolicy,
}

impl TransportConfig {
  pub fn new(base_url: Url) -> Self {
    Self {
      base_url,
      timeout: Duration::from_secs(30),
      retry: RetryPolicy::default(),
    }
  }

  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
    self.retry = retry;
    self
  }
}

/// Error body returned by the API for non-2xx responses.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
  error: Option<String>,
  message: Option<String>,
}

/// Why a single attempt failed, and whether another attempt may help.
struct Failure {
  error: ApiError,
  transient: bool,
  retry_after: Option<Duration>,
}

impl Failure {
  fn fatal(error: ApiError) -> Self {
    Self {
      error,
      transient: false,
      retry_after: None,
    }
  }
}

/// JSON-over-HTTP client for the todo API.
///
/// Injects the session's bearer token, enforces the timeout, retries
/// transient failures of idempotent requests and normalizes every failure
/// into an [`ApiError`]. A 401 clears the session before the error is
/// returned.
#[derive(Clone)]
pub struct TransportClient {
  http: reqwest::Client,
  config: Arc<TransportConfig>,
  session: SessionStore,
}

impl TransportClient {
  pub fn new(mut config: TransportConfig, session: SessionStore) -> Result<Self, ApiError> {
    // Without a trailing slash, Url::join would replace the last path segment
    if !config.base_url.path().ends_with('/') {
      let path = format!("{}/", config.base_url.path());
      config.base_url.set_path(&path);
    }

    let http = reqwest::Client::builder()
      .timeout(config.timeout)
      .build()
      .map_err(|e| ApiError::Network(format!("failed to build HTTP client: {}", e)))?;

    Ok(Self {
      http,
      config: Arc::new(config),
      session,
    })
  }

  pub fn session(&self) -> &SessionStore {
    &self.session
  }

  pub fn config(&self) -> &TransportConfig {
    &self.config
  }

  /// Issue a request and decode the JSON response body.
  ///
  /// An empty 2xx body decodes to `Value::Null`.
  pub async fn request(
    &self,
    method: Method,
    path: &str,
    body: Option<&Value>,
  ) -> Result<Value, ApiError> {
    self.request_with_query(method, path, &[], body).await
  }

  /// Like [`request`](Self::request) with URL query parameters.
  pub async fn request_with_query(
    &self,
    method: Method,
    path: &str,
    query: &[(&str, String)],
    body: Option<&Value>,
  ) -> Result<Value, ApiError> {
    let url = self.url(path, query)?;
    let policy = &self.config.retry;
    let retry_allowed = policy.allows_method(&method);
    let mut retry = 0;

    loop {
      debug!(%method, %url, attempt = retry + 1, "Sending request");

      match self.attempt(&method, &url, body).await {
        Ok(value) => return Ok(value),
        Err(failure) => {
          if retry_allowed && failure.transient && retry < policy.max_retries {
            let delay = policy.delay(retry, failure.retry_after);
            warn!(
              %method,
              %url,
              retry = retry + 1,
              delay_ms = delay.as_millis() as u64,
              error = %failure.error,
              "Retrying request"
            );
            tokio::time::sleep(delay).await;
            retry += 1;
            continue;
          }
          debug!(%method, %url, error = %failure.error, "Request failed");
          return Err(failure.error);
        }
      }
    }
  }

  pub async fn get(&self, path: &str) -> Result<Value, ApiError> {
    self.request(Method::GET, path, None).await
  }

  pub async fn post(&self, path: &str, body: Option<&Value>) -> Result<Value, ApiError> {
    self.request(Method::POST, path, body).await
  }

  pub async fn put(&self, path: &str, body: &Value) -> Result<Value, ApiError> {
    self.request(Method::PUT, path, Some(body)).await
  }

  pub async fn delete(&self, path: &str) -> Result<Value, ApiError> {
    self.request(Method::DELETE, path, None).await
  }

  fn url(&self, path: &str, query: &[(&str, String)]) -> Result<Url, ApiError> {
    let mut url = self
      .config
      .base_url
      .join(path.trim_start_matches('/'))
      .map_err(|e| ApiError::validation("path", format!("cannot resolve '{}': {}", path, e)))?;

    if !query.is_empty() {
      url
        .query_pairs_mut()
        .extend_pairs(query.iter().map(|(k, v)| (*k, v.as_str())));
    }
    Ok(url)
  }

  async fn attempt(&self, method: &Method, url: &Url, body: Option<&Value>) -> Result<Value, Failure> {
    let mut request = self.http.request(method.clone(), url.clone());
    if let Some(token) = self.session.token() {
      request = request.bearer_auth(token);
    }
    if let Some(body) = body {
      request = request.json(body);
    }

    let response = request.send().await.map_err(|e| self.send_failure(e))?;
    let status = response.status();

    if status.is_success() {
      let bytes = response
        .bytes()
        .await
        .map_err(|e| Failure::fatal(self.network_error(&e)))?;
      if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
      }
      return serde_json::from_slice(&bytes).map_err(|e| Failure::fatal(ApiError::decode(e)));
    }

    let retry_after = parse_retry_after(response.headers());
    let text = response.text().await.unwrap_or_default();
    let error = error_from_response(status, &text);

    if status == StatusCode::UNAUTHORIZED {
      self.session.expire();
    }

    Err(Failure {
      error,
      transient: self.config.retry.allows_status(status.as_u16()),
      retry_after,
    })
  }

  fn send_failure(&self, err: reqwest::Error) -> Failure {
    Failure {
      // Connection failures never reached the server; timeouts may have
      transient: err.is_connect(),
      error: self.network_error(&err),
      retry_after: None,
    }
  }

  fn network_error(&self, err: &reqwest::Error) -> ApiError {
    if err.is_timeout() {
      ApiError::Timeout(self.config.timeout)
    } else {
      ApiError::Network(err.to_string())
    }
  }
}

/// Turn a non-2xx response into an [`ApiError`].
///
/// The API answers with `{ error, message, status }`; anything else gets a
/// message synthesized from the status line.
pub(crate) fn error_from_response(status: StatusCode, body: &str) -> ApiError {
  let envelope = serde_json::from_str::<ErrorEnvelope>(body)
    .ok()
    .filter(|e| e.error.is_some() || e.message.is_some());

  match envelope {
    Some(ErrorEnvelope { error, message }) => {
      let message = message
        .filter(|m| !m.is_empty())
        .or_else(|| error.clone())
        .unwrap_or_default();
      ApiError::from_status(status.as_u16(), message, error)
    }
    None => ApiError::from_status(
      status.as_u16(),
      format!(
        "HTTP {}: {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("Unknown Status")
      ),
      None,
    ),
  }
}

/// `Retry-After` in delta-seconds form. HTTP-date values are ignored.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
  headers
    .get(RETRY_AFTER)?
    .to_str()
    .ok()?
    .trim()
    .parse::<u64>()
    .ok()
    .map(Duration::from_secs)
}
