//! API client for the notification backend's REST API.
//!
//! This module provides the `ApiClient` struct: login and logout against the
//! auth endpoints (it is the remote `AuthBackend`), and the request
//! machinery shared with `AuthorizedClient`.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::{header, Client, Method, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::ApiError;
use crate::auth::{AuthBackend, AuthGrant, BackendError, Credentials};
use crate::config::Config;

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
/// 30s allows for slow API responses while failing fast enough for good UX.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
/// Login and logout are never retried; this applies to data requests only.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

const DEFAULT_REJECTION_MESSAGE: &str = "Invalid username or password";

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct LoginErrorBody {
    message: Option<String>,
    #[serde(rename = "remainingAttempts")]
    remaining_attempts: Option<u32>,
}

/// API client for the backend.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    auth_base_url: String,
    api_base_url: String,
    initial_backoff: Duration,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(auth_base_url: &str, api_base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            auth_base_url: auth_base_url.trim_end_matches('/').to_string(),
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
        })
    }

    #[cfg(test)]
    fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(&config.auth_base_url, &config.api_base_url)
    }

    /// Absolute URL for a path under the data API
    pub fn api_url(&self, path: &str) -> String {
        format!("{}/{}", self.api_base_url, path.trim_start_matches('/'))
    }

    fn auth_url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.auth_base_url, endpoint)
    }

    /// `POST {auth}/login`. 4xx answers (other than 429) are rejections;
    /// everything that prevents an answer is `Unavailable`.
    pub async fn login(&self, credentials: &Credentials) -> Result<AuthGrant, BackendError> {
        let url = self.auth_url("login");
        let body = LoginRequest {
            username: &credentials.username,
            password: &credentials.password,
        };

        let response = self
            .client
            .post(&url)
            .header(header::ACCEPT, "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                BackendError::Unavailable(format!("Failed to send login request: {}", e))
            })?;

        let status = response.status();
        if status.is_success() {
            let grant = response
                .json::<AuthGrant>()
                .await
                .map_err(|e| BackendError::Unavailable(format!("Invalid login response: {}", e)))?;
            if grant.token.trim().is_empty() {
                return Err(BackendError::Unavailable(
                    "Invalid login response: empty token".to_string(),
                ));
            }
            return Ok(grant);
        }

        if status == StatusCode::TOO_MANY_REQUESTS || !status.is_client_error() {
            return Err(BackendError::Unavailable(format!("Login endpoint returned {}", status)));
        }

        let text = response.text().await.unwrap_or_default();
        let parsed: LoginErrorBody = serde_json::from_str(&text).unwrap_or_default();
        debug!(%status, remaining = ?parsed.remaining_attempts, "Login rejected by server");
        Err(BackendError::Rejected {
            message: parsed
                .message
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_REJECTION_MESSAGE.to_string()),
            remaining_attempts: parsed.remaining_attempts,
        })
    }

    /// `POST {auth}/logout` with the bearer token
    pub async fn logout(&self, token: &str) -> Result<(), ApiError> {
        let response = self
            .client
            .post(self.auth_url("logout"))
            .bearer_auth(token)
            .send()
            .await?;
        Self::check_response(response).await.map(|_| ())
    }

    fn auth_headers(token: &str) -> Result<header::HeaderMap, ApiError> {
        let mut headers = header::HeaderMap::new();
        let value = header::HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|e| ApiError::InvalidResponse(format!("Invalid token: {}", e)))?;
        headers.insert(header::AUTHORIZATION, value);
        Ok(headers)
    }

    /// Check if response is successful, returning an error with body if not.
    /// Returns Ok(Some(response)) for success, Ok(None) for rate limit (should retry),
    /// or Err for other errors.
    async fn check_response_for_retry(response: Response) -> Result<Option<Response>, ApiError> {
        if response.status().is_success() {
            Ok(Some(response))
        } else if response.status() == StatusCode::TOO_MANY_REQUESTS {
            Ok(None)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: Response) -> Result<Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    /// Send an authenticated request, backing off on 429
    pub(crate) async fn execute<B: Serialize + ?Sized>(
        &self,
        method: Method,
        url: &str,
        token: &str,
        body: Option<&B>,
    ) -> Result<Response, ApiError> {
        let mut retries = 0;
        let mut backoff = self.initial_backoff;

        loop {
            let mut request = self
                .client
                .request(method.clone(), url)
                .headers(Self::auth_headers(token)?);
            if let Some(body) = body {
                request = request.json(body);
            }
            let response = request.send().await?;

            match Self::check_response_for_retry(response).await? {
                Some(response) => return Ok(response),
                None => {
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(ApiError::RateLimited);
                    }
                    warn!(
                        url = url,
                        retry = retries,
                        backoff_ms = backoff.as_millis() as u64,
                        "Rate limited, backing off"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2; // Exponential backoff
                }
            }
        }
    }
}

#[async_trait]
impl AuthBackend for ApiClient {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn authenticate(&self, credentials: &Credentials) -> Result<AuthGrant, BackendError> {
        self.login(credentials).await
    }

    async fn revoke(&self, token: &str) -> Result<(), BackendError> {
        self.logout(token)
            .await
            .map_err(|e| BackendError::Unavailable(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header as header_is, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> ApiClient {
        let base = format!("{}/auth/", server.uri());
        ApiClient::new(&base, &format!("{}/api", server.uri())).unwrap()
    }

    fn creds() -> Credentials {
        Credentials::new("alice", "s3cret").unwrap()
    }

    #[test]
    fn test_urls_are_joined_cleanly() {
        let client = ApiClient::new("http://host/auth/", "http://host/api/").unwrap();
        assert_eq!(client.auth_url("login"), "http://host/auth/login");
        assert_eq!(client.api_url("/templates"), "http://host/api/templates");
        assert_eq!(client.api_url("rules/7"), "http://host/api/rules/7");
    }

    #[tokio::test]
    async fn test_login_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/login"))
            .and(body_json(serde_json::json!({"username": "alice", "password": "s3cret"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "token": "tok-123",
                "username": "alice",
                "message": "Welcome back"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let grant = client_for(&server).login(&creds()).await.unwrap();
        assert_eq!(grant.token, "tok-123");
        assert_eq!(grant.username, "alice");
        assert_eq!(grant.message.as_deref(), Some("Welcome back"));
    }

    #[tokio::test]
    async fn test_login_rejection_carries_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/login"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "message": "Bad password",
                "remainingAttempts": 1
            })))
            .mount(&server)
            .await;

        let err = client_for(&server).login(&creds()).await.unwrap_err();
        assert_eq!(
            err,
            BackendError::Rejected { message: "Bad password".into(), remaining_attempts: Some(1) }
        );
    }

    #[tokio::test]
    async fn test_login_rejection_without_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/login"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let err = client_for(&server).login(&creds()).await.unwrap_err();
        assert_eq!(
            err,
            BackendError::Rejected {
                message: DEFAULT_REJECTION_MESSAGE.into(),
                remaining_attempts: None
            }
        );
    }

    #[tokio::test]
    async fn test_login_server_error_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/login"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = client_for(&server).login(&creds()).await.unwrap_err();
        assert!(matches!(err, BackendError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_login_rate_limit_is_unavailable_and_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/login"))
            .respond_with(ResponseTemplate::new(429))
            .expect(1)
            .mount(&server)
            .await;

        let err = client_for(&server).login(&creds()).await.unwrap_err();
        assert!(matches!(err, BackendError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_login_connection_refused() {
        // Nothing listens on port 9 on a test host
        let client = ApiClient::new("http://127.0.0.1:9/auth", "http://127.0.0.1:9/api").unwrap();
        let err = client.login(&creds()).await.unwrap_err();
        assert!(matches!(err, BackendError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_login_empty_token_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "token": "  ",
                "username": "alice"
            })))
            .mount(&server)
            .await;

        let err = client_for(&server).login(&creds()).await.unwrap_err();
        assert_eq!(
            err,
            BackendError::Unavailable("Invalid login response: empty token".into())
        );
    }

    #[tokio::test]
    async fn test_logout_sends_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/logout"))
            .and(header_is("authorization", "Bearer tok-123"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server).logout("tok-123").await.unwrap();
    }

    #[tokio::test]
    async fn test_execute_maps_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/templates"))
            .respond_with(ResponseTemplate::new(404).set_body_string("missing"))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let err = client
            .execute::<()>(Method::GET, &client.api_url("templates"), "tok", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(b) if b == "missing"));
    }

    #[tokio::test]
    async fn test_execute_gives_up_after_three_retries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/notifications"))
            .respond_with(ResponseTemplate::new(429))
            .expect(4)
            .mount(&server)
            .await;

        let client = client_for(&server).with_initial_backoff(Duration::from_millis(5));
        let err = client
            .execute::<()>(Method::GET, &client.api_url("notifications"), "tok", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::RateLimited));
    }

    #[tokio::test]
    async fn test_execute_retries_rate_limit_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/rules"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/rules"))
            .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).with_initial_backoff(Duration::from_millis(5));
        let response = client
            .execute::<()>(Method::GET, &client.api_url("rules"), "tok", None)
            .await
            .unwrap();
        assert_eq!(response.text().await.unwrap(), "[]");
    }
}
