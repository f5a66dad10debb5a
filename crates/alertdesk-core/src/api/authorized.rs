//! Authenticated requests against the data API.
//!
//! Every request carries the current session token. A 401/403 answer means
//! the server no longer honours that token, so the session it belongs to is
//! expired before the error is returned to the caller. A session started
//! while the request was in flight is left alone.

use std::sync::Arc;

use reqwest::{Method, Response};
use serde::{de::DeserializeOwned, Serialize};
use tracing::warn;

use super::{ApiClient, ApiError};
use crate::auth::Authenticator;

const SERVER_REJECTED_REASON: &str = "Session rejected by server";

#[derive(Clone)]
pub struct AuthorizedClient {
    api: ApiClient,
    auth: Arc<Authenticator>,
}

impl AuthorizedClient {
    pub fn new(api: ApiClient, auth: Arc<Authenticator>) -> Self {
        Self { api, auth }
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self.send::<()>(Method::GET, path, None).await?;
        Self::decode(response).await
    }

    pub async fn post<T, B>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let response = self.send(Method::POST, path, Some(body)).await?;
        Self::decode(response).await
    }

    pub async fn put<T, B>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let response = self.send(Method::PUT, path, Some(body)).await?;
        Self::decode(response).await
    }

    pub async fn delete(&self, path: &str) -> Result<(), ApiError> {
        self.send::<()>(Method::DELETE, path, None).await.map(|_| ())
    }

    async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<Response, ApiError> {
        let token = self.auth.sessions().token().ok_or(ApiError::NotAuthenticated)?;
        let url = self.api.api_url(path);

        match self.api.execute(method, &url, &token, body).await {
            Err(e) if e.is_auth_rejection() => {
                warn!(url = %url, error = %e, "Token rejected, ending session");
                self.auth.expire_token(&token, SERVER_REJECTED_REASON).await;
                Err(e)
            }
            other => other,
        }
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| {
            ApiError::InvalidResponse(format!(
                "{}: {}",
                e,
                ApiError::truncate_body(&text)
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditEventKind;
    use crate::auth::LocalBackend;
    use crate::clock::SystemClock;
    use crate::config::SecurityPolicy;
    use crate::storage::MemoryStore;
    use serde::Deserialize;
    use std::collections::HashMap;
    use std::time::Duration;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Debug, Deserialize, PartialEq)]
    struct Template {
        id: u32,
        name: String,
    }

    async fn logged_in(server: &MockServer) -> (AuthorizedClient, Arc<Authenticator>) {
        let mut users = HashMap::new();
        users.insert("alice".to_string(), "pw".to_string());
        let auth = Arc::new(Authenticator::new(
            Arc::new(LocalBackend::new(users)),
            Arc::new(MemoryStore::new()),
            Arc::new(SystemClock),
            SecurityPolicy::default(),
        ));
        auth.login("alice", "pw").await.unwrap();

        let api = ApiClient::new(
            &format!("{}/auth", server.uri()),
            &format!("{}/api", server.uri()),
        )
        .unwrap();
        (AuthorizedClient::new(api, auth.clone()), auth)
    }

    #[tokio::test]
    async fn test_get_sends_session_token() {
        let server = MockServer::start().await;
        let (client, auth) = logged_in(&server).await;
        let token = auth.require_token().unwrap();

        Mock::given(method("GET"))
            .and(path("/api/templates/1"))
            .and(header("authorization", format!("Bearer {}", token).as_str()))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"id": 1, "name": "Outage"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let template: Template = client.get("templates/1").await.unwrap();
        assert_eq!(template, Template { id: 1, name: "Outage".into() });
    }

    #[tokio::test]
    async fn test_post_sends_body() {
        let server = MockServer::start().await;
        let (client, _auth) = logged_in(&server).await;

        Mock::given(method("POST"))
            .and(path("/api/templates"))
            .and(body_json(serde_json::json!({"name": "Maintenance"})))
            .respond_with(
                ResponseTemplate::new(201)
                    .set_body_json(serde_json::json!({"id": 9, "name": "Maintenance"})),
            )
            .mount(&server)
            .await;

        let created: Template = client
            .post("templates", &serde_json::json!({"name": "Maintenance"}))
            .await
            .unwrap();
        assert_eq!(created.id, 9);
    }

    #[tokio::test]
    async fn test_unauthorized_expires_session() {
        let server = MockServer::start().await;
        let (client, auth) = logged_in(&server).await;

        Mock::given(method("DELETE"))
            .and(path("/api/rules/3"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = client.delete("rules/3").await.unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized));
        assert!(!auth.sessions().is_authenticated());

        let last = auth.audit().read_all().pop().unwrap();
        assert_eq!(last.kind, AuditEventKind::SessionExpired);
        assert_eq!(last.description, SERVER_REJECTED_REASON);
    }

    #[tokio::test]
    async fn test_late_rejection_spares_newer_session() {
        let server = MockServer::start().await;
        let (client, auth) = logged_in(&server).await;

        Mock::given(method("GET"))
            .and(path("/api/templates"))
            .respond_with(ResponseTemplate::new(401).set_delay(Duration::from_millis(300)))
            .mount(&server)
            .await;

        let request = tokio::spawn({
            let client = client.clone();
            async move { client.get::<Vec<Template>>("templates").await }
        });

        // Log out and back in while the request is still waiting
        tokio::time::sleep(Duration::from_millis(50)).await;
        auth.logout("alice").await;
        auth.login("alice", "pw").await.unwrap();
        let fresh = auth.require_token().unwrap();

        let err = request.await.unwrap().unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized));
        assert_eq!(auth.require_token(), Ok(fresh));
        assert!(auth
            .audit()
            .read_all()
            .iter()
            .all(|e| e.kind != AuditEventKind::SessionExpired));
    }

    #[tokio::test]
    async fn test_not_found_keeps_session() {
        let server = MockServer::start().await;
        let (client, auth) = logged_in(&server).await;

        Mock::given(method("PUT"))
            .and(path("/api/rules/4"))
            .respond_with(ResponseTemplate::new(404).set_body_string("no such rule"))
            .mount(&server)
            .await;

        let err = client
            .put::<Template, _>("rules/4", &serde_json::json!({"enabled": false}))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
        assert!(auth.sessions().is_authenticated());
    }

    #[tokio::test]
    async fn test_request_without_session_is_refused() {
        let server = MockServer::start().await;
        let (client, auth) = logged_in(&server).await;
        auth.logout("alice").await;

        let err = client.get::<Template>("templates").await.unwrap_err();
        assert!(matches!(err, ApiError::NotAuthenticated));
    }

    #[tokio::test]
    async fn test_malformed_body_is_invalid_response() {
        let server = MockServer::start().await;
        let (client, _auth) = logged_in(&server).await;

        Mock::given(method("GET"))
            .and(path("/api/notifications"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = client.get::<Vec<Template>>("notifications").await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidResponse(_)));
    }
}
