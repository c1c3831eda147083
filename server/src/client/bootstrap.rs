//! Session bootstrap client
//!
//! Two plain request/response calls against the chat service's HTTP
//! API: `generate-token` issues a channel token (and usually the
//! session/connection ids), and `create-chat` is the fallback that
//! mints a session id when the token response lacked one. Any failure
//! here is terminal for the session; the engine never retries setup.

use crate::config::TargetConfig;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("bootstrap request failed: {0}")]
    Request(String),

    #[error("token endpoint returned no usable token")]
    MissingToken,

    #[error("session endpoint returned no session id")]
    MissingSession,
}

impl From<reqwest::Error> for BootstrapError {
    fn from(e: reqwest::Error) -> Self {
        BootstrapError::Request(e.to_string())
    }
}

/// Credentials issued for one session
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub token: String,
    pub client_code: Option<String>,
    pub session_id: Option<String>,
    pub connection_id: Option<String>,
}

/// Session id minted by the fallback call
#[derive(Debug, Clone)]
pub struct SessionGrant {
    pub session_id: String,
}

/// External bootstrap collaborator, behind a trait so tests can fake it
#[async_trait]
pub trait BootstrapClient: Send + Sync {
    async fn issue_token(&self) -> Result<TokenGrant, BootstrapError>;
    async fn create_session(&self, token: &str) -> Result<SessionGrant, BootstrapError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    success: Option<String>,
    token: Option<String>,
    client_code: Option<String>,
    session_id: Option<String>,
    connection_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreateChatResponse {
    session_id: Option<String>,
}

/// Production bootstrap client over the chat service's HTTP API
pub struct HttpBootstrapClient {
    http: reqwest::Client,
    target: TargetConfig,
}

impl HttpBootstrapClient {
    pub fn new(target: TargetConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            target,
        }
    }

    fn token_url(&self) -> String {
        format!("{}/v1/generate-token", self.target.api_base_url)
    }

    fn create_chat_url(&self) -> String {
        format!("{}/v1/create-chat", self.target.api_base_url)
    }

    fn apply_headers(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header("environment", &self.target.environment)
            .header("request_body_encrypted", "0")
            .header("need_encrypted_response", "0")
            .header("enc_version", "V2")
    }
}

#[async_trait]
impl BootstrapClient for HttpBootstrapClient {
    async fn issue_token(&self) -> Result<TokenGrant, BootstrapError> {
        // Ids proposed to the service; it may echo them back or
        // replace them with its own
        let connection_id = Uuid::new_v4().to_string();

        let payload = json!({
            "session_id": Uuid::new_v4().to_string(),
            "connection_id": connection_id,
            "access_key": self.target.access_key,
            "secret_key": self.target.secret_key,
            "kw_args": {
                "user_context": self.target.user_context,
            },
            "meta_data": {
                "browser_unique_identifier": Uuid::new_v4().to_string(),
                "meta": self.target.metadata,
            },
        });

        let response = self
            .apply_headers(self.http.post(self.token_url()))
            .json(&payload)
            .send()
            .await?;
        let body: TokenResponse = response.json().await?;

        match (body.success.as_deref(), body.token) {
            (Some("1"), Some(token)) => Ok(TokenGrant {
                token,
                client_code: body.client_code,
                session_id: body.session_id,
                connection_id: body.connection_id.or(Some(connection_id)),
            }),
            _ => Err(BootstrapError::MissingToken),
        }
    }

    async fn create_session(&self, token: &str) -> Result<SessionGrant, BootstrapError> {
        let response = self
            .apply_headers(self.http.post(self.create_chat_url()))
            .json(&json!({ "token": token }))
            .send()
            .await?;
        let body: CreateChatResponse = response.json().await?;

        body.session_id
            .map(|session_id| SessionGrant { session_id })
            .ok_or(BootstrapError::MissingSession)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_response_parsing() {
        let raw = r#"{"success": "1", "token": "tok", "client_code": "CC"}"#;
        let parsed: TokenResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.success.as_deref(), Some("1"));
        assert_eq!(parsed.token.as_deref(), Some("tok"));
        assert!(parsed.session_id.is_none());
    }

    #[test]
    fn test_endpoint_urls() {
        let mut target = TargetConfig::default();
        target.api_base_url = "https://api.example.com/nuc".to_string();
        let client = HttpBootstrapClient::new(target);
        assert_eq!(client.token_url(), "https://api.example.com/nuc/v1/generate-token");
        assert_eq!(
            client.create_chat_url(),
            "https://api.example.com/nuc/v1/create-chat"
        );
    }
}
