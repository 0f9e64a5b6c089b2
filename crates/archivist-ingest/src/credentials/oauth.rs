//! Provider token refresh endpoint

use crate::error::CredentialError;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument};

/// Fields of a successful refresh that matter to the stored record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshGrant {
    pub access_token: String,
    /// Present only when the provider rotated the refresh token.
    pub refresh_token: Option<String>,
    /// Lifetime in seconds; `None` means the token does not expire.
    pub expires_in: Option<i64>,
}

/// Exchanges a refresh token for a new access token.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshGrant, CredentialError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    ok: bool,
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    error: Option<String>,
}

/// OAuth `refresh_token` grant over a form-encoded POST.
pub struct OAuthRefresher {
    client: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
}

impl OAuthRefresher {
    pub fn new(
        client: reqwest::Client,
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            client,
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }
}

#[async_trait]
impl TokenRefresher for OAuthRefresher {
    #[instrument(skip_all, fields(url = %self.token_url))]
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshGrant, CredentialError> {
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];

        let response = self.client.post(&self.token_url).form(&form).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CredentialError::RefreshRejected(format!(
                "HTTP {}",
                status.as_u16()
            )));
        }

        let body: TokenResponse = response.json().await?;
        if !body.ok {
            return Err(CredentialError::RefreshRejected(
                body.error.unwrap_or_else(|| "unknown_error".to_string()),
            ));
        }

        let access_token = body
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                CredentialError::RefreshRejected("response missing access_token".to_string())
            })?;

        debug!(expires_in = ?body.expires_in, rotated = body.refresh_token.is_some(), "token refreshed");

        Ok(RefreshGrant {
            access_token,
            refresh_token: body.refresh_token.filter(|t| !t.is_empty()),
            expires_in: body.expires_in,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::{
        matchers::{body_string_contains, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    async fn refresher(server: &MockServer) -> OAuthRefresher {
        OAuthRefresher::new(
            reqwest::Client::new(),
            format!("{}/api/oauth.v2.access", server.uri()),
            "client-1",
            "secret-1",
        )
    }

    #[tokio::test]
    async fn test_successful_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/oauth.v2.access"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=xoxe-r1"))
            .and(body_string_contains("client_id=client-1"))
            .and(body_string_contains("client_secret=secret-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": true,
                "access_token": "xoxe.xoxb-new",
                "refresh_token": "xoxe-r2",
                "expires_in": 43200
            })))
            .expect(1)
            .mount(&server)
            .await;

        let grant = refresher(&server).await.refresh("xoxe-r1").await.unwrap();
        assert_eq!(
            grant,
            RefreshGrant {
                access_token: "xoxe.xoxb-new".to_string(),
                refresh_token: Some("xoxe-r2".to_string()),
                expires_in: Some(43200),
            }
        );
    }

    #[tokio::test]
    async fn test_grant_without_lifetime() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": true,
                "access_token": "xoxb-forever"
            })))
            .mount(&server)
            .await;

        let grant = refresher(&server).await.refresh("r").await.unwrap();
        assert_eq!(grant.expires_in, None);
        assert_eq!(grant.refresh_token, None);
    }

    #[tokio::test]
    async fn test_ok_false_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": false,
                "error": "invalid_refresh_token"
            })))
            .mount(&server)
            .await;

        let err = refresher(&server).await.refresh("r").await.unwrap_err();
        assert!(matches!(err, CredentialError::RefreshRejected(ref m) if m == "invalid_refresh_token"));
    }

    #[tokio::test]
    async fn test_http_error_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = refresher(&server).await.refresh("r").await.unwrap_err();
        assert!(matches!(err, CredentialError::RefreshRejected(ref m) if m == "HTTP 503"));
    }
}
