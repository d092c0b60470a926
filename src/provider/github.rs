//! GitHub token-endpoint adapter.

use async_trait::async_trait;
use chrono::Utc;
use log::*;
use serde::Serialize;

use crate::config::Config;
use crate::error::{broker_error, Error, ErrorKind};
use crate::provider::{ProviderKind, RawTokenResponse, RefreshAdapter};
use crate::token::ProviderCredentials;

/// Request to refresh an access token.
#[derive(Debug, Serialize)]
struct TokenRefreshRequest {
    client_id: String,
    client_secret: String,
    grant_type: String,
    refresh_token: String,
}

/// GitHub client refreshing linked-account credentials.
///
/// GitHub answers with URL-encoded form data or JSON depending on the
/// request headers and deployment; both encodings are detected and
/// normalized.
pub struct GithubAdapter {
    client: reqwest::Client,
    client_id: String,
    client_secret: String,
    token_url: String,
}

impl GithubAdapter {
    /// Create a new GitHub adapter sharing the given HTTP client.
    pub fn new(
        client: reqwest::Client,
        client_id: &str,
        client_secret: &str,
        token_url: &str,
    ) -> Self {
        Self {
            client,
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            token_url: token_url.to_string(),
        }
    }

    /// Create a GitHub adapter from configuration.
    pub fn from_config(client: reqwest::Client, config: &Config) -> Result<Self, Error> {
        let client_id = config
            .github_client_id()
            .ok_or_else(|| broker_error(ErrorKind::Config, "GITHUB_CLIENT_ID is not configured"))?;
        let client_secret = config.github_client_secret().ok_or_else(|| {
            broker_error(ErrorKind::Config, "GITHUB_CLIENT_SECRET is not configured")
        })?;

        Ok(Self::new(
            client,
            &client_id,
            &client_secret,
            config.github_token_url(),
        ))
    }
}

#[async_trait]
impl RefreshAdapter for GithubAdapter {
    fn provider(&self) -> ProviderKind {
        ProviderKind::Github
    }

    async fn refresh(&self, refresh_token: &str) -> Result<ProviderCredentials, Error> {
        let request = TokenRefreshRequest {
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            grant_type: "refresh_token".to_string(),
            refresh_token: refresh_token.to_string(),
        };

        debug!("Refreshing GitHub access token");

        let response = self
            .client
            .post(&self.token_url)
            .form(&request)
            .send()
            .await
            .map_err(|e| {
                warn!("Failed to reach GitHub token endpoint: {:?}", e);
                Error::from(e)
            })?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());
        let body = response.text().await.map_err(|e| {
            warn!("Failed to read GitHub token response: {:?}", e);
            Error::from(e)
        })?;

        let raw = match RawTokenResponse::from_detected(&body, content_type.as_deref()) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Unparsable GitHub token response with status {}", status);
                return Err(e);
            }
        };

        // GitHub reports token-endpoint errors in the body, sometimes under
        // a 200 status; a failing status without an error field is reported
        // by status alone.
        if raw.error.is_none() && !status.is_success() {
            warn!("GitHub token refresh failed with status {}", status);
            return Err(broker_error(
                ErrorKind::MalformedResponse,
                &format!("GitHub token endpoint returned status {}", status.as_u16()),
            ));
        }

        match raw.into_credentials(Utc::now().timestamp()) {
            Ok(credentials) => {
                info!("Successfully refreshed GitHub access token");
                Ok(credentials)
            }
            Err(e) => {
                warn!("GitHub token refresh failed: {}", e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use secrecy::ExposeSecret;

    fn adapter(server_url: &str) -> GithubAdapter {
        GithubAdapter::new(
            reqwest::Client::new(),
            "gh-id",
            "gh-secret",
            server_url,
        )
    }

    const EXPECTED_BODY: &str =
        "client_id=gh-id&client_secret=gh-secret&grant_type=refresh_token&refresh_token=rt-1";

    #[tokio::test]
    async fn test_refresh_with_json_response() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_header("content-type", "application/x-www-form-urlencoded")
            .match_body(Matcher::Exact(EXPECTED_BODY.to_string()))
            .with_status(200)
            .with_header("content-type", "application/json; charset=utf-8")
            .with_body(
                r#"{"access_token":"gho_new","refresh_token":"ghr_new","expires_in":28800,"refresh_token_expires_in":15897600,"token_type":"bearer"}"#,
            )
            .create_async()
            .await;

        let before = Utc::now().timestamp();
        let credentials = adapter(&server.url()).refresh("rt-1").await.unwrap();
        let after = Utc::now().timestamp();

        mock.assert_async().await;
        assert_eq!(credentials.access_token.expose_secret(), "gho_new");
        assert_eq!(credentials.refresh_token.expose_secret(), "ghr_new");
        assert!(credentials.access_token_expires_at >= before + 28_800);
        assert!(credentials.access_token_expires_at <= after + 28_800);
        assert!(credentials.refresh_token_expires_at >= before + 15_897_600);
    }

    #[tokio::test]
    async fn test_refresh_with_form_encoded_response() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "application/x-www-form-urlencoded; charset=utf-8")
            .with_body(
                "access_token=gho_new&refresh_token=ghr_new&expires_in=28800&refresh_token_expires_in=15897600&token_type=bearer",
            )
            .create_async()
            .await;

        let before = Utc::now().timestamp();
        let credentials = adapter(&server.url()).refresh("rt-1").await.unwrap();

        mock.assert_async().await;
        assert_eq!(credentials.access_token.expose_secret(), "gho_new");
        assert!(credentials.access_token_expires_at >= before + 28_800);
    }

    #[tokio::test]
    async fn test_bad_refresh_token_is_expired_credential() {
        let mut server = mockito::Server::new_async().await;
        // GitHub delivers this error form-encoded under a 200 status.
        let _mock = server
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "application/x-www-form-urlencoded; charset=utf-8")
            .with_body("error=bad_refresh_token&error_description=The+refresh+token+passed+is+incorrect+or+expired.")
            .create_async()
            .await;

        let err = adapter(&server.url()).refresh("rt-dead").await.unwrap_err();
        assert_eq!(err.error_kind, ErrorKind::ExpiredCredential);
    }

    #[tokio::test]
    async fn test_missing_refresh_token_is_malformed() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"gho_new","expires_in":28800}"#)
            .create_async()
            .await;

        let err = adapter(&server.url()).refresh("rt-1").await.unwrap_err();
        assert_eq!(err.error_kind, ErrorKind::MalformedResponse);
    }

    #[tokio::test]
    async fn test_error_status_without_error_field_is_malformed() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/")
            .with_status(502)
            .with_header("content-type", "text/html")
            .with_body("<html>bad gateway</html>")
            .create_async()
            .await;

        let err = adapter(&server.url()).refresh("rt-1").await.unwrap_err();
        assert_eq!(err.error_kind, ErrorKind::MalformedResponse);
    }

    #[tokio::test]
    async fn test_connection_failure_is_transient() {
        // Nothing is listening on this port.
        let adapter = adapter("http://127.0.0.1:9");
        let err = adapter.refresh("rt-1").await.unwrap_err();
        assert_eq!(err.error_kind, ErrorKind::TransientNetwork);
    }
}
