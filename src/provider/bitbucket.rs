//! Bitbucket token-endpoint adapter.

use async_trait::async_trait;
use chrono::Utc;
use log::*;
use serde::Serialize;

use crate::config::Config;
use crate::error::{broker_error, Error, ErrorKind};
use crate::provider::{ProviderKind, RawTokenResponse, RefreshAdapter};
use crate::token::ProviderCredentials;

/// Request to refresh an access token. Client credentials travel in the
/// Basic auth header, not the body.
#[derive(Debug, Serialize)]
struct TokenRefreshRequest {
    grant_type: String,
    refresh_token: String,
}

/// Bitbucket client refreshing linked-account credentials. Authenticates
/// with HTTP Basic auth; responses are JSON.
pub struct BitbucketAdapter {
    client: reqwest::Client,
    client_id: String,
    client_secret: String,
    token_url: String,
}

impl BitbucketAdapter {
    /// Create a new Bitbucket adapter sharing the given HTTP client.
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

    /// Create a Bitbucket adapter from configuration.
    pub fn from_config(client: reqwest::Client, config: &Config) -> Result<Self, Error> {
        let client_id = config.bitbucket_client_id().ok_or_else(|| {
            broker_error(ErrorKind::Config, "BITBUCKET_CLIENT_ID is not configured")
        })?;
        let client_secret = config.bitbucket_client_secret().ok_or_else(|| {
            broker_error(ErrorKind::Config, "BITBUCKET_CLIENT_SECRET is not configured")
        })?;

        Ok(Self::new(
            client,
            &client_id,
            &client_secret,
            config.bitbucket_token_url(),
        ))
    }
}

#[async_trait]
impl RefreshAdapter for BitbucketAdapter {
    fn provider(&self) -> ProviderKind {
        ProviderKind::Bitbucket
    }

    async fn refresh(&self, refresh_token: &str) -> Result<ProviderCredentials, Error> {
        let request = TokenRefreshRequest {
            grant_type: "refresh_token".to_string(),
            refresh_token: refresh_token.to_string(),
        };

        debug!("Refreshing Bitbucket access token");

        let response = self
            .client
            .post(&self.token_url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&request)
            .send()
            .await
            .map_err(|e| {
                warn!("Failed to reach Bitbucket token endpoint: {:?}", e);
                Error::from(e)
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            warn!("Failed to read Bitbucket token response: {:?}", e);
            Error::from(e)
        })?;

        let raw = match RawTokenResponse::from_json(&body) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Unparsable Bitbucket token response with status {}", status);
                return Err(e);
            }
        };

        if raw.error.is_none() && !status.is_success() {
            warn!("Bitbucket token refresh failed with status {}", status);
            return Err(broker_error(
                ErrorKind::MalformedResponse,
                &format!("Bitbucket token endpoint returned status {}", status.as_u16()),
            ));
        }

        match raw.into_credentials(Utc::now().timestamp()) {
            Ok(credentials) => {
                info!("Successfully refreshed Bitbucket access token");
                Ok(credentials)
            }
            Err(e) => {
                warn!("Bitbucket token refresh failed: {}", e);
                Err(e)
            }
        }
    }
}
