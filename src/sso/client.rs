//! Internal SSO client.
//!
//! Talks to the platform's SSO deployment (a Keycloak-style broker) for
//! identity resolution, the provider-token bridge, offline-token exchange
//! and session revocation. Every call here is wrapped by the bounded
//! retry executor.

use log::*;
use secrecy::SecretString;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{broker_error, lookup_error, Error, ErrorKind};
use crate::provider::{ProviderKind, SecondsField};
use crate::retry::RetryExecutor;
use crate::token::{ProviderCredentials, NEVER_EXPIRES};

/// Caller identity resolved from the SSO userinfo endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct SsoUser {
    /// Stable SSO account id (the `sub` claim).
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub preferred_username: Option<String>,
}

/// Request to exchange an offline token for a fresh session.
#[derive(Debug, Serialize)]
struct OfflineExchangeRequest {
    grant_type: String,
    refresh_token: String,
    client_id: String,
    client_secret: String,
}

/// Session token response from the SSO token endpoint.
#[derive(Debug, Deserialize)]
struct SessionTokenResponse {
    access_token: String,
}

/// Request to invalidate a session.
#[derive(Debug, Serialize)]
struct LogoutRequest {
    client_id: String,
    client_secret: String,
    refresh_token: String,
}

/// Provider-token bridge response. Deployments disagree on field names and
/// on whether expiry stamps are relative or absolute, so every spelling is
/// accepted.
#[derive(Debug, Default, Deserialize)]
struct BridgeTokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<SecondsField>,
    #[serde(default)]
    access_token_expires_at: Option<SecondsField>,
    #[serde(default, alias = "refresh_expires_in")]
    refresh_token_expires_in: Option<SecondsField>,
}

impl BridgeTokenResponse {
    /// Normalizes the bridge response into credentials with absolute
    /// expiry stamps. `now` is epoch seconds.
    fn into_credentials(self, now: i64) -> Result<ProviderCredentials, Error> {
        let access_token = self.access_token.filter(|t| !t.is_empty()).ok_or_else(|| {
            broker_error(
                ErrorKind::MalformedResponse,
                "bridge response missing access_token",
            )
        })?;
        let refresh_token = self.refresh_token.filter(|t| !t.is_empty()).ok_or_else(|| {
            broker_error(
                ErrorKind::MalformedResponse,
                "bridge response missing refresh_token",
            )
        })?;

        let access_token_expires_at = match (&self.access_token_expires_at, &self.expires_in) {
            // Absolute stamp wins when both are present.
            (Some(absolute), _) => field_secs(absolute, "access_token_expires_at")?,
            (None, Some(relative)) => now + field_secs(relative, "expires_in")?,
            (None, None) => NEVER_EXPIRES,
        };
        let refresh_token_expires_at = match &self.refresh_token_expires_in {
            Some(relative) => now + field_secs(relative, "refresh_token_expires_in")?,
            None => NEVER_EXPIRES,
        };

        Ok(ProviderCredentials {
            access_token: SecretString::from(access_token),
            refresh_token: SecretString::from(refresh_token),
            access_token_expires_at,
            refresh_token_expires_at,
        })
    }
}

fn field_secs(field: &SecondsField, name: &str) -> Result<i64, Error> {
    field.as_secs().ok_or_else(|| {
        broker_error(
            ErrorKind::MalformedResponse,
            &format!("{} is not an integer number of seconds", name),
        )
    })
}

/// True when an SSO token-endpoint error body says the session behind the
/// presented token no longer exists.
fn is_session_gone(body: &str) -> bool {
    let lower = body.to_lowercase();
    lower.contains("invalid_grant") || lower.contains("session not found")
}

/// Parses a body whose encoding depends on what the SSO stored upstream.
fn parse_body<T: DeserializeOwned>(body: &str, content_type: Option<&str>) -> Result<T, Error> {
    let from_json = |body: &str| {
        serde_json::from_str(body).map_err(|e| Error {
            source: Some(Box::new(e)),
            error_kind: ErrorKind::MalformedResponse,
        })
    };
    let from_form = |body: &str| {
        serde_urlencoded::from_str(body).map_err(|e| Error {
            source: Some(Box::new(e)),
            error_kind: ErrorKind::MalformedResponse,
        })
    };
    match content_type {
        Some(ct) if ct.contains("json") => from_json(body),
        Some(ct) if ct.contains("x-www-form-urlencoded") => from_form(body),
        _ => from_json(body).or_else(|_: Error| from_form(body)),
    }
}

/// Client for the internal SSO deployment.
pub struct SsoClient {
    client: reqwest::Client,
    base_url: String,
    realm: String,
    client_id: String,
    client_secret: String,
    retry: RetryExecutor,
}

impl SsoClient {
    /// Create a new SSO client sharing the given HTTP client.
    pub fn new(
        client: reqwest::Client,
        base_url: &str,
        realm: &str,
        client_id: &str,
        client_secret: &str,
    ) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            realm: realm.to_string(),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            retry: RetryExecutor::for_sso_calls(),
        }
    }

    /// Create an SSO client from configuration.
    pub fn from_config(client: reqwest::Client, config: &Config) -> Result<Self, Error> {
        let client_id = config
            .sso_client_id()
            .ok_or_else(|| broker_error(ErrorKind::Config, "SSO_CLIENT_ID is not configured"))?;
        let client_secret = config
            .sso_client_secret()
            .ok_or_else(|| broker_error(ErrorKind::Config, "SSO_CLIENT_SECRET is not configured"))?;

        Ok(Self::new(
            client,
            config.sso_base_url(),
            &config.sso_realm,
            &client_id,
            &client_secret,
        ))
    }

    fn userinfo_url(&self) -> String {
        format!(
            "{}/realms/{}/protocol/openid-connect/userinfo",
            self.base_url,
            urlencoding::encode(&self.realm)
        )
    }

    fn token_url(&self) -> String {
        format!(
            "{}/realms/{}/protocol/openid-connect/token",
            self.base_url,
            urlencoding::encode(&self.realm)
        )
    }

    fn logout_url(&self) -> String {
        format!(
            "{}/realms/{}/protocol/openid-connect/logout",
            self.base_url,
            urlencoding::encode(&self.realm)
        )
    }

    fn bridge_url(&self, provider: ProviderKind) -> String {
        format!(
            "{}/realms/{}/broker/{}/token",
            self.base_url,
            urlencoding::encode(&self.realm),
            provider.as_str()
        )
    }

    /// Resolves the caller's identity from a session token.
    pub async fn resolve_user(&self, session_token: &str) -> Result<SsoUser, Error> {
        let url = self.userinfo_url();

        debug!("Resolving caller identity via SSO userinfo");

        self.retry
            .run("SSO userinfo", || {
                let client = self.client.clone();
                let url = url.clone();
                let token = session_token.to_string();
                async move {
                    let response = client
                        .get(&url)
                        .bearer_auth(&token)
                        .send()
                        .await
                        .map_err(|e| {
                            warn!("Failed to reach SSO userinfo endpoint: {:?}", e);
                            Error::from(e)
                        })?;

                    if response.status().is_success() {
                        response.json::<SsoUser>().await.map_err(|e| {
                            warn!("Failed to parse SSO userinfo response: {:?}", e);
                            Error {
                                source: Some(Box::new(e)),
                                error_kind: ErrorKind::MalformedResponse,
                            }
                        })
                    } else {
                        let status = response.status().as_u16();
                        let error_text = response.text().await.unwrap_or_default();
                        warn!("SSO userinfo error ({}): {}", status, error_text);
                        Err(lookup_error(status, &error_text))
                    }
                }
            })
            .await
    }

    /// Pulls the current provider token pair from the SSO's token bridge.
    pub async fn fetch_provider_tokens(
        &self,
        provider: ProviderKind,
        session_token: &str,
    ) -> Result<ProviderCredentials, Error> {
        let url = self.bridge_url(provider);

        debug!("Fetching {} tokens from the SSO bridge", provider.as_str());

        let raw: BridgeTokenResponse = self
            .retry
            .run("SSO provider-token bridge", || {
                let client = self.client.clone();
                let url = url.clone();
                let token = session_token.to_string();
                async move {
                    let response = client
                        .get(&url)
                        .bearer_auth(&token)
                        .send()
                        .await
                        .map_err(|e| {
                            warn!("Failed to reach the SSO token bridge: {:?}", e);
                            Error::from(e)
                        })?;

                    let status = response.status();
                    let content_type = response
                        .headers()
                        .get(reqwest::header::CONTENT_TYPE)
                        .and_then(|v| v.to_str().ok())
                        .map(|v| v.to_string());
                    let body = response.text().await.map_err(|e| {
                        warn!("Failed to read the SSO token bridge response: {:?}", e);
                        Error::from(e)
                    })?;

                    if !status.is_success() {
                        warn!("SSO token bridge error ({}): {}", status, body);
                        return Err(lookup_error(status.as_u16(), &body));
                    }

                    parse_body(&body, content_type.as_deref())
                }
            })
            .await?;

        let credentials = raw.into_credentials(chrono::Utc::now().timestamp())?;
        info!(
            "Fetched fresh {} tokens from the SSO bridge",
            provider.as_str()
        );
        Ok(credentials)
    }

    /// Exchanges a long-lived offline token for a fresh session token.
    ///
    /// A dead session (`invalid_grant` / "session not found") comes back as
    /// `SessionExpired` so callers can prompt re-authentication instead of
    /// retrying.
    pub async fn exchange_offline_token(&self, offline_token: &str) -> Result<SecretString, Error> {
        let url = self.token_url();

        debug!("Exchanging offline token for a fresh SSO session");

        self.retry
            .run("SSO offline-token exchange", || {
                let client = self.client.clone();
                let url = url.clone();
                let request = OfflineExchangeRequest {
                    grant_type: "refresh_token".to_string(),
                    refresh_token: offline_token.to_string(),
                    client_id: self.client_id.clone(),
                    client_secret: self.client_secret.clone(),
                };
                async move {
                    let response =
                        client.post(&url).form(&request).send().await.map_err(|e| {
                            warn!("Failed to reach the SSO token endpoint: {:?}", e);
                            Error::from(e)
                        })?;

                    if response.status().is_success() {
                        let session: SessionTokenResponse =
                            response.json().await.map_err(|e| {
                                warn!("Failed to parse SSO token response: {:?}", e);
                                Error {
                                    source: Some(Box::new(e)),
                                    error_kind: ErrorKind::MalformedResponse,
                                }
                            })?;
                        Ok(SecretString::from(session.access_token))
                    } else {
                        let status = response.status().as_u16();
                        let error_text = response.text().await.unwrap_or_default();
                        if is_session_gone(&error_text) {
                            info!("Offline token no longer maps to a live SSO session");
                            return Err(broker_error(
                                ErrorKind::SessionExpired,
                                "offline session is gone; the user must sign in again",
                            ));
                        }
                        warn!("SSO offline-token exchange error ({}): {}", status, error_text);
                        Err(lookup_error(status, &error_text))
                    }
                }
            })
            .await
    }

    /// Invalidates the session behind the given refresh token.
    pub async fn revoke_session(&self, refresh_token: &str) -> Result<(), Error> {
        let url = self.logout_url();

        debug!("Revoking SSO session");

        self.retry
            .run("SSO logout", || {
                let client = self.client.clone();
                let url = url.clone();
                let request = LogoutRequest {
                    client_id: self.client_id.clone(),
                    client_secret: self.client_secret.clone(),
                    refresh_token: refresh_token.to_string(),
                };
                async move {
                    let response =
                        client.post(&url).form(&request).send().await.map_err(|e| {
                            warn!("Failed to reach the SSO logout endpoint: {:?}", e);
                            Error::from(e)
                        })?;

                    if response.status().is_success() {
                        info!("Successfully revoked SSO session");
                        Ok(())
                    } else {
                        let status = response.status().as_u16();
                        let error_text = response.text().await.unwrap_or_default();
                        warn!("SSO logout error ({}): {}", status, error_text);
                        Err(lookup_error(status, &error_text))
                    }
                }
            })
            .await
    }
}
