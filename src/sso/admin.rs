//! SSO admin API client.
//!
//! Administrative operations run under a service account: every call
//! fetches a fresh admin token with the client-credentials grant and then
//! hits the admin REST API. Used by the account integrity guard and for
//! external-identity lookups.

use async_trait::async_trait;
use log::*;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{broker_error, lookup_error, Error, ErrorKind};
use crate::retry::RetryExecutor;

/// User attribute the platform stores external account ids under.
pub const EXTERNAL_ID_ATTRIBUTE: &str = "external_id";

/// Resolves an external identity (e.g. a chat-platform account id) to an
/// internal user id.
#[async_trait]
pub trait ExternalIdentityDirectory: Send + Sync {
    /// Returns the internal user id linked to the external id, or `None`
    /// when no account is linked.
    async fn resolve_external_id(&self, external_id: &str) -> Result<Option<String>, Error>;
}

/// Request for a service-account admin token.
#[derive(Debug, Serialize)]
struct AdminTokenRequest {
    grant_type: String,
    client_id: String,
    client_secret: String,
}

#[derive(Debug, Deserialize)]
struct AdminTokenResponse {
    access_token: String,
}

/// Account update payload. The admin API merges partial representations.
#[derive(Debug, Serialize)]
struct AccountUpdate {
    enabled: bool,
}

/// User representation returned by the admin search API.
#[derive(Debug, Clone, Deserialize)]
pub struct AdminUser {
    pub id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

/// Client for the SSO admin REST API.
pub struct SsoAdminClient {
    client: reqwest::Client,
    base_url: String,
    realm: String,
    admin_client_id: String,
    admin_client_secret: String,
    retry: RetryExecutor,
}

impl SsoAdminClient {
    /// Create a new admin client sharing the given HTTP client.
    pub fn new(
        client: reqwest::Client,
        base_url: &str,
        realm: &str,
        admin_client_id: &str,
        admin_client_secret: &str,
    ) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            realm: realm.to_string(),
            admin_client_id: admin_client_id.to_string(),
            admin_client_secret: admin_client_secret.to_string(),
            retry: RetryExecutor::for_sso_calls(),
        }
    }

    /// Create an admin client from configuration.
    pub fn from_config(client: reqwest::Client, config: &Config) -> Result<Self, Error> {
        let admin_client_id = config.sso_admin_client_id().ok_or_else(|| {
            broker_error(ErrorKind::Config, "SSO_ADMIN_CLIENT_ID is not configured")
        })?;
        let admin_client_secret = config.sso_admin_client_secret().ok_or_else(|| {
            broker_error(ErrorKind::Config, "SSO_ADMIN_CLIENT_SECRET is not configured")
        })?;

        Ok(Self::new(
            client,
            config.sso_base_url(),
            &config.sso_realm,
            &admin_client_id,
            &admin_client_secret,
        ))
    }

    fn token_url(&self) -> String {
        format!(
            "{}/realms/{}/protocol/openid-connect/token",
            self.base_url,
            urlencoding::encode(&self.realm)
        )
    }

    fn users_url(&self) -> String {
        format!(
            "{}/admin/realms/{}/users",
            self.base_url,
            urlencoding::encode(&self.realm)
        )
    }

    fn user_url(&self, user_id: &str) -> String {
        format!("{}/{}", self.users_url(), urlencoding::encode(user_id))
    }

    /// Fetches a fresh service-account token for one admin call.
    async fn admin_token(&self) -> Result<SecretString, Error> {
        let url = self.token_url();

        self.retry
            .run("SSO admin token", || {
                let client = self.client.clone();
                let url = url.clone();
                let request = AdminTokenRequest {
                    grant_type: "client_credentials".to_string(),
                    client_id: self.admin_client_id.clone(),
                    client_secret: self.admin_client_secret.clone(),
                };
                async move {
                    let response =
                        client.post(&url).form(&request).send().await.map_err(|e| {
                            warn!("Failed to reach the SSO token endpoint: {:?}", e);
                            Error::from(e)
                        })?;

                    if response.status().is_success() {
                        let token: AdminTokenResponse = response.json().await.map_err(|e| {
                            warn!("Failed to parse SSO admin token response: {:?}", e);
                            Error {
                                source: Some(Box::new(e)),
                                error_kind: ErrorKind::MalformedResponse,
                            }
                        })?;
                        Ok(SecretString::from(token.access_token))
                    } else {
                        let status = response.status().as_u16();
                        let error_text = response.text().await.unwrap_or_default();
                        warn!("SSO admin token error ({}): {}", status, error_text);
                        Err(lookup_error(status, &error_text))
                    }
                }
            })
            .await
    }

    /// Searches users whose email matches the given pattern. `*` acts as a
    /// wildcard on the SSO side.
    pub async fn search_users_by_email(&self, pattern: &str) -> Result<Vec<AdminUser>, Error> {
        let admin_token = self.admin_token().await?;
        let url = format!(
            "{}?email={}&briefRepresentation=false",
            self.users_url(),
            urlencoding::encode(pattern)
        );

        debug!("Searching SSO accounts by email pattern");

        self.retry
            .run("SSO admin user search", || {
                let client = self.client.clone();
                let url = url.clone();
                let token = admin_token.clone();
                async move {
                    let response = client
                        .get(&url)
                        .bearer_auth(token.expose_secret())
                        .send()
                        .await
                        .map_err(|e| {
                            warn!("Failed to reach the SSO admin API: {:?}", e);
                            Error::from(e)
                        })?;

                    if response.status().is_success() {
                        response.json::<Vec<AdminUser>>().await.map_err(|e| {
                            warn!("Failed to parse SSO admin user search response: {:?}", e);
                            Error {
                                source: Some(Box::new(e)),
                                error_kind: ErrorKind::MalformedResponse,
                            }
                        })
                    } else {
                        let status = response.status().as_u16();
                        let error_text = response.text().await.unwrap_or_default();
                        warn!("SSO admin user search error ({}): {}", status, error_text);
                        Err(lookup_error(status, &error_text))
                    }
                }
            })
            .await
    }

    /// Looks up the single user carrying `key:value` in their attributes.
    pub async fn find_user_by_attribute(
        &self,
        key: &str,
        value: &str,
    ) -> Result<Option<AdminUser>, Error> {
        let admin_token = self.admin_token().await?;
        let url = format!(
            "{}?q={}&briefRepresentation=false",
            self.users_url(),
            urlencoding::encode(&format!("{}:{}", key, value))
        );

        debug!("Searching SSO accounts by attribute {}", key);

        let mut users = self
            .retry
            .run("SSO admin attribute search", || {
                let client = self.client.clone();
                let url = url.clone();
                let token = admin_token.clone();
                async move {
                    let response = client
                        .get(&url)
                        .bearer_auth(token.expose_secret())
                        .send()
                        .await
                        .map_err(|e| {
                            warn!("Failed to reach the SSO admin API: {:?}", e);
                            Error::from(e)
                        })?;

                    if response.status().is_success() {
                        response.json::<Vec<AdminUser>>().await.map_err(|e| {
                            warn!("Failed to parse SSO admin attribute search: {:?}", e);
                            Error {
                                source: Some(Box::new(e)),
                                error_kind: ErrorKind::MalformedResponse,
                            }
                        })
                    } else {
                        let status = response.status().as_u16();
                        let error_text = response.text().await.unwrap_or_default();
                        warn!("SSO admin attribute search error ({}): {}", status, error_text);
                        Err(lookup_error(status, &error_text))
                    }
                }
            })
            .await?;

        Ok(if users.is_empty() {
            None
        } else {
            Some(users.remove(0))
        })
    }

    /// Disables the account so no new sessions can be opened.
    pub async fn disable_user(&self, user_id: &str) -> Result<(), Error> {
        let admin_token = self.admin_token().await?;
        let url = self.user_url(user_id);

        debug!("Disabling SSO account {}", user_id);

        self.retry
            .run("SSO admin account disable", || {
                let client = self.client.clone();
                let url = url.clone();
                let token = admin_token.clone();
                async move {
                    let response = client
                        .put(&url)
                        .bearer_auth(token.expose_secret())
                        .json(&AccountUpdate { enabled: false })
                        .send()
                        .await
                        .map_err(|e| {
                            warn!("Failed to reach the SSO admin API: {:?}", e);
                            Error::from(e)
                        })?;

                    if response.status().is_success() {
                        Ok(())
                    } else {
                        let status = response.status().as_u16();
                        let error_text = response.text().await.unwrap_or_default();
                        warn!("SSO admin account disable error ({}): {}", status, error_text);
                        Err(lookup_error(status, &error_text))
                    }
                }
            })
            .await?;

        info!("Disabled SSO account {}", user_id);
        Ok(())
    }

    /// Deletes the account. An account that is already gone counts as
    /// deleted.
    pub async fn delete_user(&self, user_id: &str) -> Result<(), Error> {
        let admin_token = self.admin_token().await?;
        let url = self.user_url(user_id);

        debug!("Deleting SSO account {}", user_id);

        self.retry
            .run("SSO admin account delete", || {
                let client = self.client.clone();
                let url = url.clone();
                let token = admin_token.clone();
                async move {
                    let response = client
                        .delete(&url)
                        .bearer_auth(token.expose_secret())
                        .send()
                        .await
                        .map_err(|e| {
                            warn!("Failed to reach the SSO admin API: {:?}", e);
                            Error::from(e)
                        })?;

                    let status = response.status();
                    if status.is_success() {
                        Ok(())
                    } else if status == reqwest::StatusCode::NOT_FOUND {
                        debug!("SSO account {} was already gone", user_id);
                        Ok(())
                    } else {
                        let error_text = response.text().await.unwrap_or_default();
                        warn!(
                            "SSO admin account delete error ({}): {}",
                            status.as_u16(),
                            error_text
                        );
                        Err(lookup_error(status.as_u16(), &error_text))
                    }
                }
            })
            .await?;

        info!("Deleted SSO account {}", user_id);
        Ok(())
    }
}

#[async_trait]
impl ExternalIdentityDirectory for SsoAdminClient {
    async fn resolve_external_id(&self, external_id: &str) -> Result<Option<String>, Error> {
        let user = self
            .find_user_by_attribute(EXTERNAL_ID_ATTRIBUTE, external_id)
            .await?;
        Ok(user.map(|u| u.id))
    }
}
