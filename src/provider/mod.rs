//! Provider token-endpoint adapters.
//!
//! Each linked provider refreshes credentials through its own wire shape;
//! the adapters normalize every variation into one `ProviderCredentials`
//! value with absolute expiry stamps.

mod bitbucket;
mod github;
mod gitlab;

pub use bitbucket::BitbucketAdapter;
pub use github::GithubAdapter;
pub use gitlab::GitlabAdapter;

use std::fmt;

use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::error::{broker_error, Error, ErrorKind};
use crate::token::{ProviderCredentials, NEVER_EXPIRES};

/// The identity / version-control providers accounts can be linked to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Github,
    Gitlab,
    Bitbucket,
}

impl ProviderKind {
    /// Get the provider identifier string. Doubles as the SSO
    /// identity-provider alias on the token bridge.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Github => "github",
            ProviderKind::Gitlab => "gitlab",
            ProviderKind::Bitbucket => "bitbucket",
        }
    }
}

/// Trait for provider token-endpoint clients.
///
/// Implementations exchange a refresh token for a fresh credential pair,
/// already normalized to absolute epoch expiry stamps. Failures surface as
/// `ExpiredCredential` (refresh token rejected), `TransientNetwork`
/// (connection-level) or `MalformedResponse` (undecodable body).
#[async_trait]
pub trait RefreshAdapter: Send + Sync {
    /// Get the provider kind this adapter serves.
    fn provider(&self) -> ProviderKind;

    /// Exchange a refresh token for new credentials.
    async fn refresh(&self, refresh_token: &str) -> Result<ProviderCredentials, Error>;
}

impl fmt::Debug for dyn RefreshAdapter + '_ {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshAdapter")
            .field("provider", &self.provider())
            .finish()
    }
}

/// Seconds value that may arrive as a JSON number or a string.
/// Form-encoded bodies always deliver strings; some JSON deployments do too.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SecondsField {
    Number(i64),
    Text(String),
}

impl SecondsField {
    pub(crate) fn as_secs(&self) -> Option<i64> {
        match self {
            SecondsField::Number(n) => Some(*n),
            SecondsField::Text(s) => s.trim().parse().ok(),
        }
    }
}

/// Token-endpoint response before normalization, accepting every field
/// spelling and encoding the three providers produce.
#[derive(Debug, Default, Deserialize)]
pub struct RawTokenResponse {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<SecondsField>,
    #[serde(default, alias = "refresh_expires_in")]
    pub refresh_token_expires_in: Option<SecondsField>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

impl RawTokenResponse {
    /// Parses a JSON token-endpoint body.
    pub fn from_json(body: &str) -> Result<RawTokenResponse, Error> {
        serde_json::from_str(body).map_err(|e| Error {
            source: Some(Box::new(e)),
            error_kind: ErrorKind::MalformedResponse,
        })
    }

    /// Parses a URL-encoded token-endpoint body.
    pub fn from_form(body: &str) -> Result<RawTokenResponse, Error> {
        serde_urlencoded::from_str(body).map_err(|e| Error {
            source: Some(Box::new(e)),
            error_kind: ErrorKind::MalformedResponse,
        })
    }

    /// Parses a body whose encoding is only known at runtime. The
    /// Content-Type header decides when present; otherwise JSON is tried
    /// first with a form fallback.
    pub fn from_detected(body: &str, content_type: Option<&str>) -> Result<RawTokenResponse, Error> {
        match content_type {
            Some(ct) if ct.contains("json") => Self::from_json(body),
            Some(ct) if ct.contains("x-www-form-urlencoded") => Self::from_form(body),
            _ => Self::from_json(body).or_else(|_| Self::from_form(body)),
        }
    }

    /// Normalizes the wire response into credentials with absolute expiry
    /// stamps. `now` is epoch seconds.
    ///
    /// An `error=bad_refresh_token` body means the provider invalidated the
    /// refresh token and the stored credential is beyond recovery. Missing
    /// token fields and unparsable expiry values are malformed responses.
    pub fn into_credentials(self, now: i64) -> Result<ProviderCredentials, Error> {
        if let Some(error) = &self.error {
            if error == "bad_refresh_token" {
                return Err(broker_error(
                    ErrorKind::ExpiredCredential,
                    "provider rejected the refresh token",
                ));
            }
            let description = self.error_description.as_deref().unwrap_or("");
            return Err(broker_error(
                ErrorKind::MalformedResponse,
                &format!("token endpoint returned error '{}': {}", error, description),
            ));
        }

        let access_token = self
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                broker_error(ErrorKind::MalformedResponse, "token response missing access_token")
            })?;
        let refresh_token = self
            .refresh_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                broker_error(ErrorKind::MalformedResponse, "token response missing refresh_token")
            })?;

        let access_token_expires_at = absolute_expiry(self.expires_in, "expires_in", now)?;
        let refresh_token_expires_at =
            absolute_expiry(self.refresh_token_expires_in, "refresh_token_expires_in", now)?;

        Ok(ProviderCredentials {
            access_token: SecretString::from(access_token),
            refresh_token: SecretString::from(refresh_token),
            access_token_expires_at,
            refresh_token_expires_at,
        })
    }
}

/// Converts a relative seconds-from-now field into an absolute epoch stamp.
/// An absent field means the token never expires.
fn absolute_expiry(field: Option<SecondsField>, name: &str, now: i64) -> Result<i64, Error> {
    match field {
        None => Ok(NEVER_EXPIRES),
        Some(value) => value
            .as_secs()
            .map(|secs| now + secs)
            .ok_or_else(|| {
                broker_error(
                    ErrorKind::MalformedResponse,
                    &format!("{} is not an integer number of seconds", name),
                )
            }),
    }
}
