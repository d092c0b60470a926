//! Credential record types.

use secrecy::{ExposeSecret, SecretString};

use crate::error::Error;
use crate::token::cipher::TokenCipher;

/// Encrypted provider token pair as persisted per user/provider pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedTokenRecord {
    /// Base64 envelope holding the provider access token.
    pub encrypted_access_token: String,
    /// Base64 envelope holding the provider refresh token.
    pub encrypted_refresh_token: String,
    /// Access token expiry as epoch seconds; 0 means never expires.
    pub access_token_expires_at: i64,
    /// Refresh token expiry as epoch seconds; 0 means never expires.
    pub refresh_token_expires_at: i64,
}

impl EncryptedTokenRecord {
    /// Decrypts both envelopes into a transient credentials value.
    pub fn decrypt(&self, cipher: &TokenCipher) -> Result<ProviderCredentials, Error> {
        Ok(ProviderCredentials {
            access_token: SecretString::from(cipher.decrypt_text(&self.encrypted_access_token)?),
            refresh_token: SecretString::from(cipher.decrypt_text(&self.encrypted_refresh_token)?),
            access_token_expires_at: self.access_token_expires_at,
            refresh_token_expires_at: self.refresh_token_expires_at,
        })
    }
}

/// Encrypted SSO offline token, persisted per user in its own namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfflineTokenRecord {
    /// Base64 envelope holding the offline token.
    pub encrypted_offline_token: String,
}

/// Decrypted provider token pair plus expiry metadata. Transient; only the
/// access token should cross the crate boundary.
#[derive(Debug, Clone)]
pub struct ProviderCredentials {
    /// Access token presented to the provider's APIs.
    pub access_token: SecretString,
    /// Refresh token presented to the provider's token endpoint.
    pub refresh_token: SecretString,
    /// Access token expiry as epoch seconds; 0 means never expires.
    pub access_token_expires_at: i64,
    /// Refresh token expiry as epoch seconds; 0 means never expires.
    pub refresh_token_expires_at: i64,
}

impl ProviderCredentials {
    /// Encrypts both tokens into a persistable record.
    pub fn encrypt(&self, cipher: &TokenCipher) -> Result<EncryptedTokenRecord, Error> {
        Ok(EncryptedTokenRecord {
            encrypted_access_token: cipher.encrypt_text(self.access_token.expose_secret())?,
            encrypted_refresh_token: cipher.encrypt_text(self.refresh_token.expose_secret())?,
            access_token_expires_at: self.access_token_expires_at,
            refresh_token_expires_at: self.refresh_token_expires_at,
        })
    }
}

/// First six characters of a token for log diagnostics. Never log more.
pub fn token_prefix(token: &str) -> String {
    token.chars().take(6).collect()
}
