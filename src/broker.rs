//! Credential lifecycle broker.
//!
//! The broker is the only entry point other subsystems should use for
//! provider credentials. It resolves the caller through the SSO, loads the
//! encrypted record, applies the expiry policy, refreshes through the
//! matching provider adapter when needed and persists the new pair before
//! handing the access token out.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use log::*;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::Mutex;

use crate::config::Config;
use crate::error::{broker_error, Error, ErrorKind};
use crate::provider::{
    BitbucketAdapter, GithubAdapter, GitlabAdapter, ProviderKind, RefreshAdapter,
};
use crate::sso::{ExternalIdentityDirectory, SsoAdminClient, SsoClient};
use crate::token::{
    is_fully_expired, needs_refresh, token_prefix, OfflineTokenRecord, TokenCipher, TokenStore,
};

/// Broker that owns credential retrieval, refresh and revocation.
///
/// Refreshes for the same user/provider pair are serialized behind a
/// per-pair lock with a reload after acquisition, so concurrent callers
/// trigger at most one upstream refresh and the losers pick up the stored
/// result.
pub struct IdentityBroker {
    store: Arc<dyn TokenStore>,
    cipher: TokenCipher,
    sso: SsoClient,
    directory: Arc<dyn ExternalIdentityDirectory>,
    adapters: Vec<Arc<dyn RefreshAdapter>>,
    refresh_locks: DashMap<String, Arc<Mutex<()>>>,
}

// Manual impl: the collaborator fields are trait objects without a Debug
// bound, so the derive does not apply.
impl fmt::Debug for IdentityBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityBroker").finish_non_exhaustive()
    }
}

impl IdentityBroker {
    /// Create a new broker over the given collaborators.
    pub fn new(
        store: Arc<dyn TokenStore>,
        cipher: TokenCipher,
        sso: SsoClient,
        directory: Arc<dyn ExternalIdentityDirectory>,
        adapters: Vec<Arc<dyn RefreshAdapter>>,
    ) -> Self {
        Self {
            store,
            cipher,
            sso,
            directory,
            adapters,
            refresh_locks: DashMap::new(),
        }
    }

    /// Wires a broker from configuration over the given store.
    ///
    /// The SSO admin service account doubles as the external-identity
    /// directory. Providers without configured client credentials get no
    /// adapter; asking for their tokens fails with a configuration error
    /// once a refresh is due.
    pub fn from_config(config: &Config, store: Arc<dyn TokenStore>) -> Result<Self, Error> {
        let client = reqwest::Client::builder().use_rustls_tls().build()?;

        let master_secret = config.token_encryption_secret().ok_or_else(|| {
            broker_error(ErrorKind::Config, "TOKEN_ENCRYPTION_SECRET is not configured")
        })?;
        let cipher = TokenCipher::new(&master_secret);

        let sso = SsoClient::from_config(client.clone(), config)?;
        let admin = Arc::new(SsoAdminClient::from_config(client.clone(), config)?);

        let mut adapters: Vec<Arc<dyn RefreshAdapter>> = Vec::new();
        if config.github_client_id().is_some() && config.github_client_secret().is_some() {
            adapters.push(Arc::new(GithubAdapter::from_config(client.clone(), config)?));
        } else {
            info!("GitHub client credentials not configured, refresh adapter disabled");
        }
        if config.gitlab_client_id().is_some() && config.gitlab_client_secret().is_some() {
            adapters.push(Arc::new(GitlabAdapter::from_config(client.clone(), config)?));
        } else {
            info!("GitLab client credentials not configured, refresh adapter disabled");
        }
        if config.bitbucket_client_id().is_some() && config.bitbucket_client_secret().is_some() {
            adapters.push(Arc::new(BitbucketAdapter::from_config(client, config)?));
        } else {
            info!("Bitbucket client credentials not configured, refresh adapter disabled");
        }

        Ok(Self::new(store, cipher, sso, admin, adapters))
    }

    fn adapter_for(&self, provider: ProviderKind) -> Result<&dyn RefreshAdapter, Error> {
        self.adapters
            .iter()
            .find(|a| a.provider() == provider)
            .map(|a| a.as_ref())
            .ok_or_else(|| {
                broker_error(
                    ErrorKind::Config,
                    &format!("no refresh adapter registered for {}", provider.as_str()),
                )
            })
    }

    /// Returns a currently valid provider access token for the caller
    /// behind the session token, refreshing the stored pair first when the
    /// expiry policy demands it.
    pub async fn get_provider_token(
        &self,
        session_token: &str,
        provider: ProviderKind,
    ) -> Result<SecretString, Error> {
        let user = self.sso.resolve_user(session_token).await?;
        self.get_token_for_user(&user.sub, provider).await
    }

    /// Pulls the current token pair for the provider from the SSO bridge
    /// and persists it encrypted. Overwrites any previous record.
    pub async fn store_provider_tokens(
        &self,
        provider: ProviderKind,
        user_id: &str,
        session_token: &str,
    ) -> Result<(), Error> {
        let credentials = self.sso.fetch_provider_tokens(provider, session_token).await?;
        let record = credentials.encrypt(&self.cipher)?;
        self.store.store(user_id, provider, record).await?;

        info!("Stored {} credentials for user {}", provider.as_str(), user_id);
        Ok(())
    }

    /// Like [`IdentityBroker::get_provider_token`], but authenticates with
    /// a long-lived offline token instead of a live session.
    pub async fn get_provider_token_from_offline_token(
        &self,
        offline_token: &str,
        provider: ProviderKind,
    ) -> Result<SecretString, Error> {
        let session_token = self.sso.exchange_offline_token(offline_token).await?;
        self.get_provider_token(session_token.expose_secret(), provider)
            .await
    }

    /// Resolves an external account id to a platform user and returns a
    /// provider token through the stored offline token.
    ///
    /// An external id with no linked platform account yields `Ok(None)`.
    pub async fn get_provider_token_from_external_user_id(
        &self,
        external_id: &str,
        provider: ProviderKind,
    ) -> Result<Option<SecretString>, Error> {
        let user_id = match self.directory.resolve_external_id(external_id).await? {
            Some(user_id) => user_id,
            None => {
                debug!("No platform account is linked to the external id");
                return Ok(None);
            }
        };

        let record = self.store.get_offline(&user_id).await?.ok_or_else(|| {
            broker_error(
                ErrorKind::CredentialNotFound,
                "no offline token stored for the user",
            )
        })?;
        let offline_token = self.cipher.decrypt_text(&record.encrypted_offline_token)?;

        let token = self
            .get_provider_token_from_offline_token(&offline_token, provider)
            .await?;
        Ok(Some(token))
    }

    /// Encrypts and persists an offline token captured during the
    /// offline-consent flow.
    pub async fn store_offline_token(
        &self,
        user_id: &str,
        offline_token: &str,
    ) -> Result<(), Error> {
        let record = OfflineTokenRecord {
            encrypted_offline_token: self.cipher.encrypt_text(offline_token)?,
        };
        self.store.store_offline(user_id, record).await?;

        info!("Stored offline token for user {}", user_id);
        Ok(())
    }

    /// Invalidates the SSO session behind the given refresh token.
    pub async fn revoke_session(&self, refresh_token: &str) -> Result<(), Error> {
        self.sso.revoke_session(refresh_token).await
    }

    /// Cache-or-refresh for one user/provider pair.
    async fn get_token_for_user(
        &self,
        user_id: &str,
        provider: ProviderKind,
    ) -> Result<SecretString, Error> {
        let record = self.store.get(user_id, provider).await?.ok_or_else(|| {
            broker_error(
                ErrorKind::CredentialNotFound,
                "no credentials stored for this provider",
            )
        })?;

        let now = chrono::Utc::now().timestamp();
        if is_fully_expired(record.refresh_token_expires_at, now) {
            return Err(broker_error(
                ErrorKind::ExpiredCredential,
                "refresh token has expired; the provider must be linked again",
            ));
        }
        if !needs_refresh(record.access_token_expires_at, now) {
            return Ok(record.decrypt(&self.cipher)?.access_token);
        }

        debug!(
            "{} access token for user {} needs a refresh",
            provider.as_str(),
            user_id
        );

        // Serialize refreshes per user/provider pair. Providers rotate
        // refresh tokens, so a second concurrent refresh would present an
        // already-consumed token and fail.
        let lock_key = format!("{}:{}", user_id, provider.as_str());
        let lock = self
            .refresh_locks
            .entry(lock_key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // Reload: another caller may have refreshed while we waited.
        let record = self.store.get(user_id, provider).await?.ok_or_else(|| {
            broker_error(
                ErrorKind::CredentialNotFound,
                "credentials disappeared during refresh",
            )
        })?;
        let now = chrono::Utc::now().timestamp();
        if is_fully_expired(record.refresh_token_expires_at, now) {
            return Err(broker_error(
                ErrorKind::ExpiredCredential,
                "refresh token has expired; the provider must be linked again",
            ));
        }
        if !needs_refresh(record.access_token_expires_at, now) {
            debug!(
                "{} token for user {} was refreshed by another caller",
                provider.as_str(),
                user_id
            );
            return Ok(record.decrypt(&self.cipher)?.access_token);
        }

        let credentials = record.decrypt(&self.cipher)?;
        let adapter = self.adapter_for(provider)?;
        let refreshed = adapter
            .refresh(credentials.refresh_token.expose_secret())
            .await?;

        // Persist before handing the token out. A token the caller holds
        // but the store does not would be lost on the next refresh.
        let new_record = refreshed.encrypt(&self.cipher)?;
        self.store.store(user_id, provider, new_record).await?;

        debug!(
            "Refreshed {} token {}... for user {}",
            provider.as_str(),
            token_prefix(refreshed.access_token.expose_secret()),
            user_id
        );
        Ok(refreshed.access_token)
    }
}
