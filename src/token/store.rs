//! Storage contract for encrypted credential records.
//!
//! Persistence itself lives outside this crate; a relational backend
//! implements this trait on its side of the boundary. Records cross the
//! contract already encrypted, so implementations never see token material.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::Error;
use crate::provider::ProviderKind;
use crate::token::records::{EncryptedTokenRecord, OfflineTokenRecord};

/// Trait for persisting encrypted credential records.
///
/// Provider records are keyed by user and provider; offline tokens live in
/// their own namespace keyed by user alone. `store` has upsert semantics:
/// every refresh overwrites the previous record.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Store (upsert) the provider token record for a user.
    async fn store(
        &self,
        user_id: &str,
        provider: ProviderKind,
        record: EncryptedTokenRecord,
    ) -> Result<(), Error>;

    /// Retrieve the provider token record for a user.
    ///
    /// Returns `None` when the user never linked the provider.
    async fn get(
        &self,
        user_id: &str,
        provider: ProviderKind,
    ) -> Result<Option<EncryptedTokenRecord>, Error>;

    /// Delete the provider token record for a user, e.g. on unlink.
    /// Deleting a record that does not exist is not an error.
    async fn delete(&self, user_id: &str, provider: ProviderKind) -> Result<(), Error>;

    /// Store (upsert) the offline token record for a user.
    async fn store_offline(&self, user_id: &str, record: OfflineTokenRecord)
        -> Result<(), Error>;

    /// Retrieve the offline token record for a user.
    async fn get_offline(&self, user_id: &str) -> Result<Option<OfflineTokenRecord>, Error>;

    /// Delete the offline token record for a user, e.g. on account removal.
    /// Deleting a record that does not exist is not an error.
    async fn delete_offline(&self, user_id: &str) -> Result<(), Error>;
}

/// In-memory store for tests and single-node deployments.
#[derive(Default)]
pub struct MemoryTokenStore {
    provider_tokens: DashMap<(String, ProviderKind), EncryptedTokenRecord>,
    offline_tokens: DashMap<String, OfflineTokenRecord>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn store(
        &self,
        user_id: &str,
        provider: ProviderKind,
        record: EncryptedTokenRecord,
    ) -> Result<(), Error> {
        self.provider_tokens
            .insert((user_id.to_string(), provider), record);
        Ok(())
    }

    async fn get(
        &self,
        user_id: &str,
        provider: ProviderKind,
    ) -> Result<Option<EncryptedTokenRecord>, Error> {
        Ok(self
            .provider_tokens
            .get(&(user_id.to_string(), provider))
            .map(|entry| entry.value().clone()))
    }

    async fn delete(&self, user_id: &str, provider: ProviderKind) -> Result<(), Error> {
        self.provider_tokens.remove(&(user_id.to_string(), provider));
        Ok(())
    }

    async fn store_offline(
        &self,
        user_id: &str,
        record: OfflineTokenRecord,
    ) -> Result<(), Error> {
        self.offline_tokens.insert(user_id.to_string(), record);
        Ok(())
    }

    async fn get_offline(&self, user_id: &str) -> Result<Option<OfflineTokenRecord>, Error> {
        Ok(self
            .offline_tokens
            .get(user_id)
            .map(|entry| entry.value().clone()))
    }

    async fn delete_offline(&self, user_id: &str) -> Result<(), Error> {
        self.offline_tokens.remove(user_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(tag: &str) -> EncryptedTokenRecord {
        EncryptedTokenRecord {
            encrypted_access_token: format!("enc-access-{}", tag),
            encrypted_refresh_token: format!("enc-refresh-{}", tag),
            access_token_expires_at: 1_700_000_000,
            refresh_token_expires_at: 0,
        }
    }

    #[tokio::test]
    async fn test_store_and_get_roundtrip() {
        let store = MemoryTokenStore::new();
        store
            .store("user-1", ProviderKind::Github, record("a"))
            .await
            .unwrap();

        let found = store.get("user-1", ProviderKind::Github).await.unwrap();
        assert_eq!(found, Some(record("a")));

        let missing = store.get("user-1", ProviderKind::Gitlab).await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_store_overwrites_existing_record() {
        let store = MemoryTokenStore::new();
        store
            .store("user-1", ProviderKind::Bitbucket, record("old"))
            .await
            .unwrap();
        store
            .store("user-1", ProviderKind::Bitbucket, record("new"))
            .await
            .unwrap();

        let found = store.get("user-1", ProviderKind::Bitbucket).await.unwrap();
        assert_eq!(found, Some(record("new")));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = MemoryTokenStore::new();
        store
            .store("user-1", ProviderKind::Github, record("a"))
            .await
            .unwrap();

        store.delete("user-1", ProviderKind::Github).await.unwrap();
        assert!(store
            .get("user-1", ProviderKind::Github)
            .await
            .unwrap()
            .is_none());
        // Second delete of the same key works too.
        store.delete("user-1", ProviderKind::Github).await.unwrap();
    }

    #[tokio::test]
    async fn test_offline_namespace_is_separate() {
        let store = MemoryTokenStore::new();
        store
            .store("user-1", ProviderKind::Github, record("a"))
            .await
            .unwrap();
        store
            .store_offline(
                "user-1",
                OfflineTokenRecord {
                    encrypted_offline_token: "enc-offline".to_string(),
                },
            )
            .await
            .unwrap();

        let offline = store.get_offline("user-1").await.unwrap();
        assert_eq!(
            offline.map(|r| r.encrypted_offline_token),
            Some("enc-offline".to_string())
        );

        store.delete_offline("user-1").await.unwrap();
        assert!(store.get_offline("user-1").await.unwrap().is_none());
        // Provider record survives offline deletion.
        assert!(store
            .get("user-1", ProviderKind::Github)
            .await
            .unwrap()
            .is_some());
    }
}
