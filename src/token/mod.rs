//! Credential records, encryption at rest, expiry policy and storage.

mod cipher;
mod expiry;
mod records;
mod store;

pub use cipher::TokenCipher;
pub use expiry::{is_fully_expired, needs_refresh, NEVER_EXPIRES, REFRESH_BUFFER_SECS};
pub use records::{token_prefix, EncryptedTokenRecord, OfflineTokenRecord, ProviderCredentials};
pub use store::{MemoryTokenStore, TokenStore};
