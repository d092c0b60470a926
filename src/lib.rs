//! # scm-auth
//!
//! Credential lifecycle broker for the platform's source-control
//! integrations:
//! - encrypted at-rest storage of provider token pairs (AES-256-GCM)
//! - expiry policy deciding when a pair is refreshed or dead
//! - refresh adapters for the GitHub, GitLab and Bitbucket token endpoints
//! - SSO clients for identity resolution, the provider-token bridge,
//!   offline-token exchange and admin operations
//! - duplicate-account detection over `+suffix` email aliases
//!
//! ## Architecture
//!
//! [`IdentityBroker`] is the entry point other subsystems call; everything
//! else backs it. Provider credentials never leave the crate except as a
//! [`secrecy::SecretString`] access token, and never touch the store
//! unencrypted.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use scm_auth::{
//!     broker::IdentityBroker,
//!     provider::{GithubAdapter, ProviderKind},
//!     token::{MemoryTokenStore, TokenCipher},
//! };
//! ```

pub mod broker;
pub mod config;
pub mod error;
pub mod integrity;
pub mod logging;
pub mod provider;
pub mod retry;
pub mod sso;
pub mod token;

// Re-export commonly used types
pub use broker::IdentityBroker;
pub use error::{Error, ErrorKind};
pub use integrity::AccountIntegrityGuard;
