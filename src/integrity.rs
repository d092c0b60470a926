//! Account integrity checks and administrative cleanup.
//!
//! Platform accounts are keyed by email, and providers hand out `+suffix`
//! aliases that all deliver to the same inbox. The guard detects accounts
//! that collapse to the same base address and offers the administrative
//! revocation calls used when a duplicate has to be retired.

use std::fmt;
use std::sync::Arc;

use log::*;
use regex::Regex;

use crate::config::Config;
use crate::error::{Error, ErrorKind};
use crate::sso::SsoAdminClient;

/// Email split into its canonical parts, lowercased, with any `+suffix`
/// stripped from the local part.
#[derive(Debug, PartialEq, Eq)]
struct EmailParts {
    local: String,
    domain: String,
}

fn canonicalize(email: &str) -> Option<EmailParts> {
    let (local, domain) = email.trim().rsplit_once('@')?;
    if local.is_empty() || domain.is_empty() {
        return None;
    }
    let local = match local.split_once('+') {
        Some((base, _)) => base,
        None => local,
    };
    if local.is_empty() {
        return None;
    }
    Some(EmailParts {
        local: local.to_lowercase(),
        domain: domain.to_lowercase(),
    })
}

/// Guard over duplicate accounts and administrative revocation.
pub struct AccountIntegrityGuard {
    admin: Arc<SsoAdminClient>,
}

// Manual impl: the admin client does not implement Debug, so the derive
// does not apply.
impl fmt::Debug for AccountIntegrityGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountIntegrityGuard").finish_non_exhaustive()
    }
}

impl AccountIntegrityGuard {
    /// Create a new guard over the given admin client.
    pub fn new(admin: Arc<SsoAdminClient>) -> Self {
        Self { admin }
    }

    /// Create a guard from configuration with its own admin client.
    pub fn from_config(client: reqwest::Client, config: &Config) -> Result<Self, Error> {
        Ok(Self::new(Arc::new(SsoAdminClient::from_config(
            client, config,
        )?)))
    }

    /// True when another account shares the same base email address.
    ///
    /// `joe+test@x.com` and `joe@x.com` count as the same address, so both
    /// spellings give the same answer. Lookup failures are treated as "no
    /// duplicate": signup must stay available when the directory is not.
    pub async fn check_duplicate_base_email(&self, email: &str, current_user_id: &str) -> bool {
        match self.find_duplicate(email, current_user_id).await {
            Ok(duplicate) => duplicate,
            Err(e) => {
                warn!(
                    "Duplicate-account check for {} failed, treating it as unique: {:?}",
                    email, e
                );
                false
            }
        }
    }

    async fn find_duplicate(&self, email: &str, current_user_id: &str) -> Result<bool, Error> {
        let parts = match canonicalize(email) {
            Some(parts) => parts,
            None => {
                debug!("Email {} has no canonical form, skipping duplicate check", email);
                return Ok(false);
            }
        };

        // Wildcard search casts a wide net; the anchored regex below cuts
        // out bystanders like `joexyz@x.com` that the wildcard also hits.
        let pattern = format!("{}*@{}", parts.local, parts.domain);
        let candidates = self.admin.search_users_by_email(&pattern).await?;

        let exact = Regex::new(&format!(
            r"^{}(\+[^@]*)?@{}$",
            regex::escape(&parts.local),
            regex::escape(&parts.domain)
        ))
        .map_err(|e| Error {
            source: Some(Box::new(e)),
            error_kind: ErrorKind::Config,
        })?;

        let duplicate = candidates.iter().any(|user| {
            if user.id == current_user_id {
                return false;
            }
            user.email
                .as_deref()
                .map(|candidate| exact.is_match(&candidate.to_lowercase()))
                .unwrap_or(false)
        });
        Ok(duplicate)
    }

    /// Disables the account. Failures are logged and swallowed; cleanup
    /// must never block the caller's own flow.
    pub async fn disable_account(&self, user_id: &str) {
        if let Err(e) = self.admin.disable_user(user_id).await {
            warn!("Failed to disable account {}: {:?}", user_id, e);
        }
    }

    /// Deletes the account. An account that is already gone counts as
    /// deleted; other failures propagate.
    pub async fn delete_account(&self, user_id: &str) -> Result<(), Error> {
        self.admin.delete_user(user_id).await
    }
}
