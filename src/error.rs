//! Error types for the `scm-auth` crate.
//!
//! A single root Error struct carries an optional source for chaining plus
//! an ErrorKind callers can pattern-match to drive recovery.

use std::error::Error as StdError;
use std::fmt;

/// Top-level error type for the scm-auth crate.
/// Holds error kind and optional source for error chaining.
#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: ErrorKind,
}

/// Failure kinds across the credential lifecycle. Kept flat and data-free so
/// callers can match on the kind alone; detail travels in `Error::source`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// No stored credential for this user/provider pair. Expected whenever
    /// the user never linked the provider.
    CredentialNotFound,
    /// The provider no longer accepts the stored refresh token. The user
    /// must link the provider again; retrying cannot help.
    ExpiredCredential,
    /// The SSO session or offline token is no longer valid. The user must
    /// sign in again; retrying cannot help.
    SessionExpired,
    /// Connection-level failure reaching the SSO or a provider. The only
    /// kind worth retrying.
    TransientNetwork,
    /// A response arrived but could not be decoded or failed validation.
    /// Never retried.
    MalformedResponse,
    /// The SSO rejected a credential lookup; status and body are in the
    /// source.
    CredentialLookup,
    /// Encrypting a token failed.
    EncryptionFailed,
    /// Decrypting a stored token failed: tampered ciphertext or wrong key.
    DecryptionFailed,
    /// The token store collaborator failed.
    Storage,
    /// Required configuration is missing or invalid.
    Config,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.error_kind {
            kind @ (ErrorKind::CredentialNotFound
            | ErrorKind::ExpiredCredential
            | ErrorKind::CredentialLookup) => write!(f, "Credential error: {:?}", kind),
            kind @ ErrorKind::SessionExpired => write!(f, "Session error: {:?}", kind),
            kind @ (ErrorKind::TransientNetwork | ErrorKind::MalformedResponse) => {
                write!(f, "Network error: {:?}", kind)
            }
            kind @ (ErrorKind::EncryptionFailed | ErrorKind::DecryptionFailed) => {
                write!(f, "Encryption error: {:?}", kind)
            }
            kind @ ErrorKind::Storage => write!(f, "Storage error: {:?}", kind),
            kind @ ErrorKind::Config => write!(f, "Configuration error: {:?}", kind),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        let error_kind = if err.is_builder() {
            ErrorKind::Config
        } else if err.is_decode() {
            ErrorKind::MalformedResponse
        } else {
            // Connect, timeout and request-send failures are all
            // connection-level from the caller's point of view.
            ErrorKind::TransientNetwork
        };

        Error {
            source: Some(Box::new(err)),
            error_kind,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error {
            source: Some(Box::new(err)),
            error_kind: ErrorKind::MalformedResponse,
        }
    }
}

/// Helper function to create errors from a kind and a plain message.
pub fn broker_error(kind: ErrorKind, message: &str) -> Error {
    Error {
        source: Some(message.to_string().into()),
        error_kind: kind,
    }
}

/// Helper function to create errors without a source.
pub fn bare_error(kind: ErrorKind) -> Error {
    Error {
        source: None,
        error_kind: kind,
    }
}

/// Helper function to create credential lookup errors carrying the SSO
/// response status and body.
pub fn lookup_error(status: u16, body: &str) -> Error {
    Error {
        source: Some(format!("SSO returned {}: {}", status, body).into()),
        error_kind: ErrorKind::CredentialLookup,
    }
}
