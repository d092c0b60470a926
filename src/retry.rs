//! Bounded retry for internal SSO calls.

use std::future::Future;

use log::*;

use crate::error::{Error, ErrorKind};

/// Maximum attempts an internal SSO call gets, counting the first one.
pub const SSO_MAX_ATTEMPTS: u32 = 2;

/// Predicate used for SSO calls: only connection-level failures are worth
/// repeating. Terminal and parse failures never are.
pub fn transient_network_only(error: &Error) -> bool {
    error.error_kind == ErrorKind::TransientNetwork
}

/// Bounded retry executor, invoked visibly at each wrapped call site.
///
/// Wraps calls to the internal SSO only. Provider token endpoints are never
/// wrapped: their refresh grants may rotate tokens, and replaying a
/// rotation can invalidate the stored credential.
#[derive(Clone, Copy)]
pub struct RetryExecutor {
    max_attempts: u32,
    is_retryable: fn(&Error) -> bool,
}

impl RetryExecutor {
    /// Create an executor with an explicit attempt bound and retry
    /// predicate.
    pub fn new(max_attempts: u32, is_retryable: fn(&Error) -> bool) -> Self {
        Self {
            max_attempts,
            is_retryable,
        }
    }

    /// The standard executor for internal SSO calls: two attempts, retrying
    /// transient connection failures with no delay.
    pub fn for_sso_calls() -> Self {
        Self::new(SSO_MAX_ATTEMPTS, transient_network_only)
    }

    /// Runs `operation`, retrying immediately while the failure satisfies
    /// the predicate and the attempt bound allows. Each retry is logged
    /// with its attempt number.
    pub async fn run<T, F, Fut>(&self, operation_name: &str, mut operation: F) -> Result<T, Error>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if (self.is_retryable)(&e) && attempt < self.max_attempts => {
                    attempt += 1;
                    warn!(
                        "{} hit a transient failure, retrying (attempt {} of {})",
                        operation_name, attempt, self.max_attempts
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::for_sso_calls()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::bare_error;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn failing_then_ok(
        calls: Arc<AtomicU32>,
        failures: u32,
        kind: ErrorKind,
    ) -> impl FnMut() -> std::pin::Pin<Box<dyn Future<Output = Result<u32, Error>> + Send>> {
        move || {
            let calls = calls.clone();
            Box::pin(async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < failures {
                    Err(bare_error(kind))
                } else {
                    Ok(n + 1)
                }
            })
        }
    }

    #[test]
    fn test_predicate_accepts_only_transient_failures() {
        assert!(transient_network_only(&bare_error(
            ErrorKind::TransientNetwork
        )));
        assert!(!transient_network_only(&bare_error(
            ErrorKind::ExpiredCredential
        )));
        assert!(!transient_network_only(&bare_error(
            ErrorKind::SessionExpired
        )));
        assert!(!transient_network_only(&bare_error(
            ErrorKind::MalformedResponse
        )));
    }

    #[tokio::test]
    async fn test_success_needs_one_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let result = RetryExecutor::for_sso_calls()
            .run(
                "userinfo",
                failing_then_ok(calls.clone(), 0, ErrorKind::TransientNetwork),
            )
            .await;

        assert_eq!(result.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let result = RetryExecutor::for_sso_calls()
            .run(
                "userinfo",
                failing_then_ok(calls.clone(), 1, ErrorKind::TransientNetwork),
            )
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_attempt_bound_is_respected() {
        let calls = Arc::new(AtomicU32::new(0));
        let result = RetryExecutor::for_sso_calls()
            .run(
                "userinfo",
                failing_then_ok(calls.clone(), 10, ErrorKind::TransientNetwork),
            )
            .await;

        assert_eq!(
            result.unwrap_err().error_kind,
            ErrorKind::TransientNetwork
        );
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_terminal_failures_are_never_retried() {
        for kind in [
            ErrorKind::ExpiredCredential,
            ErrorKind::SessionExpired,
            ErrorKind::MalformedResponse,
            ErrorKind::CredentialLookup,
        ] {
            let calls = Arc::new(AtomicU32::new(0));
            let result = RetryExecutor::for_sso_calls()
                .run("userinfo", failing_then_ok(calls.clone(), 10, kind))
                .await;

            assert_eq!(result.unwrap_err().error_kind, kind);
            assert_eq!(calls.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn test_custom_bound_and_predicate() {
        let calls = Arc::new(AtomicU32::new(0));
        fn storage_too(error: &Error) -> bool {
            matches!(
                error.error_kind,
                ErrorKind::TransientNetwork | ErrorKind::Storage
            )
        }

        let result = RetryExecutor::new(4, storage_too)
            .run(
                "store",
                failing_then_ok(calls.clone(), 3, ErrorKind::Storage),
            )
            .await;

        assert_eq!(result.unwrap(), 4);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}
