//! Expiration policy for stored provider credentials.
//!
//! All timestamps are epoch seconds; the value 0 is reserved to mean the
//! token never expires. The functions take `now` as a parameter so the
//! broker and its tests share one deterministic policy.

/// Timestamp value meaning the token never expires.
pub const NEVER_EXPIRES: i64 = 0;

/// Refresh access tokens this many seconds before they actually expire,
/// so callers never receive a token about to die mid-request.
pub const REFRESH_BUFFER_SECS: i64 = 14_400;

/// True when the access token is expired or enters the proactive refresh
/// window. A 0 stamp never needs a refresh.
pub fn needs_refresh(access_token_expires_at: i64, now: i64) -> bool {
    access_token_expires_at != NEVER_EXPIRES
        && access_token_expires_at < now + REFRESH_BUFFER_SECS
}

/// True when the refresh token itself is past its expiry, meaning the
/// stored credential is beyond recovery. A 0 stamp never fully expires.
pub fn is_fully_expired(refresh_token_expires_at: i64, now: i64) -> bool {
    refresh_token_expires_at != NEVER_EXPIRES && refresh_token_expires_at < now
}
