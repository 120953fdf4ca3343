//! Shared-secret header authentication
//!
//! When no secret is configured the service runs in open mode and accepts
//! every request, logging a warning the first time. When a secret is
//! configured, a missing X-Api-Key header is a 401 and a mismatched one
//! is a 403. The comparison is constant-time.

use std::sync::atomic::{AtomicBool, Ordering};
use tracing::warn;

/// Header carrying the shared secret
pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum AuthError {
    #[error("missing {API_KEY_HEADER} header")]
    MissingKey,

    #[error("invalid API key")]
    InvalidKey,
}

pub struct ApiKeyAuth {
    secret: Option<String>,
    open_warned: AtomicBool,
}

impl ApiKeyAuth {
    pub fn new(secret: Option<String>) -> Self {
        Self {
            secret: secret.filter(|s| !s.is_empty()),
            open_warned: AtomicBool::new(false),
        }
    }

    /// Check the provided header value against the configured secret
    ///
    /// Takes raw bytes: a header that is present but not valid UTF-8 is a
    /// mismatched key (403), not a missing one (401).
    pub fn check(&self, provided: Option<&[u8]>) -> Result<(), AuthError> {
        let Some(secret) = &self.secret else {
            if !self.open_warned.swap(true, Ordering::Relaxed) {
                warn!("EMBEDDING_API_SECRET is not set, accepting unauthenticated requests");
            }
            return Ok(());
        };

        match provided {
            None => Err(AuthError::MissingKey),
            Some(key) if constant_time_eq(key, secret.as_bytes()) => Ok(()),
            Some(_) => Err(AuthError::InvalidKey),
        }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_mode_accepts_everything() {
        let auth = ApiKeyAuth::new(None);
        assert_eq!(auth.check(None), Ok(()));
        assert_eq!(auth.check(Some(b"anything".as_slice())), Ok(()));

        // empty secret is treated as unset
        let auth = ApiKeyAuth::new(Some(String::new()));
        assert_eq!(auth.check(None), Ok(()));
    }

    #[test]
    fn test_missing_key_is_unauthorized() {
        let auth = ApiKeyAuth::new(Some("s3cret".to_string()));
        assert_eq!(auth.check(None), Err(AuthError::MissingKey));
    }

    #[test]
    fn test_wrong_key_is_forbidden() {
        let auth = ApiKeyAuth::new(Some("s3cret".to_string()));
        assert_eq!(auth.check(Some(b"wrong".as_slice())), Err(AuthError::InvalidKey));
        assert_eq!(auth.check(Some(b"s3cret ".as_slice())), Err(AuthError::InvalidKey));
    }

    #[test]
    fn test_non_utf8_key_is_forbidden() {
        // present but unreadable header bytes are a mismatch, not absence
        let auth = ApiKeyAuth::new(Some("s3cret".to_string()));
        assert_eq!(
            auth.check(Some(b"s3cret\xff".as_slice())),
            Err(AuthError::InvalidKey)
        );
    }

    #[test]
    fn test_exact_match_accepted() {
        let auth = ApiKeyAuth::new(Some("s3cret".to_string()));
        assert_eq!(auth.check(Some(b"s3cret".as_slice())), Ok(()));
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
        assert!(constant_time_eq(b"", b""));
    }
}
