//! Authentication support for the sync server.
//!
//! This module provides token-based authentication using HMAC-SHA256.
//! Tokens include a timestamp for expiration checking.
//!
//! ## Token Format
//!
//! Tokens are composed of:
//! - 2 bytes: user id length (big-endian)
//! - N bytes: user id (UTF-8)
//! - 8 bytes: timestamp (Unix millis, big-endian)
//! - 32 bytes: HMAC-SHA256 signature over everything before it
//!
//! ## Access
//!
//! A user may access the replica named `user-<id>` and replicas whose name
//! starts with `user-<id>-`. User ids are limited to ASCII letters, digits
//! and `_`, so no user id is a dash-separated prefix of another user's
//! replica names.

use crate::error::{ServerError, ServerResult};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_SIZE: usize = 32;
const TIMESTAMP_SIZE: usize = 8;
const MAX_USER_ID_LEN: usize = 64;

/// Authentication configuration.
#[derive(Clone)]
pub struct AuthConfig {
    /// Secret key for HMAC.
    pub secret: Vec<u8>,
    /// Token expiration duration.
    pub token_expiry: Duration,
}

impl AuthConfig {
    /// Creates a new auth configuration.
    pub fn new(secret: Vec<u8>) -> Self {
        Self {
            secret,
            token_expiry: Duration::from_secs(24 * 60 * 60),
        }
    }

    /// Sets the token expiration duration.
    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.token_expiry = expiry;
        self
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("secret", &"[REDACTED]")
            .field("token_expiry", &self.token_expiry)
            .finish()
    }
}

/// Token validator for incoming requests.
#[derive(Debug, Clone)]
pub struct TokenValidator {
    config: AuthConfig,
}

impl TokenValidator {
    /// Creates a new token validator.
    pub fn new(config: AuthConfig) -> Self {
        Self { config }
    }

    /// Creates a new auth token for a user.
    ///
    /// The token is raw bytes; transports may base64 encode it.
    pub fn create_token(&self, user_id: &str) -> ServerResult<Vec<u8>> {
        if !valid_user_id(user_id) {
            return Err(ServerError::InvalidRequest(format!(
                "invalid user id: {user_id:?}"
            )));
        }
        let id = user_id.as_bytes();
        let id_len = u16::try_from(id.len())
            .map_err(|_| ServerError::InvalidRequest("user id too long".into()))?;

        let mut token = Vec::with_capacity(2 + id.len() + TIMESTAMP_SIZE + SIGNATURE_SIZE);
        token.extend_from_slice(&id_len.to_be_bytes());
        token.extend_from_slice(id);
        token.extend_from_slice(&now_millis().to_be_bytes());

        let signature = self.mac(&token)?.finalize().into_bytes();
        token.extend_from_slice(&signature);
        Ok(token)
    }

    /// Validates a token presented by `expected_user_id`.
    pub fn validate_token(&self, token: &[u8], expected_user_id: &str) -> ServerResult<()> {
        let invalid = |reason: &str| ServerError::AuthenticationFailed(reason.into());

        if !valid_user_id(expected_user_id) {
            return Err(invalid("invalid user id"));
        }
        if token.len() < 2 + TIMESTAMP_SIZE + SIGNATURE_SIZE {
            return Err(invalid("invalid token length"));
        }
        let id_len = u16::from_be_bytes([token[0], token[1]]) as usize;
        if token.len() != 2 + id_len + TIMESTAMP_SIZE + SIGNATURE_SIZE {
            return Err(invalid("invalid token length"));
        }

        let (signed, signature) = token.split_at(token.len() - SIGNATURE_SIZE);
        self.mac(signed)?
            .verify_slice(signature)
            .map_err(|_| invalid("invalid signature"))?;

        let user_id = &signed[2..2 + id_len];
        if user_id != expected_user_id.as_bytes() {
            return Err(invalid("user id mismatch"));
        }

        let mut timestamp = [0u8; TIMESTAMP_SIZE];
        timestamp.copy_from_slice(&signed[2 + id_len..]);
        let issued = u64::from_be_bytes(timestamp);
        let expiry = self.config.token_expiry.as_millis() as u64;
        if now_millis() > issued.saturating_add(expiry) {
            return Err(invalid("token expired"));
        }

        Ok(())
    }

    fn mac(&self, data: &[u8]) -> ServerResult<HmacSha256> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.config.secret)
            .map_err(|e| ServerError::Internal(format!("invalid auth secret: {e}")))?;
        mac.update(data);
        Ok(mac)
    }
}

/// Returns true if `user_id` is non-empty, at most 64 bytes and made of
/// ASCII letters, digits and `_`.
pub fn valid_user_id(user_id: &str) -> bool {
    !user_id.is_empty()
        && user_id.len() <= MAX_USER_ID_LEN
        && user_id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

/// Returns true if `user_id` may access the replica `replica`.
pub fn replica_allowed(user_id: &str, replica: &str) -> bool {
    if !valid_user_id(user_id) {
        return false;
    }
    let own = format!("user-{user_id}");
    replica == own
        || replica
            .strip_prefix(own.as_str())
            .is_some_and(|rest| rest.starts_with('-'))
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
