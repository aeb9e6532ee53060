//! Signed challenge-state tokens.
//!
//! After a client passes the verification challenge it receives a cookie
//! carrying a [`ChallengeTokens`]-issued token. The token records its issue
//! time and is signed with HMAC-SHA256; it stays valid for the immunity
//! window.
//!
//! Format: `base64url(nonce || issued_at_be) "." base64url(mac)`.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Cookie name carrying the challenge state.
pub const CHALLENGE_COOKIE: &str = "edgeguard-token";

/// Default immunity window after a solved challenge.
pub const DEFAULT_IMMUNITY_SECS: i64 = 300;

const NONCE_LEN: usize = 16;
const PAYLOAD_LEN: usize = NONCE_LEN + 8;

/// Allowed clock skew for tokens stamped slightly in the future.
const MAX_FUTURE_SKEW_SECS: i64 = 30;

/// Errors creating a token signer.
#[derive(Debug, Error)]
pub enum TokenError {
    /// The signing secret is empty.
    #[error("challenge token secret must not be empty")]
    EmptySecret,

    /// The signing key was rejected.
    #[error("invalid challenge token key: {0}")]
    InvalidKey(String),
}

/// Why a presented token was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenRejection {
    /// Not in the token format.
    Malformed,
    /// Signature mismatch.
    BadSignature,
    /// Older than the immunity window.
    Expired,
    /// Issued too far in the future.
    NotYetValid,
}

/// Issues and validates challenge-state tokens.
#[derive(Clone)]
pub struct ChallengeTokens {
    mac: HmacSha256,
    immunity: Duration,
}

impl std::fmt::Debug for ChallengeTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChallengeTokens")
            .field("immunity", &self.immunity)
            .finish_non_exhaustive()
    }
}

impl ChallengeTokens {
    /// Creates a signer from a secret with the default immunity window.
    pub fn new(secret: &[u8]) -> Result<Self, TokenError> {
        if secret.is_empty() {
            return Err(TokenError::EmptySecret);
        }
        let mac = <HmacSha256 as Mac>::new_from_slice(secret)
            .map_err(|e| TokenError::InvalidKey(e.to_string()))?;
        Ok(Self {
            mac,
            immunity: Duration::seconds(DEFAULT_IMMUNITY_SECS),
        })
    }

    /// Creates a signer with a random per-process secret.
    pub fn random() -> Result<Self, TokenError> {
        let mut secret = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret);
        Self::new(&secret)
    }

    /// Sets the immunity window.
    pub fn with_immunity(mut self, immunity: Duration) -> Self {
        self.immunity = immunity;
        self
    }

    /// Returns the immunity window.
    pub fn immunity(&self) -> Duration {
        self.immunity
    }

    /// Issues a token stamped with `now`.
    pub fn issue(&self, now: DateTime<Utc>) -> String {
        let mut payload = [0u8; PAYLOAD_LEN];
        rand::thread_rng().fill_bytes(&mut payload[..NONCE_LEN]);
        payload[NONCE_LEN..].copy_from_slice(&now.timestamp().to_be_bytes());

        let signature = self.sign(&payload);
        format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(payload),
            URL_SAFE_NO_PAD.encode(signature)
        )
    }

    /// Validates a token at time `now`, returning its issue time.
    pub fn validate(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, TokenRejection> {
        let (payload, signature) = token.split_once('.').ok_or(TokenRejection::Malformed)?;
        let payload = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| TokenRejection::Malformed)?;
        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| TokenRejection::Malformed)?;
        if payload.len() != PAYLOAD_LEN {
            return Err(TokenRejection::Malformed);
        }

        let mut mac = self.mac.clone();
        mac.update(&payload);
        mac.verify_slice(&signature)
            .map_err(|_| TokenRejection::BadSignature)?;

        let mut stamp = [0u8; 8];
        stamp.copy_from_slice(&payload[NONCE_LEN..]);
        let issued_at = DateTime::from_timestamp(i64::from_be_bytes(stamp), 0)
            .ok_or(TokenRejection::Malformed)?;

        // Stamps carry whole seconds, so age is compared at that resolution
        let age = now.timestamp() - issued_at.timestamp();
        if age < -MAX_FUTURE_SKEW_SECS {
            return Err(TokenRejection::NotYetValid);
        }
        if age > self.immunity.num_seconds() {
            return Err(TokenRejection::Expired);
        }
        Ok(issued_at)
    }

    /// Returns true if the token is currently valid.
    pub fn is_valid(&self, token: &str, now: DateTime<Utc>) -> bool {
        self.validate(token, now).is_ok()
    }

    fn sign(&self, payload: &[u8]) -> Vec<u8> {
        let mut mac = self.mac.clone();
        mac.update(payload);
        mac.finalize().into_bytes().to_vec()
    }
}
