//! Timestamped request hashes.
//!
//! A client signs a request by hashing a canonical string built from a
//! protocol version token, a timestamp and the sorted request parameters.
//! The server recomputes the hash from the same inputs.
//!
//! The timestamp is not checked for freshness: a captured `(hash, timestamp)`
//! pair stays valid for the same parameters indefinitely.

use chrono::{SecondsFormat, Utc};
use std::collections::BTreeMap;
use sha2::{Digest, Sha256};
use warden_core::CoreError;

/// Version token at the start of every canonical string
pub const PROTOCOL_VERSION: &str = "casbin-editor-v1";

/// Authentication errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// The supplied hash does not match the recomputed one
    #[error("Invalid authentication hash")]
    InvalidHash,
    /// Only one of hash and timestamp was supplied
    #[error("Invalid authentication hash: both hash and timestamp are required")]
    IncompleteToken,
}

impl From<AuthError> for CoreError {
    fn from(_: AuthError) -> Self {
        CoreError::AuthenticationFailed
    }
}

/// Authentication material attached to a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthToken {
    /// No hash and no timestamp: verification is skipped
    Absent,
    /// Exactly one of the two was supplied
    Partial,
    /// Both supplied
    Complete {
        /// Hex digest supplied by the client
        hash: String,
        /// Timestamp the client hashed
        timestamp: String,
    },
}

impl AuthToken {
    /// Build a token from optional query parameters; empty strings count as absent
    #[must_use]
    pub fn from_parts(hash: Option<String>, timestamp: Option<String>) -> Self {
        let hash = hash.filter(|h| !h.is_empty());
        let timestamp = timestamp.filter(|t| !t.is_empty());
        match (hash, timestamp) {
            (None, None) => Self::Absent,
            (Some(hash), Some(timestamp)) => Self::Complete { hash, timestamp },
            _ => Self::Partial,
        }
    }
}

/// Computes and verifies request hashes
#[derive(Debug, Clone)]
pub struct Authenticator {
    version: String,
}

impl Default for Authenticator {
    fn default() -> Self {
        Self::new(PROTOCOL_VERSION)
    }
}

impl Authenticator {
    /// Create an authenticator for a protocol version token
    #[must_use]
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
        }
    }

    /// Canonical string: `version|timestamp[|k1=v1&k2=v2...]` with keys ascending
    #[must_use]
    pub fn canonical_string(&self, fields: &BTreeMap<String, String>, timestamp: &str) -> String {
        let mut raw = format!("{}|{}", self.version, timestamp);
        if !fields.is_empty() {
            let params: Vec<String> = fields.iter().map(|(k, v)| format!("{k}={v}")).collect();
            raw.push('|');
            raw.push_str(&params.join("&"));
        }
        raw
    }

    /// Lowercase hex SHA-256 of the canonical string
    #[must_use]
    pub fn compute_hash(&self, fields: &BTreeMap<String, String>, timestamp: &str) -> String {
        hex::encode(Sha256::digest(self.canonical_string(fields, timestamp).as_bytes()))
    }

    /// Recompute the hash and compare it with `provided`
    #[must_use]
    pub fn verify(&self, fields: &BTreeMap<String, String>, provided: &str, timestamp: &str) -> bool {
        self.compute_hash(fields, timestamp) == provided
    }

    /// Produce `(hash, timestamp)` for `fields` using the current UTC time
    #[must_use]
    pub fn sign(&self, fields: &BTreeMap<String, String>) -> (String, String) {
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
        (self.compute_hash(fields, &timestamp), timestamp)
    }

    /// Apply a request's token
    ///
    /// # Errors
    ///
    /// Returns error for a partial token or a hash that does not verify
    pub fn check(&self, fields: &BTreeMap<String, String>, token: &AuthToken) -> Result<(), AuthError> {
        match token {
            AuthToken::Absent => Ok(()),
            AuthToken::Partial => Err(AuthError::IncompleteToken),
            AuthToken::Complete { hash, timestamp } => {
                if self.verify(fields, hash, timestamp) {
                    Ok(())
                } else {
                    Err(AuthError::InvalidHash)
                }
            }
        }
    }
}
