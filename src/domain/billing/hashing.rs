//! Versioned HMAC hashing of promo codes and emails.
//!
//! Codes and recipient emails are never stored in plaintext; lookups run
//! against an HMAC-SHA256 of the normalized value. Secrets are versioned so
//! they can be rotated: new rows are always hashed with the latest secret,
//! while lookups compute a candidate hash per known version and match any of
//! them.

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, Secret};
use sha2::Sha256;
use subtle::ConstantTimeEq;

/// One rotation generation of the hashing secret.
#[derive(Clone)]
pub struct HashSecret {
    version: u32,
    secret: Secret<String>,
}

impl HashSecret {
    /// Creates a secret for the given rotation version.
    pub fn new(version: u32, secret: impl Into<String>) -> Self {
        Self {
            version,
            secret: Secret::new(secret.into()),
        }
    }

    /// The rotation version.
    pub fn version(&self) -> u32 {
        self.version
    }

    fn hash(&self, value: &str) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.secret.expose_secret().as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(value.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

impl std::fmt::Debug for HashSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashSecret")
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

/// A hash together with the secret version that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedHash {
    pub version: u32,
    pub hash: String,
}

impl VersionedHash {
    /// Constant-time comparison against a stored hash string.
    pub fn matches(&self, stored: &str) -> bool {
        self.hash.as_bytes().ct_eq(stored.as_bytes()).into()
    }
}

/// Hashes values with the latest secret and produces lookup candidates for
/// every known version.
#[derive(Debug, Clone, Default)]
pub struct CodeHasher {
    /// Sorted ascending by version; the last entry is the latest.
    secrets: Vec<HashSecret>,
}

impl CodeHasher {
    /// Creates a hasher from the configured secrets, in any order.
    pub fn new(mut secrets: Vec<HashSecret>) -> Self {
        secrets.sort_by_key(|s| s.version);
        Self { secrets }
    }

    /// Whether any secret is configured.
    pub fn has_secrets(&self) -> bool {
        !self.secrets.is_empty()
    }

    /// Hashes with the latest secret, for writing new rows.
    ///
    /// Returns `None` when no secret is configured; callers surface that as a
    /// configuration error.
    pub fn hash_latest(&self, value: &str) -> Option<VersionedHash> {
        self.secrets.last().map(|s| VersionedHash {
            version: s.version,
            hash: s.hash(value),
        })
    }

    /// Hash candidates for every known version, for lookups.
    ///
    /// Empty when no secret is configured.
    pub fn lookup_hashes(&self, value: &str) -> Vec<VersionedHash> {
        self.secrets
            .iter()
            .map(|s| VersionedHash {
                version: s.version,
                hash: s.hash(value),
            })
            .collect()
    }
}

/// Normalizes an email for hashing: trimmed and lowercased.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
