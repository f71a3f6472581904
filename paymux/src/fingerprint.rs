//! Configuration fingerprints.
//!
//! A [`Fingerprint`] is the SHA-256 digest of the identity subset of a
//! [`PaymentConfig`]. Each field is framed with a tag and its length so that
//! moving characters between adjacent fields can never produce a collision.

use std::fmt::{self, Display, Formatter};

use sha2::{Digest, Sha256};

use crate::config::PaymentConfig;

/// Stable cache key derived from a configuration's identity fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Computes the fingerprint of `config`.
    ///
    /// The server URL is compared without trailing slashes; all other
    /// identity fields are compared verbatim.
    #[must_use]
    pub fn of(config: &PaymentConfig) -> Self {
        let mut hasher = Sha256::new();
        frame(&mut hasher, b"stripe", config.stripe_public_key.as_deref());
        frame(
            &mut hasher,
            b"server",
            Some(config.server_url.trim().trim_end_matches('/')),
        );
        frame(&mut hasher, b"cluster", Some(config.solana_cluster.as_str()));
        frame(&mut hasher, b"rpc", config.solana_endpoint.as_deref());
        frame(&mut hasher, b"tenant", config.tenant_id.as_deref());
        Self(hex::encode(hasher.finalize()))
    }

    /// Returns the hex digest.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the first 12 hex characters, for logs.
    #[must_use]
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

fn frame(hasher: &mut Sha256, tag: &[u8], value: Option<&str>) {
    hasher.update(tag);
    match value {
        Some(value) => {
            hasher.update([1u8]);
            hasher.update((value.len() as u64).to_be_bytes());
            hasher.update(value.as_bytes());
        }
        None => hasher.update([0u8]),
    }
}

impl Display for Fingerprint {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
