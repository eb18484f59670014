//! Password hashing and verification using Argon2
//!
//! Uses the argon2id variant with the crate's recommended parameters. The
//! plaintext is kept only in memory (zeroized on drop) so that validation can
//! still inspect it after hashing; only the PHC hash string is ever stored.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use zeroize::Zeroizing;

use crate::types::{MarqueeError, Result};

/// A user's password: transient plaintext plus the persisted one-way hash
#[derive(Clone, Default)]
pub struct Credential {
    plaintext: Option<Zeroizing<String>>,
    hash: Option<String>,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("plaintext", &self.plaintext.as_ref().map(|_| "<redacted>"))
            .field("hash", &self.hash.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Credential {
    /// Hash `plaintext` with a fresh salt
    pub fn set(plaintext: &str) -> Result<Self> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default()
            .hash_password(plaintext.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| MarqueeError::internal(format!("Failed to hash password: {e}")))?;

        Ok(Self {
            plaintext: Some(Zeroizing::new(plaintext.to_string())),
            hash: Some(hash),
        })
    }

    /// Rebuild a credential from a stored hash (no plaintext)
    pub fn from_hash(hash: String) -> Self {
        Self {
            plaintext: None,
            hash: Some(hash),
        }
    }

    /// Compare a candidate against the stored hash
    ///
    /// A mismatch is `Ok(false)`; errors are reserved for a missing or
    /// unparseable hash.
    pub fn matches(&self, candidate: &str) -> Result<bool> {
        let hash = self
            .hash
            .as_deref()
            .ok_or_else(|| MarqueeError::internal("Credential has no password hash"))?;

        let parsed_hash = PasswordHash::new(hash)
            .map_err(|e| MarqueeError::internal(format!("Invalid password hash format: {e}")))?;

        match Argon2::default().verify_password(candidate.as_bytes(), &parsed_hash) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(MarqueeError::internal(format!("Password verification failed: {e}"))),
        }
    }

    pub fn plaintext(&self) -> Option<&str> {
        self.plaintext.as_deref().map(String::as_str)
    }

    pub fn hash(&self) -> Option<&str> {
        self.hash.as_deref()
    }
}
