//! Opaque bearer tokens
//!
//! A token is 16 bytes from the OS CSPRNG encoded as unpadded base-32, which
//! always yields 26 characters. Only the SHA-256 digest of that string is
//! stored, so a leaked `tokens` table holds nothing a client could present.

use chrono::{DateTime, Duration, Utc};
use data_encoding::BASE32_NOPAD;
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use tracing::debug;

use crate::db::tokens::TokenStore;
use crate::types::{MarqueeError, Result};
use crate::validation::Validator;

/// Length of every token plaintext
pub const TOKEN_PLAINTEXT_LEN: usize = 26;

/// Purpose a token was minted for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenScope {
    Activation,
    Authentication,
}

impl TokenScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenScope::Activation => "activation",
            TokenScope::Authentication => "authentication",
        }
    }
}

impl fmt::Display for TokenScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TokenScope {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "activation" => Ok(TokenScope::Activation),
            "authentication" => Ok(TokenScope::Authentication),
            other => Err(format!("unknown token scope '{}'", other)),
        }
    }
}

/// A freshly issued token; `plaintext` is only ever populated here
#[derive(Clone, Serialize)]
pub struct Token {
    #[serde(rename = "token")]
    pub plaintext: String,
    #[serde(skip)]
    pub hash: [u8; 32],
    #[serde(skip)]
    pub user_id: i64,
    pub expiry: DateTime<Utc>,
    #[serde(skip)]
    pub scope: TokenScope,
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("user_id", &self.user_id)
            .field("expiry", &self.expiry)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

/// SHA-256 digest used as the durable lookup key
pub fn hash_plaintext(plaintext: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(plaintext.as_bytes());
    hasher.finalize().into()
}

/// Mint a token without storing it
///
/// A failing random source aborts issuance; there is no fallback.
pub fn generate_token(user_id: i64, ttl: Duration, scope: TokenScope) -> Result<Token> {
    let mut random_bytes = [0u8; 16];
    OsRng
        .try_fill_bytes(&mut random_bytes)
        .map_err(|e| MarqueeError::internal(format!("Secure random source failed: {}", e)))?;

    let plaintext = BASE32_NOPAD.encode(&random_bytes);
    let hash = hash_plaintext(&plaintext);

    Ok(Token {
        plaintext,
        hash,
        user_id,
        expiry: Utc::now() + ttl,
        scope,
    })
}

/// Intake check for a presented token
pub fn validate_token_plaintext(v: &mut Validator, plaintext: &str) {
    v.check(!plaintext.is_empty(), "token", "must be provided");
    v.check(
        plaintext.len() == TOKEN_PLAINTEXT_LEN,
        "token",
        "must be 26 bytes long",
    );
}

/// Issues, verifies and revokes bearer tokens
#[derive(Clone)]
pub struct TokenIssuer {
    store: TokenStore,
}

impl TokenIssuer {
    pub fn new(store: TokenStore) -> Self {
        Self { store }
    }

    /// Mint and persist a token for `user_id`
    pub async fn issue(&self, user_id: i64, ttl: Duration, scope: TokenScope) -> Result<Token> {
        let token = generate_token(user_id, ttl, scope)?;
        self.store.insert(&token).await?;

        debug!("Issued {} token for user {} (expires {})", scope, user_id, token.expiry);
        Ok(token)
    }

    /// Resolve a presented token to its owner's user ID
    pub async fn validate(&self, plaintext: &str, scope: TokenScope) -> Result<i64> {
        let mut v = Validator::new();
        validate_token_plaintext(&mut v, plaintext);
        if !v.valid() {
            return Err(MarqueeError::InvalidOrExpiredToken);
        }

        let hash = hash_plaintext(plaintext);
        match self
            .store
            .find_owner(hash, scope, Utc::now().timestamp_millis())
            .await
        {
            Ok(user_id) => Ok(user_id),
            Err(MarqueeError::NotFound) => Err(MarqueeError::InvalidOrExpiredToken),
            Err(e) => Err(e),
        }
    }

    /// Invalidate every token for the user in `scope`; revoking nothing is fine
    pub async fn revoke_all_for_user(&self, scope: TokenScope, user_id: i64) -> Result<()> {
        let removed = self.store.delete_all_for_user(scope, user_id).await?;
        debug!("Revoked {} {} token(s) for user {}", removed, scope, user_id);
        Ok(())
    }
}
