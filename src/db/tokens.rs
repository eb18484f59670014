//! Token digest rows
//!
//! Lookups are always by SHA-256 digest; the plaintext never reaches SQL.

use rusqlite::params;

use crate::auth::tokens::{Token, TokenScope};
use crate::db::Database;
use crate::types::Result;

/// Store for issued token digests
#[derive(Clone)]
pub struct TokenStore {
    db: Database,
}

impl TokenStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn insert(&self, token: &Token) -> Result<()> {
        let hash = token.hash.to_vec();
        let user_id = token.user_id;
        let expiry = token.expiry.timestamp_millis();
        let scope = token.scope.as_str();

        self.db
            .call("tokens.insert", move |conn| {
                conn.execute(
                    "INSERT INTO tokens (hash, user_id, expiry, scope) VALUES (?, ?, ?, ?)",
                    params![hash, user_id, expiry, scope],
                )?;
                Ok(())
            })
            .await
    }

    /// Owner of the unexpired token with this digest and scope
    ///
    /// `expiry` is compared strictly: a token is dead at its expiry instant.
    pub async fn find_owner(&self, hash: [u8; 32], scope: TokenScope, now_ms: i64) -> Result<i64> {
        self.db
            .call("tokens.find_owner", move |conn| {
                Ok(conn.query_row(
                    "SELECT user_id FROM tokens WHERE hash = ? AND scope = ? AND expiry > ?",
                    params![hash.to_vec(), scope.as_str(), now_ms],
                    |row| row.get(0),
                )?)
            })
            .await
    }

    /// Delete every token for `user_id` in `scope`, returning how many went
    pub async fn delete_all_for_user(&self, scope: TokenScope, user_id: i64) -> Result<usize> {
        self.db
            .call("tokens.delete_all_for_user", move |conn| {
                Ok(conn.execute(
                    "DELETE FROM tokens WHERE scope = ? AND user_id = ?",
                    params![scope.as_str(), user_id],
                )?)
            })
            .await
    }
}
