//! Capability codes granted per user
//!
//! The registry is pure data lookup; decisions are made by the
//! [`AccessGate`](crate::auth::gate::AccessGate).

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::db::permissions::PermissionStore;
use crate::types::Result;

/// Read access to the movie catalogue
pub const MOVIES_READ: &str = "movies:read";

/// Create, update and delete movies
pub const MOVIES_WRITE: &str = "movies:write";

/// Set of capability codes held by a user
///
/// Membership is an exact, case-sensitive match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permissions(BTreeSet<String>);

impl Permissions {
    pub fn include(&self, code: &str) -> bool {
        self.0.contains(code)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl FromIterator<String> for Permissions {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Lookup and grant of capability codes
#[derive(Clone)]
pub struct PermissionRegistry {
    store: PermissionStore,
}

impl PermissionRegistry {
    pub fn new(store: PermissionStore) -> Self {
        Self { store }
    }

    /// Codes held by `user_id`; empty when none have been granted
    pub async fn list_for_user(&self, user_id: i64) -> Result<Permissions> {
        let codes = self.store.get_all_for_user(user_id).await?;
        Ok(codes.into_iter().collect())
    }

    /// Grant `codes` to `user_id`; re-granting is a no-op
    pub async fn grant<I, S>(&self, user_id: i64, codes: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let codes: Vec<String> = codes.into_iter().map(Into::into).collect();
        self.store.add_for_user(user_id, codes).await
    }
}
