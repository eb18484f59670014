//! User records
//!
//! Email uniqueness is enforced by the `users_email_key` constraint and
//! surfaced as [`MarqueeError::DuplicateEmail`].

use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use serde::Serialize;

use crate::auth::password::Credential;
use crate::auth::tokens::{hash_plaintext, TokenScope};
use crate::db::Database;
use crate::types::{MarqueeError, Result};
use crate::validation::{matches_email, Validator};

/// A principal that can authenticate against the API
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub name: String,
    pub email: String,
    #[serde(skip)]
    pub password: Credential,
    pub activated: bool,
    /// `None` until the record has been persisted
    #[serde(skip)]
    pub version: Option<i32>,
}

impl User {
    /// Create an unsaved, unactivated user
    pub fn new(name: impl Into<String>, email: impl Into<String>, password: Credential) -> Self {
        Self {
            id: 0,
            created_at: Utc::now(),
            name: name.into(),
            email: email.into(),
            password,
            activated: false,
            version: None,
        }
    }

    fn from_row(row: &Row) -> std::result::Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            created_at: row.get("created_at")?,
            name: row.get("name")?,
            email: row.get("email")?,
            password: Credential::from_hash(row.get("password_hash")?),
            activated: row.get("activated")?,
            version: Some(row.get("version")?),
        })
    }
}

pub fn validate_name(v: &mut Validator, name: &str) {
    v.check(!name.is_empty(), "name", "must be provided");
    v.check(name.len() <= 500, "name", "must not be more than 500 bytes long");
}

pub fn validate_email(v: &mut Validator, email: &str) {
    v.check(!email.is_empty(), "email", "must be provided");
    v.check(matches_email(email), "email", "must be a valid email address");
}

pub fn validate_password_plaintext(v: &mut Validator, password: &str) {
    v.check(!password.is_empty(), "password", "must be provided");
    v.check(password.len() >= 8, "password", "must be at least 8 bytes long");
    v.check(password.len() <= 72, "password", "must not be more than 72 bytes long");
}

/// Validate a user before it is written
///
/// A missing password hash is a programming fault rather than bad input, so
/// it is reported as `Internal` instead of a field error.
pub fn validate_user(v: &mut Validator, user: &User) -> Result<()> {
    validate_name(v, &user.name);

    validate_email(v, &user.email);

    if let Some(plaintext) = user.password.plaintext() {
        validate_password_plaintext(v, plaintext);
    }

    if user.password.hash().is_none() {
        return Err(MarqueeError::internal("missing password hash for user"));
    }

    Ok(())
}

fn map_write_error(err: rusqlite::Error) -> MarqueeError {
    match &err {
        rusqlite::Error::SqliteFailure(e, Some(msg))
            if e.code == rusqlite::ErrorCode::ConstraintViolation
                && msg.contains("users.email") =>
        {
            MarqueeError::DuplicateEmail
        }
        _ => err.into(),
    }
}

/// Store for user records
#[derive(Clone)]
pub struct UserStore {
    db: Database,
}

impl UserStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a new user, assigning id, creation time and version 1
    pub async fn insert(&self, user: &mut User) -> Result<()> {
        let hash = user
            .password
            .hash()
            .ok_or_else(|| MarqueeError::internal("refusing to persist user without password hash"))?
            .to_string();
        let name = user.name.clone();
        let email = user.email.clone();
        let activated = user.activated;
        let created_at = Utc::now();

        let (id, version) = self
            .db
            .call("users.insert", move |conn| {
                conn.query_row(
                    "INSERT INTO users (created_at, name, email, password_hash, activated)
                     VALUES (?, ?, ?, ?, ?)
                     RETURNING id, version",
                    params![created_at, name, email, hash, activated],
                    |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i32>(1)?)),
                )
                .map_err(map_write_error)
            })
            .await?;

        user.id = id;
        user.created_at = created_at;
        user.version = Some(version);
        Ok(())
    }

    pub async fn get(&self, id: i64) -> Result<User> {
        if id < 1 {
            return Err(MarqueeError::NotFound);
        }

        self.db
            .call("users.get", move |conn| {
                Ok(conn.query_row(
                    "SELECT * FROM users WHERE id = ?",
                    params![id],
                    User::from_row,
                )?)
            })
            .await
    }

    pub async fn get_by_email(&self, email: &str) -> Result<User> {
        let email = email.to_string();

        self.db
            .call("users.get_by_email", move |conn| {
                Ok(conn.query_row(
                    "SELECT * FROM users WHERE email = ?",
                    params![email],
                    User::from_row,
                )?)
            })
            .await
    }

    /// Write back every mutable field, guarded by the version the caller read
    pub async fn update(&self, user: &mut User) -> Result<()> {
        let observed = user
            .version
            .ok_or_else(|| MarqueeError::internal("cannot update a user that was never stored"))?;
        let hash = user
            .password
            .hash()
            .ok_or_else(|| MarqueeError::internal("refusing to persist user without password hash"))?
            .to_string();
        let id = user.id;
        let name = user.name.clone();
        let email = user.email.clone();
        let activated = user.activated;

        let version = self
            .db
            .call("users.update", move |conn| {
                match conn.query_row(
                    "UPDATE users
                     SET name = ?, email = ?, password_hash = ?, activated = ?, version = version + 1
                     WHERE id = ? AND version = ?
                     RETURNING version",
                    params![name, email, hash, activated, id, observed],
                    |row| row.get::<_, i32>(0),
                ) {
                    Ok(version) => Ok(version),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Err(MarqueeError::EditConflict),
                    Err(e) => Err(map_write_error(e)),
                }
            })
            .await?;

        user.version = Some(version);
        Ok(())
    }

    /// Resolve the owner of an unexpired token in `scope`
    pub async fn get_for_token(&self, scope: TokenScope, plaintext: &str) -> Result<User> {
        let hash = hash_plaintext(plaintext);
        let now = Utc::now().timestamp_millis();

        self.db
            .call("users.get_for_token", move |conn| {
                Ok(conn.query_row(
                    "SELECT users.* FROM users
                     INNER JOIN tokens ON users.id = tokens.user_id
                     WHERE tokens.hash = ? AND tokens.scope = ? AND tokens.expiry > ?",
                    params![hash.to_vec(), scope.as_str(), now],
                    User::from_row,
                )?)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::LazyLock;

    static CREDENTIAL: LazyLock<Credential> =
        LazyLock::new(|| Credential::set("pa55word-pa55word").unwrap());

    fn store() -> UserStore {
        UserStore::new(Database::open_in_memory().unwrap())
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let users = store();
        let mut user = User::new("Alice Smith", "alice@example.com", CREDENTIAL.clone());
        users.insert(&mut user).await.unwrap();

        assert!(user.id > 0);
        assert_eq!(user.version, Some(1));

        let fetched = users.get(user.id).await.unwrap();
        assert_eq!(fetched.name, "Alice Smith");
        assert_eq!(fetched.email, "alice@example.com");
        assert!(!fetched.activated);
        assert!(fetched.password.plaintext().is_none());
        assert!(fetched.password.matches("pa55word-pa55word").unwrap());

        let by_email = users.get_by_email("alice@example.com").await.unwrap();
        assert_eq!(by_email.id, user.id);
    }

    #[tokio::test]
    async fn test_duplicate_email() {
        let users = store();
        let mut first = User::new("Alice", "alice@example.com", CREDENTIAL.clone());
        users.insert(&mut first).await.unwrap();

        let mut second = User::new("Other Alice", "alice@example.com", CREDENTIAL.clone());
        let err = users.insert(&mut second).await.unwrap_err();
        assert!(matches!(err, MarqueeError::DuplicateEmail));

        // Case differences are still the same address
        let mut third = User::new("ALICE", "ALICE@example.com", CREDENTIAL.clone());
        assert!(matches!(
            users.insert(&mut third).await,
            Err(MarqueeError::DuplicateEmail)
        ));

        let kept = users.get(first.id).await.unwrap();
        assert_eq!(kept.name, "Alice");
    }

    #[tokio::test]
    async fn test_missing_hash_never_persisted() {
        let users = store();
        let mut user = User::new("Bob", "bob@example.com", Credential::default());
        assert!(matches!(
            users.insert(&mut user).await,
            Err(MarqueeError::Internal(_))
        ));
        assert!(matches!(
            users.get_by_email("bob@example.com").await,
            Err(MarqueeError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_update_bumps_version_and_detects_stale() {
        let users = store();
        let mut user = User::new("Carol", "carol@example.com", CREDENTIAL.clone());
        users.insert(&mut user).await.unwrap();

        let mut stale = users.get(user.id).await.unwrap();

        user.activated = true;
        users.update(&mut user).await.unwrap();
        assert_eq!(user.version, Some(2));

        stale.name = "Carol Two".into();
        assert!(matches!(
            users.update(&mut stale).await,
            Err(MarqueeError::EditConflict)
        ));

        let current = users.get(user.id).await.unwrap();
        assert!(current.activated);
        assert_eq!(current.name, "Carol");
    }

    #[tokio::test]
    async fn test_get_invalid_id() {
        let users = store();
        assert!(matches!(users.get(0).await, Err(MarqueeError::NotFound)));
        assert!(matches!(users.get(42).await, Err(MarqueeError::NotFound)));
    }

    #[test]
    fn test_validate_user() {
        let mut user = User::new("", "not-an-email", CREDENTIAL.clone());
        user.password = Credential::from_hash(CREDENTIAL.hash().unwrap().to_string());

        let mut v = Validator::new();
        validate_user(&mut v, &user).unwrap();
        assert_eq!(v.errors().get("name"), Some("must be provided"));
        assert_eq!(v.errors().get("email"), Some("must be a valid email address"));
        assert!(!v.errors().contains("password"));

        let mut v = Validator::new();
        let bare = User::new("Dan", "dan@example.com", Credential::default());
        assert!(validate_user(&mut v, &bare).is_err());
    }

    #[test]
    fn test_validate_password_plaintext() {
        let mut v = Validator::new();
        validate_password_plaintext(&mut v, "short");
        assert_eq!(v.errors().get("password"), Some("must be at least 8 bytes long"));

        let mut v = Validator::new();
        validate_password_plaintext(&mut v, &"x".repeat(73));
        assert_eq!(
            v.errors().get("password"),
            Some("must not be more than 72 bytes long")
        );

        let mut v = Validator::new();
        validate_password_plaintext(&mut v, "long-enough");
        assert!(v.valid());
    }
}
