//! Per-request access decisions
//!
//! Authentication and authorization fail at different stages with different
//! kinds: a bad or missing token is `InvalidOrExpiredToken`/`Unauthenticated`
//! (401), while a known user lacking activation or a capability is
//! `Unauthorized` (403). The resolved [`Principal`] is passed explicitly to
//! everything downstream.

use tracing::debug;

use crate::auth::permissions::PermissionRegistry;
use crate::auth::tokens::{TokenIssuer, TokenScope};
use crate::db::users::{User, UserStore};
use crate::types::{MarqueeError, Result};

/// Who a request acts as
#[derive(Debug, Clone)]
pub enum Principal {
    Anonymous,
    User(User),
}

impl Principal {
    pub fn is_anonymous(&self) -> bool {
        matches!(self, Principal::Anonymous)
    }

    pub fn user(&self) -> Option<&User> {
        match self {
            Principal::Anonymous => None,
            Principal::User(user) => Some(user),
        }
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header value
pub fn extract_bearer_token(header: &str) -> Option<&str> {
    let mut parts = header.split(' ');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("Bearer"), Some(token), None) if !token.is_empty() => Some(token),
        _ => None,
    }
}

/// Composes token verification and permission lookup
#[derive(Clone)]
pub struct AccessGate {
    tokens: TokenIssuer,
    users: UserStore,
    permissions: PermissionRegistry,
}

impl AccessGate {
    pub fn new(tokens: TokenIssuer, users: UserStore, permissions: PermissionRegistry) -> Self {
        Self {
            tokens,
            users,
            permissions,
        }
    }

    /// Resolve the request's principal from its `Authorization` header
    ///
    /// No header means anonymous; anything present but unusable is rejected.
    pub async fn authenticate(&self, authorization: Option<&str>) -> Result<Principal> {
        let header = match authorization {
            None => return Ok(Principal::Anonymous),
            Some(h) => h,
        };

        let plaintext = extract_bearer_token(header).ok_or(MarqueeError::InvalidOrExpiredToken)?;
        let user_id = self
            .tokens
            .validate(plaintext, TokenScope::Authentication)
            .await?;

        match self.users.get(user_id).await {
            Ok(user) => {
                debug!("Authenticated user {}", user.id);
                Ok(Principal::User(user))
            }
            Err(MarqueeError::NotFound) => Err(MarqueeError::InvalidOrExpiredToken),
            Err(e) => Err(e),
        }
    }

    /// True iff `code` is among the user's granted capabilities
    pub async fn authorize(&self, user: &User, code: &str) -> Result<bool> {
        let permissions = self.permissions.list_for_user(user.id).await?;
        Ok(permissions.include(code))
    }

    /// Reject anonymous principals
    pub fn require_authenticated<'a>(&self, principal: &'a Principal) -> Result<&'a User> {
        principal.user().ok_or(MarqueeError::Unauthenticated)
    }

    /// Reject anonymous and unactivated principals
    pub fn require_activated<'a>(&self, principal: &'a Principal) -> Result<&'a User> {
        let user = self.require_authenticated(principal)?;
        if !user.activated {
            return Err(MarqueeError::Unauthorized(
                "your user account must be activated to access this resource".into(),
            ));
        }
        Ok(user)
    }

    /// Require an activated principal holding `code`
    pub async fn require_permission<'a>(
        &self,
        principal: &'a Principal,
        code: &str,
    ) -> Result<&'a User> {
        let user = self.require_activated(principal)?;
        if !self.authorize(user, code).await? {
            return Err(MarqueeError::Unauthorized(
                "your user account doesn't have the necessary permissions to access this resource"
                    .into(),
            ));
        }
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::password::Credential;
    use crate::auth::permissions::{MOVIES_READ, MOVIES_WRITE};
    use crate::db::permissions::PermissionStore;
    use crate::db::tokens::TokenStore;
    use crate::db::Database;
    use chrono::Duration;

    struct Fixture {
        gate: AccessGate,
        tokens: TokenIssuer,
        users: UserStore,
        permissions: PermissionRegistry,
    }

    fn fixture() -> Fixture {
        let db = Database::open_in_memory().unwrap();
        let tokens = TokenIssuer::new(TokenStore::new(db.clone()));
        let users = UserStore::new(db.clone());
        let permissions = PermissionRegistry::new(PermissionStore::new(db));
        Fixture {
            gate: AccessGate::new(tokens.clone(), users.clone(), permissions.clone()),
            tokens,
            users,
            permissions,
        }
    }

    async fn user(f: &Fixture, email: &str, activated: bool) -> User {
        let mut user = User::new("Someone", email, Credential::from_hash("$argon2id$x".into()));
        user.activated = activated;
        f.users.insert(&mut user).await.unwrap();
        user
    }

    #[test]
    fn test_extract_bearer_token() {
        assert_eq!(extract_bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(extract_bearer_token("Bearer"), None);
        assert_eq!(extract_bearer_token("Bearer "), None);
        assert_eq!(extract_bearer_token("Basic abc"), None);
        assert_eq!(extract_bearer_token("Bearer abc def"), None);
    }

    #[tokio::test]
    async fn test_missing_header_is_anonymous() {
        let f = fixture();
        let principal = f.gate.authenticate(None).await.unwrap();
        assert!(principal.is_anonymous());
        assert!(matches!(
            f.gate.require_authenticated(&principal),
            Err(MarqueeError::Unauthenticated)
        ));
    }

    #[tokio::test]
    async fn test_bad_header_or_token_is_rejected() {
        let f = fixture();
        for header in ["Token abc", "Bearer tooshort", "Bearer ABCDEFGHIJKLMNOPQRSTUVWXYZ"] {
            assert!(matches!(
                f.gate.authenticate(Some(header)).await,
                Err(MarqueeError::InvalidOrExpiredToken)
            ));
        }
    }

    #[tokio::test]
    async fn test_activation_token_cannot_authenticate() {
        let f = fixture();
        let u = user(&f, "scoped@example.com", true).await;
        let token = f
            .tokens
            .issue(u.id, Duration::hours(1), TokenScope::Activation)
            .await
            .unwrap();

        let header = format!("Bearer {}", token.plaintext);
        assert!(matches!(
            f.gate.authenticate(Some(&header)).await,
            Err(MarqueeError::InvalidOrExpiredToken)
        ));
    }

    #[tokio::test]
    async fn test_401_and_403_are_distinct_stages() {
        let f = fixture();
        let inactive = user(&f, "inactive@example.com", false).await;
        let active = user(&f, "active@example.com", true).await;
        f.permissions.grant(active.id, [MOVIES_READ]).await.unwrap();
        f.permissions.grant(inactive.id, [MOVIES_READ]).await.unwrap();

        // Unactivated users are denied regardless of their codes
        let token = f
            .tokens
            .issue(inactive.id, Duration::hours(1), TokenScope::Authentication)
            .await
            .unwrap();
        let principal = f
            .gate
            .authenticate(Some(&format!("Bearer {}", token.plaintext)))
            .await
            .unwrap();
        let err = f
            .gate
            .require_permission(&principal, MOVIES_READ)
            .await
            .unwrap_err();
        assert!(matches!(err, MarqueeError::Unauthorized(_)));

        let token = f
            .tokens
            .issue(active.id, Duration::hours(1), TokenScope::Authentication)
            .await
            .unwrap();
        let principal = f
            .gate
            .authenticate(Some(&format!("Bearer {}", token.plaintext)))
            .await
            .unwrap();

        let allowed = f.gate.require_permission(&principal, MOVIES_READ).await.unwrap();
        assert_eq!(allowed.id, active.id);

        assert!(matches!(
            f.gate.require_permission(&principal, MOVIES_WRITE).await,
            Err(MarqueeError::Unauthorized(_))
        ));
        assert!(matches!(
            f.gate
                .require_permission(&Principal::Anonymous, MOVIES_READ)
                .await,
            Err(MarqueeError::Unauthenticated)
        ));
    }

    #[tokio::test]
    async fn test_authorize_tracks_registry() {
        let f = fixture();
        let u = user(&f, "member@example.com", true).await;

        assert!(!f.gate.authorize(&u, MOVIES_WRITE).await.unwrap());
        f.permissions.grant(u.id, [MOVIES_WRITE]).await.unwrap();
        f.permissions.grant(u.id, [MOVIES_WRITE]).await.unwrap();
        assert!(f.gate.authorize(&u, MOVIES_WRITE).await.unwrap());

        let listed = f.permissions.list_for_user(u.id).await.unwrap();
        assert_eq!(listed.iter().filter(|c| *c == MOVIES_WRITE).count(), 1);
    }
}
