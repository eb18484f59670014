//! Services layer for Marquee
//!
//! Workflows that coordinate the stores, the token issuer and the access
//! gate. The resolved [`Principal`](crate::auth::Principal) is always an
//! explicit argument.
//!
//! ## Services
//!
//! - **Accounts**: registration, activation, login and logout
//! - **Movies**: permission-gated CRUD and filtered listing

pub mod accounts;
pub mod movies;

use std::sync::Arc;

use crate::auth::{AccessGate, PermissionRegistry, TokenIssuer};
use crate::background::BackgroundTasks;
use crate::config::Args;
use crate::db::movies::MovieStore;
use crate::db::permissions::PermissionStore;
use crate::db::tokens::TokenStore;
use crate::db::users::UserStore;
use crate::db::Database;
use crate::notify::{LogNotifier, Notifier};
use crate::types::Result;

pub use accounts::{activate_user, create_authentication_token, logout, register_user};
pub use movies::{create_movie, delete_movie, list_movies, show_movie, update_movie};

/// Token lifetimes used by the account workflows
#[derive(Debug, Clone, Copy)]
pub struct ServiceConfig {
    pub activation_token_ttl: chrono::Duration,
    pub authentication_token_ttl: chrono::Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            activation_token_ttl: chrono::Duration::hours(72),
            authentication_token_ttl: chrono::Duration::hours(24),
        }
    }
}

impl ServiceConfig {
    pub fn from_args(args: &Args) -> Self {
        Self {
            activation_token_ttl: args.activation_token_ttl(),
            authentication_token_ttl: args.authentication_token_ttl(),
        }
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: ServiceConfig,
    pub db: Database,
    pub users: UserStore,
    pub movies: MovieStore,
    pub tokens: TokenIssuer,
    pub permissions: PermissionRegistry,
    pub gate: AccessGate,
    /// Delivery for welcome messages, always dispatched in the background
    pub notifier: Arc<dyn Notifier>,
    /// Detached work that shutdown waits for
    pub background: BackgroundTasks,
}

impl AppState {
    /// Wire every store and service onto one database handle
    pub fn new(db: Database, config: ServiceConfig, notifier: Arc<dyn Notifier>) -> Self {
        let users = UserStore::new(db.clone());
        let movies = MovieStore::new(db.clone());
        let tokens = TokenIssuer::new(TokenStore::new(db.clone()));
        let permissions = PermissionRegistry::new(PermissionStore::new(db.clone()));
        let gate = AccessGate::new(tokens.clone(), users.clone(), permissions.clone());

        Self {
            config,
            db,
            users,
            movies,
            tokens,
            permissions,
            gate,
            notifier,
            background: BackgroundTasks::new(),
        }
    }

    /// Open the configured database and build state with a logging notifier
    pub fn from_args(args: &Args) -> Result<Self> {
        let db = Database::open(&args.database_path, args.store_timeout())?;
        let notifier = Arc::new(LogNotifier::new(args.notification_sender.clone()));
        Ok(Self::new(db, ServiceConfig::from_args(args), notifier))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::auth::{Principal, TokenScope};
    use crate::db::users::User;
    use crate::notify::MemoryNotifier;

    pub const PASSWORD: &str = "pa55word-pa55word";

    pub fn state() -> (AppState, MemoryNotifier) {
        let notifier = MemoryNotifier::new();
        let db = Database::open_in_memory().unwrap();
        let state = AppState::new(db, ServiceConfig::default(), Arc::new(notifier.clone()));
        (state, notifier)
    }

    /// Register, activate and grant `codes`, returning the authenticated principal
    pub async fn principal_with(state: &AppState, email: &str, codes: &[&str]) -> Principal {
        let user = register_user(state, "Test User", email, PASSWORD).await.unwrap();
        let token = state
            .tokens
            .issue(user.id, chrono::Duration::hours(1), TokenScope::Activation)
            .await
            .unwrap();
        activate_user(state, &token.plaintext).await.unwrap();
        state
            .permissions
            .grant(user.id, codes.iter().copied())
            .await
            .unwrap();

        let user: User = state.users.get(user.id).await.unwrap();
        Principal::User(user)
    }
}
