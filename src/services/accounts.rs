//! Account workflows
//!
//! Registration, activation, login and logout. Unknown emails and wrong
//! passwords both surface as [`MarqueeError::InvalidCredentials`] so a login
//! response never reveals which accounts exist.

use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use crate::auth::permissions::MOVIES_READ;
use crate::auth::tokens::validate_token_plaintext;
use crate::auth::{Credential, Principal, Token, TokenScope};
use crate::db::users::{
    validate_email, validate_name, validate_password_plaintext, validate_user, User,
};
use crate::notify::{Notification, Template};
use crate::services::AppState;
use crate::types::{MarqueeError, Result};
use crate::validation::Validator;

/// Create an unactivated account that can read movies once activated
///
/// An activation token is issued and handed to the notifier in the
/// background; delivery failures never reach the caller.
pub async fn register_user(
    state: &AppState,
    name: &str,
    email: &str,
    password: &str,
) -> Result<User> {
    // Input is checked before any hashing work is spent on it
    let mut v = Validator::new();
    validate_name(&mut v, name);
    validate_email(&mut v, email);
    validate_password_plaintext(&mut v, password);
    v.into_result()?;

    let plaintext = password.to_string();
    let credential = tokio::task::spawn_blocking(move || Credential::set(&plaintext)).await??;

    let mut user = User::new(name, email, credential);
    let mut v = Validator::new();
    validate_user(&mut v, &user)?;
    v.into_result()?;

    state.users.insert(&mut user).await?;
    state.permissions.grant(user.id, [MOVIES_READ]).await?;

    let token = state
        .tokens
        .issue(
            user.id,
            state.config.activation_token_ttl,
            TokenScope::Activation,
        )
        .await?;

    let notifier = Arc::clone(&state.notifier);
    let notification = Notification {
        recipient: user.email.clone(),
        template: Template::UserWelcome,
        data: json!({
            "activationToken": token.plaintext,
            "userID": user.id,
        }),
    };
    state.background.spawn("welcome_notification", async move {
        notifier.send(notification).await
    });

    info!("Registered user {}", user.id);
    Ok(user)
}

/// Activate the account an activation token was issued for
///
/// Every outstanding activation token for the user is revoked afterwards.
pub async fn activate_user(state: &AppState, token_plaintext: &str) -> Result<User> {
    let mut v = Validator::new();
    validate_token_plaintext(&mut v, token_plaintext);
    v.into_result()?;

    let mut user = match state
        .users
        .get_for_token(TokenScope::Activation, token_plaintext)
        .await
    {
        Ok(user) => user,
        Err(MarqueeError::NotFound) => return Err(MarqueeError::InvalidOrExpiredToken),
        Err(e) => return Err(e),
    };

    user.activated = true;
    state.users.update(&mut user).await?;

    state
        .tokens
        .revoke_all_for_user(TokenScope::Activation, user.id)
        .await?;

    info!("Activated user {}", user.id);
    Ok(user)
}

/// Exchange an email and password for an authentication token
pub async fn create_authentication_token(
    state: &AppState,
    email: &str,
    password: &str,
) -> Result<Token> {
    let mut v = Validator::new();
    validate_email(&mut v, email);
    validate_password_plaintext(&mut v, password);
    v.into_result()?;

    let user = match state.users.get_by_email(email).await {
        Ok(user) => user,
        Err(MarqueeError::NotFound) => {
            warn!("Login failed - unknown email");
            return Err(MarqueeError::InvalidCredentials);
        }
        Err(e) => return Err(e),
    };

    let credential = user.password.clone();
    let candidate = password.to_string();
    let matches = tokio::task::spawn_blocking(move || credential.matches(&candidate)).await??;
    if !matches {
        warn!("Login failed - password mismatch for user {}", user.id);
        return Err(MarqueeError::InvalidCredentials);
    }

    state
        .tokens
        .issue(
            user.id,
            state.config.authentication_token_ttl,
            TokenScope::Authentication,
        )
        .await
}

/// Revoke every authentication token held by the principal
pub async fn logout(state: &AppState, principal: &Principal) -> Result<()> {
    let user = state.gate.require_authenticated(principal)?;
    state
        .tokens
        .revoke_all_for_user(TokenScope::Authentication, user.id)
        .await?;

    info!("Logged out user {}", user.id);
    Ok(())
}
