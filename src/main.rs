//! Marquee - authentication, authorization and versioned records

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use marquee::{
    auth::TokenScope,
    config::{Args, Command, LogFormat},
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    // Initialize tracing/logging
    let log_level = args.log_level.clone();
    let json = args.log_format == LogFormat::Json;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("marquee={},info", log_level).into()),
        )
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .init();

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  Marquee");
    info!("======================================");
    info!("Environment: {}", args.env);
    info!("Database: {}", args.database_path.display());
    info!("Store timeout: {:?}", args.store_timeout());
    info!("======================================");

    // Opening the database creates or upgrades the schema
    let state = AppState::from_args(&args).context("failed to open database")?;

    match &args.command {
        Some(Command::Migrate) => {
            info!("Schema is up to date");
        }
        Some(Command::Grant { email, codes }) => {
            let user = state
                .users
                .get_by_email(email)
                .await
                .with_context(|| format!("no user with email {}", email))?;
            state
                .permissions
                .grant(user.id, codes.iter().cloned())
                .await?;
            let granted = state.permissions.list_for_user(user.id).await?;
            info!(
                "User {} now holds: {}",
                user.id,
                granted.iter().collect::<Vec<_>>().join(", ")
            );
        }
        Some(Command::RevokeTokens { email, scope }) => {
            let user = state
                .users
                .get_by_email(email)
                .await
                .with_context(|| format!("no user with email {}", email))?;
            state.tokens.revoke_all_for_user(*scope, user.id).await?;
            if *scope == TokenScope::Authentication {
                info!("User {} has been signed out everywhere", user.id);
            }
        }
        None => {
            info!("Marquee core ready, press Ctrl+C to stop");
            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for shutdown signal")?;
            info!("Shutdown signal received");
        }
    }

    state.background.wait().await;
    info!("Marquee stopped");
    Ok(())
}
