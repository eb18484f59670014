//! Configuration for Marquee
//!
//! CLI arguments and environment variable handling using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

use crate::auth::TokenScope;

/// Marquee - access control and versioned records for the movie catalogue
#[derive(Parser, Debug, Clone)]
#[command(name = "marquee", version)]
#[command(about = "Authentication, authorization and optimistic concurrency core")]
pub struct Args {
    /// SQLite database file
    #[arg(long, env = "DATABASE_PATH", default_value = "marquee.db")]
    pub database_path: PathBuf,

    /// Deadline for a single store operation, in milliseconds
    #[arg(long, env = "STORE_TIMEOUT_MS", default_value = "3000")]
    pub store_timeout_ms: u64,

    /// Lifetime of activation tokens, in hours
    #[arg(long, env = "ACTIVATION_TOKEN_TTL_HOURS", default_value = "72")]
    pub activation_token_ttl_hours: i64,

    /// Lifetime of authentication tokens, in hours
    #[arg(long, env = "AUTHENTICATION_TOKEN_TTL_HOURS", default_value = "24")]
    pub authentication_token_ttl_hours: i64,

    /// Environment (development|staging|production)
    #[arg(long, env = "MARQUEE_ENV", default_value = "development")]
    pub env: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value = "text")]
    pub log_format: LogFormat,

    /// Sender shown on outgoing notifications
    #[arg(
        long,
        env = "NOTIFICATION_SENDER",
        default_value = "Marquee <no-reply@marquee.local>"
    )]
    pub notification_sender: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Log output format
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Operator commands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Create or upgrade the database schema and exit
    Migrate,

    /// Grant capability codes to a user
    Grant {
        /// Email of the user
        email: String,
        /// Codes to grant, e.g. movies:write
        #[arg(required = true)]
        codes: Vec<String>,
    },

    /// Revoke every token of one scope for a user
    RevokeTokens {
        /// Email of the user
        email: String,
        /// Token scope (activation|authentication)
        #[arg(long, default_value = "authentication")]
        scope: TokenScope,
    },
}

const ENVIRONMENTS: &[&str] = &["development", "staging", "production"];

impl Args {
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn activation_token_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.activation_token_ttl_hours)
    }

    pub fn authentication_token_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.authentication_token_ttl_hours)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if !ENVIRONMENTS.contains(&self.env.as_str()) {
            return Err(format!(
                "MARQUEE_ENV must be one of {}",
                ENVIRONMENTS.join("|")
            ));
        }

        if self.store_timeout_ms == 0 {
            return Err("STORE_TIMEOUT_MS must be greater than zero".to_string());
        }

        if self.activation_token_ttl_hours <= 0 || self.authentication_token_ttl_hours <= 0 {
            return Err("token TTLs must be greater than zero".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["marquee"]);
        assert!(args.validate().is_ok());
        assert_eq!(args.store_timeout(), Duration::from_secs(3));
        assert_eq!(args.activation_token_ttl(), chrono::Duration::hours(72));
        assert_eq!(args.authentication_token_ttl(), chrono::Duration::hours(24));
        assert!(args.command.is_none());
    }

    #[test]
    fn test_version_flag() {
        let err = Args::try_parse_from(["marquee", "--version"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
        assert!(err.to_string().contains(env!("CARGO_PKG_VERSION")));
    }

    #[test]
    fn test_rejects_bad_values() {
        let args = Args::parse_from(["marquee", "--env", "prod"]);
        assert!(args.validate().is_err());

        let args = Args::parse_from(["marquee", "--store-timeout-ms", "0"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_subcommands() {
        let args = Args::parse_from(["marquee", "grant", "a@example.com", "movies:write"]);
        match args.command {
            Some(Command::Grant { email, codes }) => {
                assert_eq!(email, "a@example.com");
                assert_eq!(codes, vec!["movies:write".to_string()]);
            }
            other => panic!("unexpected command: {:?}", other),
        }

        let args = Args::parse_from([
            "marquee",
            "revoke-tokens",
            "a@example.com",
            "--scope",
            "activation",
        ]);
        assert!(matches!(
            args.command,
            Some(Command::RevokeTokens {
                scope: TokenScope::Activation,
                ..
            })
        ));
    }
}
