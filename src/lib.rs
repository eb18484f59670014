//! Marquee - authentication, authorization and versioned records
//!
//! Marquee is the core behind a movie catalogue API: who is calling, what
//! they may do, and how concurrent edits to the same record are kept from
//! overwriting each other.
//!
//! ## Components
//!
//! - **Password hasher**: Argon2 credentials with clean mismatch reporting
//! - **Tokens**: opaque 26-character bearer tokens stored only as digests
//! - **Permissions**: capability codes granted per user
//! - **Access gate**: resolves the principal and checks activation and codes
//! - **Record store**: SQLite storage with version-guarded updates
//! - **Background tasks**: supervised fire-and-forget work drained on shutdown

pub mod auth;
pub mod background;
pub mod config;
pub mod db;
pub mod notify;
pub mod services;
pub mod types;
pub mod validation;

pub use config::Args;
pub use services::AppState;
pub use types::{MarqueeError, Result};
