//! Authentication and authorization for Marquee
//!
//! Provides:
//! - Password hashing with Argon2
//! - Opaque bearer token issuance, validation and revocation
//! - Capability codes per user
//! - The access gate that combines the above per request

pub mod gate;
pub mod password;
pub mod permissions;
pub mod tokens;

pub use gate::{extract_bearer_token, AccessGate, Principal};
pub use password::Credential;
pub use permissions::{PermissionRegistry, Permissions, MOVIES_READ, MOVIES_WRITE};
pub use tokens::{generate_token, hash_plaintext, Token, TokenIssuer, TokenScope};
