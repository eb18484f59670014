//! SQLite store for users, tokens, permissions and movies
//!
//! ## Tables
//!
//! - `users` - Principals with unique email and a version counter
//! - `tokens` - SHA-256 digests of issued bearer tokens
//! - `permissions` / `users_permissions` - Capability codes per user
//! - `movies` - Versioned movie records (plus the `movies_fts` index)
//!
//! Every call runs on the blocking pool and is bounded by the configured
//! deadline. A call still queued for the connection at its deadline is
//! abandoned and never runs. A call already running has its statement
//! interrupted, which rolls it back. [`MarqueeError::Timeout`] therefore
//! always means nothing was written.

pub mod movies;
pub mod permissions;
pub mod schema;
pub mod tokens;
pub mod users;

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rusqlite::{Connection, InterruptHandle};
use tracing::{debug, info, warn};

use crate::types::{MarqueeError, Result};

/// Default deadline for a single store operation
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(3);

/// Shared handle to the SQLite database
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    interrupt: Arc<InterruptHandle>,
    timeout: Duration,
}

/// Progress of one `call`, shared between the caller and the blocking task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallState {
    Queued,
    Running,
    Finished,
    Abandoned,
}

impl Database {
    /// Open or create the database file at `path`
    pub fn open(path: &Path, timeout: Duration) -> Result<Self> {
        info!("Opening SQLite database at {:?}", path);

        let conn = Connection::open(path)
            .map_err(|e| MarqueeError::internal(format!("Failed to open SQLite: {}", e)))?;

        conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;",
        )
        .map_err(|e| MarqueeError::internal(format!("Failed to set PRAGMA: {}", e)))?;

        Self::from_connection(conn, timeout)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        debug!("Opening in-memory SQLite database");

        let conn = Connection::open_in_memory().map_err(|e| {
            MarqueeError::internal(format!("Failed to open in-memory SQLite: {}", e))
        })?;

        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(|e| MarqueeError::internal(format!("Failed to set PRAGMA: {}", e)))?;

        Self::from_connection(conn, DEFAULT_STORE_TIMEOUT)
    }

    fn from_connection(conn: Connection, timeout: Duration) -> Result<Self> {
        schema::init_schema(&conn)?;
        let interrupt = Arc::new(conn.get_interrupt_handle());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            interrupt,
            timeout,
        })
    }

    /// Replace the per-operation deadline
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `f` against the connection on the blocking pool, bounded by the deadline
    ///
    /// `op` names the operation in logs and in the `Timeout` error. An `Ok`
    /// result may arrive slightly after the deadline when `f` was between
    /// statements as the interrupt fired; its writes are then committed and
    /// reported as such.
    pub async fn call<F, T>(&self, op: &'static str, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let deadline = Instant::now() + self.timeout;
        let state = Arc::new(Mutex::new(CallState::Queued));

        let conn = Arc::clone(&self.conn);
        let task_state = Arc::clone(&state);
        let mut task = tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| MarqueeError::internal(format!("Lock poisoned: {}", e)))?;

            {
                let mut state = task_state
                    .lock()
                    .map_err(|e| MarqueeError::internal(format!("Lock poisoned: {}", e)))?;
                if *state == CallState::Abandoned || Instant::now() >= deadline {
                    *state = CallState::Abandoned;
                    return Err(MarqueeError::Timeout(op));
                }
                *state = CallState::Running;
            }

            let result = f(&mut conn);

            // Finished before releasing the connection so a late interrupt
            // cannot land on the next caller's statement
            if let Ok(mut state) = task_state.lock() {
                *state = CallState::Finished;
            }
            result
        });

        let joined = match tokio::time::timeout_at(deadline.into(), &mut task).await {
            Ok(joined) => joined,
            Err(_) => {
                let running = {
                    let mut state = state
                        .lock()
                        .map_err(|e| MarqueeError::internal(format!("Lock poisoned: {}", e)))?;
                    match *state {
                        CallState::Queued => {
                            *state = CallState::Abandoned;
                            false
                        }
                        CallState::Running => {
                            self.interrupt.interrupt();
                            true
                        }
                        CallState::Finished | CallState::Abandoned => true,
                    }
                };

                if !running {
                    warn!(
                        "Store operation '{}' abandoned in queue after {:?}",
                        op, self.timeout
                    );
                    return Err(MarqueeError::Timeout(op));
                }

                warn!("Store operation '{}' interrupted after {:?}", op, self.timeout);
                task.await
            }
        };

        match joined? {
            Err(MarqueeError::Timeout(_)) => Err(MarqueeError::Timeout(op)),
            other => other,
        }
    }
}
