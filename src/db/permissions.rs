//! Permission code rows

use rusqlite::params;

use crate::db::Database;
use crate::types::Result;

/// Store for the user → permission code join
#[derive(Clone)]
pub struct PermissionStore {
    db: Database,
}

impl PermissionStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn get_all_for_user(&self, user_id: i64) -> Result<Vec<String>> {
        self.db
            .call("permissions.get_all_for_user", move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT permissions.code FROM permissions
                     INNER JOIN users_permissions ON users_permissions.permission_id = permissions.id
                     WHERE users_permissions.user_id = ?",
                )?;

                let codes = stmt
                    .query_map(params![user_id], |row| row.get(0))?
                    .collect::<std::result::Result<Vec<String>, _>>()?;

                Ok(codes)
            })
            .await
    }

    /// Associate `codes` with the user; codes already held are left alone
    pub async fn add_for_user(&self, user_id: i64, codes: Vec<String>) -> Result<()> {
        if codes.is_empty() {
            return Ok(());
        }

        let codes_json = serde_json::to_string(&codes)?;

        self.db
            .call("permissions.add_for_user", move |conn| {
                let tx = conn.transaction()?;

                tx.execute(
                    "INSERT OR IGNORE INTO permissions (code)
                     SELECT value FROM json_each(?)",
                    params![codes_json],
                )?;

                tx.execute(
                    "INSERT OR IGNORE INTO users_permissions (user_id, permission_id)
                     SELECT ?, permissions.id FROM permissions
                     WHERE permissions.code IN (SELECT value FROM json_each(?))",
                    params![user_id, codes_json],
                )?;

                tx.commit()?;
                Ok(())
            })
            .await
    }
}
