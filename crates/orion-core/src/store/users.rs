use super::models::User;
use super::RelationalStore;
use crate::error::EngineResult;
use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde_json::Value;
use uuid::Uuid;

impl RelationalStore {
    /// Fetch the user named `name`, creating one with empty settings if
    /// none exists yet.
    pub fn get_or_create_user(&self, name: &str) -> EngineResult<User> {
        if let Some(user) = self.find_user_by_name(name)? {
            return Ok(user);
        }
        let user = User { id: Uuid::new_v4(), name: name.to_string(), created_at: Utc::now(), settings: Value::Object(Default::default()) };
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO users (id, name, created_at, settings) VALUES (?1, ?2, ?3, ?4)",
            params![user.id.to_string(), user.name, user.created_at.to_rfc3339(), serde_json::to_string(&user.settings)?],
        )?;
        Ok(user)
    }

    pub fn find_user_by_name(&self, name: &str) -> EngineResult<Option<User>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, name, created_at, settings FROM users WHERE name = ?1",
            params![name],
            |row| row_to_user(row),
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn get_user(&self, id: Uuid) -> EngineResult<Option<User>> {
        let conn = self.conn.lock();
        conn.query_row("SELECT id, name, created_at, settings FROM users WHERE id = ?1", params![id.to_string()], |row| row_to_user(row))
            .optional()
            .map_err(Into::into)
    }

    pub fn update_user_settings(&self, id: Uuid, settings: &Value) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute("UPDATE users SET settings = ?1 WHERE id = ?2", params![serde_json::to_string(settings)?, id.to_string()])?;
        Ok(())
    }
}

fn row_to_user(row: &rusqlite::Row) -> rusqlite::Result<User> {
    let id: String = row.get(0)?;
    let created_at: String = row.get(2)?;
    let settings: String = row.get(3)?;
    Ok(User {
        id: id.parse().map_err(|_| rusqlite::Error::InvalidColumnType(0, "id".into(), rusqlite::types::Type::Text))?,
        name: row.get(1)?,
        created_at: created_at.parse().map_err(|_| rusqlite::Error::InvalidColumnType(2, "created_at".into(), rusqlite::types::Type::Text))?,
        settings: serde_json::from_str(&settings).unwrap_or(Value::Null),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_or_create_is_idempotent() {
        let store = RelationalStore::open_in_memory().unwrap();
        let a = store.get_or_create_user("nadia").unwrap();
        let b = store.get_or_create_user("nadia").unwrap();
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn distinct_names_get_distinct_users() {
        let store = RelationalStore::open_in_memory().unwrap();
        let a = store.get_or_create_user("nadia").unwrap();
        let b = store.get_or_create_user("owen").unwrap();
        assert_ne!(a.id, b.id);
    }
}
