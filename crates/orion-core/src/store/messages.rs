use super::models::{Message, Role};
use super::RelationalStore;
use crate::error::EngineResult;
use chrono::Utc;
use rusqlite::params;
use serde_json::Value;
use uuid::Uuid;

impl RelationalStore {
    pub fn insert_message(
        &self,
        user_id: Uuid,
        session_id: Option<Uuid>,
        role: Role,
        content: &str,
        metadata: &Value,
    ) -> EngineResult<Message> {
        let message = Message {
            id: Uuid::new_v4(),
            user_id,
            session_id,
            role,
            content: content.to_string(),
            timestamp: Utc::now(),
            metadata: metadata.clone(),
        };
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO messages (id, user_id, session_id, role, content, timestamp, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                message.id.to_string(),
                message.user_id.to_string(),
                message.session_id.map(|s| s.to_string()),
                message.role.as_str(),
                message.content,
                message.timestamp.to_rfc3339(),
                serde_json::to_string(&message.metadata)?,
            ],
        )?;
        Ok(message)
    }

    /// Most recent `limit` messages for `user_id`, in ascending time order.
    pub fn get_history(&self, user_id: Uuid, limit: i64) -> EngineResult<Vec<Message>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, session_id, role, content, timestamp, metadata FROM (
                SELECT * FROM messages WHERE user_id = ?1 ORDER BY timestamp DESC LIMIT ?2
             ) ORDER BY timestamp ASC",
        )?;
        let rows = stmt.query_map(params![user_id.to_string(), limit], row_to_message)?.filter_map(Result::ok).collect();
        Ok(rows)
    }

    pub fn get_messages_for_session(&self, session_id: Uuid) -> EngineResult<Vec<Message>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, session_id, role, content, timestamp, metadata FROM messages
             WHERE session_id = ?1 ORDER BY timestamp ASC",
        )?;
        let rows = stmt.query_map(params![session_id.to_string()], row_to_message)?.filter_map(Result::ok).collect();
        Ok(rows)
    }

    pub fn delete_messages(&self, ids: &[Uuid]) -> EngineResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let conn = self.conn.lock();
        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!("DELETE FROM messages WHERE id IN ({placeholders})");
        let params: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
        let refs: Vec<&dyn rusqlite::types::ToSql> = params.iter().map(|p| p as &dyn rusqlite::types::ToSql).collect();
        conn.execute(&sql, refs.as_slice())?;
        Ok(())
    }

    pub fn last_message_time(&self, user_id: Uuid) -> EngineResult<Option<chrono::DateTime<Utc>>> {
        let conn = self.conn.lock();
        let raw: Option<String> = conn
            .query_row("SELECT timestamp FROM messages WHERE user_id = ?1 ORDER BY timestamp DESC LIMIT 1", params![user_id.to_string()], |r| r.get(0))
            .ok();
        Ok(raw.and_then(|s| s.parse().ok()))
    }
}

fn row_to_message(row: &rusqlite::Row) -> rusqlite::Result<Message> {
    let id: String = row.get(0)?;
    let user_id: String = row.get(1)?;
    let session_id: Option<String> = row.get(2)?;
    let role: String = row.get(3)?;
    let timestamp: String = row.get(5)?;
    let metadata: String = row.get(6)?;
    Ok(Message {
        id: id.parse().map_err(|_| rusqlite::Error::InvalidColumnType(0, "id".into(), rusqlite::types::Type::Text))?,
        user_id: user_id.parse().map_err(|_| rusqlite::Error::InvalidColumnType(1, "user_id".into(), rusqlite::types::Type::Text))?,
        session_id: session_id.and_then(|s| s.parse().ok()),
        role: Role::parse(&role).unwrap_or(Role::User),
        content: row.get(4)?,
        timestamp: timestamp.parse().map_err(|_| rusqlite::Error::InvalidColumnType(5, "timestamp".into(), rusqlite::types::Type::Text))?,
        metadata: serde_json::from_str(&metadata).unwrap_or(Value::Null),
    })
}
