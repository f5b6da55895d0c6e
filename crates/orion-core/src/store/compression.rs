use super::models::CompressedMemory;
use super::RelationalStore;
use crate::error::EngineResult;
use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

impl RelationalStore {
    /// Writes the CompressedMemory row and stamps `session.summary` in one
    /// transaction; the caller is responsible for deleting the source
    /// messages (and their vector entries) separately.
    pub fn write_compressed_memory(
        &self,
        user_id: Uuid,
        session_id: Uuid,
        summary: &str,
        original_message_count: i64,
        date_range_start: DateTime<Utc>,
        date_range_end: DateTime<Utc>,
    ) -> EngineResult<CompressedMemory> {
        let memory = CompressedMemory {
            id: Uuid::new_v4(),
            user_id,
            session_id,
            summary: summary.to_string(),
            original_message_count,
            date_range_start,
            date_range_end,
            created_at: Utc::now(),
        };
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO compressed_memories
             (id, user_id, session_id, summary, original_message_count, date_range_start, date_range_end, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                memory.id.to_string(),
                memory.user_id.to_string(),
                memory.session_id.to_string(),
                memory.summary,
                memory.original_message_count,
                memory.date_range_start.to_rfc3339(),
                memory.date_range_end.to_rfc3339(),
                memory.created_at.to_rfc3339(),
            ],
        )?;
        tx.execute("UPDATE sessions SET summary = ?1 WHERE id = ?2", params![summary, session_id.to_string()])?;
        tx.commit()?;
        Ok(memory)
    }

    pub fn list_compressed_memories(&self, user_id: Uuid) -> EngineResult<Vec<CompressedMemory>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, session_id, summary, original_message_count, date_range_start, date_range_end, created_at
             FROM compressed_memories WHERE user_id = ?1 ORDER BY date_range_start ASC",
        )?;
        let rows = stmt.query_map(params![user_id.to_string()], row_to_memory)?.filter_map(Result::ok).collect();
        Ok(rows)
    }
}

fn row_to_memory(row: &rusqlite::Row) -> rusqlite::Result<CompressedMemory> {
    let id: String = row.get(0)?;
    let user_id: String = row.get(1)?;
    let session_id: String = row.get(2)?;
    let start: String = row.get(5)?;
    let end: String = row.get(6)?;
    let created_at: String = row.get(7)?;
    Ok(CompressedMemory {
        id: id.parse().map_err(|_| rusqlite::Error::InvalidColumnType(0, "id".into(), rusqlite::types::Type::Text))?,
        user_id: user_id.parse().map_err(|_| rusqlite::Error::InvalidColumnType(1, "user_id".into(), rusqlite::types::Type::Text))?,
        session_id: session_id.parse().map_err(|_| rusqlite::Error::InvalidColumnType(2, "session_id".into(), rusqlite::types::Type::Text))?,
        summary: row.get(3)?,
        original_message_count: row.get(4)?,
        date_range_start: start.parse().map_err(|_| rusqlite::Error::InvalidColumnType(5, "date_range_start".into(), rusqlite::types::Type::Text))?,
        date_range_end: end.parse().map_err(|_| rusqlite::Error::InvalidColumnType(6, "date_range_end".into(), rusqlite::types::Type::Text))?,
        created_at: created_at.parse().map_err(|_| rusqlite::Error::InvalidColumnType(7, "created_at".into(), rusqlite::types::Type::Text))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writing_memory_stamps_session_summary() {
        let store = RelationalStore::open_in_memory().unwrap();
        let user = store.get_or_create_user("nadia").unwrap();
        let session = store.get_or_create_active_session(user.id).unwrap();
        let now = Utc::now();

        store.write_compressed_memory(user.id, session.id, "talked about the weekend", 12, now, now).unwrap();

        let conn = store.conn.lock();
        let summary: Option<String> = conn
            .query_row("SELECT summary FROM sessions WHERE id = ?1", params![session.id.to_string()], |r| r.get(0))
            .unwrap();
        assert_eq!(summary.as_deref(), Some("talked about the weekend"));
    }
}
