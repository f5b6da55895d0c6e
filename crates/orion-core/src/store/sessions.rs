use super::models::Session;
use super::RelationalStore;
use crate::error::EngineResult;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

impl RelationalStore {
    /// Resolve the user's open session (`ended_at IS NULL`), creating one
    /// if none exists.
    pub fn get_or_create_active_session(&self, user_id: Uuid) -> EngineResult<Session> {
        if let Some(session) = self.get_active_session(user_id)? {
            return Ok(session);
        }
        let session = Session { id: Uuid::new_v4(), user_id, started_at: Utc::now(), ended_at: None, message_count: 0, summary: None };
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO sessions (id, user_id, started_at, ended_at, message_count, summary) VALUES (?1, ?2, ?3, NULL, 0, NULL)",
            params![session.id.to_string(), session.user_id.to_string(), session.started_at.to_rfc3339()],
        )?;
        Ok(session)
    }

    pub fn get_active_session(&self, user_id: Uuid) -> EngineResult<Option<Session>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, user_id, started_at, ended_at, message_count, summary FROM sessions
             WHERE user_id = ?1 AND ended_at IS NULL ORDER BY started_at DESC LIMIT 1",
            params![user_id.to_string()],
            row_to_session,
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn end_session(&self, id: Uuid) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute("UPDATE sessions SET ended_at = ?1 WHERE id = ?2", params![Utc::now().to_rfc3339(), id.to_string()])?;
        Ok(())
    }

    pub fn increment_session_message_count(&self, id: Uuid) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute("UPDATE sessions SET message_count = message_count + 1 WHERE id = ?1", params![id.to_string()])?;
        Ok(())
    }

    /// Sessions that ended before `cutoff` and have not yet been summarized.
    pub fn sessions_pending_compression(&self, user_id: Uuid, cutoff: DateTime<Utc>) -> EngineResult<Vec<Session>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, started_at, ended_at, message_count, summary FROM sessions
             WHERE user_id = ?1 AND ended_at IS NOT NULL AND ended_at < ?2 AND summary IS NULL
             ORDER BY ended_at ASC",
        )?;
        let rows = stmt
            .query_map(params![user_id.to_string(), cutoff.to_rfc3339()], row_to_session)?
            .filter_map(Result::ok)
            .collect();
        Ok(rows)
    }

    pub fn set_session_summary(&self, id: Uuid, summary: &str) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute("UPDATE sessions SET summary = ?1 WHERE id = ?2", params![summary, id.to_string()])?;
        Ok(())
    }
}

fn row_to_session(row: &rusqlite::Row) -> rusqlite::Result<Session> {
    let id: String = row.get(0)?;
    let user_id: String = row.get(1)?;
    let started_at: String = row.get(2)?;
    let ended_at: Option<String> = row.get(3)?;
    Ok(Session {
        id: id.parse().map_err(|_| rusqlite::Error::InvalidColumnType(0, "id".into(), rusqlite::types::Type::Text))?,
        user_id: user_id.parse().map_err(|_| rusqlite::Error::InvalidColumnType(1, "user_id".into(), rusqlite::types::Type::Text))?,
        started_at: started_at.parse().map_err(|_| rusqlite::Error::InvalidColumnType(2, "started_at".into(), rusqlite::types::Type::Text))?,
        ended_at: ended_at.and_then(|s| s.parse().ok()),
        message_count: row.get(4)?,
        summary: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_session_is_reused_until_ended() {
        let store = RelationalStore::open_in_memory().unwrap();
        let user = store.get_or_create_user("nadia").unwrap();
        let a = store.get_or_create_active_session(user.id).unwrap();
        let b = store.get_or_create_active_session(user.id).unwrap();
        assert_eq!(a.id, b.id);

        store.end_session(a.id).unwrap();
        let c = store.get_or_create_active_session(user.id).unwrap();
        assert_ne!(a.id, c.id);
    }

    #[test]
    fn pending_compression_excludes_open_sessions() {
        let store = RelationalStore::open_in_memory().unwrap();
        let user = store.get_or_create_user("nadia").unwrap();
        let s = store.get_or_create_active_session(user.id).unwrap();
        let cutoff = Utc::now() + chrono::Duration::days(1);
        assert!(store.sessions_pending_compression(user.id, cutoff).unwrap().is_empty());

        store.end_session(s.id).unwrap();
        assert_eq!(store.sessions_pending_compression(user.id, cutoff).unwrap().len(), 1);
    }
}
