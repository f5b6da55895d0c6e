use super::models::{Thread, ThreadState};
use super::RelationalStore;
use crate::error::{EngineError, EngineResult};
use chrono::{Duration, Utc};
use rusqlite::params;
use serde_json::Value;
use uuid::Uuid;

impl RelationalStore {
    pub fn open_thread(&self, user_id: Uuid, trigger_reason: &str) -> EngineResult<Thread> {
        let now = Utc::now();
        let thread = Thread {
            id: Uuid::new_v4(),
            user_id,
            trigger: trigger_reason.to_string(),
            state: ThreadState::Open,
            created_at: now,
            updated_at: now,
            context: Value::Object(Default::default()),
        };
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO threads (id, user_id, trigger_reason, state, created_at, updated_at, context)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                thread.id.to_string(),
                thread.user_id.to_string(),
                thread.trigger,
                thread.state.as_str(),
                thread.created_at.to_rfc3339(),
                thread.updated_at.to_rfc3339(),
                serde_json::to_string(&thread.context)?,
            ],
        )?;
        Ok(thread)
    }

    /// Atomic state transition honoring the thread lifecycle; rejects
    /// unknown ids and illegal transitions.
    pub fn update_thread_state(&self, id: Uuid, new: ThreadState) -> EngineResult<()> {
        let conn = self.conn.lock();
        let current: String = conn
            .query_row("SELECT state FROM threads WHERE id = ?1", params![id.to_string()], |r| r.get(0))
            .map_err(|_| EngineError::Other(format!("thread {id} not found")))?;
        let current = ThreadState::parse(&current).ok_or_else(|| EngineError::Other(format!("corrupt thread state for {id}")))?;
        if !current.can_transition_to(&new) {
            return Err(EngineError::Other(format!("illegal thread transition {current:?} -> {new:?}")));
        }
        conn.execute(
            "UPDATE threads SET state = ?1, updated_at = ?2 WHERE id = ?3",
            params![new.as_str(), Utc::now().to_rfc3339(), id.to_string()],
        )?;
        Ok(())
    }

    pub fn get_pending_threads(&self, user_id: Uuid) -> EngineResult<Vec<Thread>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, trigger_reason, state, created_at, updated_at, context FROM threads
             WHERE user_id = ?1 AND state != 'resolved' ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map(params![user_id.to_string()], row_to_thread)?.filter_map(Result::ok).collect();
        Ok(rows)
    }

    pub fn get_thread(&self, id: Uuid) -> EngineResult<Option<Thread>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, user_id, trigger_reason, state, created_at, updated_at, context FROM threads WHERE id = ?1",
            params![id.to_string()],
            row_to_thread,
        )
        .map(Some)
        .or_else(|e| if e == rusqlite::Error::QueryReturnedNoRows { Ok(None) } else { Err(e) })
        .map_err(Into::into)
    }

    /// True iff `state == waiting` and it has been waiting an hour or more.
    pub fn should_follow_up(&self, id: Uuid) -> EngineResult<bool> {
        let Some(thread) = self.get_thread(id)? else { return Ok(false) };
        Ok(thread.state == ThreadState::Waiting && Utc::now() - thread.updated_at >= Duration::hours(1))
    }
}

fn row_to_thread(row: &rusqlite::Row) -> rusqlite::Result<Thread> {
    let id: String = row.get(0)?;
    let user_id: String = row.get(1)?;
    let state: String = row.get(3)?;
    let created_at: String = row.get(4)?;
    let updated_at: String = row.get(5)?;
    let context: String = row.get(6)?;
    Ok(Thread {
        id: id.parse().map_err(|_| rusqlite::Error::InvalidColumnType(0, "id".into(), rusqlite::types::Type::Text))?,
        user_id: user_id.parse().map_err(|_| rusqlite::Error::InvalidColumnType(1, "user_id".into(), rusqlite::types::Type::Text))?,
        trigger: row.get(2)?,
        state: ThreadState::parse(&state).unwrap_or(ThreadState::Open),
        created_at: created_at.parse().map_err(|_| rusqlite::Error::InvalidColumnType(4, "created_at".into(), rusqlite::types::Type::Text))?,
        updated_at: updated_at.parse().map_err(|_| rusqlite::Error::InvalidColumnType(5, "updated_at".into(), rusqlite::types::Type::Text))?,
        context: serde_json::from_str(&context).unwrap_or(Value::Null),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_transitions_succeed_illegal_ones_fail() {
        let store = RelationalStore::open_in_memory().unwrap();
        let user = store.get_or_create_user("nadia").unwrap();
        let thread = store.open_thread(user.id, "morning_checkin").unwrap();

        store.update_thread_state(thread.id, ThreadState::Waiting).unwrap();
        store.update_thread_state(thread.id, ThreadState::Resolved).unwrap();
        assert!(store.update_thread_state(thread.id, ThreadState::Open).is_err());
    }

    #[test]
    fn pending_threads_excludes_resolved() {
        let store = RelationalStore::open_in_memory().unwrap();
        let user = store.get_or_create_user("nadia").unwrap();
        let a = store.open_thread(user.id, "morning_checkin").unwrap();
        let b = store.open_thread(user.id, "evening_recap").unwrap();
        store.update_thread_state(b.id, ThreadState::Waiting).unwrap();
        store.update_thread_state(b.id, ThreadState::Resolved).unwrap();

        let pending = store.get_pending_threads(user.id).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, a.id);
    }

    #[test]
    fn should_follow_up_requires_waiting_and_elapsed_hour() {
        let store = RelationalStore::open_in_memory().unwrap();
        let user = store.get_or_create_user("nadia").unwrap();
        let thread = store.open_thread(user.id, "long_silence").unwrap();
        assert!(!store.should_follow_up(thread.id).unwrap());

        store.update_thread_state(thread.id, ThreadState::Waiting).unwrap();
        assert!(!store.should_follow_up(thread.id).unwrap());
    }
}
