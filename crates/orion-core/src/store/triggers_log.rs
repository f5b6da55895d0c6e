use super::models::TriggerLog;
use super::RelationalStore;
use crate::error::EngineResult;
use chrono::Utc;
use rusqlite::params;
use uuid::Uuid;

impl RelationalStore {
    /// Best-effort append; callers treat failures as non-fatal to the
    /// trigger firing itself.
    pub fn append_trigger_log(&self, user_id: Uuid, trigger_type: &str, reason: &str, urgency: &str, acted_on: bool) -> EngineResult<TriggerLog> {
        let entry = TriggerLog {
            id: Uuid::new_v4(),
            user_id,
            trigger_type: trigger_type.to_string(),
            reason: reason.to_string(),
            urgency: urgency.to_string(),
            acted_on,
            created_at: Utc::now(),
        };
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO trigger_log (id, user_id, trigger_type, reason, urgency, acted_on, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                entry.id.to_string(),
                entry.user_id.to_string(),
                entry.trigger_type,
                entry.reason,
                entry.urgency,
                entry.acted_on as i64,
                entry.created_at.to_rfc3339(),
            ],
        )?;
        Ok(entry)
    }

    pub fn recent_trigger_log(&self, user_id: Uuid, limit: i64) -> EngineResult<Vec<TriggerLog>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, trigger_type, reason, urgency, acted_on, created_at FROM trigger_log
             WHERE user_id = ?1 ORDER BY created_at DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![user_id.to_string(), limit], row_to_log)?.filter_map(Result::ok).collect();
        Ok(rows)
    }
}

fn row_to_log(row: &rusqlite::Row) -> rusqlite::Result<TriggerLog> {
    let id: String = row.get(0)?;
    let user_id: String = row.get(1)?;
    let created_at: String = row.get(6)?;
    let acted_on: i64 = row.get(5)?;
    Ok(TriggerLog {
        id: id.parse().map_err(|_| rusqlite::Error::InvalidColumnType(0, "id".into(), rusqlite::types::Type::Text))?,
        user_id: user_id.parse().map_err(|_| rusqlite::Error::InvalidColumnType(1, "user_id".into(), rusqlite::types::Type::Text))?,
        trigger_type: row.get(2)?,
        reason: row.get(3)?,
        urgency: row.get(4)?,
        acted_on: acted_on != 0,
        created_at: created_at.parse().map_err(|_| rusqlite::Error::InvalidColumnType(6, "created_at".into(), rusqlite::types::Type::Text))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_read_back_in_recency_order() {
        let store = RelationalStore::open_in_memory().unwrap();
        let user = store.get_or_create_user("nadia").unwrap();
        store.append_trigger_log(user.id, "morning_checkin", "scheduled", "low", true).unwrap();
        store.append_trigger_log(user.id, "long_silence", "48h quiet", "medium", false).unwrap();

        let log = store.recent_trigger_log(user.id, 10).unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].trigger_type, "long_silence");
    }
}
