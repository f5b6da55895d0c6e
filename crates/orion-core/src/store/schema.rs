// Relational Store schema + migrations.
//
// Convention (carried from this engine's own migration runner): adding a
// new table or column means appending an idempotent `CREATE TABLE IF NOT
// EXISTS` or `ALTER TABLE ... ADD COLUMN` (errors swallowed) at the end of
// `run_migrations` — never edit existing statements, so upgrade paths stay
// clean for databases created by older builds.

use crate::error::EngineResult;
use rusqlite::Connection;

pub fn run_migrations(conn: &Connection) -> EngineResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            created_at TEXT NOT NULL,
            settings TEXT NOT NULL DEFAULT '{}'
        );

        CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            started_at TEXT NOT NULL,
            ended_at TEXT,
            message_count INTEGER NOT NULL DEFAULT 0,
            summary TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id);
        CREATE INDEX IF NOT EXISTS idx_sessions_open ON sessions(user_id, ended_at);

        CREATE TABLE IF NOT EXISTS messages (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            session_id TEXT REFERENCES sessions(id) ON DELETE CASCADE,
            role TEXT NOT NULL,
            content TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            metadata TEXT NOT NULL DEFAULT '{}'
        );
        CREATE INDEX IF NOT EXISTS idx_messages_user_time ON messages(user_id, timestamp);
        CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id);

        CREATE TABLE IF NOT EXISTS threads (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            trigger_reason TEXT NOT NULL,
            state TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            context TEXT NOT NULL DEFAULT '{}'
        );
        CREATE INDEX IF NOT EXISTS idx_threads_user_state ON threads(user_id, state);

        CREATE TABLE IF NOT EXISTS compressed_memories (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            session_id TEXT NOT NULL,
            summary TEXT NOT NULL,
            original_message_count INTEGER NOT NULL,
            date_range_start TEXT NOT NULL,
            date_range_end TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_compressed_memories_user ON compressed_memories(user_id);

        CREATE TABLE IF NOT EXISTS trigger_log (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            trigger_type TEXT NOT NULL,
            reason TEXT NOT NULL,
            urgency TEXT NOT NULL,
            acted_on INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_trigger_log_user ON trigger_log(user_id);
        ",
    )?;

    // Idempotent column additions go below this line, each guarded with
    // `.ok()` so a rerun against an already-migrated database never errors.
    conn.execute("ALTER TABLE messages ADD COLUMN fact_category TEXT", []).ok();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        conn
    }

    #[test]
    fn migrations_run_cleanly() {
        let conn = memory_conn();
        run_migrations(&conn).unwrap();
    }

    #[test]
    fn migrations_are_idempotent() {
        let conn = memory_conn();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();
    }

    #[test]
    fn core_tables_created() {
        let conn = memory_conn();
        run_migrations(&conn).unwrap();
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table'")
            .unwrap();
        let names: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(Result::ok)
            .collect();
        for expected in ["users", "sessions", "messages", "threads", "compressed_memories", "trigger_log"] {
            assert!(names.iter().any(|n| n == expected), "missing table {expected}");
        }
    }
}
