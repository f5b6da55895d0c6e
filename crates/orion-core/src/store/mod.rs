// Relational Store — persistent home for users, sessions, messages,
// threads, compressed memories and trigger log entries. One SQLite file
// per project directory, guarded by a single mutex the way this engine's
// own session store guards its connection.

pub mod models;
mod compression;
mod messages;
mod schema;
mod sessions;
mod threads;
mod triggers_log;
mod users;

use crate::error::EngineResult;
use log::info;
use parking_lot::Mutex;
use rusqlite::Connection;
use std::path::Path;

pub use models::{CompressedMemory, Message, Role, Session, Thread, ThreadState, TriggerLog, User};

/// Thread-safe SQLite-backed store. `pub` connection so integration tests
/// can reach in for ad-hoc assertions.
pub struct RelationalStore {
    pub conn: Mutex<Connection>,
}

impl RelationalStore {
    pub fn open(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        info!("[store] opening relational store at {}", path.display());
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> EngineResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> EngineResult<Self> {
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;").ok();
        schema::run_migrations(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_in_memory_runs_migrations() {
        let store = RelationalStore::open_in_memory().unwrap();
        let conn = store.conn.lock();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM sqlite_master WHERE type='table'", [], |r| r.get(0))
            .unwrap();
        assert!(count >= 6);
    }
}
