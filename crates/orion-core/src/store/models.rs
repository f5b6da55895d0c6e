use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            "system" => Some(Role::System),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ThreadState {
    Open,
    Waiting,
    Resolved,
}

impl ThreadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreadState::Open => "open",
            ThreadState::Waiting => "waiting",
            ThreadState::Resolved => "resolved",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(ThreadState::Open),
            "waiting" => Some(ThreadState::Waiting),
            "resolved" => Some(ThreadState::Resolved),
            _ => None,
        }
    }

    /// Whether `self -> next` is a legal transition per the state machine:
    /// {open} -> {waiting, resolved}; {waiting} -> {open, resolved};
    /// {resolved} terminal.
    pub fn can_transition_to(&self, next: &ThreadState) -> bool {
        matches!(
            (self, next),
            (ThreadState::Open, ThreadState::Waiting)
                | (ThreadState::Open, ThreadState::Resolved)
                | (ThreadState::Waiting, ThreadState::Open)
                | (ThreadState::Waiting, ThreadState::Resolved)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub settings: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub message_count: i64,
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub user_id: Uuid,
    pub session_id: Option<Uuid>,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub metadata: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub id: Uuid,
    pub user_id: Uuid,
    pub trigger: String,
    pub state: ThreadState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub context: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressedMemory {
    pub id: Uuid,
    pub user_id: Uuid,
    pub session_id: Uuid,
    pub summary: String,
    pub original_message_count: i64,
    pub date_range_start: DateTime<Utc>,
    pub date_range_end: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerLog {
    pub id: Uuid,
    pub user_id: Uuid,
    pub trigger_type: String,
    pub reason: String,
    pub urgency: String,
    pub acted_on: bool,
    pub created_at: DateTime<Utc>,
}
