// Cross-component scenarios wiring an in-memory store, embedded vector
// store, fake provider/channel pair — nothing here touches the network.

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use orion_core::auth::AuthBroker;
use orion_core::channel::test_support::FakeChannel;
use orion_core::channel::Channel;
use orion_core::config::Config;
use orion_core::orchestrator::Orchestrator;
use orion_core::policy::PermissionPolicy;
use orion_core::providers::{ChatMessage, ProviderEngine};
use orion_core::sandbox::PermissionSandbox;
use orion_core::store::{RelationalStore, Role};
use orion_core::triggers::{Trigger, TriggerContext, TriggerEngine, TriggerType};
use orion_core::vector::{EmbeddingClient, LocalVectorStore, VectorBackend};
use orion_core::memory::MemoryFacade;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

struct FakeProvider {
    name: &'static str,
    available: bool,
}

#[async_trait]
impl ProviderEngine for FakeProvider {
    async fn generate(&self, prompt: &str, _context: &[ChatMessage]) -> String {
        format!("[{}] reply to: {prompt}", self.name)
    }

    async fn stream(&self, prompt: &str, _context: &[ChatMessage]) -> BoxStream<'static, String> {
        stream::iter(vec![format!("[{}] {prompt}", self.name)]).boxed()
    }

    async fn is_available(&self) -> bool {
        self.available
    }

    fn get_name(&self) -> &str {
        self.name
    }
}

fn temp_path(label: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("orion-scenario-{label}-{}", Uuid::new_v4()))
}

fn memory_facade(store: Arc<RelationalStore>) -> MemoryFacade {
    let dir = temp_path("vectors");
    let vectors: Arc<dyn VectorBackend> = Arc::new(LocalVectorStore::new(dir));
    let embedder = Arc::new(EmbeddingClient::new("http://127.0.0.1:1", "nomic-embed-text", None));
    MemoryFacade::new(store, vectors, embedder)
}

/// Scenario 1 — fresh turn, Claude-only environment: the only available
/// engine is Anthropic, so routing for "reasoning" must return it.
#[tokio::test]
async fn scenario_fresh_turn_claude_only_env() {
    let config = Arc::new(Config::default());
    let auth = Arc::new(AuthBroker::new(&config));
    let mut engines: HashMap<String, Arc<dyn ProviderEngine>> = HashMap::new();
    engines.insert("anthropic".to_string(), Arc::new(FakeProvider { name: "anthropic", available: true }));
    engines.insert("openai".to_string(), Arc::new(FakeProvider { name: "openai", available: false }));
    engines.insert("gemini".to_string(), Arc::new(FakeProvider { name: "gemini", available: false }));

    let orchestrator = Orchestrator::with_engines_for_test(config, auth, engines);
    let engine = orchestrator.route("reasoning").await.unwrap();
    assert_eq!(engine.get_name(), "anthropic");

    let reply = engine.generate("Hi", &[]).await;
    assert!(!reply.is_empty());
    assert!(!reply.starts_with("[Error]"));
}

/// Scenario 2 — fallback when the primary provider is unavailable.
#[tokio::test]
async fn scenario_fallback_when_primary_down() {
    let config = Arc::new(Config::default());
    let auth = Arc::new(AuthBroker::new(&config));
    let mut engines: HashMap<String, Arc<dyn ProviderEngine>> = HashMap::new();
    engines.insert("anthropic".to_string(), Arc::new(FakeProvider { name: "anthropic", available: false }));
    engines.insert("openai".to_string(), Arc::new(FakeProvider { name: "openai", available: true }));

    let orchestrator = Orchestrator::with_engines_for_test(config, auth, engines);
    let engine = orchestrator.route("reasoning").await.unwrap();
    assert_eq!(engine.get_name(), "openai");
}

/// Scenario 3 — permission-denied file write to a blocked path.
#[test]
fn scenario_permission_denied_file_write() {
    let policy_path = temp_path("policy");
    let policy = Arc::new(PermissionPolicy::load(&policy_path).unwrap());
    let channel: Arc<dyn Channel> = Arc::new(FakeChannel::new());
    let sandbox = PermissionSandbox::new(policy, channel);

    let mut details = HashMap::new();
    details.insert("path".to_string(), Value::String("/etc/hosts".to_string()));
    let decision = sandbox.check("file.write", &details);

    assert!(!decision.allowed);
    assert!(decision.reason.contains("blocked"), "reason was: {}", decision.reason);
    std::fs::remove_file(&policy_path).ok();
}

/// Scenario 4 — a confirmation request with no reply posted within the
/// timeout is treated as a denial.
#[tokio::test]
async fn scenario_confirm_timeout_is_deny() {
    let policy_path = temp_path("policy-confirm");
    std::fs::write(
        &policy_path,
        "terminal:\n  enabled: true\n  require_confirm: true\n  blocked_commands: []\nbrowsing:\n  enabled: true\n  allowed_domains: []\n  blocked_domains: []\nsearch:\n  enabled: true\n  engine: duckduckgo\nfile_system:\n  enabled: true\n  read: true\n  write: true\n  delete: false\napp_control:\n  enabled: true\n  allowed_apps: []\ninput_control:\n  enabled: true\ncalendar:\n  enabled: true\n  read: true\n  write: false\nsystem_info:\n  enabled: true\ncamera:\n  enabled: true\n  mode: off\nvoice:\n  enabled: true\n  tts_engine: none\n  stt_engine: none\nproactive:\n  enabled: true\n  max_messages_per_hour: 4\n",
    )
    .unwrap();
    let policy = Arc::new(PermissionPolicy::load(&policy_path).unwrap());
    let channel: Arc<dyn Channel> = Arc::new(FakeChannel::new());
    let sandbox = PermissionSandbox::new(policy, channel);

    let mut details = HashMap::new();
    details.insert("command".to_string(), Value::String("ls".to_string()));
    let confirmed = sandbox.request_confirm("terminal.run", &details, "owner", 1).await;
    assert!(!confirmed);
    std::fs::remove_file(&policy_path).ok();
}

/// Scenario 5 — compressing a closed, stale session produces one
/// CompressedMemory and deletes the underlying messages.
#[tokio::test]
async fn scenario_compression_of_stale_session() {
    let store = Arc::new(RelationalStore::open_in_memory().unwrap());
    let facade = memory_facade(store.clone());

    for i in 0..5 {
        facade.save_message("nadia", Role::User, &format!("message {i}"), Value::Null).await.unwrap();
    }

    let user = store.get_or_create_user("nadia").unwrap();
    let session = store.get_active_session(user.id).unwrap().unwrap();
    store.end_session(session.id).unwrap();
    {
        let conn = store.conn.lock();
        let old = (Utc::now() - Duration::days(40)).to_rfc3339();
        conn.execute("UPDATE sessions SET ended_at = ?1 WHERE id = ?2", rusqlite::params![old, session.id.to_string()]).unwrap();
    }

    let compressed = facade.compress_old_sessions("nadia", 30, None).await.unwrap();
    assert_eq!(compressed, 1);

    let memories = store.list_compressed_memories(user.id).unwrap();
    assert_eq!(memories.len(), 1);
    assert_eq!(memories[0].original_message_count, 5);

    let summary: Option<String> = {
        let conn = store.conn.lock();
        conn.query_row("SELECT summary FROM sessions WHERE id = ?1", rusqlite::params![session.id.to_string()], |row| row.get(0)).unwrap()
    };
    assert!(summary.is_some());

    let history = facade.get_history("nadia", 10).unwrap();
    assert!(history.is_empty());
}

/// Scenario 6 — a time_based trigger fires once, cools down for the rest
/// of the day, then fires again on the next matching day.
#[test]
fn scenario_trigger_fires_then_cools_down() {
    let trigger = Trigger {
        id: "standup".to_string(),
        trigger_type: TriggerType::TimeBased,
        condition: serde_json::json!({"hour": 8, "minute": 0, "days": ["mon", "tue", "wed", "thu", "fri"]}),
        message_template: "Good morning, {day}!".to_string(),
        last_fired: None,
        enabled: true,
    };

    // A Tuesday at 08:00 UTC.
    let tuesday_8am = Utc.with_ymd_and_hms(2026, 7, 28, 8, 0, 0).unwrap();
    let context = TriggerContext { current_time: tuesday_8am, last_message_time: None, recent_messages: vec![] };
    assert!(TriggerEngine::evaluate_for_test(&trigger, &context));

    let mut fired_trigger = trigger.clone();
    fired_trigger.last_fired = Some(tuesday_8am);
    let same_day_again = TriggerContext { current_time: tuesday_8am, last_message_time: None, recent_messages: vec![] };
    assert!(!TriggerEngine::evaluate_for_test(&fired_trigger, &same_day_again));

    let next_tuesday_8am = tuesday_8am + Duration::days(7);
    let next_week = TriggerContext { current_time: next_tuesday_8am, last_message_time: None, recent_messages: vec![] };
    assert!(TriggerEngine::evaluate_for_test(&fired_trigger, &next_week));
}
