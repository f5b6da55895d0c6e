// Daemon — the single long-running proactive loop: build a context
// snapshot, fire due triggers, chase stalled threads, repeat.

use crate::channel::Channel;
use crate::memory::MemoryFacade;
use crate::policy::PermissionPolicy;
use crate::sandbox::PermissionSandbox;
use crate::store::{RelationalStore, ThreadState};
use crate::triggers::{TriggerContext, TriggerEngine};
use chrono::{Datelike, Timelike, Utc};
use log::{error, info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct DaemonHealth {
    pub running: bool,
    pub uptime_seconds: i64,
    pub cycle_count: u64,
    pub last_trigger: Option<String>,
    pub quiet_hours: bool,
    pub active_threads: usize,
}

/// Signal shared with the background task: requesting stop sets the flag,
/// the loop checks it once per cycle and between sleeps.
#[derive(Clone)]
struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }
    fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
    fn requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct Daemon {
    store: Arc<RelationalStore>,
    memory: Arc<MemoryFacade>,
    triggers: Arc<TriggerEngine>,
    sandbox: Arc<PermissionSandbox>,
    policy: Arc<PermissionPolicy>,
    channel: Arc<dyn Channel>,
    user_name: String,
    recipient: String,
    interval: Duration,

    stop: StopSignal,
    started_at: Mutex<Option<chrono::DateTime<Utc>>>,
    cycle_count: AtomicU64,
    last_trigger: Mutex<Option<String>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Daemon {
    pub fn new(
        store: Arc<RelationalStore>,
        memory: Arc<MemoryFacade>,
        triggers: Arc<TriggerEngine>,
        sandbox: Arc<PermissionSandbox>,
        policy: Arc<PermissionPolicy>,
        channel: Arc<dyn Channel>,
        user_name: impl Into<String>,
        recipient: impl Into<String>,
        interval_seconds: u64,
    ) -> Self {
        Self {
            store,
            memory,
            triggers,
            sandbox,
            policy,
            channel,
            user_name: user_name.into(),
            recipient: recipient.into(),
            interval: Duration::from_secs(interval_seconds),
            stop: StopSignal::new(),
            started_at: Mutex::new(None),
            cycle_count: AtomicU64::new(0),
            last_trigger: Mutex::new(None),
            handle: Mutex::new(None),
        }
    }

    fn quiet_hours_cover(&self, hour: u32, minute: u32) -> bool {
        self.policy
            .get("proactive")
            .and_then(|section| section.quiet_hours())
            .map(|qh| qh.covers(hour, minute))
            .unwrap_or(false)
    }

    fn build_snapshot(&self, user_id: Uuid) -> TriggerContext {
        let current_time = Utc::now();
        let last_message_time = self.memory.get_history(&self.user_name, 1).ok().and_then(|h| h.first().map(|m| m.timestamp));
        let recent_messages = self
            .memory
            .get_history(&self.user_name, 5)
            .map(|h| h.into_iter().map(|m| m.content).collect())
            .unwrap_or_default();
        let _ = user_id;
        TriggerContext { current_time, last_message_time, recent_messages }
    }

    async fn run_cycle(self: &Arc<Self>) {
        let start = Utc::now();
        let Ok(user) = self.store.get_or_create_user(&self.user_name) else {
            error!("[daemon] could not resolve user '{}' this cycle", self.user_name);
            return;
        };

        let snapshot = self.build_snapshot(user.id);
        let quiet = self.quiet_hours_cover(snapshot.current_time.hour(), snapshot.current_time.minute());

        let mut last_fired_this_cycle = None;

        if !quiet {
            for trigger in self.triggers.get_fired_triggers(&snapshot) {
                let mut details = HashMap::new();
                details.insert("trigger_id".to_string(), Value::String(trigger.id.clone()));
                details.insert("trigger_type".to_string(), Value::String(format!("{:?}", trigger.trigger_type)));
                let decision = self.sandbox.check("proactive.message", &details);
                if !decision.allowed {
                    info!("[daemon] trigger {} denied by sandbox: {}", trigger.id, decision.reason);
                    continue;
                }

                if let Err(e) = self.store.open_thread(user.id, &format!("Trigger: {}", trigger.id)) {
                    warn!("[daemon] failed to open thread for trigger {}: {e}", trigger.id);
                }

                let message = self.triggers.build_message(&trigger, &snapshot);
                if self.channel.send(&self.recipient, &message).await {
                    self.triggers.mark_fired(&trigger.id, user.id);
                    last_fired_this_cycle = Some(trigger.id.clone());
                } else {
                    warn!("[daemon] failed to deliver trigger {} message", trigger.id);
                }
            }
        }

        if let Ok(pending) = self.store.get_pending_threads(user.id) {
            for thread in pending {
                if thread.state != ThreadState::Waiting {
                    continue;
                }
                match self.store.should_follow_up(thread.id) {
                    Ok(true) => {
                        let followup = "Just following up — still here if you want to pick this back up.";
                        if self.channel.send(&self.recipient, followup).await {
                            if let Err(e) = self.store.update_thread_state(thread.id, ThreadState::Resolved) {
                                warn!("[daemon] failed to resolve thread {}: {e}", thread.id);
                            }
                        }
                    }
                    Ok(false) => {}
                    Err(e) => warn!("[daemon] should_follow_up failed for thread {}: {e}", thread.id),
                }
            }
        }

        if let Some(id) = last_fired_this_cycle {
            *self.last_trigger.lock() = Some(id);
        }

        let cycle_count = self.cycle_count.fetch_add(1, Ordering::Relaxed) + 1;
        let elapsed_ms = (Utc::now() - start).num_milliseconds();
        info!("[daemon] cycle {cycle_count} completed in {elapsed_ms}ms, quiet_hours={quiet}, last_trigger={:?}", self.last_trigger.lock().clone());
    }

    /// Launches the loop on a background task. Each cycle is wrapped so a
    /// panic or error inside it cannot kill the loop.
    pub fn start(self: &Arc<Self>) {
        if self.handle.lock().is_some() {
            warn!("[daemon] start() called while already running");
            return;
        }
        *self.started_at.lock() = Some(Utc::now());
        self.stop.0.store(false, Ordering::SeqCst);

        let daemon = self.clone();
        let handle = tokio::spawn(async move {
            loop {
                if daemon.stop.requested() {
                    break;
                }
                daemon.run_cycle().await;
                if daemon.stop.requested() {
                    break;
                }
                tokio::time::sleep(daemon.interval).await;
            }
            info!("[daemon] loop stopped");
        });
        *self.handle.lock() = Some(handle);
    }

    /// Requests termination and joins the background task with a small
    /// timeout; does not block forever if the task is stuck mid-cycle.
    pub async fn stop(&self) {
        self.stop.request();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
        }
        *self.started_at.lock() = None;
    }

    pub fn health(&self) -> DaemonHealth {
        let running = self.handle.lock().is_some();
        let uptime_seconds = self.started_at.lock().map(|started| (Utc::now() - started).num_seconds()).unwrap_or(0);
        let now = Utc::now();
        let quiet_hours = self.quiet_hours_cover(now.hour(), now.minute());
        let active_threads = self
            .store
            .get_or_create_user(&self.user_name)
            .and_then(|user| self.store.get_pending_threads(user.id))
            .map(|threads| threads.len())
            .unwrap_or(0);

        DaemonHealth { running, uptime_seconds, cycle_count: self.cycle_count.load(Ordering::Relaxed), last_trigger: self.last_trigger.lock().clone(), quiet_hours, active_threads }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthBroker;
    use crate::channel::test_support::FakeChannel;
    use crate::config::Config;
    use crate::vector::{EmbeddingClient, LocalVectorStore, VectorBackend};

    fn daemon() -> Arc<Daemon> {
        let config = Config::default();
        let store = Arc::new(RelationalStore::open_in_memory().unwrap());
        let dir = std::env::temp_dir().join(format!("orion-daemon-test-{}", Uuid::new_v4()));
        let vectors: Arc<dyn VectorBackend> = Arc::new(LocalVectorStore::new(dir));
        let embedder = Arc::new(EmbeddingClient::new("http://127.0.0.1:1", "nomic-embed-text", None));
        let memory = Arc::new(MemoryFacade::new(store.clone(), vectors, embedder));

        let triggers_path = std::env::temp_dir().join(format!("orion-daemon-triggers-{}.yaml", Uuid::new_v4()));
        let triggers = Arc::new(TriggerEngine::load(&triggers_path, Some(store.clone())).unwrap());

        let policy_path = std::env::temp_dir().join(format!("orion-daemon-policy-{}.yaml", Uuid::new_v4()));
        let policy = Arc::new(PermissionPolicy::load(&policy_path).unwrap());
        let channel: Arc<dyn Channel> = Arc::new(FakeChannel::new());
        let sandbox = Arc::new(PermissionSandbox::new(policy.clone(), channel.clone()));

        let _ = AuthBroker::new(&config);

        Arc::new(Daemon::new(store, memory, triggers, sandbox, policy, channel, "nadia", "owner", 1))
    }

    #[tokio::test]
    async fn health_reports_not_running_before_start() {
        let daemon = daemon();
        let health = daemon.health();
        assert!(!health.running);
        assert_eq!(health.cycle_count, 0);
    }

    #[tokio::test]
    async fn start_then_stop_runs_at_least_one_cycle() {
        let daemon = daemon();
        daemon.start();
        tokio::time::sleep(Duration::from_millis(50)).await;
        daemon.stop().await;
        let health = daemon.health();
        assert!(!health.running);
    }

    #[tokio::test]
    async fn double_start_is_a_no_op() {
        let daemon = daemon();
        daemon.start();
        daemon.start();
        daemon.stop().await;
    }
}
