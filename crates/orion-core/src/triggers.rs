// Trigger Engine — declarative proactive-outreach conditions loaded from
// YAML, evaluated against a context snapshot each daemon cycle.

use crate::error::EngineResult;
use crate::store::RelationalStore;
use chrono::{DateTime, Datelike, Timelike, Utc};
use log::{error, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    TimeBased,
    Inactivity,
    Schedule,
    Pattern,
    Keyword,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trigger {
    pub id: String,
    #[serde(rename = "type")]
    pub trigger_type: TriggerType,
    #[serde(default)]
    pub condition: Value,
    pub message_template: String,
    #[serde(default)]
    pub last_fired: Option<DateTime<Utc>>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Serialize, Deserialize)]
struct TriggersFile {
    triggers: Vec<Trigger>,
}

/// Snapshot the Daemon builds once per cycle and hands to the engine.
pub struct TriggerContext {
    pub current_time: DateTime<Utc>,
    pub last_message_time: Option<DateTime<Utc>>,
    pub recent_messages: Vec<String>,
}

const WEEKDAY_NAMES: [&str; 7] = ["mon", "tue", "wed", "thu", "fri", "sat", "sun"];

fn default_triggers() -> Vec<Trigger> {
    vec![
        Trigger {
            id: "morning_checkin".to_string(),
            trigger_type: TriggerType::TimeBased,
            condition: serde_json::json!({"hour": 8, "minute": 0}),
            message_template: "Good morning! It's a brand new {day}. How can I help you today?".to_string(),
            last_fired: None,
            enabled: true,
        },
        Trigger {
            id: "evening_recap".to_string(),
            trigger_type: TriggerType::TimeBased,
            condition: serde_json::json!({"hour": 20, "minute": 0}),
            message_template: "How did your {day} go? Anything worth remembering before it wraps up?".to_string(),
            last_fired: None,
            enabled: true,
        },
        Trigger {
            id: "long_silence".to_string(),
            trigger_type: TriggerType::Inactivity,
            condition: serde_json::json!({"hours": 48}),
            message_template: "It's been {hours} hours since we last talked. Just checking in.".to_string(),
            last_fired: None,
            enabled: true,
        },
    ]
}

pub struct TriggerEngine {
    path: PathBuf,
    triggers: Mutex<Vec<Trigger>>,
    store: Option<Arc<RelationalStore>>,
}

impl TriggerEngine {
    /// Loads `path`; if it does not exist, writes the default three
    /// triggers first so the daemon is runnable out of the box.
    pub fn load(path: impl Into<PathBuf>, store: Option<Arc<RelationalStore>>) -> EngineResult<Self> {
        let path = path.into();
        let triggers = if path.exists() {
            let text = std::fs::read_to_string(&path)?;
            match serde_yaml::from_str::<TriggersFile>(&text) {
                Ok(file) => file.triggers,
                Err(e) => {
                    error!("[triggers] failed to parse {}: {e}", path.display());
                    Vec::new()
                }
            }
        } else {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let defaults = default_triggers();
            std::fs::write(&path, serde_yaml::to_string(&TriggersFile { triggers: defaults.clone() })?)?;
            info!("[triggers] wrote default triggers.yaml to {}", path.display());
            defaults
        };

        Ok(Self { path, triggers: Mutex::new(triggers), store })
    }

    fn save(&self) -> EngineResult<()> {
        let triggers = self.triggers.lock().clone();
        std::fs::write(&self.path, serde_yaml::to_string(&TriggersFile { triggers })?)?;
        Ok(())
    }

    /// Exposed for cross-component scenario tests that need to evaluate
    /// one-off triggers without going through a loaded `TriggerEngine`.
    pub fn evaluate_for_test(trigger: &Trigger, context: &TriggerContext) -> bool {
        Self::evaluate(trigger, context)
    }

    fn evaluate(trigger: &Trigger, context: &TriggerContext) -> bool {
        if !trigger.enabled {
            return false;
        }
        match trigger.trigger_type {
            TriggerType::TimeBased => evaluate_time_based(trigger, context),
            TriggerType::Inactivity => evaluate_inactivity(trigger, context),
            TriggerType::Schedule => evaluate_schedule(trigger, context),
            TriggerType::Pattern => evaluate_pattern(trigger, context),
            TriggerType::Keyword => evaluate_keyword(trigger, context),
        }
    }

    /// Evaluates every enabled trigger; a panic or logic error inside one
    /// trigger does not prevent the others from being evaluated.
    pub fn get_fired_triggers(&self, context: &TriggerContext) -> Vec<Trigger> {
        let triggers = self.triggers.lock().clone();
        let mut fired = Vec::new();
        for trigger in triggers {
            if Self::evaluate(&trigger, context) {
                info!("[triggers] fired id={} type={:?}", trigger.id, trigger.trigger_type);
                fired.push(trigger);
            }
        }
        fired
    }

    pub fn build_message(&self, trigger: &Trigger, context: &TriggerContext) -> String {
        let now = context.current_time;
        let hours_since = context
            .last_message_time
            .map(|last| (now - last).num_seconds() as f64 / 3600.0)
            .map(|h| h as i64)
            .unwrap_or_else(|| trigger.condition.get("hours").and_then(|v| v.as_i64()).unwrap_or(4));

        let mut message = trigger.message_template.clone();
        message = message.replace("{time}", &now.format("%I:%M %p").to_string());
        message = message.replace("{date}", &now.format("%Y-%m-%d").to_string());
        message = message.replace("{day}", &now.format("%A").to_string());
        message = message.replace("{hours}", &hours_since.to_string());
        message
    }

    /// Stamps `last_fired`, persists the whole trigger list, and appends
    /// a best-effort TriggerLog row.
    pub fn mark_fired(&self, id: &str, user_id: Uuid) {
        let now = Utc::now();
        {
            let mut triggers = self.triggers.lock();
            if let Some(trigger) = triggers.iter_mut().find(|t| t.id == id) {
                trigger.last_fired = Some(now);
            }
        }

        if let Err(e) = self.save() {
            warn!("[triggers] failed to persist triggers.yaml: {e}");
        }

        if let Some(store) = &self.store {
            let trigger_type = self.triggers.lock().iter().find(|t| t.id == id).map(|t| format!("{:?}", t.trigger_type)).unwrap_or_default();
            if let Err(e) = store.append_trigger_log(user_id, &trigger_type, &format!("Trigger {id} fired at {now}"), "medium", true) {
                warn!("[triggers] failed to append trigger log: {e}");
            }
        }
    }
}

fn evaluate_time_based(trigger: &Trigger, context: &TriggerContext) -> bool {
    let now = context.current_time;
    let target_hour = trigger.condition.get("hour").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
    let target_minute = trigger.condition.get("minute").and_then(|v| v.as_u64()).unwrap_or(0) as u32;

    if let Some(days) = trigger.condition.get("days").and_then(|v| v.as_array()) {
        let current_day = WEEKDAY_NAMES[now.weekday().num_days_from_monday() as usize];
        let allowed: Vec<&str> = days.iter().filter_map(|v| v.as_str()).collect();
        if !allowed.is_empty() && !allowed.contains(&current_day) {
            return false;
        }
    }

    if now.hour() != target_hour || now.minute() != target_minute {
        return false;
    }

    if let Some(last_fired) = trigger.last_fired {
        if (now - last_fired).num_seconds() < 23 * 3600 {
            return false;
        }
    }
    true
}

fn evaluate_inactivity(trigger: &Trigger, context: &TriggerContext) -> bool {
    let threshold_hours = trigger.condition.get("hours").and_then(|v| v.as_i64()).unwrap_or(4);
    let Some(last_message_time) = context.last_message_time else { return false };
    let now = context.current_time;

    let hours_inactive = (now - last_message_time).num_seconds() / 3600;
    if hours_inactive < threshold_hours {
        return false;
    }

    if let Some(last_fired) = trigger.last_fired {
        if (now - last_fired).num_seconds() / 3600 < threshold_hours {
            return false;
        }
    }
    true
}

fn evaluate_schedule(trigger: &Trigger, context: &TriggerContext) -> bool {
    let Some(times) = trigger.condition.get("times").and_then(|v| v.as_array()) else { return false };
    let now = context.current_time;

    for entry in times {
        let Some(text) = entry.as_str() else { continue };
        let Ok(scheduled) = DateTime::parse_from_rfc3339(text) else { continue };
        if now.hour() == scheduled.hour() && now.minute() == scheduled.minute() {
            if let Some(last_fired) = trigger.last_fired {
                if (now - last_fired).num_seconds() < 3600 {
                    continue;
                }
            }
            return true;
        }
    }
    false
}

fn evaluate_pattern(trigger: &Trigger, context: &TriggerContext) -> bool {
    let now = context.current_time;
    let pattern_type = trigger.condition.get("pattern_type").and_then(|v| v.as_str()).unwrap_or("");
    let target_hour = trigger.condition.get("hour").and_then(|v| v.as_u64()).unwrap_or(12) as u32;

    match pattern_type {
        "daily" => {
            if now.hour() == target_hour && now.minute() == 0 {
                if let Some(last_fired) = trigger.last_fired {
                    if (now - last_fired).num_seconds() < 86_400 {
                        return false;
                    }
                }
                return true;
            }
            false
        }
        "weekly" => {
            let target_day = trigger.condition.get("day").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
            if now.weekday().num_days_from_monday() == target_day && now.hour() == target_hour && now.minute() == 0 {
                if let Some(last_fired) = trigger.last_fired {
                    if (now - last_fired).num_seconds() < 7 * 86_400 {
                        return false;
                    }
                }
                return true;
            }
            false
        }
        _ => false,
    }
}

fn evaluate_keyword(trigger: &Trigger, context: &TriggerContext) -> bool {
    let Some(keywords) = trigger.condition.get("keywords").and_then(|v| v.as_array()) else { return false };
    let keywords: Vec<String> = keywords.iter().filter_map(|v| v.as_str().map(|s| s.to_lowercase())).collect();

    context.recent_messages.iter().any(|content| {
        let lower = content.to_lowercase();
        keywords.iter().any(|k| lower.contains(k.as_str()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn engine() -> (TriggerEngine, PathBuf) {
        let path = std::env::temp_dir().join(format!("orion-triggers-test-{}.yaml", Uuid::new_v4()));
        (TriggerEngine::load(&path, None).unwrap(), path)
    }

    #[test]
    fn load_writes_three_default_triggers() {
        let (engine, path) = engine();
        assert_eq!(engine.triggers.lock().len(), 3);
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn time_based_fires_only_at_exact_minute() {
        let (engine, path) = engine();
        let morning = Utc.with_ymd_and_hms(2026, 7, 27, 8, 0, 0).unwrap();
        let context = TriggerContext { current_time: morning, last_message_time: None, recent_messages: vec![] };
        let fired = engine.get_fired_triggers(&context);
        assert!(fired.iter().any(|t| t.id == "morning_checkin"));

        let not_quite = Utc.with_ymd_and_hms(2026, 7, 27, 8, 1, 0).unwrap();
        let context = TriggerContext { current_time: not_quite, last_message_time: None, recent_messages: vec![] };
        let fired = engine.get_fired_triggers(&context);
        assert!(!fired.iter().any(|t| t.id == "morning_checkin"));
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn inactivity_requires_stale_last_message() {
        let (engine, path) = engine();
        let now = Utc::now();
        let context = TriggerContext { current_time: now, last_message_time: Some(now - chrono::Duration::hours(49)), recent_messages: vec![] };
        let fired = engine.get_fired_triggers(&context);
        assert!(fired.iter().any(|t| t.id == "long_silence"));
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn mark_fired_persists_and_prevents_immediate_refire() {
        let (engine, path) = engine();
        let user_id = Uuid::new_v4();
        let morning = Utc.with_ymd_and_hms(2026, 7, 27, 8, 0, 0).unwrap();
        engine.mark_fired("morning_checkin", user_id);

        let context = TriggerContext { current_time: morning, last_message_time: None, recent_messages: vec![] };
        let fired = engine.get_fired_triggers(&context);
        assert!(!fired.iter().any(|t| t.id == "morning_checkin"));
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn build_message_substitutes_day_and_hours() {
        let (engine, path) = engine();
        let trigger = Trigger {
            id: "t".to_string(),
            trigger_type: TriggerType::Inactivity,
            condition: serde_json::json!({"hours": 48}),
            message_template: "It's been {hours} hours, happy {day}".to_string(),
            last_fired: None,
            enabled: true,
        };
        let now = Utc.with_ymd_and_hms(2026, 7, 27, 10, 0, 0).unwrap();
        let context = TriggerContext { current_time: now, last_message_time: Some(now - chrono::Duration::hours(50)), recent_messages: vec![] };
        let message = engine.build_message(&trigger, &context);
        assert!(message.contains("50 hours"));
        assert!(message.contains("Monday"));
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn keyword_trigger_matches_case_insensitively() {
        let trigger = Trigger {
            id: "kw".to_string(),
            trigger_type: TriggerType::Keyword,
            condition: serde_json::json!({"keywords": ["urgent"]}),
            message_template: "noticed something urgent".to_string(),
            last_fired: None,
            enabled: true,
        };
        let context = TriggerContext { current_time: Utc::now(), last_message_time: None, recent_messages: vec!["this is URGENT".to_string()] };
        assert!(evaluate_keyword(&trigger, &context));
    }
}
