use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One top-level policy section. `enabled` and `require_confirm` are
/// pulled out as named fields since every section shares them; everything
/// else (read/write/delete, allowed_paths, blocked_commands, quiet_hours,
/// ...) lands in `extra` since the field set varies per section.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PolicySection {
    pub enabled: Option<bool>,
    #[serde(default)]
    pub require_confirm: bool,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl PolicySection {
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(false)
    }

    pub fn bool_field(&self, key: &str) -> bool {
        self.extra.get(key).and_then(|v| v.as_bool()).unwrap_or(false)
    }

    pub fn string_list(&self, key: &str) -> Vec<String> {
        self.extra
            .get(key)
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default()
    }

    pub fn string_field(&self, key: &str) -> Option<String> {
        self.extra.get(key).and_then(|v| v.as_str()).map(String::from)
    }

    pub fn quiet_hours(&self) -> Option<QuietHours> {
        self.extra.get("quiet_hours").and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuietHours {
    pub start: String,
    pub end: String,
}

/// Parses an `HH:MM` string into minute-of-day. Returns `None` on any
/// malformed or out-of-range input.
fn parse_hhmm(s: &str) -> Option<u32> {
    let (h, m) = s.split_once(':')?;
    let h: u32 = h.trim().parse().ok()?;
    let m: u32 = m.trim().parse().ok()?;
    if h < 24 && m < 60 {
        Some(h * 60 + m)
    } else {
        None
    }
}

impl QuietHours {
    /// `start`/`end` are `HH:MM` strings. If `start <= end`, quiet is
    /// `[start, end)`; otherwise quiet wraps past midnight. A malformed
    /// bound disables quiet hours rather than panicking.
    pub fn covers(&self, hour: u32, minute: u32) -> bool {
        let (Some(start), Some(end)) = (parse_hhmm(&self.start), parse_hhmm(&self.end)) else {
            return false;
        };
        let now = hour * 60 + minute;
        if start <= end {
            now >= start && now < end
        } else {
            now >= start || now < end
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PolicyDoc {
    #[serde(flatten)]
    pub sections: HashMap<String, PolicySection>,
}

impl PolicyDoc {
    /// A permissive-by-default document covering every required section,
    /// written to disk the first time the daemon runs against a fresh
    /// project directory.
    pub fn permissive_default() -> Self {
        let mut sections = HashMap::new();

        let mut insert = |name: &str, extra: Vec<(&str, serde_json::Value)>| {
            sections.insert(
                name.to_string(),
                PolicySection {
                    enabled: Some(true),
                    require_confirm: false,
                    extra: extra.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
                },
            );
        };

        insert("browsing", vec![("allowed_domains", serde_json::json!([])), ("blocked_domains", serde_json::json!([]))]);
        insert("search", vec![("engine", serde_json::json!("duckduckgo"))]);
        insert("file_system", vec![
            ("read", serde_json::json!(true)),
            ("write", serde_json::json!(true)),
            ("delete", serde_json::json!(false)),
            ("allowed_paths", serde_json::json!([])),
            ("blocked_paths", serde_json::json!(["/etc", "/sys", "/boot"])),
        ]);
        insert("terminal", vec![("blocked_commands", serde_json::json!(["rm -rf /", "mkfs", "dd if="]))]);
        insert("app_control", vec![("allowed_apps", serde_json::json!([]))]);
        insert("input_control", vec![]);
        insert("calendar", vec![("read", serde_json::json!(true)), ("write", serde_json::json!(false))]);
        insert("system_info", vec![]);
        insert("camera", vec![("mode", serde_json::json!("off"))]);
        insert("voice", vec![("tts_engine", serde_json::json!("none")), ("stt_engine", serde_json::json!("none"))]);
        insert("proactive", vec![
            ("max_messages_per_hour", serde_json::json!(4)),
            ("quiet_hours", serde_json::json!({"start": "22:00", "end": "08:00"})),
        ]);

        Self { sections }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiet_hours_same_day_window() {
        let q = QuietHours { start: "09:00".to_string(), end: "17:00".to_string() };
        assert!(q.covers(12, 0));
        assert!(!q.covers(8, 59));
        assert!(!q.covers(17, 0));
    }

    #[test]
    fn quiet_hours_wraps_midnight() {
        let q = QuietHours { start: "22:00".to_string(), end: "08:00".to_string() };
        assert!(q.covers(23, 30));
        assert!(q.covers(0, 0));
        assert!(q.covers(7, 59));
        assert!(!q.covers(8, 0));
        assert!(!q.covers(21, 59));
    }

    #[test]
    fn quiet_hours_parses_from_hh_mm_strings() {
        let v = serde_json::json!({"start": "22:00", "end": "08:00"});
        let q: QuietHours = serde_json::from_value(v).unwrap();
        assert!(q.covers(23, 0));
    }

    #[test]
    fn quiet_hours_malformed_bound_never_covers() {
        let q = QuietHours { start: "not-a-time".to_string(), end: "08:00".to_string() };
        assert!(!q.covers(23, 0));
    }

    #[test]
    fn permissive_default_has_all_required_sections() {
        let doc = PolicyDoc::permissive_default();
        assert!(doc.sections.get("file_system").unwrap().bool_field("write"));
        assert!(!doc.sections.get("calendar").unwrap().bool_field("write"));
    }
}
