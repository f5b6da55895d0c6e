// Permission Sandbox — decides allow/deny/confirm for every tagged action
// and, when the policy demands it, performs an out-of-band confirmation
// round-trip over the Messaging Channel.

use crate::channel::Channel;
use crate::policy::PermissionPolicy;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    FileRead,
    FileWrite,
    FileDelete,
    TerminalRun,
    AppOpen,
    InputControl,
    CalendarRead,
    CalendarWrite,
    BrowserNavigate,
    BrowserSearch,
    SystemInfo,
    ProactiveMessage,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::FileRead => "file.read",
            Action::FileWrite => "file.write",
            Action::FileDelete => "file.delete",
            Action::TerminalRun => "terminal.run",
            Action::AppOpen => "app.open",
            Action::InputControl => "input.control",
            Action::CalendarRead => "calendar.read",
            Action::CalendarWrite => "calendar.write",
            Action::BrowserNavigate => "browser.navigate",
            Action::BrowserSearch => "browser.search",
            Action::SystemInfo => "system.info",
            Action::ProactiveMessage => "proactive.message",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "file.read" => Action::FileRead,
            "file.write" => Action::FileWrite,
            "file.delete" => Action::FileDelete,
            "terminal.run" => Action::TerminalRun,
            "app.open" => Action::AppOpen,
            "input.control" => Action::InputControl,
            "calendar.read" => Action::CalendarRead,
            "calendar.write" => Action::CalendarWrite,
            "browser.navigate" => Action::BrowserNavigate,
            "browser.search" => Action::BrowserSearch,
            "system.info" => Action::SystemInfo,
            "proactive.message" => Action::ProactiveMessage,
            _ => return None,
        })
    }

    fn section(&self) -> &'static str {
        match self {
            Action::FileRead | Action::FileWrite | Action::FileDelete => "file_system",
            Action::TerminalRun => "terminal",
            Action::AppOpen => "app_control",
            Action::InputControl => "input_control",
            Action::CalendarRead | Action::CalendarWrite => "calendar",
            Action::BrowserNavigate => "browsing",
            Action::BrowserSearch => "search",
            Action::SystemInfo => "system_info",
            Action::ProactiveMessage => "proactive",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub allowed: bool,
    pub requires_confirm: bool,
    pub reason: String,
    pub action: String,
}

impl Decision {
    fn deny(action: &str, reason: impl Into<String>) -> Self {
        Self { allowed: false, requires_confirm: false, reason: reason.into(), action: action.to_string() }
    }

    fn allow(action: &str, requires_confirm: bool) -> Self {
        Self { allowed: true, requires_confirm, reason: "allowed".to_string(), action: action.to_string() }
    }
}

pub struct PermissionSandbox {
    policy: Arc<PermissionPolicy>,
    channel: Arc<dyn Channel>,
}

impl PermissionSandbox {
    pub fn new(policy: Arc<PermissionPolicy>, channel: Arc<dyn Channel>) -> Self {
        Self { policy, channel }
    }

    pub fn check(&self, action_name: &str, details: &HashMap<String, Value>) -> Decision {
        let decision = self.check_inner(action_name, details);
        info!(
            "[sandbox] check action={} allowed={} requires_confirm={} reason={}",
            action_name, decision.allowed, decision.requires_confirm, decision.reason
        );
        decision
    }

    fn check_inner(&self, action_name: &str, details: &HashMap<String, Value>) -> Decision {
        let Some(action) = Action::parse(action_name) else {
            return Decision::deny(action_name, "unknown action");
        };

        let section_name = action.section();
        let Some(section) = self.policy.get(section_name) else {
            return Decision::deny(action_name, format!("unknown policy section '{section_name}'"));
        };

        if !section.is_enabled() {
            return Decision::deny(action_name, "section disabled");
        }

        match action {
            Action::FileRead | Action::FileWrite | Action::FileDelete => {
                let flag = match action {
                    Action::FileRead => "read",
                    Action::FileWrite => "write",
                    _ => "delete",
                };
                if !section.bool_field(flag) {
                    return Decision::deny(action_name, format!("file_system.{flag} is false"));
                }
                if let Some(Value::String(path)) = details.get("path") {
                    let expanded = expand_tilde(path);
                    let blocked = section.string_list("blocked_paths");
                    if blocked.iter().any(|p| expanded.starts_with(expand_tilde(p).as_str())) {
                        return Decision::deny(action_name, format!("path matches blocked_paths: {path}"));
                    }
                    let allowed = section.string_list("allowed_paths");
                    if !allowed.is_empty() && !allowed.iter().any(|p| expanded.starts_with(expand_tilde(p).as_str())) {
                        return Decision::deny(action_name, format!("path not in allowed_paths: {path}"));
                    }
                }
            }
            Action::TerminalRun => {
                if let Some(Value::String(command)) = details.get("command") {
                    let blocked = section.string_list("blocked_commands");
                    if blocked.iter().any(|b| command.contains(b.as_str())) {
                        return Decision::deny(action_name, format!("command matches blocked_commands: {command}"));
                    }
                }
            }
            Action::AppOpen => {
                if let Some(Value::String(app)) = details.get("app") {
                    let allowed = section.string_list("allowed_apps");
                    let app_lower = app.to_lowercase();
                    if !allowed.is_empty() && !allowed.iter().any(|a| a.to_lowercase() == app_lower) {
                        return Decision::deny(action_name, format!("app not in allowed_apps: {app}"));
                    }
                }
            }
            Action::CalendarRead | Action::CalendarWrite => {
                let flag = if matches!(action, Action::CalendarRead) { "read" } else { "write" };
                if !section.bool_field(flag) {
                    return Decision::deny(action_name, format!("calendar.{flag} is false"));
                }
            }
            Action::BrowserNavigate => {
                if let Some(Value::String(url)) = details.get("url") {
                    let blocked = section.string_list("blocked_domains");
                    if blocked.iter().any(|d| url.contains(d.as_str())) {
                        return Decision::deny(action_name, format!("url matches blocked_domains: {url}"));
                    }
                    let allowed = section.string_list("allowed_domains");
                    if !allowed.is_empty() && !allowed.iter().any(|d| url.contains(d.as_str())) {
                        return Decision::deny(action_name, format!("url not in allowed_domains: {url}"));
                    }
                }
            }
            Action::BrowserSearch | Action::SystemInfo | Action::InputControl | Action::ProactiveMessage => {}
        }

        Decision::allow(action_name, section.require_confirm)
    }

    /// Render a human-readable confirmation message, hand off to the
    /// channel, and block on `send_and_await_reply`. Fail-closed: any
    /// transport failure, timeout, or non-"yes" reply is a denial.
    pub async fn request_confirm(
        &self,
        action_name: &str,
        details: &HashMap<String, Value>,
        recipient: &str,
        timeout_seconds: u64,
    ) -> bool {
        let message = format!(
            "Confirm action `{action_name}`?\nDetails: {}\nReply yes or no.",
            serde_json::to_string(details).unwrap_or_default()
        );

        let reply = self.channel.send_and_await_reply(recipient, &message, timeout_seconds).await;
        let approved = matches!(reply, Ok(Some(ref text)) if text.trim().eq_ignore_ascii_case("yes"));

        info!(
            "[sandbox] request_confirm action={} approved={}",
            action_name, approved
        );
        if reply.is_err() {
            warn!("[sandbox] confirmation transport failure for {action_name}, denying");
        }
        approved
    }
}

fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{}", home.display(), rest);
        }
    }
    path.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::test_support::FakeChannel;
    use crate::policy::PermissionPolicy;
    use std::collections::HashMap;

    fn sandbox_with(yaml: &str) -> PermissionSandbox {
        sandbox_with_channel(yaml).0
    }

    fn sandbox_with_channel(yaml: &str) -> (PermissionSandbox, Arc<FakeChannel>) {
        let path = std::env::temp_dir().join(format!("orion-sandbox-test-{}.yaml", uuid::Uuid::new_v4()));
        std::fs::write(&path, yaml).unwrap();
        let policy = Arc::new(PermissionPolicy::load(&path).unwrap());
        let channel = Arc::new(FakeChannel::new());
        (PermissionSandbox::new(policy, channel.clone()), channel)
    }

    const FULL_POLICY: &str = r#"
browsing: { enabled: true }
search: { enabled: true, engine: duckduckgo }
file_system: { enabled: true, read: true, write: true, delete: false, blocked_paths: ["/etc"] }
terminal: { enabled: true, blocked_commands: ["rm -rf"] }
app_control: { enabled: true, allowed_apps: [] }
input_control: { enabled: true }
calendar: { enabled: true, read: true, write: false }
system_info: { enabled: true }
camera: { enabled: false, mode: off }
voice: { enabled: false, tts_engine: none, stt_engine: none }
proactive: { enabled: true, max_messages_per_hour: 4 }
"#;

    #[test]
    fn unknown_action_is_denied() {
        let sandbox = sandbox_with(FULL_POLICY);
        let d = sandbox.check("not.a.real.action", &HashMap::new());
        assert!(!d.allowed);
    }

    #[test]
    fn disabled_section_is_denied() {
        let sandbox = sandbox_with(FULL_POLICY);
        let d = sandbox.check("calendar.write", &HashMap::new());
        assert!(!d.allowed);
        assert!(d.reason.contains("write"));
    }

    #[test]
    fn file_write_blocked_path() {
        let sandbox = sandbox_with(FULL_POLICY);
        let mut details = HashMap::new();
        details.insert("path".to_string(), Value::String("/etc/hosts".to_string()));
        let d = sandbox.check("file.write", &details);
        assert!(!d.allowed);
        assert!(d.reason.contains("blocked_paths"));
    }

    #[test]
    fn file_write_allowed_outside_blocked() {
        let sandbox = sandbox_with(FULL_POLICY);
        let mut details = HashMap::new();
        details.insert("path".to_string(), Value::String("/home/user/notes.txt".to_string()));
        let d = sandbox.check("file.write", &details);
        assert!(d.allowed);
    }

    #[test]
    fn terminal_blocked_command() {
        let sandbox = sandbox_with(FULL_POLICY);
        let mut details = HashMap::new();
        details.insert("command".to_string(), Value::String("rm -rf /tmp/x".to_string()));
        let d = sandbox.check("terminal.run", &details);
        assert!(!d.allowed);
    }

    #[tokio::test]
    async fn confirm_timeout_denies() {
        let sandbox = sandbox_with(FULL_POLICY);
        let approved = sandbox.request_confirm("terminal.run", &HashMap::new(), "owner", 1).await;
        assert!(!approved);
    }

    #[tokio::test]
    async fn confirm_yes_approves() {
        let (sandbox, channel) = sandbox_with_channel(FULL_POLICY);
        channel.enqueue_reply("YES");
        let approved = sandbox.request_confirm("terminal.run", &HashMap::new(), "owner", 2).await;
        assert!(approved);
    }
}
