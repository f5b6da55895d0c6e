// Permission Policy — declarative YAML document, validated schema, hot-reload.
//
// Mirrors the permission config loader this engine is built from: a cached
// snapshot behind a reader-writer lock, `load`/`reload`/`get`, and a
// required-sections/required-fields validation pass that names every
// missing piece in one error rather than failing on the first.

mod schema;

pub use schema::{PolicyDoc, PolicySection, QuietHours};

use crate::error::{EngineError, EngineResult};
use log::{info, warn};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const REQUIRED_SECTIONS: &[&str] = &[
    "browsing", "search", "file_system", "terminal", "app_control",
    "input_control", "calendar", "system_info", "camera", "voice", "proactive",
];

pub struct PermissionPolicy {
    path: PathBuf,
    snapshot: RwLock<Arc<PolicyDoc>>,
}

impl PermissionPolicy {
    /// Load and validate the policy document at `path`. If the file does
    /// not exist, a permissive default covering every required section is
    /// written first so the daemon is runnable out of the box.
    pub fn load(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let default_yaml = serde_yaml::to_string(&PolicyDoc::permissive_default())?;
            std::fs::write(&path, default_yaml)?;
            info!("[policy] wrote default policy document to {}", path.display());
        }

        let doc = Self::read_and_validate(&path)?;
        Ok(Self { path, snapshot: RwLock::new(Arc::new(doc)) })
    }

    fn read_and_validate(path: &Path) -> EngineResult<PolicyDoc> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("cannot read policy file {}: {e}", path.display())))?;
        let doc: PolicyDoc = serde_yaml::from_str(&text)
            .map_err(|e| EngineError::Config(format!("cannot parse policy YAML: {e}")))?;
        validate(&doc)?;
        Ok(doc)
    }

    /// Re-read and re-validate from the previously loaded path. On failure
    /// the previous snapshot is retained and the error is returned.
    pub fn reload(&self) -> EngineResult<()> {
        match Self::read_and_validate(&self.path) {
            Ok(doc) => {
                *self.snapshot.write() = Arc::new(doc);
                info!("[policy] reloaded from {}", self.path.display());
                Ok(())
            }
            Err(e) => {
                warn!("[policy] reload failed, keeping previous snapshot: {e}");
                Err(e)
            }
        }
    }

    /// Defensive copy of the whole document.
    pub fn snapshot(&self) -> Arc<PolicyDoc> {
        self.snapshot.read().clone()
    }

    /// Defensive copy of one section.
    pub fn get(&self, section: &str) -> Option<PolicySection> {
        self.snapshot().sections.get(section).cloned()
    }
}

fn validate(doc: &PolicyDoc) -> EngineResult<()> {
    let mut missing = Vec::new();

    for name in REQUIRED_SECTIONS {
        match doc.sections.get(*name) {
            None => missing.push(format!("missing section '{name}'")),
            Some(section) => {
                if section.enabled.is_none() {
                    missing.push(format!("section '{name}' missing required field 'enabled'"));
                }
                for field in required_fields(name) {
                    if !section.extra.contains_key(*field) {
                        missing.push(format!("section '{name}' missing required field '{field}'"));
                    }
                }
            }
        }
    }

    if missing.is_empty() {
        Ok(())
    } else {
        Err(EngineError::Config(format!(
            "policy validation failed: {}",
            missing.join("; ")
        )))
    }
}

fn required_fields(section: &str) -> &'static [&'static str] {
    match section {
        "file_system" => &["read", "write", "delete"],
        "calendar" => &["read", "write"],
        "search" => &["engine"],
        "camera" => &["mode"],
        "voice" => &["tts_engine", "stt_engine"],
        "proactive" => &["max_messages_per_hour"],
        _ => &[],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("orion-policy-test-{}-{}", name, uuid::Uuid::new_v4()));
        p
    }

    #[test]
    fn writes_and_loads_default_on_first_run() {
        let path = temp_path("default");
        let policy = PermissionPolicy::load(&path).unwrap();
        let snap = policy.snapshot();
        for name in REQUIRED_SECTIONS {
            assert!(snap.sections.contains_key(*name), "missing {name}");
        }
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn rejects_missing_required_fields() {
        let path = temp_path("invalid");
        std::fs::write(&path, "browsing:\n  enabled: true\n").unwrap();
        let err = PermissionPolicy::load(&path).unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn reload_keeps_previous_snapshot_on_failure() {
        let path = temp_path("reload");
        let policy = PermissionPolicy::load(&path).unwrap();
        let before = policy.snapshot();

        std::fs::write(&path, "not: valid: yaml: [").unwrap();
        assert!(policy.reload().is_err());

        let after = policy.snapshot();
        assert_eq!(before.sections.len(), after.sections.len());
        let _ = std::fs::remove_file(&path);
    }
}
