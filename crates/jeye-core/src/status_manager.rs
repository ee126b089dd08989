use crate::widget::WidgetSnapshot;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const STATUS_JSON: &str = ".jeye-status.json";
pub const STATUS_MARKDOWN: &str = ".jeye-status.md";

/// Writes visibility artifacts for external dashboards.
pub struct StatusManager {
    dir: PathBuf,
}

impl StatusManager {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    pub fn json_path(&self) -> PathBuf {
        self.dir.join(STATUS_JSON)
    }

    pub fn markdown_path(&self) -> PathBuf {
        self.dir.join(STATUS_MARKDOWN)
    }

    /// Rewrites both artifacts. Failures are logged and otherwise ignored.
    pub fn update(&self, snapshot: &WidgetSnapshot) {
        match serde_json::to_string_pretty(snapshot) {
            Ok(json) => {
                if let Err(e) = fs::write(self.json_path(), json) {
                    warn!(path = %self.json_path().display(), error = %e, "Failed to write status JSON");
                }
            }
            Err(e) => warn!(error = %e, "Failed to serialize status snapshot"),
        }

        if let Err(e) = fs::write(self.markdown_path(), format_markdown(snapshot)) {
            warn!(path = %self.markdown_path().display(), error = %e, "Failed to write status markdown");
        }
        debug!(dir = %self.dir.display(), "Status artifacts updated");
    }
}

fn format_markdown(snapshot: &WidgetSnapshot) -> String {
    let mut md = String::from("# J-Eye Trust Gate\n\n");

    let _ = writeln!(md, "## Gate\n");
    let _ = writeln!(
        md,
        "- **Status:** {}{}",
        snapshot.status,
        if snapshot.tentative { " (pending confirmation)" } else { "" }
    );
    let _ = writeln!(md, "- **Stream:** {:?}", snapshot.stream);
    let _ = writeln!(md, "- **Resolved prompts:** {}\n", snapshot.resolved);

    let _ = writeln!(md, "## Pending Prompt\n");
    match &snapshot.prompt {
        Some(prompt) => {
            let _ = writeln!(md, "- **{}** `{}` ({})", prompt.level, prompt.id, prompt.title);
            if let Some(rationale) = &prompt.rationale {
                let _ = writeln!(md, "- {rationale}");
            }
            if let Some(kind) = snapshot.in_flight {
                let _ = writeln!(md, "- Submitting: {kind}");
            }
            if !snapshot.waiting.is_empty() {
                let _ = writeln!(md, "- Waiting: {}", snapshot.waiting.join(", "));
            }
        }
        None => {
            let _ = writeln!(md, "None");
        }
    }

    let _ = writeln!(md, "\n## Recent Activity\n");
    for entry in &snapshot.feed {
        let _ = writeln!(
            md,
            "- `{}` {} {}",
            entry.timestamp.format("%H:%M:%S"),
            entry.kind,
            entry.summary
        );
    }
    md
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiError, ApprovalApi};
    use crate::widget::TrustWidget;
    use async_trait::async_trait;
    use jeye_proto::{AgentEvent, DecisionAck, DecisionRequest, EventKind, TrustStatus};
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct IdleApi;

    #[async_trait]
    impl ApprovalApi for IdleApi {
        async fn submit_decision(&self, _: &DecisionRequest) -> Result<DecisionAck, ApiError> {
            Ok(DecisionAck::default())
        }
        async fn set_paused(&self, _: bool) -> Result<(), ApiError> {
            Ok(())
        }
        async fn fetch_status(&self) -> Result<TrustStatus, ApiError> {
            Ok(TrustStatus::default())
        }
    }

    fn snapshot_with_prompt() -> WidgetSnapshot {
        let widget = TrustWidget::new(Arc::new(IdleApi), 10);
        widget.handle_event(&AgentEvent::new(
            "e1",
            EventKind::AgentAction,
            json!({"message": "Turned on porch light"}),
        ));
        widget.handle_event(&AgentEvent::new(
            "e2",
            EventKind::TrustPrompt,
            json!({"id": "p1", "level": 3, "title": "Unlock front door"}),
        ));
        widget.snapshot()
    }

    #[test]
    fn test_update_writes_both_artifacts() {
        let dir = TempDir::new().unwrap();
        let manager = StatusManager::new(dir.path());
        manager.update(&snapshot_with_prompt());

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(manager.json_path()).unwrap()).unwrap();
        assert_eq!(json["prompt"]["id"], "p1");
        assert_eq!(json["feed"].as_array().unwrap().len(), 2);

        let md = fs::read_to_string(manager.markdown_path()).unwrap();
        assert!(md.contains("awaiting-decision"));
        assert!(md.contains("Unlock front door"));
        assert!(md.contains("Turned on porch light"));
    }

    #[test]
    fn test_missing_directory_is_not_fatal() {
        let dir = TempDir::new().unwrap();
        let manager = StatusManager::new(&dir.path().join("missing"));
        manager.update(&snapshot_with_prompt());
        assert!(!manager.json_path().exists());
    }
}
