use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::events::now_utc_iso;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub started_at: String,
    pub finished_at: String,
    pub total_runs: u64,
    pub completed_runs: u64,
    pub failed_runs: u64,
    pub artifacts: Vec<PathBuf>,
}

impl SessionSummary {
    pub fn start(session_id: impl Into<String>) -> Self {
        let now = now_utc_iso();
        Self {
            session_id: session_id.into(),
            started_at: now.clone(),
            finished_at: now,
            total_runs: 0,
            completed_runs: 0,
            failed_runs: 0,
            artifacts: Vec::new(),
        }
    }

    pub fn record_run(&mut self, succeeded: bool) {
        self.total_runs += 1;
        if succeeded {
            self.completed_runs += 1;
        } else {
            self.failed_runs += 1;
        }
    }

    pub fn record_artifact(&mut self, path: PathBuf) {
        if !self.artifacts.contains(&path) {
            self.artifacts.push(path);
        }
    }

    pub fn finish(&mut self) {
        self.finished_at = now_utc_iso();
    }
}

pub fn write_summary(path: &Path, summary: &SessionSummary) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(summary)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use serde_json::{json, Value};

    use super::{write_summary, SessionSummary};

    #[test]
    fn write_summary_counts_runs() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("summary.json");

        let mut summary = SessionSummary::start("session-1");
        summary.record_run(true);
        summary.record_run(false);
        summary.record_run(true);
        summary.record_artifact(PathBuf::from("out/generated.png"));
        summary.record_artifact(PathBuf::from("out/generated.png"));
        summary.finish();
        write_summary(&path, &summary)?;

        let parsed: Value = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        assert_eq!(parsed["session_id"], json!("session-1"));
        assert_eq!(parsed["total_runs"], json!(3));
        assert_eq!(parsed["completed_runs"], json!(2));
        assert_eq!(parsed["failed_runs"], json!(1));
        assert_eq!(parsed["artifacts"], json!(["out/generated.png"]));
        assert!(parsed["finished_at"].as_str().is_some());
        Ok(())
    }
}
