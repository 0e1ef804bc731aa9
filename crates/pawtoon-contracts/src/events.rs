use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineEvent {
    SessionStarted,
    ImageSet,
    AnalysisStarted,
    AnalysisFinished,
    AnalysisFailed,
    GenerationStarted,
    GenerationFinished,
    GenerationFailed,
    BackgroundRemovalFinished,
    BackgroundRemovalFailed,
    ArtifactsSaved,
    SessionFinished,
}

impl PipelineEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SessionStarted => "session_started",
            Self::ImageSet => "image_set",
            Self::AnalysisStarted => "analysis_started",
            Self::AnalysisFinished => "analysis_finished",
            Self::AnalysisFailed => "analysis_failed",
            Self::GenerationStarted => "generation_started",
            Self::GenerationFinished => "generation_finished",
            Self::GenerationFailed => "generation_failed",
            Self::BackgroundRemovalFinished => "background_removal_finished",
            Self::BackgroundRemovalFailed => "background_removal_failed",
            Self::ArtifactsSaved => "artifacts_saved",
            Self::SessionFinished => "session_finished",
        }
    }
}

/// Append-only `events.jsonl` writer shared by everything in one session.
///
/// Each line carries `type`, `session_id` and `ts`; payload keys are merged
/// after those and win on collision.
#[derive(Debug, Clone)]
pub struct EventWriter {
    inner: Arc<EventWriterInner>,
}

#[derive(Debug)]
struct EventWriterInner {
    path: PathBuf,
    session_id: String,
    lock: Mutex<()>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(EventWriterInner {
                path: path.into(),
                session_id: session_id.into(),
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn emit(&self, event: PipelineEvent, payload: EventPayload) -> anyhow::Result<Value> {
        let mut row = Map::new();
        row.insert("type".to_string(), Value::String(event.as_str().to_string()));
        row.insert(
            "session_id".to_string(),
            Value::String(self.inner.session_id.clone()),
        );
        row.insert("ts".to_string(), Value::String(now_utc_iso()));
        row.extend(payload);

        if let Some(parent) = self.inner.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let line = serde_json::to_string(&row)?;
        let _guard = self
            .inner
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("event writer lock poisoned"))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inner.path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;

        Ok(Value::Object(row))
    }

    /// Like [`emit`](Self::emit), but a failed write only goes to stderr.
    pub fn emit_best_effort(&self, event: PipelineEvent, payload: EventPayload) {
        if let Err(err) = self.emit(event, payload) {
            eprintln!(
                "pawtoon: failed to append {} to {}: {err:#}",
                event.as_str(),
                self.inner.path.display()
            );
        }
    }

    /// Rows already written, skipping lines that are not JSON objects.
    pub fn read_all(&self) -> anyhow::Result<Vec<Map<String, Value>>> {
        let raw = match std::fs::read_to_string(&self.inner.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        Ok(raw
            .lines()
            .filter_map(|line| serde_json::from_str::<Value>(line).ok())
            .filter_map(|row| row.as_object().cloned())
            .collect())
    }
}

pub fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::DateTime;

    use super::*;

    #[test]
    fn emit_writes_compact_jsonl_line() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let writer = EventWriter::new(&path, "session-1");

        let mut payload = EventPayload::new();
        payload.insert("media_type".to_string(), Value::String("image/png".to_string()));
        let emitted = writer.emit(PipelineEvent::ImageSet, payload)?;

        let content = fs::read_to_string(&path)?;
        assert_eq!(content.lines().count(), 1);
        let parsed: Value = serde_json::from_str(content.lines().next().unwrap_or(""))?;
        assert_eq!(parsed, emitted);
        assert_eq!(parsed["type"], Value::String("image_set".to_string()));
        assert_eq!(parsed["session_id"], Value::String("session-1".to_string()));
        assert_eq!(parsed["media_type"], Value::String("image/png".to_string()));
        DateTime::parse_from_rfc3339(parsed["ts"].as_str().unwrap_or(""))?;
        Ok(())
    }

    #[test]
    fn read_all_returns_rows_in_order() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let writer = EventWriter::new(temp.path().join("nested/events.jsonl"), "s");
        assert!(writer.read_all()?.is_empty());

        writer.emit(PipelineEvent::AnalysisStarted, EventPayload::new())?;
        writer.emit(PipelineEvent::AnalysisFinished, EventPayload::new())?;
        let types: Vec<String> = writer
            .read_all()?
            .iter()
            .filter_map(|row| row.get("type").and_then(Value::as_str).map(str::to_string))
            .collect();
        assert_eq!(types, vec!["analysis_started", "analysis_finished"]);
        Ok(())
    }

    #[test]
    fn best_effort_emit_survives_unwritable_path() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let blocker = temp.path().join("file");
        fs::write(&blocker, b"x")?;
        let writer = EventWriter::new(blocker.join("events.jsonl"), "s");
        writer.emit_best_effort(PipelineEvent::SessionStarted, EventPayload::new());
        assert!(writer.emit(PipelineEvent::SessionStarted, EventPayload::new()).is_err());
        Ok(())
    }
}
