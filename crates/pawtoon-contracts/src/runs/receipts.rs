use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::state::{AnalysisMode, PipelineState, RunState};

pub const RECEIPT_SCHEMA_VERSION: u64 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub provider: String,
    pub model: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ReceiptArtifacts {
    pub original: Option<PathBuf>,
    pub cutout: Option<PathBuf>,
}

/// What one run asked for and what it produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReceipt {
    pub schema_version: u64,
    pub session_id: String,
    pub run_index: u64,
    pub analysis_mode: AnalysisMode,
    pub remove_background: bool,
    pub analysis_client: Option<ClientInfo>,
    pub generation_client: ClientInfo,
    pub removal_client: Option<ClientInfo>,
    pub prompt: Option<String>,
    pub analysis: Option<String>,
    pub instructions: Option<String>,
    pub final_state: RunState,
    pub error: Option<String>,
    pub warning: Option<String>,
    #[serde(default)]
    pub artifacts: ReceiptArtifacts,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl RunReceipt {
    pub fn from_state(
        session_id: &str,
        analysis_mode: AnalysisMode,
        remove_background: bool,
        state: &PipelineState,
    ) -> Self {
        Self {
            schema_version: RECEIPT_SCHEMA_VERSION,
            session_id: session_id.to_string(),
            run_index: state.runs_started(),
            analysis_mode,
            remove_background,
            analysis_client: None,
            generation_client: ClientInfo {
                provider: "unknown".to_string(),
                model: None,
            },
            removal_client: None,
            prompt: state.last_prompt().map(str::to_string),
            analysis: state.analysis().map(str::to_string),
            instructions: state.instructions().map(str::to_string),
            final_state: state.run_state(),
            error: state.error().map(str::to_string),
            warning: state.warning().map(str::to_string),
            artifacts: ReceiptArtifacts::default(),
            metadata: Map::new(),
        }
    }
}

pub fn write_receipt(path: &Path, receipt: &RunReceipt) -> anyhow::Result<()> {
    let mut payload = serde_json::to_value(receipt)?;
    if let Value::Object(map) = &mut payload {
        if let Some(metadata) = map.get_mut("metadata") {
            *metadata = sanitize_payload(metadata);
        }
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(&payload)?)?;
    Ok(())
}

pub fn read_receipt(path: &Path) -> anyhow::Result<RunReceipt> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

/// Replaces inline image data (data URLs, base64 fields) with a marker.
fn sanitize_payload(value: &Value) -> Value {
    match value {
        Value::String(text) if text.starts_with("data:") => {
            Value::String("<omitted>".to_string())
        }
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => value.clone(),
        Value::Array(rows) => Value::Array(rows.iter().map(sanitize_payload).collect()),
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, row) in map {
                let lowered = key.to_ascii_lowercase();
                if matches!(
                    lowered.as_str(),
                    "data" | "inlinedata" | "inline_data" | "image_bytes" | "b64_json"
                ) {
                    out.insert(key.clone(), Value::String("<omitted>".to_string()));
                    continue;
                }
                out.insert(key.clone(), sanitize_payload(row));
            }
            Value::Object(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::{read_receipt, write_receipt, ClientInfo, RunReceipt, RECEIPT_SCHEMA_VERSION};
    use crate::codec::{MediaType, SourceImage};
    use crate::state::{AnalysisMode, PipelineState, RunState};

    #[test]
    fn receipt_captures_state_and_strips_inline_data() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("receipt-1.json");

        let mut state = PipelineState::new();
        state.replace_source(SourceImage::from_bytes(b"x", MediaType::Jpeg));
        state.set_instructions(Some("add a scarf".to_string()));
        state.begin_analysis();
        state.finish_analysis("small brown dog, sitting".to_string());
        state.begin_generation("the prompt".to_string(), true);
        state.fail("Generation failed: No image was generated.".to_string());

        let mut receipt = RunReceipt::from_state("session-9", AnalysisMode::Fused, true, &state);
        receipt.generation_client = ClientInfo {
            provider: "dryrun".to_string(),
            model: Some("dryrun-image-1".to_string()),
        };
        receipt.metadata.insert(
            "echo".to_string(),
            json!({"data": "QUJD", "note": "data:image/png;base64,QUJD"}),
        );
        write_receipt(&path, &receipt)?;

        let parsed: Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        assert_eq!(parsed["schema_version"], json!(RECEIPT_SCHEMA_VERSION));
        assert_eq!(parsed["run_index"], json!(1));
        assert_eq!(parsed["analysis_mode"], json!("fused"));
        assert_eq!(parsed["final_state"], json!("failed"));
        assert_eq!(parsed["analysis"], json!("small brown dog, sitting"));
        assert_eq!(parsed["metadata"]["echo"]["data"], json!("<omitted>"));
        assert_eq!(parsed["metadata"]["echo"]["note"], json!("<omitted>"));

        let back = read_receipt(&path)?;
        assert_eq!(back.final_state, RunState::Failed);
        assert_eq!(back.instructions.as_deref(), Some("add a scarf"));
        Ok(())
    }
}
