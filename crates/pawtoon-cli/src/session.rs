use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use pawtoon_contracts::chat::{SessionCommand, SESSION_HELP_COMMANDS};
use pawtoon_contracts::error::truncate_text;
use pawtoon_contracts::events::{EventPayload, EventWriter, PipelineEvent};
use pawtoon_contracts::runs::receipts::{write_receipt, RunReceipt};
use pawtoon_contracts::runs::summary::{write_summary, SessionSummary};
use pawtoon_contracts::{
    AnalysisMode, ImageView, PipelineError, PipelineErrorKind, RemovalFailurePolicy, RunState,
};
use pawtoon_engine::{default_source_image, load_source_image, save_outputs, Pipeline};
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Full,
    Analysis,
    Generation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// One pipeline plus everything written around it in an output directory.
pub struct SessionRunner {
    pipeline: Pipeline,
    events: EventWriter,
    out_dir: PathBuf,
    summary: SessionSummary,
}

impl SessionRunner {
    pub fn start(pipeline: Pipeline, out_dir: &Path, events_path: Option<PathBuf>) -> Result<Self> {
        std::fs::create_dir_all(out_dir)
            .with_context(|| format!("failed to create {}", out_dir.display()))?;
        let session_id = uuid::Uuid::new_v4().to_string();
        let events_path = events_path.unwrap_or_else(|| out_dir.join("events.jsonl"));
        let events = EventWriter::new(events_path, session_id.clone());
        let pipeline = pipeline.with_events(events.clone());

        let clients = pipeline.clients();
        let options = pipeline.options();
        events.emit(
            PipelineEvent::SessionStarted,
            object(json!({
                "out_dir": out_dir.to_string_lossy(),
                "analysis_client": clients.analysis_info(),
                "generation_client": clients.generation_info(),
                "removal_client": clients.removal_info(),
                "analysis_mode": options.analysis_mode.as_str(),
                "remove_background": options.remove_background,
                "removal_failure_policy": options.removal_failure_policy.as_str(),
                "notes": clients.notes,
            })),
        )?;

        Ok(Self {
            pipeline,
            events,
            out_dir: out_dir.to_path_buf(),
            summary: SessionSummary::start(session_id),
        })
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn pipeline_mut(&mut self) -> &mut Pipeline {
        &mut self.pipeline
    }

    pub fn session_id(&self) -> &str {
        &self.summary.session_id
    }

    pub fn summary(&self) -> &SessionSummary {
        &self.summary
    }

    /// Runs `step`; generation runs also leave a receipt and their images.
    pub fn execute(&mut self, step: Step) -> Result<Result<(), PipelineError>> {
        let outcome = match step {
            Step::Full => self.pipeline.run(),
            Step::Analysis => self.pipeline.run_analysis(),
            Step::Generation => self.pipeline.run_generation(),
        };
        let rejected =
            matches!(&outcome, Err(err) if err.kind == PipelineErrorKind::Precondition);
        if step != Step::Analysis && !rejected {
            self.record_run()?;
        }
        Ok(outcome)
    }

    fn record_run(&mut self) -> Result<()> {
        let state = self.pipeline.state();
        let run_index = state.runs_started();
        let options = *self.pipeline.options();
        let clients = self.pipeline.clients();

        let mut receipt = RunReceipt::from_state(
            self.session_id(),
            options.analysis_mode,
            options.remove_background,
            state,
        );
        if options.analysis_mode != AnalysisMode::None {
            receipt.analysis_client = Some(clients.analysis_info());
        }
        receipt.generation_client = clients.generation_info();
        if options.remove_background {
            receipt.removal_client = clients.removal_info();
        }
        receipt
            .metadata
            .insert("policy".to_string(), json!(options.removal_failure_policy.as_str()));
        if !clients.notes.is_empty() {
            receipt.metadata.insert("notes".to_string(), json!(clients.notes));
        }

        let saved = match state.generated() {
            Some(generated) if self.pipeline.produced_image() => Some(save_outputs(
                &self.out_dir,
                &format!("pawtoon-{run_index:03}"),
                generated,
            )?),
            _ => None,
        };
        if let Some(saved) = &saved {
            receipt.artifacts = saved.into();
        }
        let succeeded = state.run_state() == RunState::Done;

        let receipt_path = self.out_dir.join(format!("receipt-{run_index}.json"));
        write_receipt(&receipt_path, &receipt)?;
        self.summary.record_run(succeeded);
        if let Some(saved) = saved {
            self.note_artifacts(saved.paths());
        }
        Ok(())
    }

    fn note_artifacts(&mut self, paths: Vec<PathBuf>) {
        self.events.emit_best_effort(
            PipelineEvent::ArtifactsSaved,
            object(json!({ "paths": paths })),
        );
        for path in paths {
            self.summary.record_artifact(path);
        }
    }

    /// Saves the current generated image(s) into `dir`, or the output directory.
    pub fn save_current(&mut self, dir: Option<&Path>) -> Result<Option<Vec<PathBuf>>> {
        let Some(generated) = self.pipeline.state().generated() else {
            return Ok(None);
        };
        let dir = dir.unwrap_or(&self.out_dir).to_path_buf();
        let stem = format!("pawtoon-{:03}-saved", self.pipeline.state().runs_started());
        let paths = save_outputs(&dir, &stem, generated)?.paths();
        self.note_artifacts(paths.clone());
        Ok(Some(paths))
    }

    /// Writes `summary.json` and the closing event.
    pub fn finish(mut self) -> Result<SessionSummary> {
        self.summary.finish();
        write_summary(&self.out_dir.join("summary.json"), &self.summary)?;
        self.events.emit_best_effort(
            PipelineEvent::SessionFinished,
            object(json!({
                "total_runs": self.summary.total_runs,
                "completed_runs": self.summary.completed_runs,
                "failed_runs": self.summary.failed_runs,
            })),
        );
        Ok(self.summary)
    }

    /// Applies one parsed session command, writing feedback to `out`.
    pub fn handle(&mut self, command: SessionCommand, out: &mut impl Write) -> Result<Flow> {
        match command {
            SessionCommand::Noop => {}
            SessionCommand::Quit => return Ok(Flow::Quit),
            SessionCommand::Help => {
                writeln!(out, "Commands: {}", SESSION_HELP_COMMANDS.join(" "))?;
                writeln!(out, "Plain text sets the additional instructions.")?;
            }
            SessionCommand::SetImage { path } => match load_source_image(Path::new(&path)) {
                Ok(image) => {
                    writeln!(out, "Image set: {path} ({})", image.media_type().mime())?;
                    self.pipeline.set_image(image);
                }
                Err(err) => writeln!(out, "Failed to read the image file: {err:#}")?,
            },
            SessionCommand::UseDefaultImage => {
                self.pipeline.set_image(default_source_image()?);
                writeln!(out, "Image set: built-in default")?;
            }
            SessionCommand::Analyze => {
                let outcome = self.execute(Step::Analysis)?;
                self.report(outcome, Step::Analysis, out)?;
            }
            SessionCommand::Generate => {
                let outcome = self.execute(Step::Generation)?;
                self.report(outcome, Step::Generation, out)?;
            }
            SessionCommand::Go => {
                let outcome = self.execute(Step::Full)?;
                self.report(outcome, Step::Full, out)?;
            }
            SessionCommand::SetInstructions { text } => {
                self.pipeline.set_instructions(Some(text));
                match self.pipeline.state().instructions() {
                    Some(text) => writeln!(out, "Instructions: {text}")?,
                    None => writeln!(out, "Instructions cleared")?,
                }
            }
            SessionCommand::ClearInstructions => {
                self.pipeline.clear_instructions();
                writeln!(out, "Instructions cleared")?;
            }
            SessionCommand::SetRemoveBackground { enabled } => {
                self.pipeline.set_remove_background(enabled);
                writeln!(out, "Background removal {}", if enabled { "on" } else { "off" })?;
            }
            SessionCommand::SetMode { mode } => match mode.parse::<AnalysisMode>() {
                Ok(mode) => {
                    self.pipeline.set_analysis_mode(mode);
                    writeln!(out, "Analysis mode: {mode}")?;
                }
                Err(reason) => writeln!(out, "{reason}")?,
            },
            SessionCommand::SetPolicy { policy } => match policy.parse::<RemovalFailurePolicy>() {
                Ok(policy) => {
                    self.pipeline.set_removal_failure_policy(policy);
                    writeln!(out, "Removal failure policy: {policy}")?;
                }
                Err(reason) => writeln!(out, "{reason}")?,
            },
            SessionCommand::SetView { view } => match view.parse::<ImageView>() {
                Ok(view) => {
                    self.pipeline.set_view(view);
                    self.describe_view(out)?;
                }
                Err(reason) => writeln!(out, "{reason}")?,
            },
            SessionCommand::ToggleView => {
                self.pipeline.toggle_view();
                self.describe_view(out)?;
            }
            SessionCommand::Save { dir } => {
                match self.save_current(dir.as_deref().map(Path::new))? {
                    Some(paths) => {
                        for path in paths {
                            writeln!(out, "Saved {}", path.display())?;
                        }
                    }
                    None => writeln!(out, "Nothing to save yet")?,
                }
            }
            SessionCommand::Status => self.write_status(out)?,
            SessionCommand::Invalid { command, reason } => {
                writeln!(out, "/{command} {reason}")?;
            }
            SessionCommand::Unknown { command, .. } => {
                writeln!(out, "Unknown command: /{command} (try /help)")?;
            }
        }
        Ok(Flow::Continue)
    }

    /// Prints the outcome of a step the way a user should see it.
    pub fn report(
        &self,
        outcome: Result<(), PipelineError>,
        step: Step,
        out: &mut impl Write,
    ) -> Result<()> {
        let state = self.pipeline.state();
        if let Err(err) = outcome {
            writeln!(out, "{}", err.message)?;
            return Ok(());
        }
        if step == Step::Analysis {
            writeln!(out, "Analysis:\n{}", state.analysis().unwrap_or_default())?;
            return Ok(());
        }
        if let Some(image) = state.displayed_image() {
            writeln!(
                out,
                "Generated {} ({} bytes, view: {})",
                image.media_type().mime(),
                image.byte_len(),
                view_name(state.view())
            )?;
        }
        if let Some(warning) = state.warning() {
            writeln!(out, "Warning: {warning}")?;
        }
        Ok(())
    }

    fn describe_view(&self, out: &mut impl Write) -> Result<()> {
        let state = self.pipeline.state();
        let note = match state.generated() {
            Some(generated) if !generated.has_cutout() => " (no cutout; showing original)",
            Some(_) => "",
            None => " (nothing generated yet)",
        };
        writeln!(out, "View: {}{note}", view_name(state.view()))?;
        Ok(())
    }

    fn write_status(&self, out: &mut impl Write) -> Result<()> {
        let state = self.pipeline.state();
        let options = self.pipeline.options();
        writeln!(out, "State: {}", state.run_state())?;
        writeln!(
            out,
            "Image: {}",
            state
                .source()
                .map(|image| format!("{} ({} bytes)", image.media_type().mime(), image.byte_len()))
                .unwrap_or_else(|| "none".to_string())
        )?;
        writeln!(
            out,
            "Mode: {} | removebg: {} | policy: {} | view: {}",
            options.analysis_mode,
            if options.remove_background { "on" } else { "off" },
            options.removal_failure_policy,
            view_name(state.view())
        )?;
        writeln!(out, "Instructions: {}", state.instructions().unwrap_or("-"))?;
        writeln!(
            out,
            "Analysis: {}",
            state
                .analysis()
                .map(|text| truncate_text(text, 120))
                .unwrap_or_else(|| "-".to_string())
        )?;
        if let Some(error) = state.error() {
            writeln!(out, "Error: {error}")?;
        }
        if let Some(warning) = state.warning() {
            writeln!(out, "Warning: {warning}")?;
        }
        Ok(())
    }
}

fn view_name(view: ImageView) -> &'static str {
    match view {
        ImageView::Original => "original",
        ImageView::Cutout => "cutout",
    }
}

fn object(value: Value) -> EventPayload {
    match value {
        Value::Object(map) => map,
        _ => EventPayload::new(),
    }
}
