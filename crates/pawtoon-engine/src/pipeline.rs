//! Analysis, prompt, generation and background removal in one control flow.
//!
//! Every client call finishes before the next begins. Generation never starts
//! in a run whose analysis failed, and removal only ever sees a usable image.

use pawtoon_contracts::events::{EventPayload, EventWriter, PipelineEvent};
use pawtoon_contracts::prompts::{analysis_prompt, generation_prompt};
use pawtoon_contracts::{
    AnalysisMode, GeneratedImage, ImageView, PipelineError, PipelineOptions, PipelineState,
    RemovalFailurePolicy, SourceImage,
};
use serde_json::{json, Value};

use crate::clients::ClientSet;

const NEEDS_IMAGE: &str = "Please upload an image first.";
const NEEDS_ANALYSIS: &str = "Please analyze the pet first before generating.";

pub struct Pipeline {
    state: PipelineState,
    options: PipelineOptions,
    clients: ClientSet,
    events: Option<EventWriter>,
    fresh_image: bool,
}

impl Pipeline {
    pub fn new(clients: ClientSet, options: PipelineOptions) -> Self {
        Self {
            state: PipelineState::new(),
            options,
            clients,
            events: None,
            fresh_image: false,
        }
    }

    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.events = Some(events);
        self
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub fn clients(&self) -> &ClientSet {
        &self.clients
    }

    pub fn events(&self) -> Option<&EventWriter> {
        self.events.as_ref()
    }

    /// Whether the latest run stored a newly generated image.
    pub fn produced_image(&self) -> bool {
        self.fresh_image
    }

    pub fn set_image(&mut self, image: SourceImage) {
        let media_type = image.media_type().mime();
        let bytes = image.byte_len();
        self.state.replace_source(image);
        self.fresh_image = false;
        self.emit(
            PipelineEvent::ImageSet,
            json!({ "media_type": media_type, "bytes": bytes }),
        );
    }

    pub fn set_instructions(&mut self, instructions: Option<String>) {
        self.state.set_instructions(instructions);
    }

    pub fn clear_instructions(&mut self) {
        self.state.set_instructions(None);
    }

    pub fn set_remove_background(&mut self, enabled: bool) {
        self.options.remove_background = enabled;
    }

    pub fn set_analysis_mode(&mut self, mode: AnalysisMode) {
        self.options.analysis_mode = mode;
    }

    pub fn set_removal_failure_policy(&mut self, policy: RemovalFailurePolicy) {
        self.options.removal_failure_policy = policy;
    }

    pub fn set_view(&mut self, view: ImageView) {
        self.state.set_view(view);
    }

    pub fn toggle_view(&mut self) -> ImageView {
        let next = match self.state.view() {
            ImageView::Original => ImageView::Cutout,
            ImageView::Cutout => ImageView::Original,
        };
        self.state.set_view(next);
        next
    }

    /// One end-to-end run: analysis first unless the mode disables it.
    pub fn run(&mut self) -> Result<(), PipelineError> {
        match self.options.analysis_mode {
            AnalysisMode::None => {
                self.check_can_start()?;
                self.state.clear_analysis();
                self.generate(false)
            }
            AnalysisMode::Separate | AnalysisMode::Fused => {
                self.run_analysis()?;
                self.generate(true)
            }
        }
    }

    pub fn run_analysis(&mut self) -> Result<(), PipelineError> {
        if self.options.analysis_mode == AnalysisMode::None {
            return self.reject("Analysis is disabled (analysis mode is none).");
        }
        self.check_can_start()?;
        let Some(source) = self.state.source().cloned() else {
            return self.reject(NEEDS_IMAGE);
        };

        self.state.begin_analysis();
        self.fresh_image = false;
        let info = self.clients.analysis_info();
        self.emit(
            PipelineEvent::AnalysisStarted,
            json!({ "provider": info.provider, "model": info.model }),
        );

        let outcome = self
            .clients
            .analysis
            .analyze(&source, analysis_prompt())
            .map_err(|err| PipelineError::from_anyhow(&err))
            .and_then(|text| {
                if text.trim().is_empty() {
                    Err(PipelineError::transport("analysis returned no text"))
                } else {
                    Ok(text)
                }
            });

        match outcome {
            Ok(text) => {
                self.emit(
                    PipelineEvent::AnalysisFinished,
                    json!({ "chars": text.chars().count() }),
                );
                self.state.finish_analysis(text);
                Ok(())
            }
            Err(err) => {
                let err = err.prefixed("Analysis failed");
                self.emit(PipelineEvent::AnalysisFailed, failure_payload(&err));
                self.state.fail(err.message.clone());
                Err(err)
            }
        }
    }

    pub fn run_generation(&mut self) -> Result<(), PipelineError> {
        self.generate(false)
    }

    fn generate(&mut self, continues_run: bool) -> Result<(), PipelineError> {
        self.check_can_start()?;
        let Some(source) = self.state.source().cloned() else {
            return self.reject(NEEDS_IMAGE);
        };
        let analysis = match self.options.analysis_mode {
            AnalysisMode::None => None,
            AnalysisMode::Fused => self.state.analysis().map(str::to_string),
            AnalysisMode::Separate => match self.state.analysis() {
                Some(text) => Some(text.to_string()),
                None => return self.reject(NEEDS_ANALYSIS),
            },
        };

        let prompt = generation_prompt(analysis.as_deref(), self.state.instructions());
        self.state.begin_generation(prompt.clone(), continues_run);
        self.fresh_image = false;
        let info = self.clients.generation_info();
        self.emit(
            PipelineEvent::GenerationStarted,
            json!({
                "provider": info.provider,
                "model": info.model,
                "used_analysis": analysis.is_some(),
                "prompt_chars": prompt.chars().count(),
            }),
        );

        let generated = match self.clients.generation.generate(&source, &prompt) {
            Ok(image) => image,
            Err(err) => {
                let err = PipelineError::from_anyhow(&err).prefixed("Generation failed");
                self.emit(PipelineEvent::GenerationFailed, failure_payload(&err));
                self.state.fail(err.message.clone());
                return Err(err);
            }
        };
        self.emit(
            PipelineEvent::GenerationFinished,
            json!({
                "media_type": generated.media_type().mime(),
                "bytes": generated.byte_len(),
            }),
        );

        self.fresh_image = true;
        if !self.options.remove_background {
            self.state.finish_generation(GeneratedImage::new(generated), None);
            return Ok(());
        }
        self.remove_background(generated)
    }

    fn remove_background(&mut self, generated: SourceImage) -> Result<(), PipelineError> {
        let outcome = match &self.clients.removal {
            Ok(client) => client
                .remove_background(&generated)
                .map_err(|err| PipelineError::from_anyhow(&err)),
            Err(err) => Err(err.clone()),
        };

        match outcome {
            Ok(cutout) => {
                self.emit(
                    PipelineEvent::BackgroundRemovalFinished,
                    json!({
                        "media_type": cutout.media_type().mime(),
                        "bytes": cutout.byte_len(),
                    }),
                );
                self.state
                    .finish_generation(GeneratedImage::with_cutout(generated, cutout), None);
                Ok(())
            }
            Err(err) => {
                let err = err.prefixed("Background removal failed");
                let policy = self.options.removal_failure_policy;
                let mut payload = failure_payload(&err);
                if let Value::Object(map) = &mut payload {
                    map.insert("policy".to_string(), json!(policy.as_str()));
                }
                self.emit(PipelineEvent::BackgroundRemovalFailed, payload);
                match policy {
                    RemovalFailurePolicy::Warn => {
                        self.state
                            .finish_generation(GeneratedImage::new(generated), Some(err.message));
                        Ok(())
                    }
                    RemovalFailurePolicy::Escalate => {
                        self.state.finish_generation_failed(
                            GeneratedImage::new(generated),
                            err.message.clone(),
                        );
                        Err(err)
                    }
                }
            }
        }
    }

    fn check_can_start(&self) -> Result<(), PipelineError> {
        if self.state.run_state().is_busy() {
            return Err(PipelineError::precondition("A run is already in progress."));
        }
        Ok(())
    }

    fn reject(&mut self, message: &str) -> Result<(), PipelineError> {
        self.state.reject(message.to_string());
        Err(PipelineError::precondition(message))
    }

    fn emit(&self, event: PipelineEvent, payload: Value) {
        if let Some(events) = &self.events {
            events.emit_best_effort(event, as_payload(payload));
        }
    }
}

fn failure_payload(err: &PipelineError) -> Value {
    json!({ "kind": err.kind.as_str(), "error": err.message })
}

fn as_payload(value: Value) -> EventPayload {
    match value {
        Value::Object(map) => map,
        _ => EventPayload::new(),
    }
}
