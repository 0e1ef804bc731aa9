//! The pipeline's session state as one value object.
//!
//! Presentation code only ever sees `&PipelineState`; the transition methods
//! take `&mut self` and are driven by the orchestration pipeline that owns it.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::codec::SourceImage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    #[default]
    Idle,
    Analyzing,
    Generating,
    Done,
    Failed,
}

impl RunState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Analyzing => "analyzing",
            Self::Generating => "generating",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    pub fn is_busy(self) -> bool {
        matches!(self, Self::Analyzing | Self::Generating)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How (and whether) the vision analysis step participates in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisMode {
    /// Generate straight from the photo.
    None,
    /// Analysis is its own step; generation requires a stored analysis.
    Separate,
    /// One action analyzes and then generates.
    #[default]
    Fused,
}

impl AnalysisMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Separate => "separate",
            Self::Fused => "fused",
        }
    }
}

impl FromStr for AnalysisMode {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "none" | "off" | "skip" => Ok(Self::None),
            "separate" | "separate-step" | "separate_step" | "step" => Ok(Self::Separate),
            "fused" | "auto" => Ok(Self::Fused),
            other => Err(format!(
                "Unknown analysis mode '{other}' (expected none, separate, or fused)."
            )),
        }
    }
}

impl fmt::Display for AnalysisMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalFailurePolicy {
    /// Keep the generated image, surface a warning, finish `Done`.
    #[default]
    Warn,
    /// Keep the generated image but report the run as `Failed`.
    Escalate,
}

impl RemovalFailurePolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Warn => "warn",
            Self::Escalate => "escalate",
        }
    }
}

impl FromStr for RemovalFailurePolicy {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "warn" | "warning" => Ok(Self::Warn),
            "escalate" | "fail" | "fatal" => Ok(Self::Escalate),
            other => Err(format!(
                "Unknown removal failure policy '{other}' (expected warn or escalate)."
            )),
        }
    }
}

impl fmt::Display for RemovalFailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    pub analysis_mode: AnalysisMode,
    pub remove_background: bool,
    pub removal_failure_policy: RemovalFailurePolicy,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            analysis_mode: AnalysisMode::Fused,
            remove_background: true,
            removal_failure_policy: RemovalFailurePolicy::Warn,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImageView {
    Original,
    #[default]
    Cutout,
}

impl FromStr for ImageView {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "original" | "pre" | "raw" => Ok(Self::Original),
            "cutout" | "post" | "nobg" => Ok(Self::Cutout),
            other => Err(format!(
                "Unknown view '{other}' (expected original or cutout)."
            )),
        }
    }
}

/// Generation output, with the background-removed variant when removal ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    original: SourceImage,
    cutout: Option<SourceImage>,
}

impl GeneratedImage {
    pub fn new(original: SourceImage) -> Self {
        Self {
            original,
            cutout: None,
        }
    }

    pub fn with_cutout(original: SourceImage, cutout: SourceImage) -> Self {
        Self {
            original,
            cutout: Some(cutout),
        }
    }

    pub fn pre_removal(&self) -> &SourceImage {
        &self.original
    }

    /// The cutout, or the original itself when removal did not succeed.
    pub fn post_removal(&self) -> &SourceImage {
        self.cutout.as_ref().unwrap_or(&self.original)
    }

    pub fn cutout(&self) -> Option<&SourceImage> {
        self.cutout.as_ref()
    }

    pub fn has_cutout(&self) -> bool {
        self.cutout.is_some()
    }

    pub fn view(&self, view: ImageView) -> &SourceImage {
        match view {
            ImageView::Original => self.pre_removal(),
            ImageView::Cutout => self.post_removal(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineState {
    source: Option<SourceImage>,
    analysis: Option<String>,
    instructions: Option<String>,
    generated: Option<GeneratedImage>,
    run_state: RunState,
    error: Option<String>,
    warning: Option<String>,
    last_prompt: Option<String>,
    view: ImageView,
    runs_started: u64,
}

impl PipelineState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn source(&self) -> Option<&SourceImage> {
        self.source.as_ref()
    }

    pub fn analysis(&self) -> Option<&str> {
        self.analysis.as_deref()
    }

    pub fn instructions(&self) -> Option<&str> {
        self.instructions.as_deref()
    }

    pub fn generated(&self) -> Option<&GeneratedImage> {
        self.generated.as_ref()
    }

    pub fn run_state(&self) -> RunState {
        self.run_state
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn warning(&self) -> Option<&str> {
        self.warning.as_deref()
    }

    pub fn last_prompt(&self) -> Option<&str> {
        self.last_prompt.as_deref()
    }

    pub fn view(&self) -> ImageView {
        self.view
    }

    pub fn runs_started(&self) -> u64 {
        self.runs_started
    }

    /// The image a viewer should show for the current toggle.
    pub fn displayed_image(&self) -> Option<&SourceImage> {
        self.generated.as_ref().map(|image| image.view(self.view))
    }

    pub fn replace_source(&mut self, image: SourceImage) {
        self.source = Some(image);
        self.analysis = None;
        self.generated = None;
        self.error = None;
        self.warning = None;
        self.last_prompt = None;
        self.view = ImageView::default();
        self.run_state = RunState::Idle;
    }

    pub fn set_instructions(&mut self, instructions: Option<String>) {
        self.instructions = instructions
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty());
    }

    pub fn set_view(&mut self, view: ImageView) {
        self.view = view;
    }

    pub fn begin_analysis(&mut self) {
        self.runs_started += 1;
        self.error = None;
        self.warning = None;
        self.analysis = None;
        self.run_state = RunState::Analyzing;
    }

    /// Drops a stored analysis so a run that skips analysis cannot inherit it.
    pub fn clear_analysis(&mut self) {
        self.analysis = None;
    }

    pub fn finish_analysis(&mut self, text: String) {
        self.analysis = Some(text);
        self.run_state = RunState::Idle;
    }

    /// `continues_run` is true when generation follows an analysis in the same run.
    pub fn begin_generation(&mut self, prompt: String, continues_run: bool) {
        if !continues_run {
            self.runs_started += 1;
        }
        self.error = None;
        self.warning = None;
        self.last_prompt = Some(prompt);
        self.run_state = RunState::Generating;
    }

    pub fn finish_generation(&mut self, image: GeneratedImage, warning: Option<String>) {
        self.view = if image.has_cutout() {
            ImageView::Cutout
        } else {
            ImageView::Original
        };
        self.generated = Some(image);
        self.warning = warning;
        self.run_state = RunState::Done;
    }

    /// Stores the image but ends the run failed; first error wins.
    pub fn finish_generation_failed(&mut self, image: GeneratedImage, message: String) {
        self.view = ImageView::Original;
        self.generated = Some(image);
        self.fail(message);
    }

    pub fn fail(&mut self, message: String) {
        if self.error.is_none() {
            self.error = Some(message);
        }
        self.run_state = RunState::Failed;
    }

    /// Records a failure that happened before a run could start. A failed run
    /// keeps its own error.
    pub fn reject(&mut self, message: String) {
        if !self.run_state.is_busy() && self.run_state != RunState::Failed {
            self.error = Some(message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        AnalysisMode, GeneratedImage, ImageView, PipelineState, RemovalFailurePolicy, RunState,
    };
    use crate::codec::{MediaType, SourceImage};

    fn image(tag: &[u8]) -> SourceImage {
        SourceImage::from_bytes(tag, MediaType::Png)
    }

    #[test]
    fn generated_image_without_cutout_reuses_original() {
        let generated = GeneratedImage::new(image(b"y"));
        assert!(std::ptr::eq(generated.pre_removal(), generated.post_removal()));
        assert_eq!(generated.view(ImageView::Cutout), &image(b"y"));
    }

    #[test]
    fn generated_image_keeps_both_variants() {
        let generated = GeneratedImage::with_cutout(image(b"y"), image(b"y2"));
        assert_eq!(generated.pre_removal(), &image(b"y"));
        assert_eq!(generated.post_removal(), &image(b"y2"));
        assert_eq!(generated.view(ImageView::Original), &image(b"y"));
    }

    #[test]
    fn replace_source_resets_everything_but_instructions() {
        let mut state = PipelineState::new();
        state.replace_source(image(b"x"));
        state.set_instructions(Some("add a hat".to_string()));
        state.begin_analysis();
        state.finish_analysis("dog".to_string());
        state.begin_generation("prompt".to_string(), true);
        state.finish_generation(GeneratedImage::new(image(b"y")), Some("warn".to_string()));
        assert_eq!(state.run_state(), RunState::Done);

        state.replace_source(image(b"z"));
        assert_eq!(state.run_state(), RunState::Idle);
        assert_eq!(state.analysis(), None);
        assert!(state.generated().is_none());
        assert_eq!(state.error(), None);
        assert_eq!(state.warning(), None);
        assert_eq!(state.last_prompt(), None);
        assert_eq!(state.instructions(), Some("add a hat"));
        assert_eq!(state.source(), Some(&image(b"z")));
    }

    #[test]
    fn first_failure_wins() {
        let mut state = PipelineState::new();
        state.fail("first".to_string());
        state.fail("second".to_string());
        assert_eq!(state.error(), Some("first"));
        state.begin_analysis();
        assert_eq!(state.error(), None);
        assert_eq!(state.run_state(), RunState::Analyzing);
    }

    #[test]
    fn rejection_keeps_the_failed_run_error() {
        let mut state = PipelineState::new();
        state.reject("Please upload an image first.".to_string());
        assert_eq!(state.error(), Some("Please upload an image first."));

        state.begin_generation("p".to_string(), false);
        state.fail("Generation failed: timeout".to_string());
        state.reject("Analysis is disabled (analysis mode is none).".to_string());
        assert_eq!(state.error(), Some("Generation failed: timeout"));
        assert_eq!(state.run_state(), RunState::Failed);
    }

    #[test]
    fn blank_instructions_are_absent() {
        let mut state = PipelineState::new();
        state.set_instructions(Some("   ".to_string()));
        assert_eq!(state.instructions(), None);
    }

    #[test]
    fn run_counter_counts_runs_not_steps() {
        let mut state = PipelineState::new();
        state.begin_analysis();
        state.finish_analysis("cat".to_string());
        state.begin_generation("p".to_string(), true);
        assert_eq!(state.runs_started(), 1);
        state.begin_generation("p".to_string(), false);
        assert_eq!(state.runs_started(), 2);
    }

    #[test]
    fn modes_and_policies_parse() {
        assert_eq!("separate-step".parse::<AnalysisMode>(), Ok(AnalysisMode::Separate));
        assert_eq!("NONE".parse::<AnalysisMode>(), Ok(AnalysisMode::None));
        assert!("sometimes".parse::<AnalysisMode>().is_err());
        assert_eq!(
            "fail".parse::<RemovalFailurePolicy>(),
            Ok(RemovalFailurePolicy::Escalate)
        );
        assert_eq!("post".parse::<ImageView>(), Ok(ImageView::Cutout));
    }
}
