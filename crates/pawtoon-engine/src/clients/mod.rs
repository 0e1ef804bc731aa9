//! The three external collaborators and their implementations.
//!
//! Every call is attempted exactly once. A typed `PipelineError` anywhere in a
//! returned error chain keeps its kind; everything else is a transport failure.

mod dryrun;
mod gemini;
mod removebg;

use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use pawtoon_contracts::models::{Capability, ModelSelection, ModelSelector, Provider};
use pawtoon_contracts::runs::receipts::ClientInfo;
use pawtoon_contracts::{PipelineError, SourceImage};

use crate::config::EngineConfig;

pub use dryrun::{DryrunBackgroundRemover, DryrunImageClient, DryrunVisionClient, REFUSE_MARKER};
pub use gemini::{GeminiImageClient, GeminiTransport, GeminiVisionClient};
pub use removebg::RemoveBgClient;

pub trait AnalysisClient: Send + Sync {
    fn name(&self) -> &str;

    fn model(&self) -> Option<&str> {
        None
    }

    /// Describes `image` following `instruction`; the text is never blank.
    fn analyze(&self, image: &SourceImage, instruction: &str) -> Result<String>;
}

pub trait GenerationClient: Send + Sync {
    fn name(&self) -> &str;

    fn model(&self) -> Option<&str> {
        None
    }

    /// A reply without image payload is a `NoImageProduced` failure.
    fn generate(&self, image: &SourceImage, prompt: &str) -> Result<SourceImage>;
}

pub trait BackgroundRemovalClient: Send + Sync {
    fn name(&self) -> &str;

    fn remove_background(&self, image: &SourceImage) -> Result<SourceImage>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalProvider {
    RemoveBg,
    Dryrun,
}

impl RemovalProvider {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RemoveBg => "removebg",
            Self::Dryrun => "dryrun",
        }
    }

    /// remove.bg for real generation providers, the local stand-in for dryrun.
    pub fn for_generation(provider: Provider) -> Self {
        match provider {
            Provider::Gemini => Self::RemoveBg,
            Provider::Dryrun => Self::Dryrun,
        }
    }
}

impl FromStr for RemovalProvider {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "removebg" | "remove.bg" | "remove-bg" => Ok(Self::RemoveBg),
            "dryrun" => Ok(Self::Dryrun),
            other => Err(format!(
                "Unknown background removal provider '{other}' (expected removebg or dryrun)."
            )),
        }
    }
}

impl fmt::Display for RemovalProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The concrete clients one pipeline talks to.
///
/// A background remover that could not be configured is kept as its error so
/// the pipeline can report it when removal is actually requested.
pub struct ClientSet {
    pub analysis: Box<dyn AnalysisClient>,
    pub generation: Box<dyn GenerationClient>,
    pub removal: Result<Box<dyn BackgroundRemovalClient>, PipelineError>,
    pub notes: Vec<String>,
}

impl ClientSet {
    pub fn new(
        analysis: Box<dyn AnalysisClient>,
        generation: Box<dyn GenerationClient>,
        removal: Result<Box<dyn BackgroundRemovalClient>, PipelineError>,
    ) -> Self {
        Self {
            analysis,
            generation,
            removal,
            notes: Vec::new(),
        }
    }

    pub fn dryrun() -> Self {
        Self::new(
            Box::new(DryrunVisionClient),
            Box::new(DryrunImageClient),
            Ok(Box::new(DryrunBackgroundRemover)),
        )
    }

    /// Resolves models through `selector` and builds the matching clients.
    pub fn from_config(
        config: &EngineConfig,
        selector: &ModelSelector,
        removal_provider: Option<RemovalProvider>,
    ) -> Result<Self> {
        let vision = selector
            .select(config.analysis_model.as_deref(), Capability::Vision)
            .map_err(|reason| anyhow!(reason))?;
        let image = selector
            .select(config.image_model.as_deref(), Capability::Image)
            .map_err(|reason| anyhow!(reason))?;

        let mut notes = Vec::new();
        for (label, selection) in [("analysis", &vision), ("image", &image)] {
            if let (Some(reason), Some(_)) = (&selection.fallback_reason, &selection.requested) {
                notes.push(format!(
                    "{label} model: {reason} Using {}.",
                    selection.model.name
                ));
            }
        }

        let analysis = build_analysis_client(config, &vision)?;
        let generation = build_generation_client(config, &image)?;
        let removal_provider = removal_provider
            .unwrap_or_else(|| RemovalProvider::for_generation(image.model.provider));
        let removal: Result<Box<dyn BackgroundRemovalClient>, PipelineError> =
            match removal_provider {
                RemovalProvider::Dryrun => Ok(Box::new(DryrunBackgroundRemover)),
                RemovalProvider::RemoveBg => RemoveBgClient::from_config(config)
                    .map(|client| Box::new(client) as Box<dyn BackgroundRemovalClient>),
            };
        if let Err(err) = &removal {
            notes.push(format!("Background removal unavailable: {err}"));
        }

        Ok(Self {
            analysis,
            generation,
            removal,
            notes,
        })
    }

    pub fn analysis_info(&self) -> ClientInfo {
        ClientInfo {
            provider: self.analysis.name().to_string(),
            model: self.analysis.model().map(str::to_string),
        }
    }

    pub fn generation_info(&self) -> ClientInfo {
        ClientInfo {
            provider: self.generation.name().to_string(),
            model: self.generation.model().map(str::to_string),
        }
    }

    pub fn removal_info(&self) -> Option<ClientInfo> {
        self.removal.as_ref().ok().map(|client| ClientInfo {
            provider: client.name().to_string(),
            model: None,
        })
    }
}

fn build_analysis_client(
    config: &EngineConfig,
    selection: &ModelSelection,
) -> Result<Box<dyn AnalysisClient>> {
    Ok(match selection.model.provider {
        Provider::Dryrun => Box::new(DryrunVisionClient),
        Provider::Gemini => Box::new(GeminiVisionClient::new(
            GeminiTransport::from_config(config)?,
            selection.model.name.clone(),
        )),
    })
}

fn build_generation_client(
    config: &EngineConfig,
    selection: &ModelSelection,
) -> Result<Box<dyn GenerationClient>> {
    Ok(match selection.model.provider {
        Provider::Dryrun => Box::new(DryrunImageClient),
        Provider::Gemini => Box::new(GeminiImageClient::new(
            GeminiTransport::from_config(config)?,
            selection.model.name.clone(),
        )),
    })
}

#[cfg(test)]
mod tests {
    use pawtoon_contracts::models::ModelSelector;
    use pawtoon_contracts::PipelineErrorKind;

    use super::{ClientSet, RemovalProvider};
    use crate::config::EngineConfig;

    fn dryrun_config() -> EngineConfig {
        EngineConfig {
            analysis_model: Some("dryrun-vision-1".to_string()),
            image_model: Some("dryrun-image-1".to_string()),
            ..EngineConfig::default()
        }
    }

    #[test]
    fn dryrun_models_build_offline_clients() -> anyhow::Result<()> {
        let clients = ClientSet::from_config(&dryrun_config(), &ModelSelector::default(), None)?;
        assert_eq!(clients.analysis.name(), "dryrun");
        assert_eq!(clients.generation_info().provider, "dryrun");
        assert_eq!(clients.removal_info().map(|info| info.provider).as_deref(), Some("dryrun"));
        assert!(clients.notes.is_empty());
        Ok(())
    }

    #[test]
    fn gemini_without_key_is_a_configuration_error() {
        let err = ClientSet::from_config(&EngineConfig::default(), &ModelSelector::default(), None)
            .err()
            .expect("missing key must fail");
        let typed = pawtoon_contracts::PipelineError::from_anyhow(&err);
        assert_eq!(typed.kind, PipelineErrorKind::Configuration);
    }

    #[test]
    fn missing_removebg_key_keeps_error_for_later() -> anyhow::Result<()> {
        let clients = ClientSet::from_config(
            &dryrun_config(),
            &ModelSelector::default(),
            Some(RemovalProvider::RemoveBg),
        )?;
        let err = clients.removal.as_ref().err().expect("no key configured");
        assert_eq!(err.kind, PipelineErrorKind::Configuration);
        assert!(clients.notes[0].starts_with("Background removal unavailable"));
        Ok(())
    }

    #[test]
    fn unknown_model_request_is_noted() -> anyhow::Result<()> {
        let config = EngineConfig {
            image_model: Some("dryrun-vision-1".to_string()),
            analysis_model: Some("dryrun-vision-1".to_string()),
            gemini_api_key: Some("test-key".to_string()),
            ..EngineConfig::default()
        };
        let clients = ClientSet::from_config(
            &config,
            &ModelSelector::default(),
            Some(RemovalProvider::Dryrun),
        )?;
        assert_eq!(clients.generation.model(), Some("gemini-2.5-flash-image"));
        assert_eq!(clients.notes.len(), 1);
        assert!(clients.notes[0].contains("image model"));
        Ok(())
    }

    #[test]
    fn removal_provider_parses() {
        assert_eq!("remove.bg".parse::<RemovalProvider>(), Ok(RemovalProvider::RemoveBg));
        assert!("magic".parse::<RemovalProvider>().is_err());
    }
}
