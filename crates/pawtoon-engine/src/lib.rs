pub mod artifacts;
pub mod clients;
pub mod config;
mod http;
pub mod images;
pub mod pipeline;

pub use artifacts::{save_outputs, SavedArtifacts};
pub use clients::{
    AnalysisClient, BackgroundRemovalClient, ClientSet, GenerationClient, RemovalProvider,
};
pub use config::EngineConfig;
pub use images::{default_source_image, load_source_image};
pub use pipeline::Pipeline;
