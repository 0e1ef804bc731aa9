pub mod chat;
pub mod codec;
pub mod error;
pub mod events;
pub mod models;
pub mod prompts;
pub mod runs;
pub mod state;

pub use codec::{MediaType, SourceImage};
pub use error::{PipelineError, PipelineErrorKind};
pub use state::{
    AnalysisMode, GeneratedImage, ImageView, PipelineOptions, PipelineState,
    RemovalFailurePolicy, RunState,
};
