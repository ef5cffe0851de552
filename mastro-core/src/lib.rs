pub mod analysis;
pub mod chain;
pub mod config;
pub mod error;
pub mod job;
pub mod pipeline;
pub mod preset;
pub mod render;
pub mod splice;
pub mod tool;

pub use analysis::{AnalysisError, AnalysisResult, AudioAnalysis, AudioAnalyzer};
pub use chain::{build_chain, ProcessingChain, Stage};
pub use config::{
    load_mastro_config, MasteringSection, MastroConfig, PathsSection, ServerSection, ToolsSection,
};
pub use error::{ConfigError, Result};
pub use job::{Job, JobRegistry, JobResult, JobStatus};
pub use pipeline::{MasteringPipeline, PipelineError, PipelineResult};
pub use preset::{Preset, PresetCatalog};
pub use render::{EncodeError, RenderError, RenderResult, Renderer};
pub use splice::{resolve_tag_asset, SpliceError, VoiceTagSplicer};
pub use tool::{SystemToolExecutor, ToolError, ToolExecutor};
