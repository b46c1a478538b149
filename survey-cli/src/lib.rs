//! Stage orchestration and configuration behind the `transect-pipeline` binary

pub mod config;
pub mod pipeline;

pub use config::PipelineConfig;
pub use pipeline::{Pipeline, RunOptions, RunSummary};
