use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::analysis::AnalysisError;
use crate::render::{EncodeError, RenderError};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid submission: {0}")]
    Validation(String),
    #[error(transparent)]
    Analysis(#[from] AnalysisError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("job exceeded deadline of {0:?}")]
    Deadline(Duration),
}

pub type PipelineResult<T> = Result<T, PipelineError>;
