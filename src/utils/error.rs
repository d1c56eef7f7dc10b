//! Error types and handling
//!
//! Application-level error wrapping the per-module errors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::capture::CaptureError;
use crate::encode::SinkError;
use crate::recorder::{ConfigError, PipelineError};
use crate::summary::ReadError;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Writer error: {0}")]
    Sink(#[from] SinkError),

    #[error("Recording error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Read error: {0}")]
    Read(#[from] ReadError),
}

/// Error response for collaborators such as a UI layer
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<AppError> for ErrorResponse {
    fn from(error: AppError) -> Self {
        let code = match &error {
            AppError::Io(_) => "IO_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::Capture(_) => "CAPTURE_ERROR",
            AppError::Sink(_) => "WRITER_ERROR",
            AppError::Pipeline(PipelineError::Configuration(_)) => "CONFIGURATION_ERROR",
            AppError::Pipeline(PipelineError::WriterOpen(_)) => "WRITER_OPEN_ERROR",
            AppError::Pipeline(PipelineError::WriterFailure(_)) => "WRITER_FAILURE",
            AppError::Pipeline(_) => "RECORDING_ERROR",
            AppError::Read(_) => "READ_ERROR",
        };

        ErrorResponse {
            code: code.to_string(),
            message: error.to_string(),
        }
    }
}

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;
