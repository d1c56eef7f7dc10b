//! Recording pipeline
//!
//! This module ties capture to encoding:
//! - PipelineController drives the idle/armed/recording/finishing lifecycle
//! - RecordingSession tracks one file from start to completion
//! - FpsMeter measures the delivered frame rate for display

pub mod coordinator;
pub mod fps;
pub mod state;

pub use coordinator::{PipelineController, PipelineError, PipelineResult, WriterFactory};
pub use fps::FpsMeter;
pub use state::{
    ConfigError, PipelineConfig, PipelineEvent, PipelineState, RecordingSession, RecordingStats,
    RecordingSummary,
};
