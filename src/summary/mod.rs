//! Summaries of finished recordings

pub mod reader;

pub use reader::{AssetReader, ReadError, VideoSummary};
