//! Encode types and configuration
//!
//! Codec settings, the writer state machine and sink errors.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use super::nal::AvcConfig;
use crate::capture::TrackKind;

/// Container format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerFormat {
    Mov,
    Mp4,
}

impl ContainerFormat {
    /// Get the file extension for this format
    pub fn extension(&self) -> &'static str {
        match self {
            ContainerFormat::Mov => "mov",
            ContainerFormat::Mp4 => "mp4",
        }
    }

    /// Major brand written into the ftyp box
    pub fn major_brand(&self) -> &'static [u8; 4] {
        match self {
            ContainerFormat::Mov => b"qt  ",
            ContainerFormat::Mp4 => b"isom",
        }
    }
}

impl Default for ContainerFormat {
    fn default() -> Self {
        Self::Mov
    }
}

/// Video codec of the video track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    H264,
}

impl VideoCodec {
    /// Sample entry FourCC
    pub fn fourcc(&self) -> &'static [u8; 4] {
        match self {
            VideoCodec::H264 => b"avc1",
        }
    }

    pub fn compressor_name(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "H.264",
        }
    }
}

/// Video track output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VideoSettings {
    pub codec: VideoCodec,
    /// Output width in pixels
    pub width: u32,
    /// Output height in pixels
    pub height: u32,
    /// Target average bitrate in bits per second
    pub average_bitrate: u32,
    /// Expected frame rate, used for rate control and the last sample's
    /// duration
    pub expected_frame_rate: f64,
    /// Frames between forced keyframes
    pub keyframe_interval: u32,
    /// Samples the writer may hold before the input reports not ready
    pub max_pending_samples: usize,
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            codec: VideoCodec::H264,
            width: 720,
            height: 1280,
            average_bitrate: 2_300_000,
            expected_frame_rate: 30.0,
            keyframe_interval: 60,
            max_pending_samples: 30,
        }
    }
}

/// Audio track output settings (16-bit little-endian PCM)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AudioSettings {
    pub sample_rate: u32,
    pub channels: u16,
    pub max_pending_samples: usize,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            channels: 1,
            max_pending_samples: 60,
        }
    }
}

/// Settings for one track
#[derive(Debug, Clone)]
pub enum TrackSettings {
    Video(VideoSettings),
    Audio(AudioSettings),
}

impl TrackSettings {
    pub fn kind(&self) -> TrackKind {
        match self {
            TrackSettings::Video(_) => TrackKind::Video,
            TrackSettings::Audio(_) => TrackKind::Audio,
        }
    }

    /// Ticks per second used for this track's timestamps
    pub fn timescale(&self) -> u32 {
        match self {
            TrackSettings::Video(_) => VIDEO_TIMESCALE,
            TrackSettings::Audio(a) => a.sample_rate,
        }
    }

    pub fn max_pending_samples(&self) -> usize {
        match self {
            TrackSettings::Video(v) => v.max_pending_samples,
            TrackSettings::Audio(a) => a.max_pending_samples,
        }
    }

    /// Reject settings no writer could honour
    pub fn validate(&self) -> Result<(), SinkError> {
        match self {
            TrackSettings::Video(v) => {
                if v.width == 0 || v.height == 0 || v.width % 2 != 0 || v.height % 2 != 0 {
                    return Err(SinkError::InvalidSettings(format!(
                        "video dimensions {}x{} (must be even and non-zero)",
                        v.width, v.height
                    )));
                }
                if v.average_bitrate == 0 {
                    return Err(SinkError::InvalidSettings("video bitrate is zero".into()));
                }
                if v.expected_frame_rate.is_nan() || v.expected_frame_rate <= 0.0 {
                    return Err(SinkError::InvalidSettings(format!(
                        "expected frame rate {}",
                        v.expected_frame_rate
                    )));
                }
            }
            TrackSettings::Audio(a) => {
                if a.sample_rate == 0 || a.channels == 0 {
                    return Err(SinkError::InvalidSettings(format!(
                        "audio {} Hz, {} channels",
                        a.sample_rate, a.channels
                    )));
                }
            }
        }
        Ok(())
    }
}

/// QuickTime's customary video timescale
pub const VIDEO_TIMESCALE: u32 = 600;

/// Movie-level timescale (millisecond precision)
pub const MOVIE_TIMESCALE: u32 = 1000;

/// Writer lifecycle. `Failed`, `Cancelled` and `Completed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum WriterState {
    Unknown = 0,
    Writing = 1,
    Failed = 2,
    Cancelled = 3,
    Completed = 4,
}

impl WriterState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WriterState::Failed | WriterState::Cancelled | WriterState::Completed
        )
    }

    pub(crate) fn from_raw(raw: u8) -> Self {
        match raw {
            1 => WriterState::Writing,
            2 => WriterState::Failed,
            3 => WriterState::Cancelled,
            4 => WriterState::Completed,
            _ => WriterState::Unknown,
        }
    }
}

impl Default for WriterState {
    fn default() -> Self {
        Self::Unknown
    }
}

/// One sample handed to the container writer
#[derive(Debug, Clone)]
pub struct EncodedSample {
    /// Decode time relative to the session anchor, in track ticks
    pub time: u64,
    /// Duration in track ticks when known up front
    pub duration: Option<u64>,
    pub data: bytes::Bytes,
    /// Sample can be decoded on its own
    pub sync: bool,
}

/// Container writer backing an encode sink.
///
/// Called from the sink's writer thread only.
pub trait ContainerWriter: Send {
    /// Register a track, returning its index
    fn add_track(&mut self, settings: &TrackSettings) -> Result<usize, SinkError>;

    /// Attach the decoder configuration of a video track. Called before
    /// the first sample that depends on it.
    fn set_avc_config(&mut self, track: usize, config: AvcConfig) -> Result<(), SinkError>;

    fn write_sample(&mut self, track: usize, sample: EncodedSample) -> Result<(), SinkError>;

    /// Flush and close the file
    fn finalize(&mut self) -> Result<(), SinkError>;
}

/// Encode sink errors
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cannot add a track after writing began")]
    TrackAfterWriting,

    #[error("A {0} track was already added")]
    DuplicateTrack(TrackKind),

    #[error("Writer rejected settings: {0}")]
    InvalidSettings(String),

    #[error("Video encoder error: {0}")]
    Encoder(String),

    #[error("No tracks were added")]
    NoTracks,

    #[error("Writer is not writing (state: {0:?})")]
    NotWriting(WriterState),

    #[error("Writer failed: {0}")]
    Failed(String),

    #[error("Writing was cancelled")]
    Cancelled,

    #[error("Finish was already requested")]
    AlreadyFinished,

    #[error("Unknown track index {0}")]
    UnknownTrack(usize),
}

/// Outcome delivered to a finish completion
pub type FinishResult = Result<PathBuf, SinkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_video_settings() {
        let v = VideoSettings::default();
        assert_eq!((v.width, v.height), (720, 1280));
        assert_eq!(v.average_bitrate, 2_300_000);
        assert_eq!(v.codec.fourcc(), b"avc1");
    }

    #[test]
    fn test_validate_rejects_zero_dimensions() {
        let settings = TrackSettings::Video(VideoSettings {
            width: 0,
            ..VideoSettings::default()
        });
        assert!(matches!(settings.validate(), Err(SinkError::InvalidSettings(_))));
        let odd = TrackSettings::Video(VideoSettings {
            width: 721,
            ..VideoSettings::default()
        });
        assert!(matches!(odd.validate(), Err(SinkError::InvalidSettings(_))));
        assert!(TrackSettings::Audio(AudioSettings::default()).validate().is_ok());
    }

    #[test]
    fn test_writer_state_raw_round_trip() {
        for state in [
            WriterState::Unknown,
            WriterState::Writing,
            WriterState::Failed,
            WriterState::Cancelled,
            WriterState::Completed,
        ] {
            assert_eq!(WriterState::from_raw(state as u8), state);
        }
        assert!(WriterState::Completed.is_terminal());
        assert!(!WriterState::Writing.is_terminal());
    }

    #[test]
    fn test_settings_deserialize_with_defaults() {
        let v: VideoSettings = serde_json::from_str(r#"{"averageBitrate": 1000000}"#).unwrap();
        assert_eq!(v.average_bitrate, 1_000_000);
        assert_eq!(v.width, 720);
    }
}
