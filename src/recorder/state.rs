//! Pipeline state management
//!
//! Defines the pipeline state machine, its configuration and the per-session
//! bookkeeping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Instant;
use uuid::Uuid;

use crate::capture::{CaptureConfig, MediaTime, TrackKind, VideoOrientation};
use crate::encode::{AudioSettings, ContainerFormat, EncodeSink, VideoSettings};

/// Current state of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    /// Nothing is being recorded
    Idle,
    /// Start was requested; device and writer are being set up
    Armed,
    /// Buffers are routed to the writer
    Recording,
    /// Waiting for the writer to finalize the file
    Finishing,
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::Idle
    }
}

/// Configuration for the capture pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineConfig {
    /// Output file, replaced on every start
    pub output_path: PathBuf,

    pub container: ContainerFormat,

    pub capture: CaptureConfig,

    pub video: VideoSettings,

    pub audio: AudioSettings,

    /// Orientation forced on the video connection while recording
    pub orientation: VideoOrientation,

    /// Mirror video when the connection supports it
    pub mirror_video: bool,

    /// Report the measured frame rate every this many video buffers
    pub fps_report_interval: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            output_path: PathBuf::from("videoFile.mov"),
            container: ContainerFormat::Mov,
            capture: CaptureConfig::default(),
            video: VideoSettings::default(),
            audio: AudioSettings::default(),
            orientation: VideoOrientation::Portrait,
            mirror_video: true,
            fps_report_interval: 5,
        }
    }
}

impl PipelineConfig {
    /// Load a configuration from a JSON file; missing fields take defaults
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&contents)?;
        tracing::debug!("Loaded pipeline config from {:?}", path);
        Ok(config)
    }
}

/// Errors loading a pipeline configuration
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Appended and dropped buffer counts for one session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingStats {
    pub video_appended: u64,
    pub video_dropped: u64,
    pub audio_appended: u64,
    pub audio_dropped: u64,
}

impl RecordingStats {
    pub fn dropped(&self) -> u64 {
        self.video_dropped + self.audio_dropped
    }
}

#[derive(Debug, Default)]
struct TrackCounters {
    appended: AtomicU64,
    dropped: AtomicU64,
}

/// One recording, from start until the file is finalized
pub struct RecordingSession {
    pub id: Uuid,
    pub output_path: PathBuf,
    pub started_at: DateTime<Utc>,
    started: Instant,
    pub(crate) sink: EncodeSink,
    /// Read-only copy of the anchor the sink accepted, set once
    anchor: OnceLock<MediaTime>,
    video: TrackCounters,
    audio: TrackCounters,
    failure_reported: AtomicBool,
}

impl RecordingSession {
    pub(crate) fn new(sink: EncodeSink) -> Self {
        Self {
            id: Uuid::new_v4(),
            output_path: sink.path().to_path_buf(),
            started_at: Utc::now(),
            started: Instant::now(),
            sink,
            anchor: OnceLock::new(),
            video: TrackCounters::default(),
            audio: TrackCounters::default(),
            failure_reported: AtomicBool::new(false),
        }
    }

    /// Anchor the sink reported for this session.
    ///
    /// A snapshot of the sink's value, so it outlives the sink clearing its
    /// own anchor when the file is finalized.
    pub fn anchor(&self) -> Option<MediaTime> {
        self.anchor.get().copied()
    }

    /// Record the anchor the sink accepted. Later calls are ignored.
    pub(crate) fn snapshot_anchor(&self, anchor: MediaTime) {
        if self.anchor.set(anchor).is_err() {
            tracing::warn!("Session {} already anchored, ignoring {:?}", self.id, anchor);
        }
    }

    pub(crate) fn record(&self, kind: TrackKind, appended: bool) {
        let counters = match kind {
            TrackKind::Video => &self.video,
            TrackKind::Audio => &self.audio,
        };
        if appended {
            counters.appended.fetch_add(1, Ordering::Relaxed);
        } else {
            counters.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// True the first time a writer failure is reported
    pub(crate) fn claim_failure_report(&self) -> bool {
        !self.failure_reported.swap(true, Ordering::AcqRel)
    }

    pub fn stats(&self) -> RecordingStats {
        RecordingStats {
            video_appended: self.video.appended.load(Ordering::Relaxed),
            video_dropped: self.video.dropped.load(Ordering::Relaxed),
            audio_appended: self.audio.appended.load(Ordering::Relaxed),
            audio_dropped: self.audio.dropped.load(Ordering::Relaxed),
        }
    }

    pub fn summary(&self) -> RecordingSummary {
        RecordingSummary {
            session_id: self.id,
            output_path: self.output_path.clone(),
            started_at: self.started_at,
            anchor_secs: self.anchor().map(|a| a.as_secs_f64()),
            duration_ms: self.started.elapsed().as_secs_f64() * 1000.0,
            stats: self.stats(),
        }
    }
}

/// Result of a completed recording
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingSummary {
    pub session_id: Uuid,

    /// Path to the finished file
    pub output_path: PathBuf,

    pub started_at: DateTime<Utc>,

    /// Session anchor in host seconds
    pub anchor_secs: Option<f64>,

    /// Wall-clock duration from start to completion in milliseconds
    pub duration_ms: f64,

    pub stats: RecordingStats,
}

/// Events emitted by the pipeline
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// Recording started
    Started,
    /// First buffer of the session fixed the anchor
    SessionAnchored(MediaTime),
    /// Measured capture frame rate
    FrameRate { fps: f64, label: String },
    /// File finalized
    Completed(RecordingSummary),
    /// The device stopped delivering on its own
    CaptureEnded,
    /// Error to show to the user
    Error(String),
}
