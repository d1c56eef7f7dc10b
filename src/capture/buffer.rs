//! Capture buffers and media timestamps
//!
//! A `CaptureBuffer` is the unit handed from the device session to the
//! pipeline controller and on to the encode sink.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use super::connection::{CaptureConnection, VideoOrientation};

/// Kind of track a buffer belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Video,
    Audio,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Video => write!(f, "video"),
            TrackKind::Audio => write!(f, "audio"),
        }
    }
}

/// Rational media timestamp (value / timescale seconds)
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaTime {
    pub value: i64,
    pub timescale: u32,
}

/// Nanosecond timescale used for host-clock timestamps
pub const HOST_TIMESCALE: u32 = 1_000_000_000;

impl MediaTime {
    pub const fn new(value: i64, timescale: u32) -> Self {
        Self { value, timescale }
    }

    pub const fn zero() -> Self {
        Self::new(0, 1)
    }

    pub fn from_secs_f64(secs: f64, timescale: u32) -> Self {
        Self::new((secs * timescale as f64).round() as i64, timescale)
    }

    pub fn as_secs_f64(&self) -> f64 {
        if self.timescale == 0 {
            return 0.0;
        }
        self.value as f64 / self.timescale as f64
    }

    /// Convert to ticks of another timescale, rounding to nearest
    pub fn to_timescale(&self, timescale: u32) -> i64 {
        if self.timescale == timescale {
            return self.value;
        }
        if self.timescale == 0 {
            return 0;
        }
        let num = self.value as i128 * timescale as i128;
        let den = self.timescale as i128;
        let half = den / 2;
        let rounded = if num >= 0 { (num + half) / den } else { (num - half) / den };
        rounded as i64
    }

    /// `self - earlier`, expressed in this timestamp's timescale
    pub fn checked_sub(&self, earlier: MediaTime) -> Option<MediaTime> {
        let other = earlier.to_timescale(self.timescale);
        self.value
            .checked_sub(other)
            .map(|value| MediaTime::new(value, self.timescale))
    }

    fn cross(&self, other: &MediaTime) -> (i128, i128) {
        (
            self.value as i128 * other.timescale as i128,
            other.value as i128 * self.timescale as i128,
        )
    }
}

impl PartialEq for MediaTime {
    fn eq(&self, other: &Self) -> bool {
        let (a, b) = self.cross(other);
        a == b
    }
}

impl Eq for MediaTime {}

impl PartialOrd for MediaTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MediaTime {
    fn cmp(&self, other: &Self) -> Ordering {
        let (a, b) = self.cross(other);
        a.cmp(&b)
    }
}

impl fmt::Display for MediaTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}s", self.as_secs_f64())
    }
}

/// Pixel layout of a video payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// 32-bit BGRA, tightly packed rows
    Bgra32,
}

/// Format description attached to each buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferFormat {
    Video {
        width: u32,
        height: u32,
        pixel_format: PixelFormat,
        orientation: VideoOrientation,
        mirrored: bool,
    },
    Audio {
        sample_rate: u32,
        channels: u16,
        frames: u32,
    },
}

/// Raw sample as produced by a capture device, before it is attached to a
/// connection
#[derive(Debug, Clone)]
pub struct RawSample {
    pub kind: TrackKind,
    pub pts: MediaTime,
    pub duration: Option<MediaTime>,
    pub payload: Bytes,
    pub format: BufferFormat,
}

/// Immutable, timestamped unit of captured media
#[derive(Debug, Clone)]
pub struct CaptureBuffer {
    kind: TrackKind,
    pts: MediaTime,
    duration: Option<MediaTime>,
    payload: Bytes,
    format: BufferFormat,
    connection: Arc<CaptureConnection>,
}

impl CaptureBuffer {
    pub fn new(sample: RawSample, connection: Arc<CaptureConnection>) -> Self {
        Self {
            kind: sample.kind,
            pts: sample.pts,
            duration: sample.duration,
            payload: sample.payload,
            format: sample.format,
            connection,
        }
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    /// Presentation timestamp
    pub fn pts(&self) -> MediaTime {
        self.pts
    }

    pub fn duration(&self) -> Option<MediaTime> {
        self.duration
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn format(&self) -> &BufferFormat {
        &self.format
    }

    /// Connection the buffer arrived on
    pub fn connection(&self) -> &Arc<CaptureConnection> {
        &self.connection
    }

    /// Number of PCM frames for audio buffers
    pub fn audio_frames(&self) -> Option<u32> {
        match self.format {
            BufferFormat::Audio { frames, .. } => Some(frames),
            BufferFormat::Video { .. } => None,
        }
    }
}
