//! Capture connections
//!
//! A connection links one device output (video or audio) to its consumer.
//! Orientation and mirroring are connection properties: changing them
//! affects every buffer produced afterwards.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use super::buffer::TrackKind;

/// Orientation of delivered video frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VideoOrientation {
    Portrait,
    PortraitUpsideDown,
    LandscapeRight,
    LandscapeLeft,
}

impl VideoOrientation {
    /// Clockwise quarter turns needed to go from the sensor's native
    /// landscape-right layout to this orientation
    pub fn quarter_turns_from_sensor(&self) -> u8 {
        match self {
            VideoOrientation::LandscapeRight => 0,
            VideoOrientation::Portrait => 1,
            VideoOrientation::LandscapeLeft => 2,
            VideoOrientation::PortraitUpsideDown => 3,
        }
    }

    pub fn is_portrait(&self) -> bool {
        matches!(
            self,
            VideoOrientation::Portrait | VideoOrientation::PortraitUpsideDown
        )
    }

    fn to_raw(self) -> u8 {
        self.quarter_turns_from_sensor()
    }

    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => VideoOrientation::Portrait,
            2 => VideoOrientation::LandscapeLeft,
            3 => VideoOrientation::PortraitUpsideDown,
            _ => VideoOrientation::LandscapeRight,
        }
    }
}

impl Default for VideoOrientation {
    fn default() -> Self {
        Self::LandscapeRight
    }
}

/// Connection between a device output and the delivery thread
#[derive(Debug)]
pub struct CaptureConnection {
    kind: TrackKind,
    supports_mirroring: bool,
    orientation: AtomicU8,
    mirrored: AtomicBool,
}

impl CaptureConnection {
    pub fn new(kind: TrackKind, supports_mirroring: bool) -> Self {
        Self {
            kind,
            supports_mirroring,
            orientation: AtomicU8::new(VideoOrientation::default().to_raw()),
            mirrored: AtomicBool::new(false),
        }
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn orientation(&self) -> VideoOrientation {
        VideoOrientation::from_raw(self.orientation.load(Ordering::Acquire))
    }

    pub fn set_orientation(&self, orientation: VideoOrientation) {
        self.orientation.store(orientation.to_raw(), Ordering::Release);
    }

    pub fn is_video_mirroring_supported(&self) -> bool {
        self.supports_mirroring
    }

    pub fn is_video_mirrored(&self) -> bool {
        self.mirrored.load(Ordering::Acquire)
    }

    /// Enable or disable mirroring. Returns false (and changes nothing)
    /// when the connection cannot mirror.
    pub fn set_video_mirrored(&self, mirrored: bool) -> bool {
        if !self.supports_mirroring {
            return false;
        }
        self.mirrored.store(mirrored, Ordering::Release);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_orientation_round_trips_through_atomic() {
        let conn = CaptureConnection::new(TrackKind::Video, true);
        assert_eq!(conn.orientation(), VideoOrientation::LandscapeRight);

        conn.set_orientation(VideoOrientation::Portrait);
        assert_eq!(conn.orientation(), VideoOrientation::Portrait);

        conn.set_orientation(VideoOrientation::PortraitUpsideDown);
        assert!(conn.orientation().is_portrait());
    }

    #[test]
    fn test_mirroring_requires_support() {
        let conn = CaptureConnection::new(TrackKind::Video, false);
        assert!(!conn.set_video_mirrored(true));
        assert!(!conn.is_video_mirrored());

        let conn = CaptureConnection::new(TrackKind::Video, true);
        assert!(conn.set_video_mirrored(true));
        assert!(conn.is_video_mirrored());
    }
}
