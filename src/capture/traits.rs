//! Capture trait definitions
//!
//! Platform-agnostic description of a capture device and the settings the
//! device session can apply to it.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::buffer::RawSample;

/// Which way the camera faces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraPosition {
    Front,
    Back,
    Unspecified,
}

/// Information about a capture device
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Unique device ID
    pub id: String,

    /// Device name
    pub name: String,

    /// Camera position
    pub position: CameraPosition,

    /// Native sensor resolution (landscape)
    pub resolution: Resolution,
}

/// Video resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

/// Inclusive frame rate bounds in frames per second
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameRateRange {
    pub min: f64,
    pub max: f64,
}

impl FrameRateRange {
    pub fn fixed(fps: f64) -> Self {
        Self { min: fps, max: fps }
    }

    pub fn contains(&self, other: &FrameRateRange) -> bool {
        other.min >= self.min && other.max <= self.max && other.min <= other.max
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FocusMode {
    Locked,
    AutoFocus,
    ContinuousAutoFocus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExposureMode {
    Locked,
    AutoExpose,
    ContinuousAutoExposure,
}

/// Which inputs were acquired from the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceInputs {
    pub camera: bool,
    pub microphone: bool,
}

/// Capture errors
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("No camera available")]
    NoCamera,

    #[error("No microphone available")]
    NoMicrophone,

    #[error("Failed to add device input: {0}")]
    InputRejected(String),

    #[error("Could not lock device for configuration: {0}")]
    ConfigurationLock(String),

    #[error("Device is delivering buffers")]
    Busy,

    #[error("Device failure: {0}")]
    Device(String),

    #[error("Failed to spawn delivery thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// A physical (or simulated) camera + microphone pair.
///
/// Implementations answer capability queries and produce raw samples. The
/// device session owns the device and calls it from one thread at a time.
pub trait CaptureDevice: Send {
    fn info(&self) -> DeviceInfo;

    /// Acquire camera and microphone inputs
    fn open_inputs(&mut self) -> Result<DeviceInputs, CaptureError>;

    fn lock_for_configuration(&mut self) -> Result<(), CaptureError>;

    fn unlock_for_configuration(&mut self);

    fn supports_frame_rate_range(&self, range: &FrameRateRange) -> bool;

    fn set_frame_rate_range(&mut self, range: FrameRateRange);

    fn supports_focus_mode(&self, mode: FocusMode) -> bool;

    fn set_focus_mode(&mut self, mode: FocusMode);

    fn supports_exposure_mode(&self, mode: ExposureMode) -> bool;

    fn set_exposure_mode(&mut self, mode: ExposureMode);

    fn supports_low_light_boost(&self) -> bool;

    fn set_low_light_boost(&mut self, enabled: bool);

    /// Whether the video connection can mirror frames
    fn supports_video_mirroring(&self) -> bool;

    /// Called right before delivery starts
    fn start_streaming(&mut self) -> Result<(), CaptureError> {
        Ok(())
    }

    /// Called on the delivery thread once delivery has stopped
    fn stop_streaming(&mut self) {}

    /// Block until the next sample is available.
    ///
    /// `Ok(None)` means the device has stopped producing.
    fn capture_next(&mut self) -> Result<Option<RawSample>, CaptureError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_rate_range_contains() {
        let supported = FrameRateRange { min: 1.0, max: 60.0 };
        assert!(supported.contains(&FrameRateRange::fixed(30.0)));
        assert!(!supported.contains(&FrameRateRange::fixed(120.0)));
        assert!(!supported.contains(&FrameRateRange { min: 40.0, max: 30.0 }));
    }

    #[test]
    fn test_capture_error_messages() {
        assert_eq!(CaptureError::NoCamera.to_string(), "No camera available");
        assert_eq!(
            CaptureError::ConfigurationLock("in use".into()).to_string(),
            "Could not lock device for configuration: in use"
        );
    }
}
