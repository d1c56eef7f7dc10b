//! Capture devices and buffer delivery
//!
//! This module provides the device abstraction, the device session that
//! delivers buffers on a dedicated thread, a synthetic device and, with the
//! `native` feature, a device backed by the machine's camera and microphone.

pub mod buffer;
pub mod connection;
pub mod frame;
#[cfg(feature = "native")]
pub mod native;
pub mod session;
pub mod synthetic;
pub mod traits;

pub use buffer::{BufferFormat, CaptureBuffer, MediaTime, PixelFormat, RawSample, TrackKind};
pub use connection::{CaptureConnection, VideoOrientation};
#[cfg(feature = "native")]
pub use native::{NativeConfig, NativeDevice};
pub use session::{CaptureConfig, ConfigurationReport, DeviceSession, SampleBufferDelegate};
pub use synthetic::{SyntheticConfig, SyntheticDevice};
pub use traits::{
    CameraPosition, CaptureDevice, CaptureError, DeviceInfo, DeviceInputs, ExposureMode,
    FocusMode, FrameRateRange, Resolution,
};
