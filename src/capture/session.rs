//! Device session
//!
//! Owns a capture device, applies best-effort configuration and runs the
//! delivery thread that hands buffers to a [`SampleBufferDelegate`].

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use super::buffer::{BufferFormat, CaptureBuffer, RawSample, TrackKind};
use super::connection::CaptureConnection;
use super::frame;
use super::traits::{CaptureDevice, CaptureError, DeviceInfo, ExposureMode, FocusMode, FrameRateRange};

/// Receives buffers on the delivery thread
pub trait SampleBufferDelegate: Send + Sync {
    /// Called for every buffer, in order per track
    fn capture_output(&self, buffer: CaptureBuffer);

    /// Called once when the device stops producing on its own
    fn capture_ended(&self, error: Option<CaptureError>) {
        let _ = error;
    }
}

/// Settings applied by [`DeviceSession::configure`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CaptureConfig {
    pub frame_rate: FrameRateRange,
    pub focus_mode: Option<FocusMode>,
    pub exposure_mode: Option<ExposureMode>,
    pub low_light_boost: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            frame_rate: FrameRateRange::fixed(30.0),
            focus_mode: Some(FocusMode::ContinuousAutoFocus),
            exposure_mode: Some(ExposureMode::ContinuousAutoExposure),
            low_light_boost: true,
        }
    }
}

/// Which settings were applied and which were skipped as unsupported
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigurationReport {
    pub applied: Vec<&'static str>,
    pub skipped: Vec<&'static str>,
}

impl ConfigurationReport {
    fn record(&mut self, setting: &'static str, supported: bool) {
        if supported {
            tracing::debug!("Applied capture setting: {}", setting);
            self.applied.push(setting);
        } else {
            tracing::warn!("Capture setting not supported by device, skipping: {}", setting);
            self.skipped.push(setting);
        }
    }
}

struct Delivery {
    running: Arc<AtomicBool>,
    handle: JoinHandle<Box<dyn CaptureDevice>>,
}

/// Owns a device and its delivery thread
pub struct DeviceSession {
    info: DeviceInfo,
    device: Option<Box<dyn CaptureDevice>>,
    delivery: Option<Delivery>,
    video_connection: Arc<CaptureConnection>,
    audio_connection: Arc<CaptureConnection>,
    configured: bool,
}

impl DeviceSession {
    pub fn new(device: Box<dyn CaptureDevice>) -> Self {
        let info = device.info();
        let video_connection = Arc::new(CaptureConnection::new(
            TrackKind::Video,
            device.supports_video_mirroring(),
        ));
        let audio_connection = Arc::new(CaptureConnection::new(TrackKind::Audio, false));

        Self {
            info,
            device: Some(device),
            delivery: None,
            video_connection,
            audio_connection,
            configured: false,
        }
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn video_connection(&self) -> &Arc<CaptureConnection> {
        &self.video_connection
    }

    pub fn is_configured(&self) -> bool {
        self.configured
    }

    /// Whether the delivery thread is alive
    pub fn is_running(&self) -> bool {
        self.delivery
            .as_ref()
            .map(|d| !d.handle.is_finished())
            .unwrap_or(false)
    }

    /// Acquire inputs and apply each setting the device supports.
    ///
    /// Input or lock failures are fatal; unsupported settings are skipped.
    pub fn configure(&mut self, config: &CaptureConfig) -> Result<ConfigurationReport, CaptureError> {
        self.reclaim_finished();
        let device = self.device.as_mut().ok_or(CaptureError::Busy)?;

        let inputs = device.open_inputs()?;
        if !inputs.camera {
            return Err(CaptureError::NoCamera);
        }
        if !inputs.microphone {
            return Err(CaptureError::NoMicrophone);
        }

        device.lock_for_configuration()?;
        let mut report = ConfigurationReport::default();

        let fps_supported = device.supports_frame_rate_range(&config.frame_rate);
        if fps_supported {
            device.set_frame_rate_range(config.frame_rate);
        }
        report.record("frameRate", fps_supported);

        if let Some(mode) = config.focus_mode {
            let supported = device.supports_focus_mode(mode);
            if supported {
                device.set_focus_mode(mode);
            }
            report.record("focusMode", supported);
        }

        if let Some(mode) = config.exposure_mode {
            let supported = device.supports_exposure_mode(mode);
            if supported {
                device.set_exposure_mode(mode);
            }
            report.record("exposureMode", supported);
        }

        if config.low_light_boost {
            let supported = device.supports_low_light_boost();
            if supported {
                device.set_low_light_boost(true);
            }
            report.record("lowLightBoost", supported);
        }

        device.unlock_for_configuration();
        self.configured = true;

        tracing::info!(
            "Configured {} ({} applied, {} skipped)",
            self.info.name,
            report.applied.len(),
            report.skipped.len()
        );
        Ok(report)
    }

    /// Start continuous delivery. No-op if already delivering.
    pub fn start(&mut self, delegate: Arc<dyn SampleBufferDelegate>) -> Result<(), CaptureError> {
        self.reclaim_finished();
        if self.delivery.is_some() {
            return Ok(());
        }
        let mut device = self.device.take().ok_or(CaptureError::Busy)?;
        if let Err(e) = device.start_streaming() {
            self.device = Some(device);
            return Err(e);
        }

        let running = Arc::new(AtomicBool::new(true));
        let thread_running = Arc::clone(&running);
        let video_connection = Arc::clone(&self.video_connection);
        let audio_connection = Arc::clone(&self.audio_connection);

        let spawned = std::thread::Builder::new()
            .name("capture-delivery".to_string())
            .spawn(move || {
                let mut ended_with = None;
                let mut ended_on_its_own = false;

                while thread_running.load(Ordering::Acquire) {
                    match device.capture_next() {
                        Ok(Some(sample)) => {
                            let buffer = match sample.kind {
                                TrackKind::Video => {
                                    wrap_video(sample, &video_connection)
                                }
                                TrackKind::Audio => {
                                    CaptureBuffer::new(sample, Arc::clone(&audio_connection))
                                }
                            };
                            delegate.capture_output(buffer);
                        }
                        Ok(None) => {
                            ended_on_its_own = true;
                            break;
                        }
                        Err(e) => {
                            tracing::error!("Capture device failed: {}", e);
                            ended_with = Some(e);
                            ended_on_its_own = true;
                            break;
                        }
                    }
                }

                device.stop_streaming();
                if ended_on_its_own {
                    delegate.capture_ended(ended_with);
                }
                device
            });

        match spawned {
            Ok(handle) => {
                self.delivery = Some(Delivery { running, handle });
                tracing::info!("Capture delivery started");
                Ok(())
            }
            Err(e) => Err(CaptureError::Spawn(e)),
        }
    }

    /// Stop delivery and take the device back. Idempotent.
    pub fn stop(&mut self) {
        let Some(delivery) = self.delivery.take() else {
            return;
        };
        delivery.running.store(false, Ordering::Release);
        match delivery.handle.join() {
            Ok(device) => self.device = Some(device),
            Err(_) => tracing::error!("Capture delivery thread panicked; device lost"),
        }
        tracing::info!("Capture delivery stopped");
    }

    fn reclaim_finished(&mut self) {
        if self
            .delivery
            .as_ref()
            .map(|d| d.handle.is_finished())
            .unwrap_or(false)
        {
            self.stop();
        }
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Apply the connection's orientation and mirroring to a raw video sample
fn wrap_video(sample: RawSample, connection: &Arc<CaptureConnection>) -> CaptureBuffer {
    let orientation = connection.orientation();
    let mirrored = connection.is_video_mirrored();

    let sample = match sample.format {
        BufferFormat::Video {
            width,
            height,
            pixel_format,
            ..
        } => {
            let (payload, w, h) = frame::reorient(
                &sample.payload,
                width,
                height,
                orientation.quarter_turns_from_sensor(),
                mirrored,
            );
            RawSample {
                payload,
                format: BufferFormat::Video {
                    width: w,
                    height: h,
                    pixel_format,
                    orientation,
                    mirrored,
                },
                ..sample
            }
        }
        BufferFormat::Audio { .. } => sample,
    };

    CaptureBuffer::new(sample, Arc::clone(connection))
}
