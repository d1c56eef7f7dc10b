//! Camera and microphone capture on real hardware
//!
//! Video comes from nokhwa, audio from cpal's default input device. Both run
//! on their own threads and stamp buffers against one host clock, so the
//! pipeline sees the same interleaving it would get from a capture session.

use bytes::Bytes;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use nokhwa::pixel_format::RgbAFormat;
use nokhwa::utils::{ApiBackend, CameraIndex, RequestedFormat, RequestedFormatType};
use nokhwa::Camera;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::buffer::{BufferFormat, MediaTime, PixelFormat, RawSample, TrackKind, HOST_TIMESCALE};
use super::connection::VideoOrientation;
use super::traits::{
    CameraPosition, CaptureDevice, CaptureError, DeviceInfo, DeviceInputs, ExposureMode,
    FocusMode, FrameRateRange, Resolution,
};

/// A device that delivers nothing for this long has stalled
const STALL_TIMEOUT: Duration = Duration::from_secs(2);

/// Settings for a [`NativeDevice`]
#[derive(Debug, Clone)]
pub struct NativeConfig {
    pub camera_index: u32,
    pub sample_rate: u32,
    pub channels: u16,
    /// Buffers held between the capture threads and delivery
    pub queue_depth: usize,
}

impl Default for NativeConfig {
    fn default() -> Self {
        Self {
            camera_index: 0,
            sample_rate: 44_100,
            channels: 1,
            queue_depth: 64,
        }
    }
}

type SampleResult = Result<RawSample, CaptureError>;

/// Shared host clock for both capture threads
#[derive(Clone, Copy)]
struct HostClock {
    origin: Instant,
}

impl HostClock {
    fn now(&self) -> MediaTime {
        MediaTime::new(self.origin.elapsed().as_nanos() as i64, HOST_TIMESCALE)
    }
}

/// Queue a sample, dropping it when delivery is behind
fn offer(tx: &SyncSender<SampleResult>, sample: SampleResult) -> bool {
    match tx.try_send(sample) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            tracing::trace!("Delivery queue full, dropping sample");
            true
        }
        Err(TrySendError::Disconnected(_)) => false,
    }
}

/// Default camera and microphone of this machine
pub struct NativeDevice {
    config: NativeConfig,
    info: DeviceInfo,
    frame_rate: f64,
    locked: bool,
    clock: HostClock,
    streaming: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
    samples: Option<Receiver<SampleResult>>,
}

impl NativeDevice {
    pub fn new(config: NativeConfig) -> Self {
        let info = DeviceInfo {
            id: format!("camera-{}", config.camera_index),
            name: format!("Camera {}", config.camera_index),
            position: CameraPosition::Unspecified,
            resolution: Resolution {
                width: 0,
                height: 0,
            },
        };
        Self {
            config,
            info,
            frame_rate: 30.0,
            locked: false,
            clock: HostClock {
                origin: Instant::now(),
            },
            streaming: Arc::new(AtomicBool::new(false)),
            threads: Vec::new(),
            samples: None,
        }
    }

    fn spawn_camera(&self, tx: SyncSender<SampleResult>) -> Result<JoinHandle<()>, CaptureError> {
        let index = CameraIndex::Index(self.config.camera_index);
        let streaming = Arc::clone(&self.streaming);
        let clock = self.clock;
        let frame_duration = MediaTime::from_secs_f64(1.0 / self.frame_rate, HOST_TIMESCALE);

        let handle = std::thread::Builder::new()
            .name("camera-capture".to_string())
            .spawn(move || {
                // nokhwa cameras stay on the thread that opened them
                let format = RequestedFormat::new::<RgbAFormat>(RequestedFormatType::AbsoluteHighestResolution);
                let mut camera = match Camera::new(index.clone(), format) {
                    Ok(camera) => camera,
                    Err(e) => {
                        offer(&tx, Err(CaptureError::Device(format!("camera {:?}: {}", index, e))));
                        return;
                    }
                };
                if let Err(e) = camera.open_stream() {
                    offer(&tx, Err(CaptureError::Device(format!("camera stream: {}", e))));
                    return;
                }
                let camera_format = camera.camera_format();
                tracing::info!(
                    "Camera opened: {}x{} @ {}fps ({:?})",
                    camera_format.resolution().width(),
                    camera_format.resolution().height(),
                    camera_format.frame_rate(),
                    camera_format.format()
                );

                while streaming.load(Ordering::Acquire) {
                    let frame = match camera.frame() {
                        Ok(frame) => frame,
                        Err(e) => {
                            tracing::debug!("Failed to capture frame: {}", e);
                            continue;
                        }
                    };
                    let pts = clock.now();
                    let image = match frame.decode_image::<RgbAFormat>() {
                        Ok(image) => image,
                        Err(e) => {
                            tracing::debug!("Failed to decode frame: {}", e);
                            continue;
                        }
                    };
                    let (width, height) = (image.width(), image.height());
                    let mut pixels = image.into_raw();
                    for px in pixels.chunks_exact_mut(4) {
                        px.swap(0, 2);
                    }
                    let sample = RawSample {
                        kind: TrackKind::Video,
                        pts,
                        duration: Some(frame_duration),
                        payload: Bytes::from(pixels),
                        format: BufferFormat::Video {
                            width,
                            height,
                            pixel_format: PixelFormat::Bgra32,
                            orientation: VideoOrientation::LandscapeRight,
                            mirrored: false,
                        },
                    };
                    if !offer(&tx, Ok(sample)) {
                        break;
                    }
                }

                if let Err(e) = camera.stop_stream() {
                    tracing::warn!("Error stopping camera stream: {}", e);
                }
                tracing::info!("Camera capture thread stopped");
            })?;
        Ok(handle)
    }

    fn spawn_microphone(&self, tx: SyncSender<SampleResult>) -> Result<JoinHandle<()>, CaptureError> {
        let streaming = Arc::clone(&self.streaming);
        let clock = self.clock;
        let sample_rate = self.config.sample_rate;
        let channels = self.config.channels.max(1);

        let handle = std::thread::Builder::new()
            .name("microphone-capture".to_string())
            .spawn(move || {
                let host = cpal::default_host();
                let Some(device) = host.default_input_device() else {
                    offer(&tx, Err(CaptureError::NoMicrophone));
                    return;
                };
                let sample_format = device
                    .default_input_config()
                    .map(|c| c.sample_format())
                    .unwrap_or(SampleFormat::F32);
                let stream_config = StreamConfig {
                    channels,
                    sample_rate: cpal::SampleRate(sample_rate),
                    buffer_size: cpal::BufferSize::Default,
                };

                let deliver = {
                    let tx = tx.clone();
                    move |pcm: Vec<u8>| {
                        let frames = (pcm.len() / 2 / channels as usize) as u32;
                        if frames == 0 {
                            return;
                        }
                        let duration = MediaTime::new(frames as i64, sample_rate);
                        // the callback runs once the chunk is complete
                        let pts = MediaTime::new(
                            clock.now().value - duration.to_timescale(HOST_TIMESCALE),
                            HOST_TIMESCALE,
                        );
                        offer(
                            &tx,
                            Ok(RawSample {
                                kind: TrackKind::Audio,
                                pts,
                                duration: Some(duration),
                                payload: Bytes::from(pcm),
                                format: BufferFormat::Audio {
                                    sample_rate,
                                    channels,
                                    frames,
                                },
                            }),
                        );
                    }
                };
                let on_error = |err: cpal::StreamError| tracing::error!("Microphone stream error: {}", err);

                let stream = match sample_format {
                    SampleFormat::I16 => device.build_input_stream(
                        &stream_config,
                        move |data: &[i16], _: &cpal::InputCallbackInfo| {
                            deliver(data.iter().flat_map(|s| s.to_le_bytes()).collect())
                        },
                        on_error,
                        None,
                    ),
                    _ => device.build_input_stream(
                        &stream_config,
                        move |data: &[f32], _: &cpal::InputCallbackInfo| {
                            deliver(data.iter().flat_map(|&s| f32_to_i16(s).to_le_bytes()).collect())
                        },
                        on_error,
                        None,
                    ),
                };
                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        offer(&tx, Err(CaptureError::Device(format!("microphone stream: {}", e))));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    offer(&tx, Err(CaptureError::Device(format!("microphone start: {}", e))));
                    return;
                }
                tracing::info!("Microphone stream started ({:?})", sample_format);

                // the stream lives as long as this thread
                while streaming.load(Ordering::Acquire) {
                    std::thread::sleep(Duration::from_millis(50));
                }
                tracing::info!("Microphone capture thread stopped");
            })?;
        Ok(handle)
    }
}

fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

impl CaptureDevice for NativeDevice {
    fn info(&self) -> DeviceInfo {
        self.info.clone()
    }

    fn open_inputs(&mut self) -> Result<DeviceInputs, CaptureError> {
        let cameras = nokhwa::query(ApiBackend::Auto)
            .map_err(|e| CaptureError::InputRejected(e.to_string()))?;
        let camera = cameras
            .iter()
            .find(|c| matches!(c.index(), CameraIndex::Index(i) if *i == self.config.camera_index))
            .ok_or(CaptureError::NoCamera)?;
        self.info.name = camera.human_name();

        if cpal::default_host().default_input_device().is_none() {
            return Err(CaptureError::NoMicrophone);
        }
        tracing::info!("Using camera {:?} and the default microphone", self.info.name);
        Ok(DeviceInputs {
            camera: true,
            microphone: true,
        })
    }

    fn lock_for_configuration(&mut self) -> Result<(), CaptureError> {
        if self.streaming.load(Ordering::Acquire) {
            return Err(CaptureError::ConfigurationLock("device is streaming".to_string()));
        }
        self.locked = true;
        Ok(())
    }

    fn unlock_for_configuration(&mut self) {
        self.locked = false;
    }

    fn supports_frame_rate_range(&self, range: &FrameRateRange) -> bool {
        FrameRateRange { min: 1.0, max: 60.0 }.contains(range)
    }

    fn set_frame_rate_range(&mut self, range: FrameRateRange) {
        self.frame_rate = range.max;
    }

    fn supports_focus_mode(&self, _mode: FocusMode) -> bool {
        false
    }

    fn set_focus_mode(&mut self, _mode: FocusMode) {}

    fn supports_exposure_mode(&self, _mode: ExposureMode) -> bool {
        false
    }

    fn set_exposure_mode(&mut self, _mode: ExposureMode) {}

    fn supports_low_light_boost(&self) -> bool {
        false
    }

    fn set_low_light_boost(&mut self, _enabled: bool) {}

    fn supports_video_mirroring(&self) -> bool {
        true
    }

    fn start_streaming(&mut self) -> Result<(), CaptureError> {
        let (tx, rx) = mpsc::sync_channel(self.config.queue_depth.max(1));
        self.streaming.store(true, Ordering::Release);

        let camera = match self.spawn_camera(tx.clone()) {
            Ok(handle) => handle,
            Err(e) => {
                self.streaming.store(false, Ordering::Release);
                return Err(e);
            }
        };
        self.threads.push(camera);
        if let Err(e) = self.spawn_microphone(tx) {
            self.stop_streaming();
            return Err(e);
        }
        self.samples = Some(rx);
        Ok(())
    }

    fn stop_streaming(&mut self) {
        self.streaming.store(false, Ordering::Release);
        // dropping the receiver unblocks senders
        self.samples = None;
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                tracing::error!("Capture thread panicked");
            }
        }
    }

    fn capture_next(&mut self) -> Result<Option<RawSample>, CaptureError> {
        let Some(samples) = self.samples.as_ref() else {
            return Ok(None);
        };
        match samples.recv_timeout(STALL_TIMEOUT) {
            Ok(sample) => sample.map(Some),
            Err(RecvTimeoutError::Timeout) => Err(CaptureError::Device(format!(
                "no samples for {}s",
                STALL_TIMEOUT.as_secs()
            ))),
            Err(RecvTimeoutError::Disconnected) => Ok(None),
        }
    }
}

impl Drop for NativeDevice {
    fn drop(&mut self) {
        self.stop_streaming();
    }
}
