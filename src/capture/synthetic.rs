//! Synthetic capture device
//!
//! Produces a moving BGRA test pattern and a sine tone on a shared host
//! clock. Used by the CLI and the test suite in place of real hardware.

use bytes::Bytes;
use std::f64::consts::PI;
use std::time::{Duration, Instant};

use super::buffer::{BufferFormat, MediaTime, PixelFormat, RawSample, TrackKind, HOST_TIMESCALE};
use super::connection::VideoOrientation;
use super::traits::{
    CameraPosition, CaptureDevice, CaptureError, DeviceInfo, DeviceInputs, ExposureMode,
    FocusMode, FrameRateRange, Resolution,
};

/// Settings for a [`SyntheticDevice`]
#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    /// Native (landscape) frame size
    pub resolution: Resolution,
    pub position: CameraPosition,
    pub frame_rate: f64,
    pub sample_rate: u32,
    pub channels: u16,
    /// PCM frames per audio buffer
    pub audio_chunk_frames: u32,
    /// Host time of the first buffer
    pub start_time: MediaTime,
    /// Stop after this many video buffers
    pub max_video_buffers: Option<u64>,
    /// Stop after this many audio buffers
    pub max_audio_buffers: Option<u64>,
    /// Sleep so buffers are produced at wall-clock pace
    pub realtime: bool,
    /// Skip video frames that are more than one frame interval late
    pub discard_late_video_frames: bool,
    pub has_camera: bool,
    pub has_microphone: bool,
    pub lock_fails: bool,
    pub supported_frame_rates: FrameRateRange,
    pub focus_modes: Vec<FocusMode>,
    pub exposure_modes: Vec<ExposureMode>,
    pub low_light_boost: bool,
    pub mirroring: bool,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            resolution: Resolution {
                width: 1280,
                height: 720,
            },
            position: CameraPosition::Front,
            frame_rate: 30.0,
            sample_rate: 44_100,
            channels: 1,
            audio_chunk_frames: 1_024,
            start_time: MediaTime::new(1_000 * HOST_TIMESCALE as i64, HOST_TIMESCALE),
            max_video_buffers: None,
            max_audio_buffers: None,
            realtime: true,
            discard_late_video_frames: true,
            has_camera: true,
            has_microphone: true,
            lock_fails: false,
            supported_frame_rates: FrameRateRange { min: 1.0, max: 60.0 },
            focus_modes: vec![
                FocusMode::Locked,
                FocusMode::AutoFocus,
                FocusMode::ContinuousAutoFocus,
            ],
            exposure_modes: vec![ExposureMode::Locked, ExposureMode::ContinuousAutoExposure],
            low_light_boost: false,
            mirroring: true,
        }
    }
}

impl SyntheticConfig {
    /// Small frames, no pacing, fixed buffer counts
    pub fn scripted(video_buffers: u64, audio_buffers: u64) -> Self {
        Self {
            resolution: Resolution {
                width: 16,
                height: 8,
            },
            max_video_buffers: Some(video_buffers),
            max_audio_buffers: Some(audio_buffers),
            realtime: false,
            ..Self::default()
        }
    }
}

/// Test-pattern camera and tone-generating microphone
pub struct SyntheticDevice {
    config: SyntheticConfig,
    frame_rate: f64,
    focus_mode: Option<FocusMode>,
    exposure_mode: Option<ExposureMode>,
    low_light_boost: bool,
    locked: bool,
    video_index: u64,
    audio_index: u64,
    clock_origin: Option<Instant>,
}

impl SyntheticDevice {
    pub fn new(config: SyntheticConfig) -> Self {
        let frame_rate = config.frame_rate;
        Self {
            config,
            frame_rate,
            focus_mode: None,
            exposure_mode: None,
            low_light_boost: false,
            locked: false,
            video_index: 0,
            audio_index: 0,
            clock_origin: None,
        }
    }

    pub fn frame_rate(&self) -> f64 {
        self.frame_rate
    }

    pub fn focus_mode(&self) -> Option<FocusMode> {
        self.focus_mode
    }

    pub fn exposure_mode(&self) -> Option<ExposureMode> {
        self.exposure_mode
    }

    pub fn low_light_boost(&self) -> bool {
        self.low_light_boost
    }

    fn video_offset(&self, index: u64) -> f64 {
        index as f64 / self.frame_rate
    }

    fn audio_offset(&self, index: u64) -> f64 {
        index as f64 * self.config.audio_chunk_frames as f64 / self.config.sample_rate as f64
    }

    fn video_remaining(&self) -> bool {
        self.config.has_camera
            && self
                .config
                .max_video_buffers
                .map_or(true, |max| self.video_index < max)
    }

    fn audio_remaining(&self) -> bool {
        self.config.has_microphone
            && self
                .config
                .max_audio_buffers
                .map_or(true, |max| self.audio_index < max)
    }

    fn host_time(&self, offset_secs: f64) -> MediaTime {
        let start = self.config.start_time.to_timescale(HOST_TIMESCALE);
        MediaTime::new(
            start + (offset_secs * HOST_TIMESCALE as f64).round() as i64,
            HOST_TIMESCALE,
        )
    }

    /// Move the next indices up to the current wall-clock offset.
    ///
    /// A stopped device produces nothing, so after a restart delivery resumes
    /// at "now" instead of catching up on the gap.
    fn resync_clock(&mut self) {
        let Some(origin) = self.clock_origin else {
            return;
        };
        let elapsed = origin.elapsed().as_secs_f64();
        let video_next = (elapsed * self.frame_rate).ceil() as u64;
        let chunk_secs = self.config.audio_chunk_frames.max(1) as f64 / self.config.sample_rate.max(1) as f64;
        let audio_next = (elapsed / chunk_secs).ceil() as u64;

        if video_next > self.video_index || audio_next > self.audio_index {
            tracing::debug!(
                skipped_video = video_next.saturating_sub(self.video_index),
                skipped_audio = audio_next.saturating_sub(self.audio_index),
                "Resuming synthetic clock"
            );
        }
        self.video_index = self.video_index.max(video_next);
        self.audio_index = self.audio_index.max(audio_next);
    }

    /// Wait until `offset_secs` on the device clock. Returns how late we are.
    fn pace(&mut self, offset_secs: f64) -> Duration {
        let origin = *self.clock_origin.get_or_insert_with(Instant::now);
        let due = origin + Duration::from_secs_f64(offset_secs);
        let now = Instant::now();
        if due > now {
            std::thread::sleep(due - now);
            Duration::ZERO
        } else {
            now - due
        }
    }

    fn video_sample(&self, index: u64) -> RawSample {
        let Resolution { width, height } = self.config.resolution;
        let mut pixels = vec![0u8; width as usize * height as usize * 4];
        let bar = (index % width.max(1) as u64) as usize;

        for (i, px) in pixels.chunks_exact_mut(4).enumerate() {
            let x = i % width as usize;
            let y = i / width as usize;
            let lit = x == bar;
            px[0] = if lit { 255 } else { (x * 255 / width.max(1) as usize) as u8 };
            px[1] = (y * 255 / height.max(1) as usize) as u8;
            px[2] = (index % 256) as u8;
            px[3] = 255;
        }

        RawSample {
            kind: TrackKind::Video,
            pts: self.host_time(self.video_offset(index)),
            duration: Some(MediaTime::from_secs_f64(1.0 / self.frame_rate, HOST_TIMESCALE)),
            payload: Bytes::from(pixels),
            format: BufferFormat::Video {
                width,
                height,
                pixel_format: PixelFormat::Bgra32,
                orientation: VideoOrientation::LandscapeRight,
                mirrored: false,
            },
        }
    }

    fn audio_sample(&self, index: u64) -> RawSample {
        let frames = self.config.audio_chunk_frames;
        let channels = self.config.channels.max(1);
        let rate = self.config.sample_rate as f64;
        let first = index * frames as u64;

        let mut pcm = Vec::with_capacity(frames as usize * channels as usize * 2);
        for n in 0..frames as u64 {
            let t = (first + n) as f64 / rate;
            let value = ((2.0 * PI * 440.0 * t).sin() * i16::MAX as f64 * 0.25) as i16;
            for _ in 0..channels {
                pcm.extend_from_slice(&value.to_le_bytes());
            }
        }

        RawSample {
            kind: TrackKind::Audio,
            pts: self.host_time(self.audio_offset(index)),
            duration: Some(MediaTime::new(frames as i64, self.config.sample_rate)),
            payload: Bytes::from(pcm),
            format: BufferFormat::Audio {
                sample_rate: self.config.sample_rate,
                channels,
                frames,
            },
        }
    }
}

impl CaptureDevice for SyntheticDevice {
    fn info(&self) -> DeviceInfo {
        DeviceInfo {
            id: "synthetic-0".to_string(),
            name: "Synthetic Camera".to_string(),
            position: self.config.position,
            resolution: self.config.resolution,
        }
    }

    fn open_inputs(&mut self) -> Result<DeviceInputs, CaptureError> {
        if !self.config.has_camera {
            return Err(CaptureError::NoCamera);
        }
        if !self.config.has_microphone {
            return Err(CaptureError::NoMicrophone);
        }
        Ok(DeviceInputs {
            camera: true,
            microphone: true,
        })
    }

    fn lock_for_configuration(&mut self) -> Result<(), CaptureError> {
        if self.config.lock_fails {
            return Err(CaptureError::ConfigurationLock(
                "device is in use by another client".to_string(),
            ));
        }
        self.locked = true;
        Ok(())
    }

    fn unlock_for_configuration(&mut self) {
        self.locked = false;
    }

    fn supports_frame_rate_range(&self, range: &FrameRateRange) -> bool {
        self.config.supported_frame_rates.contains(range)
    }

    fn set_frame_rate_range(&mut self, range: FrameRateRange) {
        debug_assert!(self.locked, "configuration requires the device lock");
        self.frame_rate = range.max;
    }

    fn supports_focus_mode(&self, mode: FocusMode) -> bool {
        self.config.focus_modes.contains(&mode)
    }

    fn set_focus_mode(&mut self, mode: FocusMode) {
        self.focus_mode = Some(mode);
    }

    fn supports_exposure_mode(&self, mode: ExposureMode) -> bool {
        self.config.exposure_modes.contains(&mode)
    }

    fn set_exposure_mode(&mut self, mode: ExposureMode) {
        self.exposure_mode = Some(mode);
    }

    fn supports_low_light_boost(&self) -> bool {
        self.config.low_light_boost
    }

    fn set_low_light_boost(&mut self, enabled: bool) {
        self.low_light_boost = enabled;
    }

    fn supports_video_mirroring(&self) -> bool {
        self.config.mirroring
    }

    fn start_streaming(&mut self) -> Result<(), CaptureError> {
        if self.config.realtime {
            self.resync_clock();
        }
        Ok(())
    }

    fn capture_next(&mut self) -> Result<Option<RawSample>, CaptureError> {
        loop {
            let video = self
                .video_remaining()
                .then(|| self.video_offset(self.video_index));
            let audio = self
                .audio_remaining()
                .then(|| self.audio_offset(self.audio_index));

            let (kind, offset) = match (video, audio) {
                (None, None) => return Ok(None),
                (Some(v), None) => (TrackKind::Video, v),
                (None, Some(a)) => (TrackKind::Audio, a),
                (Some(v), Some(a)) if v <= a => (TrackKind::Video, v),
                (Some(_), Some(a)) => (TrackKind::Audio, a),
            };

            let lateness = if self.config.realtime {
                self.pace(offset)
            } else {
                Duration::ZERO
            };

            match kind {
                TrackKind::Video => {
                    let index = self.video_index;
                    self.video_index += 1;
                    let interval = Duration::from_secs_f64(1.0 / self.frame_rate);
                    if self.config.discard_late_video_frames && lateness > interval {
                        tracing::trace!(index, ?lateness, "Discarding late video frame");
                        continue;
                    }
                    return Ok(Some(self.video_sample(index)));
                }
                TrackKind::Audio => {
                    let index = self.audio_index;
                    self.audio_index += 1;
                    return Ok(Some(self.audio_sample(index)));
                }
            }
        }
    }
}
