//! Video encoding stage
//!
//! Captured BGRA frames are fitted into the output dimensions (letterboxed,
//! aspect preserved), converted to I420 and compressed with OpenH264 at the
//! configured average bitrate.

use bytes::Bytes;
use openh264::encoder::{BitRate, Encoder, EncoderConfig, FrameRate, RateControlMode};
use openh264::formats::YUVSource;
use openh264::OpenH264API;

use super::nal::{self, AvcConfig};
use super::types::{SinkError, VideoSettings};
use crate::capture::{BufferFormat, PixelFormat};

/// Planar 4:2:0 frame with even dimensions
#[derive(Debug, Clone)]
pub struct I420Frame {
    width: usize,
    height: usize,
    y: Vec<u8>,
    u: Vec<u8>,
    v: Vec<u8>,
}

const BLACK_Y: u8 = 16;
const BLACK_C: u8 = 128;

/// BT.601 limited range
fn rgb_to_yuv(r: i32, g: i32, b: i32) -> (u8, u8, u8) {
    let y = ((66 * r + 129 * g + 25 * b + 128) >> 8) + 16;
    let u = ((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128;
    let v = ((112 * r - 94 * g - 18 * b + 128) >> 8) + 128;
    (y.clamp(0, 255) as u8, u.clamp(0, 255) as u8, v.clamp(0, 255) as u8)
}

impl I420Frame {
    /// Black frame of the given size (rounded down to even)
    pub fn black(width: usize, height: usize) -> Self {
        let width = width & !1;
        let height = height & !1;
        let chroma = (width / 2) * (height / 2);
        Self {
            width,
            height,
            y: vec![BLACK_Y; width * height],
            u: vec![BLACK_C; chroma],
            v: vec![BLACK_C; chroma],
        }
    }

    /// Scale a tightly packed BGRA image into a `width`x`height` frame,
    /// preserving its aspect ratio and centering it on black.
    pub fn fit_bgra(src: &[u8], src_width: usize, src_height: usize, width: usize, height: usize) -> Self {
        let mut frame = Self::black(width, height);
        if src_width == 0 || src_height == 0 || src.len() < src_width * src_height * 4 {
            return frame;
        }
        let (width, height) = (frame.width, frame.height);

        let scale = (width as f64 / src_width as f64).min(height as f64 / src_height as f64);
        let content_w = (((src_width as f64 * scale).round() as usize).min(width)) & !1;
        let content_h = (((src_height as f64 * scale).round() as usize).min(height)) & !1;
        if content_w == 0 || content_h == 0 {
            return frame;
        }
        let left = ((width - content_w) / 2) & !1;
        let top = ((height - content_h) / 2) & !1;

        let sample = |x: usize, y: usize| -> (i32, i32, i32) {
            let sx = (x * src_width / content_w).min(src_width - 1);
            let sy = (y * src_height / content_h).min(src_height - 1);
            let p = (sy * src_width + sx) * 4;
            (src[p + 2] as i32, src[p + 1] as i32, src[p] as i32)
        };

        for y in 0..content_h {
            let row = (top + y) * width + left;
            for x in 0..content_w {
                let (r, g, b) = sample(x, y);
                frame.y[row + x] = rgb_to_yuv(r, g, b).0;
            }
        }

        let chroma_width = width / 2;
        for cy in 0..content_h / 2 {
            let row = (top / 2 + cy) * chroma_width + left / 2;
            for cx in 0..content_w / 2 {
                let (r, g, b) = sample(cx * 2, cy * 2);
                let (_, u, v) = rgb_to_yuv(r, g, b);
                frame.u[row + cx] = u;
                frame.v[row + cx] = v;
            }
        }
        frame
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn luma(&self) -> &[u8] {
        &self.y
    }
}

impl YUVSource for I420Frame {
    fn dimensions(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    fn strides(&self) -> (usize, usize, usize) {
        (self.width, self.width / 2, self.width / 2)
    }

    fn y(&self) -> &[u8] {
        &self.y
    }

    fn u(&self) -> &[u8] {
        &self.u
    }

    fn v(&self) -> &[u8] {
        &self.v
    }
}

/// One compressed access unit, length-prefixed
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub data: Bytes,
    pub keyframe: bool,
    /// Set when the stream's parameter sets are new or changed
    pub config: Option<AvcConfig>,
}

/// H.264 encoder for one video track.
///
/// Not `Send`; it lives on the writer thread.
pub struct H264Encoder {
    encoder: Encoder,
    width: usize,
    height: usize,
    keyframe_interval: u64,
    frames: u64,
    config: Option<AvcConfig>,
}

impl H264Encoder {
    pub fn new(settings: &VideoSettings) -> Result<Self, SinkError> {
        let config = EncoderConfig::new()
            .bitrate(BitRate::from_bps(settings.average_bitrate))
            .max_frame_rate(FrameRate::from_hz(settings.expected_frame_rate as f32))
            .rate_control_mode(RateControlMode::Bitrate);
        let encoder = Encoder::with_api_config(OpenH264API::from_source(), config)
            .map_err(|e| SinkError::Encoder(e.to_string()))?;

        tracing::debug!(
            width = settings.width,
            height = settings.height,
            bitrate = settings.average_bitrate,
            "H.264 encoder ready"
        );
        Ok(Self {
            encoder,
            width: settings.width as usize,
            height: settings.height as usize,
            keyframe_interval: settings.keyframe_interval.max(1) as u64,
            frames: 0,
            config: None,
        })
    }

    /// Encode one captured frame.
    ///
    /// Returns `None` when the frame cannot be converted or rate control
    /// skipped it.
    pub fn encode(&mut self, payload: &[u8], format: &BufferFormat) -> Result<Option<EncodedFrame>, SinkError> {
        let BufferFormat::Video {
            width,
            height,
            pixel_format: PixelFormat::Bgra32,
            ..
        } = *format
        else {
            tracing::warn!("Ignoring non-video buffer on the video track");
            return Ok(None);
        };
        let (src_width, src_height) = (width as usize, height as usize);
        if src_width == 0 || src_height == 0 || payload.len() != src_width * src_height * 4 {
            tracing::warn!(
                "Ignoring {}x{} frame with {} bytes",
                src_width,
                src_height,
                payload.len()
            );
            return Ok(None);
        }

        let frame = I420Frame::fit_bgra(payload, src_width, src_height, self.width, self.height);
        if self.frames % self.keyframe_interval == 0 {
            self.encoder.force_intra_frame();
        }
        self.frames += 1;

        let annexb = self
            .encoder
            .encode(&frame)
            .map_err(|e| SinkError::Encoder(e.to_string()))?
            .to_vec();
        if annexb.is_empty() {
            tracing::trace!("Encoder skipped frame {}", self.frames);
            return Ok(None);
        }

        let config = match nal::extract_avc_config(&annexb) {
            Some(config) if self.config.as_ref() != Some(&config) => {
                self.config = Some(config.clone());
                Some(config)
            }
            _ => None,
        };
        let keyframe = nal::is_keyframe(&annexb);
        let data = nal::annexb_to_avcc(&annexb);
        if data.is_empty() {
            return Ok(None);
        }

        Ok(Some(EncodedFrame {
            data: Bytes::from(data),
            keyframe,
            config,
        }))
    }
}
