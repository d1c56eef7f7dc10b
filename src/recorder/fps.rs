//! Capture frame-rate measurement

use std::time::Instant;

/// Measures the video frame rate over fixed-size windows of frames
#[derive(Debug)]
pub struct FpsMeter {
    interval: u32,
    frames: u32,
    window_start: Option<Instant>,
}

impl FpsMeter {
    /// Report once every `interval` frames (at least 1)
    pub fn new(interval: u32) -> Self {
        Self {
            interval: interval.max(1),
            frames: 0,
            window_start: None,
        }
    }

    pub fn tick(&mut self) -> Option<f64> {
        self.tick_at(Instant::now())
    }

    /// Count one frame arriving at `now`. Returns the measured rate when a
    /// window closes.
    pub fn tick_at(&mut self, now: Instant) -> Option<f64> {
        let Some(start) = self.window_start else {
            self.window_start = Some(now);
            return None;
        };
        self.frames += 1;
        if self.frames < self.interval {
            return None;
        }

        let elapsed = now.saturating_duration_since(start).as_secs_f64();
        self.frames = 0;
        self.window_start = Some(now);
        (elapsed > 0.0).then(|| self.interval as f64 / elapsed)
    }

    pub fn reset(&mut self) {
        self.frames = 0;
        self.window_start = None;
    }
}

/// Text shown next to the preview
pub fn fps_label(fps: f64) -> String {
    format!("{:.2} fps", fps)
}
