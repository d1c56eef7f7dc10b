//! Pipeline controller
//!
//! Orchestrates the device session and the encode sink and manages the
//! recording lifecycle. Buffers are routed on the device's delivery thread;
//! the file is finalized on the writer thread.

use super::fps::{fps_label, FpsMeter};
use super::state::{
    PipelineConfig, PipelineEvent, PipelineState, RecordingSession, RecordingStats,
};
use crate::capture::{
    CaptureBuffer, CaptureDevice, CaptureError, DeviceSession, SampleBufferDelegate, TrackKind,
};
use crate::encode::{
    ContainerFormat, ContainerWriter, EncodeSink, FinishResult, Mp4Writer, SinkError,
    TrackSettings, WriterState,
};
use parking_lot::{Mutex, RwLock};
use std::path::Path;
use std::sync::{Arc, Weak};
use thiserror::Error;
use tokio::sync::broadcast;

/// Pipeline errors
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Device configuration failed: {0}")]
    Configuration(CaptureError),

    #[error("Could not start capture: {0}")]
    Capture(CaptureError),

    #[error("Could not open writer: {0}")]
    WriterOpen(String),

    #[error("Writer failed: {0}")]
    WriterFailure(String),

    #[error("Previous recording is still finishing")]
    Busy,
}

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Opens the container writer for each recording
pub type WriterFactory =
    Box<dyn Fn(&Path, ContainerFormat) -> Result<Box<dyn ContainerWriter>, SinkError> + Send + Sync>;

fn movie_writer(path: &Path, format: ContainerFormat) -> Result<Box<dyn ContainerWriter>, SinkError> {
    Ok(Box::new(Mp4Writer::create(path, format)?))
}

struct Inner {
    config: PipelineConfig,
    state: RwLock<PipelineState>,
    device: Mutex<DeviceSession>,
    writer_factory: WriterFactory,
    session: RwLock<Option<Arc<RecordingSession>>>,
    last_stats: Mutex<RecordingStats>,
    fps: Mutex<FpsMeter>,
    event_tx: broadcast::Sender<PipelineEvent>,
}

impl Inner {
    fn state(&self) -> PipelineState {
        *self.state.read()
    }

    fn emit(&self, event: PipelineEvent) {
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }

    /// Route one buffer. Runs on the delivery thread.
    fn process_buffer(&self, buffer: CaptureBuffer) {
        if self.state() != PipelineState::Recording {
            return;
        }
        let Some(session) = self.session.read().clone() else {
            return;
        };
        let sink = &session.sink;

        if sink.state() == WriterState::Failed {
            if session.claim_failure_report() {
                let reason = sink.error().unwrap_or_else(|| "unknown writer error".to_string());
                tracing::error!("Writer failed, no longer routing buffers: {}", reason);
                self.emit(PipelineEvent::Error(reason));
            }
            return;
        }

        if !sink.is_anchored() && sink.anchor_session(buffer.pts()) {
            session.snapshot_anchor(buffer.pts());
            self.emit(PipelineEvent::SessionAnchored(buffer.pts()));
        }

        if buffer.kind() == TrackKind::Video {
            let connection = buffer.connection();
            connection.set_orientation(self.config.orientation);
            if self.config.mirror_video && connection.is_video_mirroring_supported() {
                connection.set_video_mirrored(true);
            }

            let measured = self.fps.lock().tick();
            if let Some(fps) = measured {
                tracing::debug!("Capture frame rate: {:.2}", fps);
                self.emit(PipelineEvent::FrameRate {
                    fps,
                    label: fps_label(fps),
                });
            }
        }

        let appended = sink.append_if_ready(&buffer);
        if !appended {
            tracing::trace!("Dropped {} buffer at {}", buffer.kind(), buffer.pts());
        }
        session.record(buffer.kind(), appended);
    }

    /// Finish completion. Runs on the writer thread.
    fn complete(&self, result: FinishResult) {
        let session = self.session.write().take();
        if let Some(session) = &session {
            *self.last_stats.lock() = session.stats();
        }
        *self.state.write() = PipelineState::Idle;

        match (result, session) {
            (Ok(path), Some(session)) => {
                let summary = session.summary();
                tracing::info!(
                    "Recording finished: {:?} ({} video, {} audio buffers, {} dropped)",
                    path,
                    summary.stats.video_appended,
                    summary.stats.audio_appended,
                    summary.stats.dropped()
                );
                self.emit(PipelineEvent::Completed(summary));
            }
            (Ok(path), None) => {
                tracing::warn!("Finished {:?} without an active session", path);
            }
            (Err(e), session) => {
                tracing::error!("Failed to finish recording: {}", e);
                let already_reported = session
                    .map(|s| !s.claim_failure_report())
                    .unwrap_or(false);
                if !already_reported {
                    self.emit(PipelineEvent::Error(e.to_string()));
                }
            }
        }
    }
}

/// Routes device output into the sink while holding only a weak reference
struct PipelineDelegate {
    inner: Weak<Inner>,
}

impl SampleBufferDelegate for PipelineDelegate {
    fn capture_output(&self, buffer: CaptureBuffer) {
        if let Some(inner) = self.inner.upgrade() {
            inner.process_buffer(buffer);
        }
    }

    fn capture_ended(&self, error: Option<CaptureError>) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        if let Some(e) = error {
            inner.emit(PipelineEvent::Error(e.to_string()));
        }
        tracing::info!("Capture ended");
        inner.emit(PipelineEvent::CaptureEnded);
    }
}

/// Capture-to-disk pipeline
pub struct PipelineController {
    inner: Arc<Inner>,
}

impl PipelineController {
    /// Create a controller for a capture device
    pub fn new(device: Box<dyn CaptureDevice>, config: PipelineConfig) -> Self {
        Self::with_session(DeviceSession::new(device), config)
    }

    pub fn with_session(device: DeviceSession, config: PipelineConfig) -> Self {
        Self::with_writer_factory(device, config, Box::new(movie_writer))
    }

    /// Create a controller that opens its files through `writer_factory`
    pub fn with_writer_factory(
        device: DeviceSession,
        config: PipelineConfig,
        writer_factory: WriterFactory,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        let fps = FpsMeter::new(config.fps_report_interval);
        Self {
            inner: Arc::new(Inner {
                config,
                state: RwLock::new(PipelineState::Idle),
                device: Mutex::new(device),
                writer_factory,
                session: RwLock::new(None),
                last_stats: Mutex::new(RecordingStats::default()),
                fps: Mutex::new(fps),
                event_tx,
            }),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    /// Get the current pipeline state
    pub fn state(&self) -> PipelineState {
        self.inner.state()
    }

    /// Subscribe to pipeline events
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Counts for the active session, or the last finished one
    pub fn stats(&self) -> RecordingStats {
        match self.inner.session.read().as_ref() {
            Some(session) => session.stats(),
            None => *self.inner.last_stats.lock(),
        }
    }

    /// Start recording. No-op if already armed or recording.
    pub fn start(&self) -> PipelineResult<()> {
        {
            let mut state = self.inner.state.write();
            match *state {
                PipelineState::Armed | PipelineState::Recording => {
                    tracing::debug!("start ignored in state {:?}", *state);
                    return Ok(());
                }
                PipelineState::Finishing => return Err(PipelineError::Busy),
                PipelineState::Idle => *state = PipelineState::Armed,
            }
        }

        if let Err(e) = self.arm() {
            self.inner.session.write().take();
            *self.inner.state.write() = PipelineState::Idle;
            tracing::error!("Failed to start recording: {}", e);
            self.inner.emit(PipelineEvent::Error(e.to_string()));
            return Err(e);
        }
        Ok(())
    }

    fn arm(&self) -> PipelineResult<()> {
        let config = &self.inner.config;
        let mut device = self.inner.device.lock();

        if !device.is_running() {
            device
                .configure(&config.capture)
                .map_err(PipelineError::Configuration)?;
        }

        tracing::info!("Starting recording to: {:?}", config.output_path);
        let writer = (self.inner.writer_factory)(&config.output_path, config.container)
            .map_err(|e| PipelineError::WriterOpen(e.to_string()))?;
        let mut sink = EncodeSink::with_writer(&config.output_path, writer);
        sink.add_track(TrackSettings::Video(config.video.clone()))
            .map_err(|e| PipelineError::WriterOpen(e.to_string()))?;
        sink.add_track(TrackSettings::Audio(config.audio.clone()))
            .map_err(|e| PipelineError::WriterOpen(e.to_string()))?;
        if !sink.begin_writing() {
            return Err(PipelineError::WriterOpen(sink.error().unwrap_or_default()));
        }

        let session = Arc::new(RecordingSession::new(sink));
        tracing::info!("Recording session {}", session.id);
        *self.inner.session.write() = Some(session);
        self.inner.fps.lock().reset();
        *self.inner.state.write() = PipelineState::Recording;
        self.inner.emit(PipelineEvent::Started);

        let delegate: Arc<dyn SampleBufferDelegate> = Arc::new(PipelineDelegate {
            inner: Arc::downgrade(&self.inner),
        });
        device.start(delegate).map_err(PipelineError::Capture)?;

        tracing::info!("Recording started");
        Ok(())
    }

    /// Route one buffer as if the device had delivered it
    pub fn process_buffer(&self, buffer: CaptureBuffer) {
        self.inner.process_buffer(buffer);
    }

    /// Stop recording. No-op unless recording.
    ///
    /// The file is finalized asynchronously; `Completed` or `Error` is
    /// emitted once it is done.
    pub fn stop(&self) -> PipelineResult<()> {
        {
            let mut state = self.inner.state.write();
            if *state != PipelineState::Recording {
                tracing::debug!("stop ignored in state {:?}", *state);
                return Ok(());
            }
            *state = PipelineState::Finishing;
        }

        tracing::info!("Stopping recording");
        let mut device = self.inner.device.lock();

        let session = self.inner.session.read().clone();
        let Some(session) = session else {
            *self.inner.state.write() = PipelineState::Idle;
            device.stop();
            return Ok(());
        };

        let failure = (session.sink.state() == WriterState::Failed)
            .then(|| session.sink.error().unwrap_or_default());

        let weak = Arc::downgrade(&self.inner);
        session.sink.finish(move |result| {
            if let Some(inner) = weak.upgrade() {
                inner.complete(result);
            }
        });
        drop(session);

        device.stop();

        match failure {
            Some(reason) => Err(PipelineError::WriterFailure(reason)),
            None => Ok(()),
        }
    }

    /// Stop device delivery
    pub fn shutdown(&self) {
        self.inner.device.lock().stop();
    }
}

impl Drop for PipelineController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{
        BufferFormat, CaptureConnection, MediaTime, PixelFormat, RawSample, SyntheticConfig,
        SyntheticDevice, VideoOrientation,
    };
    use crate::encode::{AvcConfig, EncodedSample, VideoSettings};
    use crate::summary::AssetReader;
    use bytes::Bytes;
    use std::sync::mpsc as std_mpsc;
    use std::time::{Duration, Instant};
    use tokio::sync::broadcast::error::RecvError;
    use tokio::time::timeout;

    fn small_video() -> VideoSettings {
        VideoSettings {
            width: 96,
            height: 160,
            ..VideoSettings::default()
        }
    }

    fn config_for(dir: &Path) -> PipelineConfig {
        PipelineConfig {
            output_path: dir.join("videoFile.mov"),
            video: small_video(),
            ..PipelineConfig::default()
        }
    }

    /// Fails every sample, like a full disk
    struct FailingWriter;

    /// Holds `finalize` until the gate is released
    struct SlowFinalizeWriter {
        gate: std_mpsc::Receiver<()>,
    }

    fn track_index(settings: &TrackSettings) -> usize {
        match settings.kind() {
            TrackKind::Video => 0,
            TrackKind::Audio => 1,
        }
    }

    impl ContainerWriter for FailingWriter {
        fn add_track(&mut self, settings: &TrackSettings) -> Result<usize, SinkError> {
            Ok(track_index(settings))
        }

        fn set_avc_config(&mut self, _track: usize, _config: AvcConfig) -> Result<(), SinkError> {
            Ok(())
        }

        fn write_sample(&mut self, _track: usize, _sample: EncodedSample) -> Result<(), SinkError> {
            Err(SinkError::Failed("disk full".into()))
        }

        fn finalize(&mut self) -> Result<(), SinkError> {
            Ok(())
        }
    }

    impl ContainerWriter for SlowFinalizeWriter {
        fn add_track(&mut self, settings: &TrackSettings) -> Result<usize, SinkError> {
            Ok(track_index(settings))
        }

        fn set_avc_config(&mut self, _track: usize, _config: AvcConfig) -> Result<(), SinkError> {
            Ok(())
        }

        fn write_sample(&mut self, _track: usize, _sample: EncodedSample) -> Result<(), SinkError> {
            Ok(())
        }

        fn finalize(&mut self) -> Result<(), SinkError> {
            let _ = self.gate.recv_timeout(Duration::from_secs(10));
            Ok(())
        }
    }

    fn controller_with_writer(config: PipelineConfig, factory: WriterFactory) -> PipelineController {
        let device = DeviceSession::new(Box::new(SyntheticDevice::new(SyntheticConfig::scripted(0, 0))));
        PipelineController::with_writer_factory(device, config, factory)
    }

    fn error_count(events: &[PipelineEvent]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, PipelineEvent::Error(_)))
            .count()
    }

    async fn wait_for_idle(pipeline: &PipelineController) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while pipeline.state() != PipelineState::Idle {
            assert!(Instant::now() < deadline, "pipeline never returned to idle");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn controller(device: SyntheticConfig, config: PipelineConfig) -> PipelineController {
        PipelineController::new(Box::new(SyntheticDevice::new(device)), config)
    }

    async fn next_event<F>(rx: &mut broadcast::Receiver<PipelineEvent>, matches: F) -> PipelineEvent
    where
        F: Fn(&PipelineEvent) -> bool,
    {
        timeout(Duration::from_secs(10), async {
            loop {
                match rx.recv().await {
                    Ok(event) if matches(&event) => return event,
                    Ok(_) | Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => panic!("event channel closed"),
                }
            }
        })
        .await
        .expect("timed out waiting for pipeline event")
    }

    /// Collect every event up to and including the completion
    async fn events_until_completed(rx: &mut broadcast::Receiver<PipelineEvent>) -> Vec<PipelineEvent> {
        timeout(Duration::from_secs(10), async {
            let mut events = Vec::new();
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let done = matches!(event, PipelineEvent::Completed(_));
                        events.push(event);
                        if done {
                            return events;
                        }
                    }
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => panic!("event channel closed"),
                }
            }
        })
        .await
        .expect("timed out waiting for completion")
    }

    fn video_buffer(connection: &Arc<CaptureConnection>, ms: i64) -> CaptureBuffer {
        CaptureBuffer::new(
            RawSample {
                kind: TrackKind::Video,
                pts: MediaTime::new(ms, 1000),
                duration: None,
                payload: Bytes::from(vec![1u8; 32]),
                format: BufferFormat::Video {
                    width: 4,
                    height: 2,
                    pixel_format: PixelFormat::Bgra32,
                    orientation: VideoOrientation::LandscapeRight,
                    mirrored: false,
                },
            },
            Arc::clone(connection),
        )
    }

    #[tokio::test]
    async fn test_records_interleaved_buffers_with_single_anchor() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_for(dir.path());
        let device = SyntheticConfig {
            audio_chunk_frames: 1_470,
            ..SyntheticConfig::scripted(100, 100)
        };
        let first_pts = device.start_time;
        let pipeline = controller(device, config.clone());
        let mut rx = pipeline.subscribe();

        pipeline.start().unwrap();
        assert_eq!(pipeline.state(), PipelineState::Recording);

        let mut events = vec![next_event(&mut rx, |e| matches!(e, PipelineEvent::Started)).await];
        loop {
            let event = next_event(&mut rx, |_| true).await;
            let ended = matches!(event, PipelineEvent::CaptureEnded);
            events.push(event);
            if ended {
                break;
            }
        }

        pipeline.stop().unwrap();
        events.extend(events_until_completed(&mut rx).await);
        assert_eq!(pipeline.state(), PipelineState::Idle);

        let anchors: Vec<MediaTime> = events
            .iter()
            .filter_map(|e| match e {
                PipelineEvent::SessionAnchored(t) => Some(*t),
                _ => None,
            })
            .collect();
        assert_eq!(anchors, vec![first_pts]);
        assert!(events
            .iter()
            .any(|e| matches!(e, PipelineEvent::FrameRate { .. })));

        let Some(PipelineEvent::Completed(summary)) = events.last() else {
            panic!("expected completion last");
        };
        assert_eq!(summary.output_path, config.output_path);
        assert_eq!(summary.anchor_secs, Some(first_pts.as_secs_f64()));
        let stats = summary.stats;
        assert_eq!(stats.video_appended + stats.video_dropped, 100);
        assert_eq!(stats.audio_appended + stats.audio_dropped, 100);
        assert!(stats.video_appended > 0);

        let video = AssetReader::open(&config.output_path)
            .unwrap()
            .summarize()
            .unwrap();
        assert_eq!((video.width, video.height), (96, 160));
    }

    #[tokio::test]
    async fn test_configuration_failure_leaves_pipeline_idle() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_for(dir.path());
        let device = SyntheticConfig {
            has_camera: false,
            ..SyntheticConfig::scripted(10, 10)
        };
        let pipeline = controller(device, config.clone());

        let result = pipeline.start();
        assert!(matches!(
            result,
            Err(PipelineError::Configuration(CaptureError::NoCamera))
        ));
        assert_eq!(pipeline.state(), PipelineState::Idle);
        assert!(!config.output_path.exists());
    }

    #[tokio::test]
    async fn test_lock_failure_is_a_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let device = SyntheticConfig {
            lock_fails: true,
            ..SyntheticConfig::scripted(10, 10)
        };
        let pipeline = controller(device, config_for(dir.path()));
        assert!(matches!(
            pipeline.start(),
            Err(PipelineError::Configuration(CaptureError::ConfigurationLock(_)))
        ));
        assert_eq!(pipeline.state(), PipelineState::Idle);
    }

    #[tokio::test]
    async fn test_video_dropped_when_input_not_ready() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig {
            video: VideoSettings {
                max_pending_samples: 0,
                ..small_video()
            },
            ..config_for(dir.path())
        };
        let pipeline = controller(SyntheticConfig::scripted(5, 5), config);
        let mut rx = pipeline.subscribe();

        pipeline.start().unwrap();
        next_event(&mut rx, |e| matches!(e, PipelineEvent::CaptureEnded)).await;

        let stats = pipeline.stats();
        assert_eq!(stats.video_dropped, 5);
        assert_eq!(stats.video_appended, 0);
        assert_eq!(pipeline.state(), PipelineState::Recording);

        pipeline.stop().unwrap();
        let completed = next_event(&mut rx, |e| matches!(e, PipelineEvent::Completed(_))).await;
        let PipelineEvent::Completed(summary) = completed else {
            unreachable!()
        };
        assert_eq!(summary.stats.video_dropped, 5);
        assert_eq!(pipeline.stats().video_dropped, 5);
    }

    #[tokio::test]
    async fn test_stop_while_idle_and_start_while_recording_are_noops() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_for(dir.path());
        let device = SyntheticConfig {
            max_video_buffers: None,
            max_audio_buffers: None,
            realtime: true,
            ..SyntheticConfig::scripted(0, 0)
        };
        let pipeline = controller(device, config.clone());
        let mut rx = pipeline.subscribe();

        pipeline.stop().unwrap();
        assert_eq!(pipeline.state(), PipelineState::Idle);
        assert!(!config.output_path.exists());

        pipeline.start().unwrap();
        let anchor = next_event(&mut rx, |e| matches!(e, PipelineEvent::SessionAnchored(_))).await;
        pipeline.start().unwrap();
        assert_eq!(pipeline.state(), PipelineState::Recording);

        pipeline.stop().unwrap();
        let events = events_until_completed(&mut rx).await;
        assert!(!events.iter().any(|e| matches!(
            e,
            PipelineEvent::Started | PipelineEvent::SessionAnchored(_)
        )));
        assert!(matches!(anchor, PipelineEvent::SessionAnchored(_)));
    }

    #[tokio::test]
    async fn test_restart_sets_fresh_anchor() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_for(dir.path());
        let device = SyntheticConfig {
            max_video_buffers: None,
            max_audio_buffers: None,
            realtime: true,
            ..SyntheticConfig::scripted(0, 0)
        };
        let pipeline = controller(device, config);
        let mut rx = pipeline.subscribe();

        pipeline.start().unwrap();
        let PipelineEvent::SessionAnchored(first) =
            next_event(&mut rx, |e| matches!(e, PipelineEvent::SessionAnchored(_))).await
        else {
            unreachable!()
        };
        pipeline.stop().unwrap();
        next_event(&mut rx, |e| matches!(e, PipelineEvent::Completed(_))).await;
        assert_eq!(pipeline.state(), PipelineState::Idle);

        pipeline.start().unwrap();
        let PipelineEvent::SessionAnchored(second) =
            next_event(&mut rx, |e| matches!(e, PipelineEvent::SessionAnchored(_))).await
        else {
            unreachable!()
        };
        assert!(second > first);
        pipeline.stop().unwrap();
        next_event(&mut rx, |e| matches!(e, PipelineEvent::Completed(_))).await;
    }

    #[tokio::test]
    async fn test_first_video_buffer_fixes_orientation_for_later_frames() {
        let dir = tempfile::tempdir().unwrap();
        // no buffers from the device; drive routing by hand
        let pipeline = controller(SyntheticConfig::scripted(0, 0), config_for(dir.path()));
        let mut rx = pipeline.subscribe();
        pipeline.start().unwrap();

        let connection = Arc::new(CaptureConnection::new(TrackKind::Video, true));
        pipeline.process_buffer(video_buffer(&connection, 500));
        pipeline.process_buffer(video_buffer(&connection, 533));

        assert_eq!(connection.orientation(), VideoOrientation::Portrait);
        assert!(connection.is_video_mirrored());

        let PipelineEvent::SessionAnchored(anchor) =
            next_event(&mut rx, |e| matches!(e, PipelineEvent::SessionAnchored(_))).await
        else {
            unreachable!()
        };
        assert_eq!(anchor, MediaTime::new(500, 1000));
        assert_eq!(pipeline.stats().video_appended, 2);

        pipeline.stop().unwrap();
        next_event(&mut rx, |e| matches!(e, PipelineEvent::Completed(_))).await;
    }

    #[tokio::test]
    async fn test_buffers_ignored_while_idle() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = controller(SyntheticConfig::scripted(0, 0), config_for(dir.path()));
        let connection = Arc::new(CaptureConnection::new(TrackKind::Video, true));

        pipeline.process_buffer(video_buffer(&connection, 0));
        assert_eq!(pipeline.stats(), RecordingStats::default());
        assert_eq!(connection.orientation(), VideoOrientation::LandscapeRight);
    }

    #[tokio::test]
    async fn test_writer_failure_is_reported_once() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = controller_with_writer(
            config_for(dir.path()),
            Box::new(
                |_: &Path, _: ContainerFormat| -> Result<Box<dyn ContainerWriter>, SinkError> {
                    Ok(Box::new(FailingWriter))
                },
            ),
        );
        let mut rx = pipeline.subscribe();
        pipeline.start().unwrap();

        // keep feeding until routing notices the writer thread failed
        let connection = Arc::new(CaptureConnection::new(TrackKind::Video, true));
        let mut events = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut ms = 0;
        while error_count(&events) == 0 {
            assert!(Instant::now() < deadline, "writer failure never reported");
            pipeline.process_buffer(video_buffer(&connection, ms));
            ms += 33;
            tokio::time::sleep(Duration::from_millis(10)).await;
            while let Ok(event) = rx.try_recv() {
                events.push(event);
            }
        }

        let routed = pipeline.stats();
        for _ in 0..5 {
            pipeline.process_buffer(video_buffer(&connection, ms));
            ms += 33;
        }
        assert_eq!(pipeline.stats(), routed);
        assert_eq!(pipeline.state(), PipelineState::Recording);

        let PipelineEvent::Error(reason) = events
            .iter()
            .find(|e| matches!(e, PipelineEvent::Error(_)))
            .unwrap()
        else {
            unreachable!()
        };
        assert!(reason.contains("disk full"));

        match pipeline.stop() {
            Err(PipelineError::WriterFailure(stopped)) => assert!(stopped.contains("disk full")),
            other => panic!("expected writer failure, got {:?}", other),
        }
        wait_for_idle(&pipeline).await;

        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert_eq!(error_count(&events), 1);
        assert!(!events
            .iter()
            .any(|e| matches!(e, PipelineEvent::Completed(_))));
    }

    #[tokio::test]
    async fn test_start_while_finishing_is_busy() {
        let dir = tempfile::tempdir().unwrap();
        let (gate_tx, gate_rx) = std_mpsc::channel();
        let gate = Mutex::new(Some(gate_rx));
        let pipeline = controller_with_writer(
            config_for(dir.path()),
            Box::new(move |_: &Path, _: ContainerFormat| -> Result<Box<dyn ContainerWriter>, SinkError> {
                let gate = gate
                    .lock()
                    .take()
                    .ok_or_else(|| SinkError::Failed("writer already used".into()))?;
                Ok(Box::new(SlowFinalizeWriter { gate }))
            }),
        );
        let mut rx = pipeline.subscribe();

        pipeline.start().unwrap();
        pipeline.stop().unwrap();
        assert_eq!(pipeline.state(), PipelineState::Finishing);

        assert!(matches!(pipeline.start(), Err(PipelineError::Busy)));
        assert_eq!(pipeline.state(), PipelineState::Finishing);
        assert!(matches!(rx.try_recv(), Ok(PipelineEvent::Started)));

        gate_tx.send(()).unwrap();
        next_event(&mut rx, |e| matches!(e, PipelineEvent::Completed(_))).await;
        assert_eq!(pipeline.state(), PipelineState::Idle);
    }
}
