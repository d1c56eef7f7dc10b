//! Encode sink
//!
//! Wraps a container writer with the writer state machine, the session
//! anchor and one backpressured input per track. Samples are encoded and
//! written on a writer-owned background thread.

use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{mpsc as std_mpsc, Arc};
use tokio::sync::mpsc;

use super::mp4::Mp4Writer;
use super::types::{
    ContainerFormat, ContainerWriter, EncodedSample, FinishResult, SinkError, TrackSettings,
    WriterState,
};
use super::video::H264Encoder;
use crate::capture::{BufferFormat, CaptureBuffer, MediaTime, TrackKind};

type Completion = Box<dyn FnOnce(FinishResult) + Send + 'static>;

enum WriterCommand {
    Append {
        /// Position of the track input in `Shared::inputs`
        slot: usize,
        pts: MediaTime,
        duration: Option<u64>,
        data: bytes::Bytes,
        format: BufferFormat,
    },
    Finish(Completion),
    Cancel,
}

/// Writer input for one track.
///
/// Readiness is derived from how many samples the writer thread has not yet
/// written; it changes asynchronously and must be read right before use.
#[derive(Debug)]
pub struct TrackInput {
    kind: TrackKind,
    index: usize,
    timescale: u32,
    capacity: usize,
    pending: AtomicUsize,
    finished: AtomicBool,
}

impl TrackInput {
    fn new(index: usize, settings: &TrackSettings) -> Self {
        Self {
            kind: settings.kind(),
            index,
            timescale: settings.timescale(),
            capacity: settings.max_pending_samples(),
            pending: AtomicUsize::new(0),
            finished: AtomicBool::new(false),
        }
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn is_ready_for_more_media_data(&self) -> bool {
        !self.finished.load(Ordering::Acquire) && self.pending.load(Ordering::Acquire) < self.capacity
    }

    pub fn pending_samples(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    pub fn mark_as_finished(&self) {
        self.finished.store(true, Ordering::Release);
    }

    /// Atomically claim a pending slot if the input is ready
    fn try_reserve(&self) -> bool {
        if self.finished.load(Ordering::Acquire) {
            return false;
        }
        self.pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |p| {
                (p < self.capacity).then_some(p + 1)
            })
            .is_ok()
    }

    fn release(&self) {
        self.pending.fetch_sub(1, Ordering::AcqRel);
    }
}

/// State shared between the sink and its writer thread
struct Shared {
    state: AtomicU8,
    anchor: Mutex<Option<MediaTime>>,
    error: Mutex<Option<String>>,
    inputs: Vec<Arc<TrackInput>>,
}

impl Shared {
    fn state(&self) -> WriterState {
        WriterState::from_raw(self.state.load(Ordering::Acquire))
    }

    /// Move from `from` to `to`; false if the state was something else
    fn transition(&self, from: WriterState, to: WriterState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn fail(&self, reason: String) {
        if self.transition(WriterState::Writing, WriterState::Failed)
            || self.transition(WriterState::Unknown, WriterState::Failed)
        {
            tracing::error!("Writer failed: {}", reason);
            *self.error.lock() = Some(reason);
        }
    }
}

/// Container writer with a state machine and per-track backpressure
pub struct EncodeSink {
    path: PathBuf,
    /// Handed to the writer thread by `begin_writing`
    writer: Mutex<Option<Box<dyn ContainerWriter>>>,
    pending_tracks: Vec<TrackSettings>,
    shared: Arc<Shared>,
    commands: Option<mpsc::UnboundedSender<WriterCommand>>,
    finish_requested: AtomicBool,
}

impl EncodeSink {
    /// Create a writer for a fresh file at `path`, deleting any existing file
    pub fn open(path: &Path, format: ContainerFormat) -> Result<Self, SinkError> {
        let writer = Mp4Writer::create(path, format)?;
        tracing::info!("Opened {} writer at {:?}", format.extension(), path);
        Ok(Self::with_writer(path, Box::new(writer)))
    }

    /// Wrap an existing container writer
    pub fn with_writer(path: &Path, writer: Box<dyn ContainerWriter>) -> Self {
        Self {
            path: path.to_path_buf(),
            writer: Mutex::new(Some(writer)),
            pending_tracks: Vec::new(),
            shared: Arc::new(Shared {
                state: AtomicU8::new(WriterState::Unknown as u8),
                anchor: Mutex::new(None),
                error: Mutex::new(None),
                inputs: Vec::new(),
            }),
            commands: None,
            finish_requested: AtomicBool::new(false),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> WriterState {
        self.shared.state()
    }

    /// Reason for the last failure, if any
    pub fn error(&self) -> Option<String> {
        self.shared.error.lock().clone()
    }

    pub fn anchor(&self) -> Option<MediaTime> {
        *self.shared.anchor.lock()
    }

    pub fn is_anchored(&self) -> bool {
        self.shared.anchor.lock().is_some()
    }

    pub fn input(&self, kind: TrackKind) -> Option<&Arc<TrackInput>> {
        self.shared.inputs.iter().find(|i| i.kind == kind)
    }

    /// Declare a track. Only valid before `begin_writing`.
    pub fn add_track(&mut self, settings: TrackSettings) -> Result<(), SinkError> {
        let state = self.state();
        if state != WriterState::Unknown {
            return Err(SinkError::TrackAfterWriting);
        }
        settings.validate()?;
        if self.pending_tracks.iter().any(|t| t.kind() == settings.kind()) {
            return Err(SinkError::DuplicateTrack(settings.kind()));
        }
        tracing::debug!("Track added: {} ({:?})", settings.kind(), settings);
        self.pending_tracks.push(settings);
        Ok(())
    }

    /// Register the tracks with the writer and start the writer thread.
    ///
    /// Returns false on failure, leaving the state `Failed`.
    pub fn begin_writing(&mut self) -> bool {
        if self.state() != WriterState::Unknown {
            tracing::warn!("begin_writing called in state {:?}", self.state());
            return false;
        }
        match self.spawn_writer() {
            Ok(()) => {
                tracing::info!("Writer status: writing");
                true
            }
            Err(e) => {
                self.shared.fail(e.to_string());
                false
            }
        }
    }

    fn spawn_writer(&mut self) -> Result<(), SinkError> {
        if self.pending_tracks.is_empty() {
            return Err(SinkError::NoTracks);
        }
        let mut writer = self
            .writer
            .get_mut()
            .take()
            .ok_or(SinkError::NotWriting(WriterState::Unknown))?;

        let mut inputs = Vec::with_capacity(self.pending_tracks.len());
        for settings in &self.pending_tracks {
            let index = writer.add_track(settings)?;
            inputs.push(Arc::new(TrackInput::new(index, settings)));
        }
        let settings = self.pending_tracks.clone();

        // Inputs are fixed from here on
        let shared = Arc::new(Shared {
            state: AtomicU8::new(WriterState::Writing as u8),
            anchor: Mutex::new(None),
            error: Mutex::new(None),
            inputs,
        });

        let (tx, rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = std_mpsc::channel();
        let thread_shared = Arc::clone(&shared);
        let path = self.path.clone();
        std::thread::Builder::new()
            .name("encode-writer".to_string())
            .spawn(move || {
                // encoders are created on, and never leave, the writer thread
                let stages = match TrackStage::build(&settings) {
                    Ok(stages) => stages,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                run_writer(writer, stages, rx, thread_shared, path)
            })?;
        ready_rx
            .recv()
            .map_err(|_| SinkError::Failed("writer thread exited during setup".into()))??;

        self.shared = shared;
        self.commands = Some(tx);
        Ok(())
    }

    /// Establish the session anchor. Only the first call per session wins.
    pub fn anchor_session(&self, timestamp: MediaTime) -> bool {
        if self.state() != WriterState::Writing {
            return false;
        }
        let mut anchor = self.shared.anchor.lock();
        if let Some(existing) = *anchor {
            tracing::warn!(
                "Session already anchored at {}, ignoring {}",
                existing,
                timestamp
            );
            return false;
        }
        *anchor = Some(timestamp);
        tracing::info!("Session anchored at {}", timestamp);
        true
    }

    /// Queue a buffer for writing if the writer can take it.
    ///
    /// Returns false, changing nothing, when the writer is not writing, the
    /// session is not anchored, or the track input is not ready.
    pub fn append_if_ready(&self, buffer: &CaptureBuffer) -> bool {
        if self.state() != WriterState::Writing || !self.is_anchored() {
            return false;
        }
        let Some(slot) = self
            .shared
            .inputs
            .iter()
            .position(|i| i.kind == buffer.kind())
        else {
            return false;
        };
        let input = &self.shared.inputs[slot];
        let Some(commands) = self.commands.as_ref() else {
            return false;
        };
        if !input.try_reserve() {
            return false;
        }

        let duration = buffer
            .duration()
            .map(|d| d.to_timescale(input.timescale).max(0) as u64);
        let command = WriterCommand::Append {
            slot,
            pts: buffer.pts(),
            duration,
            data: buffer.payload().clone(),
            format: *buffer.format(),
        };
        if commands.send(command).is_err() {
            input.release();
            return false;
        }
        true
    }

    /// Mark every input finished, flush asynchronously, then call
    /// `completion` on the writer thread.
    pub fn finish<F>(&self, completion: F)
    where
        F: FnOnce(FinishResult) + Send + 'static,
    {
        if self.finish_requested.swap(true, Ordering::AcqRel) {
            completion(Err(SinkError::AlreadyFinished));
            return;
        }
        for input in &self.shared.inputs {
            input.mark_as_finished();
        }
        tracing::info!("Marked inputs as finished");

        let completion: Completion = Box::new(completion);
        match self.commands.as_ref() {
            Some(commands) => {
                if let Err(mpsc::error::SendError(WriterCommand::Finish(completion))) =
                    commands.send(WriterCommand::Finish(completion))
                {
                    completion(Err(SinkError::Failed("writer thread is gone".into())));
                }
            }
            None => completion(Err(SinkError::NotWriting(self.state()))),
        }
    }

    /// Abandon the file. `Writing → Cancelled`.
    pub fn cancel_writing(&self) {
        if self.shared.transition(WriterState::Writing, WriterState::Cancelled) {
            for input in &self.shared.inputs {
                input.mark_as_finished();
            }
            if let Some(commands) = self.commands.as_ref() {
                let _ = commands.send(WriterCommand::Cancel);
            }
            tracing::info!("Writer cancelled");
        }
    }
}

impl Drop for EncodeSink {
    fn drop(&mut self) {
        if !self.finish_requested.load(Ordering::Acquire) {
            self.cancel_writing();
        }
    }
}

/// What happens to a track's payloads before they reach the container
enum TrackStage {
    Video(H264Encoder),
    /// PCM is stored as captured
    Audio,
}

impl TrackStage {
    fn build(settings: &[TrackSettings]) -> Result<Vec<TrackStage>, SinkError> {
        settings
            .iter()
            .map(|s| match s {
                TrackSettings::Video(v) => H264Encoder::new(v).map(TrackStage::Video),
                TrackSettings::Audio(_) => Ok(TrackStage::Audio),
            })
            .collect()
    }

    /// Encode a payload and hand it to the writer. Ok(false) if nothing was
    /// written.
    fn write(
        &mut self,
        writer: &mut dyn ContainerWriter,
        track: usize,
        time: u64,
        duration: Option<u64>,
        data: bytes::Bytes,
        format: &BufferFormat,
    ) -> Result<bool, SinkError> {
        match self {
            TrackStage::Video(encoder) => {
                let Some(frame) = encoder.encode(&data, format)? else {
                    return Ok(false);
                };
                if let Some(config) = frame.config {
                    writer.set_avc_config(track, config)?;
                }
                writer.write_sample(
                    track,
                    EncodedSample {
                        time,
                        duration,
                        data: frame.data,
                        sync: frame.keyframe,
                    },
                )?;
            }
            TrackStage::Audio => writer.write_sample(
                track,
                EncodedSample {
                    time,
                    duration,
                    data,
                    sync: true,
                },
            )?,
        }
        Ok(true)
    }
}

fn run_writer(
    mut writer: Box<dyn ContainerWriter>,
    mut stages: Vec<TrackStage>,
    mut rx: mpsc::UnboundedReceiver<WriterCommand>,
    shared: Arc<Shared>,
    path: PathBuf,
) {
    let mut written: u64 = 0;

    while let Some(command) = rx.blocking_recv() {
        match command {
            WriterCommand::Append {
                slot,
                pts,
                duration,
                data,
                format,
            } => {
                let input = &shared.inputs[slot];
                if shared.state() == WriterState::Writing {
                    let anchor = *shared.anchor.lock();
                    let time = anchor
                        .and_then(|a| pts.checked_sub(a))
                        .map(|offset| offset.to_timescale(input.timescale).max(0) as u64)
                        .unwrap_or(0);
                    match stages[slot].write(writer.as_mut(), input.index, time, duration, data, &format) {
                        Ok(true) => written += 1,
                        Ok(false) => {}
                        Err(e) => shared.fail(e.to_string()),
                    }
                }
                input.release();
            }
            WriterCommand::Finish(completion) => {
                let result = match shared.state() {
                    WriterState::Writing => match writer.finalize() {
                        Ok(()) => {
                            shared.transition(WriterState::Writing, WriterState::Completed);
                            tracing::info!("Writer completed: {} samples", written);
                            Ok(path.clone())
                        }
                        Err(e) => {
                            shared.fail(e.to_string());
                            Err(e)
                        }
                    },
                    WriterState::Cancelled => Err(SinkError::Cancelled),
                    WriterState::Failed => Err(SinkError::Failed(
                        shared.error.lock().clone().unwrap_or_default(),
                    )),
                    other => Err(SinkError::NotWriting(other)),
                };
                *shared.anchor.lock() = None;
                completion(result);
                return;
            }
            WriterCommand::Cancel => {
                *shared.anchor.lock() = None;
                tracing::debug!("Writer thread exiting after cancel");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{BufferFormat, CaptureConnection, PixelFormat, RawSample, VideoOrientation};
    use crate::encode::nal::AvcConfig;
    use crate::encode::types::{AudioSettings, VideoSettings};
    use bytes::Bytes;
    use std::time::Duration;

    fn small_video() -> VideoSettings {
        VideoSettings {
            width: 16,
            height: 16,
            ..VideoSettings::default()
        }
    }

    fn video_buffer(ms: i64) -> CaptureBuffer {
        CaptureBuffer::new(
            RawSample {
                kind: TrackKind::Video,
                pts: MediaTime::new(ms, 1000),
                duration: None,
                payload: Bytes::from(vec![7u8; 64]),
                format: BufferFormat::Video {
                    width: 4,
                    height: 4,
                    pixel_format: PixelFormat::Bgra32,
                    orientation: VideoOrientation::Portrait,
                    mirrored: false,
                },
            },
            Arc::new(CaptureConnection::new(TrackKind::Video, true)),
        )
    }

    fn audio_buffer(ms: i64) -> CaptureBuffer {
        CaptureBuffer::new(
            RawSample {
                kind: TrackKind::Audio,
                pts: MediaTime::new(ms, 1000),
                duration: Some(MediaTime::new(441, 44_100)),
                payload: Bytes::from(vec![0u8; 882]),
                format: BufferFormat::Audio {
                    sample_rate: 44_100,
                    channels: 1,
                    frames: 441,
                },
            },
            Arc::new(CaptureConnection::new(TrackKind::Audio, false)),
        )
    }

    /// Writer that blocks every write until released, and can fail on demand
    struct GatedWriter {
        gate: std_mpsc::Receiver<bool>,
    }

    impl ContainerWriter for GatedWriter {
        fn add_track(&mut self, settings: &TrackSettings) -> Result<usize, SinkError> {
            Ok(match settings.kind() {
                TrackKind::Video => 0,
                TrackKind::Audio => 1,
            })
        }

        fn set_avc_config(&mut self, _track: usize, _config: AvcConfig) -> Result<(), SinkError> {
            Ok(())
        }

        fn write_sample(&mut self, _track: usize, _sample: EncodedSample) -> Result<(), SinkError> {
            match self.gate.recv() {
                Ok(true) => Ok(()),
                _ => Err(SinkError::Failed("disk full".into())),
            }
        }

        fn finalize(&mut self) -> Result<(), SinkError> {
            Ok(())
        }
    }

    fn gated_sink(video_capacity: usize) -> (EncodeSink, std_mpsc::Sender<bool>) {
        let (tx, rx) = std_mpsc::channel();
        let mut sink = EncodeSink::with_writer(Path::new("gated.mov"), Box::new(GatedWriter { gate: rx }));
        sink.add_track(TrackSettings::Video(VideoSettings {
            max_pending_samples: video_capacity,
            ..small_video()
        }))
        .unwrap();
        sink.add_track(TrackSettings::Audio(AudioSettings::default())).unwrap();
        assert!(sink.begin_writing());
        (sink, tx)
    }

    fn finish_and_wait(sink: &EncodeSink) -> FinishResult {
        let (tx, rx) = std_mpsc::channel();
        sink.finish(move |result| {
            let _ = tx.send(result);
        });
        rx.recv_timeout(Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_append_rejected_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = EncodeSink::open(&dir.path().join("a.mov"), ContainerFormat::Mov).unwrap();
        sink.add_track(TrackSettings::Video(VideoSettings::default())).unwrap();

        assert_eq!(sink.state(), WriterState::Unknown);
        assert!(!sink.anchor_session(MediaTime::new(0, 1000)));
        assert!(!sink.append_if_ready(&video_buffer(0)));
        assert_eq!(sink.state(), WriterState::Unknown);
    }

    #[test]
    fn test_append_rejected_without_anchor() {
        let (sink, _gate) = gated_sink(4);
        assert!(!sink.append_if_ready(&video_buffer(0)));
        assert_eq!(sink.input(TrackKind::Video).unwrap().pending_samples(), 0);
        assert_eq!(sink.state(), WriterState::Writing);
    }

    #[test]
    fn test_append_rejected_when_track_not_ready() {
        let (sink, gate) = gated_sink(1);
        assert!(sink.anchor_session(MediaTime::new(0, 1000)));

        // first append fills the only slot; the writer is stuck on the gate
        assert!(sink.append_if_ready(&video_buffer(0)));
        let input = sink.input(TrackKind::Video).unwrap();
        assert!(!input.is_ready_for_more_media_data());
        for i in 1..=5 {
            assert!(!sink.append_if_ready(&video_buffer(i * 33)));
        }
        assert_eq!(input.pending_samples(), 1);
        assert_eq!(sink.state(), WriterState::Writing);

        // audio has its own input
        assert!(sink.append_if_ready(&audio_buffer(0)));

        gate.send(true).unwrap();
        gate.send(true).unwrap();
        assert!(finish_and_wait(&sink).is_ok());
    }

    #[test]
    fn test_anchor_only_once() {
        let (sink, _gate) = gated_sink(4);
        assert!(sink.anchor_session(MediaTime::new(100, 1000)));
        assert!(!sink.anchor_session(MediaTime::new(200, 1000)));
        assert_eq!(sink.anchor(), Some(MediaTime::new(100, 1000)));
    }

    #[test]
    fn test_add_track_after_writing_fails() {
        let (mut sink, _gate) = gated_sink(4);
        assert!(matches!(
            sink.add_track(TrackSettings::Audio(AudioSettings::default())),
            Err(SinkError::TrackAfterWriting)
        ));
    }

    #[test]
    fn test_begin_writing_without_tracks_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = EncodeSink::open(&dir.path().join("empty.mov"), ContainerFormat::Mov).unwrap();
        assert!(!sink.begin_writing());
        assert_eq!(sink.state(), WriterState::Failed);
        assert!(sink.error().unwrap().contains("No tracks"));
    }

    #[test]
    fn test_write_failure_moves_to_failed() {
        let (sink, gate) = gated_sink(4);
        assert!(sink.anchor_session(MediaTime::new(0, 1000)));
        assert!(sink.append_if_ready(&video_buffer(0)));
        gate.send(false).unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while sink.state() != WriterState::Failed && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(sink.state(), WriterState::Failed);
        assert!(!sink.append_if_ready(&video_buffer(33)));
        assert!(matches!(finish_and_wait(&sink), Err(SinkError::Failed(_))));
    }

    #[test]
    fn test_finish_clears_anchor_and_rejects_second_finish() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("done.mov");
        let mut sink = EncodeSink::open(&path, ContainerFormat::Mov).unwrap();
        sink.add_track(TrackSettings::Video(small_video())).unwrap();
        sink.add_track(TrackSettings::Audio(AudioSettings::default())).unwrap();
        assert!(sink.begin_writing());
        assert!(sink.anchor_session(MediaTime::new(0, 1000)));
        assert!(sink.append_if_ready(&video_buffer(0)));
        assert!(sink.append_if_ready(&audio_buffer(0)));

        let result = finish_and_wait(&sink).unwrap();
        assert_eq!(result, path);
        assert_eq!(sink.state(), WriterState::Completed);
        assert!(!sink.is_anchored());
        assert!(!sink.append_if_ready(&video_buffer(33)));
        assert!(matches!(finish_and_wait(&sink), Err(SinkError::AlreadyFinished)));
    }

    #[derive(Default)]
    struct Written {
        configs: Vec<(usize, AvcConfig)>,
        samples: Vec<(usize, EncodedSample)>,
    }

    /// Writer that keeps everything it is handed
    struct CollectingWriter(Arc<Mutex<Written>>);

    impl ContainerWriter for CollectingWriter {
        fn add_track(&mut self, settings: &TrackSettings) -> Result<usize, SinkError> {
            Ok(match settings.kind() {
                TrackKind::Video => 0,
                TrackKind::Audio => 1,
            })
        }

        fn set_avc_config(&mut self, track: usize, config: AvcConfig) -> Result<(), SinkError> {
            self.0.lock().configs.push((track, config));
            Ok(())
        }

        fn write_sample(&mut self, track: usize, sample: EncodedSample) -> Result<(), SinkError> {
            self.0.lock().samples.push((track, sample));
            Ok(())
        }

        fn finalize(&mut self) -> Result<(), SinkError> {
            Ok(())
        }
    }

    #[test]
    fn test_video_is_compressed_before_the_container() {
        let written = Arc::new(Mutex::new(Written::default()));
        let mut sink = EncodeSink::with_writer(
            Path::new("collect.mov"),
            Box::new(CollectingWriter(Arc::clone(&written))),
        );
        sink.add_track(TrackSettings::Video(small_video())).unwrap();
        sink.add_track(TrackSettings::Audio(AudioSettings::default())).unwrap();
        assert!(sink.begin_writing());
        assert!(sink.anchor_session(MediaTime::new(0, 1000)));
        assert!(sink.append_if_ready(&video_buffer(0)));
        assert!(sink.append_if_ready(&audio_buffer(10)));
        assert!(finish_and_wait(&sink).is_ok());

        let written = written.lock();
        assert_eq!(written.configs.len(), 1);
        assert_eq!(written.configs[0].0, 0);

        let (_, video) = written.samples.iter().find(|(t, _)| *t == 0).unwrap();
        assert!(video.sync);
        // length-prefixed IDR slice, not the 64 raw BGRA bytes
        let len = u32::from_be_bytes(video.data[..4].try_into().unwrap()) as usize;
        assert!(len + 4 <= video.data.len());
        assert_eq!(video.data[4] & 0x1F, 5);

        // PCM goes through untouched, timed from the anchor
        let (_, audio) = written.samples.iter().find(|(t, _)| *t == 1).unwrap();
        assert_eq!(audio.data.len(), 882);
        assert_eq!(audio.time, 441);
    }

    #[test]
    fn test_cancel_writing() {
        let (sink, _gate) = gated_sink(4);
        sink.cancel_writing();
        assert_eq!(sink.state(), WriterState::Cancelled);
        assert!(!sink.anchor_session(MediaTime::new(0, 1000)));
    }
}
