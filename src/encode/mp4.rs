//! QuickTime / ISO BMFF container writer.
//!
//! Samples are appended to a 64-bit mdat box as they arrive; the moov box
//! with the sample tables is written at the end by `finalize()`.
//!
//! Video samples are length-prefixed H.264 access units described by an
//! `avc1` entry with `avcC`. Audio is stored as QuickTime `sowt` PCM: every PCM frame is one sample
//! and every appended buffer is one chunk.

use byteorder::{BigEndian, WriteBytesExt};
use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::nal::AvcConfig;
use super::types::{
    AudioSettings, ContainerFormat, ContainerWriter, EncodedSample, SinkError, TrackSettings,
    VideoSettings, MOVIE_TIMESCALE,
};

/// Seconds between 1904-01-01 and 1970-01-01
pub const MP4_EPOCH_OFFSET: u64 = 2_082_844_800;

/// ISO 639-2 "und" packed into 3x5 bits
const LANGUAGE_UND: u16 = 0x55C4;

const IDENTITY_MATRIX: [u32; 9] = [0x0001_0000, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000];

type WriteResult = Result<(), SinkError>;

#[derive(Debug, Clone, Copy)]
struct VideoSample {
    time: u64,
    duration: Option<u64>,
    size: u32,
    offset: u64,
    sync: bool,
}

#[derive(Debug, Clone, Copy)]
struct AudioChunk {
    time: u64,
    frames: u32,
    offset: u64,
}

enum SampleTable {
    Video(Vec<VideoSample>),
    Audio {
        bytes_per_frame: u32,
        chunks: Vec<AudioChunk>,
    },
}

struct TrackState {
    track_id: u32,
    timescale: u32,
    settings: TrackSettings,
    table: SampleTable,
    avc_config: Option<AvcConfig>,
}

impl TrackState {
    /// Time of the first sample relative to the session anchor
    fn start_time(&self) -> u64 {
        match &self.table {
            SampleTable::Video(samples) => samples.first().map(|s| s.time).unwrap_or(0),
            SampleTable::Audio { chunks, .. } => chunks.first().map(|c| c.time).unwrap_or(0),
        }
    }

    /// Per-sample durations for the video track
    fn video_durations(samples: &[VideoSample], settings: &VideoSettings, timescale: u32) -> Vec<u32> {
        let nominal = (timescale as f64 / settings.expected_frame_rate).round().max(1.0) as u64;
        samples
            .iter()
            .enumerate()
            .map(|(i, s)| {
                let d = match samples.get(i + 1) {
                    Some(next) => next.time.saturating_sub(s.time),
                    None => s.duration.unwrap_or(nominal),
                };
                d.clamp(1, u32::MAX as u64) as u32
            })
            .collect()
    }

    /// Media duration in track ticks
    fn media_duration(&self) -> u64 {
        match (&self.table, &self.settings) {
            (SampleTable::Video(samples), TrackSettings::Video(v)) => {
                Self::video_durations(samples, v, self.timescale)
                    .iter()
                    .map(|&d| d as u64)
                    .sum()
            }
            (SampleTable::Audio { chunks, .. }, _) => chunks.iter().map(|c| c.frames as u64).sum(),
            _ => 0,
        }
    }
}

/// Progressive QuickTime/MP4 writer
pub struct Mp4Writer {
    path: PathBuf,
    format: ContainerFormat,
    file: Option<BufWriter<File>>,
    mdat_size_pos: u64,
    position: u64,
    tracks: Vec<TrackState>,
    creation_time: u64,
}

impl Mp4Writer {
    /// Create the output file, replacing any existing file at `path`
    pub fn create(path: &Path, format: ContainerFormat) -> Result<Self, SinkError> {
        if path.exists() {
            std::fs::remove_file(path)?;
            tracing::debug!("Removed existing file at {:?}", path);
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let file = File::create(path).map_err(|e| {
            SinkError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to create output file {:?}: {}", path, e),
            ))
        })?;
        let mut writer = BufWriter::new(file);

        let mut header = Vec::new();
        write_ftyp(&mut header, format)?;
        // mdat with a 64-bit size, patched in finalize()
        header.write_u32::<BigEndian>(1)?;
        header.write_all(b"mdat")?;
        let mdat_size_pos = header.len() as u64;
        header.write_u64::<BigEndian>(0)?;
        writer.write_all(&header)?;

        let creation_time = MP4_EPOCH_OFFSET + chrono::Utc::now().timestamp().max(0) as u64;

        Ok(Self {
            path: path.to_path_buf(),
            format,
            file: Some(writer),
            mdat_size_pos,
            position: header.len() as u64,
            tracks: Vec::new(),
            creation_time,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn file(&mut self) -> Result<&mut BufWriter<File>, SinkError> {
        self.file
            .as_mut()
            .ok_or_else(|| SinkError::Failed("writer already finalized".into()))
    }

    fn write_moov(&self, out: &mut Vec<u8>) -> WriteResult {
        let movie_duration = self
            .tracks
            .iter()
            .map(|t| movie_ticks(t.start_time() + t.media_duration(), t.timescale))
            .max()
            .unwrap_or(0);

        write_box(out, b"moov", |out| {
            write_full_box(out, b"mvhd", 0, 0, |out| {
                out.write_u32::<BigEndian>(self.creation_time as u32)?;
                out.write_u32::<BigEndian>(self.creation_time as u32)?;
                out.write_u32::<BigEndian>(MOVIE_TIMESCALE)?;
                out.write_u32::<BigEndian>(clamp_u32(movie_duration))?;
                out.write_u32::<BigEndian>(0x0001_0000)?; // rate 1.0
                out.write_u16::<BigEndian>(0x0100)?; // volume 1.0
                out.write_all(&[0u8; 10])?;
                write_matrix(out)?;
                out.write_all(&[0u8; 24])?;
                out.write_u32::<BigEndian>(self.tracks.len() as u32 + 1)?;
                Ok(())
            })?;

            for track in &self.tracks {
                self.write_trak(out, track)?;
            }
            Ok(())
        })
    }

    fn write_trak(&self, out: &mut Vec<u8>, track: &TrackState) -> WriteResult {
        let media_duration = track.media_duration();
        let start = track.start_time();
        let track_movie_duration = movie_ticks(start + media_duration, track.timescale);

        write_box(out, b"trak", |out| {
            write_full_box(out, b"tkhd", 0, 0x7, |out| {
                out.write_u32::<BigEndian>(self.creation_time as u32)?;
                out.write_u32::<BigEndian>(self.creation_time as u32)?;
                out.write_u32::<BigEndian>(track.track_id)?;
                out.write_u32::<BigEndian>(0)?;
                out.write_u32::<BigEndian>(clamp_u32(track_movie_duration))?;
                out.write_all(&[0u8; 8])?;
                out.write_i16::<BigEndian>(0)?; // layer
                out.write_i16::<BigEndian>(0)?; // alternate group
                let volume = match track.settings {
                    TrackSettings::Audio(_) => 0x0100,
                    TrackSettings::Video(_) => 0,
                };
                out.write_u16::<BigEndian>(volume)?;
                out.write_u16::<BigEndian>(0)?;
                write_matrix(out)?;
                let (width, height) = match &track.settings {
                    TrackSettings::Video(v) => (v.width, v.height),
                    TrackSettings::Audio(_) => (0, 0),
                };
                out.write_u32::<BigEndian>(width << 16)?;
                out.write_u32::<BigEndian>(height << 16)?;
                Ok(())
            })?;

            write_box(out, b"edts", |out| {
                write_full_box(out, b"elst", 0, 0, |out| {
                    let media = movie_ticks(media_duration, track.timescale);
                    if start > 0 {
                        out.write_u32::<BigEndian>(2)?;
                        // empty edit: the track starts after the session anchor
                        out.write_u32::<BigEndian>(clamp_u32(movie_ticks(start, track.timescale)))?;
                        out.write_i32::<BigEndian>(-1)?;
                        out.write_u32::<BigEndian>(0x0001_0000)?;
                    } else {
                        out.write_u32::<BigEndian>(1)?;
                    }
                    out.write_u32::<BigEndian>(clamp_u32(media))?;
                    out.write_i32::<BigEndian>(0)?;
                    out.write_u32::<BigEndian>(0x0001_0000)?;
                    Ok(())
                })
            })?;

            write_box(out, b"mdia", |out| {
                write_full_box(out, b"mdhd", 0, 0, |out| {
                    out.write_u32::<BigEndian>(self.creation_time as u32)?;
                    out.write_u32::<BigEndian>(self.creation_time as u32)?;
                    out.write_u32::<BigEndian>(track.timescale)?;
                    out.write_u32::<BigEndian>(clamp_u32(media_duration))?;
                    out.write_u16::<BigEndian>(LANGUAGE_UND)?;
                    out.write_u16::<BigEndian>(0)?;
                    Ok(())
                })?;

                let (handler, name) = match track.settings {
                    TrackSettings::Video(_) => (b"vide", "VideoHandler"),
                    TrackSettings::Audio(_) => (b"soun", "SoundHandler"),
                };
                write_full_box(out, b"hdlr", 0, 0, |out| {
                    out.write_u32::<BigEndian>(0)?;
                    out.write_all(handler)?;
                    out.write_all(&[0u8; 12])?;
                    out.write_all(name.as_bytes())?;
                    out.write_u8(0)?;
                    Ok(())
                })?;

                write_box(out, b"minf", |out| {
                    match track.settings {
                        TrackSettings::Video(_) => write_full_box(out, b"vmhd", 0, 1, |out| {
                            out.write_all(&[0u8; 8])?;
                            Ok(())
                        })?,
                        TrackSettings::Audio(_) => write_full_box(out, b"smhd", 0, 0, |out| {
                            out.write_u32::<BigEndian>(0)?;
                            Ok(())
                        })?,
                    }
                    write_box(out, b"dinf", |out| {
                        write_full_box(out, b"dref", 0, 0, |out| {
                            out.write_u32::<BigEndian>(1)?;
                            write_full_box(out, b"url ", 0, 1, |_| Ok(()))
                        })
                    })?;
                    write_box(out, b"stbl", |out| write_sample_tables(out, track))
                })
            })
        })
    }
}

impl ContainerWriter for Mp4Writer {
    fn add_track(&mut self, settings: &TrackSettings) -> Result<usize, SinkError> {
        settings.validate()?;
        if self.tracks.iter().any(|t| t.settings.kind() == settings.kind()) {
            return Err(SinkError::DuplicateTrack(settings.kind()));
        }

        let table = match settings {
            TrackSettings::Video(_) => SampleTable::Video(Vec::new()),
            TrackSettings::Audio(a) => SampleTable::Audio {
                bytes_per_frame: a.channels as u32 * 2,
                chunks: Vec::new(),
            },
        };
        let index = self.tracks.len();
        self.tracks.push(TrackState {
            track_id: index as u32 + 1,
            timescale: settings.timescale(),
            settings: settings.clone(),
            table,
            avc_config: None,
        });

        tracing::info!(track_id = index + 1, kind = %settings.kind(), "Added track");
        Ok(index)
    }

    fn set_avc_config(&mut self, track: usize, config: AvcConfig) -> WriteResult {
        let state = self.tracks.get_mut(track).ok_or(SinkError::UnknownTrack(track))?;
        if !matches!(state.settings, TrackSettings::Video(_)) {
            return Err(SinkError::InvalidSettings(format!(
                "track {} is not a video track",
                track
            )));
        }
        if let Some(existing) = &state.avc_config {
            if existing != &config {
                // a single sample entry describes the whole track
                tracing::warn!(track_id = state.track_id, "Ignoring changed parameter sets");
            }
            return Ok(());
        }
        tracing::debug!(
            track_id = state.track_id,
            profile = config.profile_idc(),
            level = config.level_idc(),
            "Video decoder configuration set"
        );
        state.avc_config = Some(config);
        Ok(())
    }

    fn write_sample(&mut self, track: usize, sample: EncodedSample) -> WriteResult {
        let offset = self.position;
        let len = sample.data.len() as u64;
        let state = self.tracks.get_mut(track).ok_or(SinkError::UnknownTrack(track))?;

        match &mut state.table {
            SampleTable::Video(samples) => samples.push(VideoSample {
                time: sample.time,
                duration: sample.duration,
                size: u32::try_from(len)
                    .map_err(|_| SinkError::Failed(format!("sample of {} bytes too large", len)))?,
                offset,
                sync: sample.sync,
            }),
            SampleTable::Audio {
                bytes_per_frame,
                chunks,
            } => {
                let frames = (len / *bytes_per_frame as u64) as u32;
                if frames == 0 {
                    return Ok(());
                }
                chunks.push(AudioChunk {
                    time: sample.time,
                    frames,
                    offset,
                });
            }
        }

        // Audio chunks are truncated to whole frames
        let written = match &self.tracks[track].table {
            SampleTable::Audio { bytes_per_frame, .. } => {
                (len / *bytes_per_frame as u64) * *bytes_per_frame as u64
            }
            SampleTable::Video(_) => len,
        };
        self.file()?.write_all(&sample.data[..written as usize])?;
        self.position += written;
        Ok(())
    }

    fn finalize(&mut self) -> WriteResult {
        let mut moov = Vec::new();
        self.write_moov(&mut moov)?;

        let mdat_size = self.position - (self.mdat_size_pos - 8);
        let mdat_size_pos = self.mdat_size_pos;
        let mut file = self
            .file
            .take()
            .ok_or_else(|| SinkError::Failed("writer already finalized".into()))?;

        file.seek(SeekFrom::Start(mdat_size_pos))?;
        file.write_u64::<BigEndian>(mdat_size)?;
        file.seek(SeekFrom::Start(self.position))?;
        file.write_all(&moov)?;
        file.flush()?;
        file.get_ref().sync_all()?;

        tracing::info!(
            path = %self.path.display(),
            format = self.format.extension(),
            bytes = self.position + moov.len() as u64,
            "Container finalized"
        );
        Ok(())
    }
}

fn write_sample_tables(out: &mut Vec<u8>, track: &TrackState) -> WriteResult {
    write_full_box(out, b"stsd", 0, 0, |out| {
        out.write_u32::<BigEndian>(1)?;
        match &track.settings {
            TrackSettings::Video(v) => write_visual_sample_entry(out, v, track.avc_config.as_ref()),
            TrackSettings::Audio(a) => write_sound_sample_entry(out, a),
        }
    })?;

    match (&track.table, &track.settings) {
        (SampleTable::Video(samples), TrackSettings::Video(v)) => {
            let durations = TrackState::video_durations(samples, v, track.timescale);
            write_full_box(out, b"stts", 0, 0, |out| {
                let runs = run_length(&durations);
                out.write_u32::<BigEndian>(runs.len() as u32)?;
                for (count, delta) in runs {
                    out.write_u32::<BigEndian>(count)?;
                    out.write_u32::<BigEndian>(delta)?;
                }
                Ok(())
            })?;
            // no stss means every sample is a sync sample
            if samples.iter().any(|s| !s.sync) {
                write_full_box(out, b"stss", 0, 0, |out| {
                    let sync: Vec<u32> = samples
                        .iter()
                        .enumerate()
                        .filter(|(_, s)| s.sync)
                        .map(|(i, _)| i as u32 + 1)
                        .collect();
                    out.write_u32::<BigEndian>(sync.len() as u32)?;
                    for number in sync {
                        out.write_u32::<BigEndian>(number)?;
                    }
                    Ok(())
                })?;
            }
            write_full_box(out, b"stsc", 0, 0, |out| {
                if samples.is_empty() {
                    out.write_u32::<BigEndian>(0)?;
                } else {
                    out.write_u32::<BigEndian>(1)?;
                    out.write_u32::<BigEndian>(1)?;
                    out.write_u32::<BigEndian>(1)?;
                    out.write_u32::<BigEndian>(1)?;
                }
                Ok(())
            })?;
            write_full_box(out, b"stsz", 0, 0, |out| {
                out.write_u32::<BigEndian>(0)?;
                out.write_u32::<BigEndian>(samples.len() as u32)?;
                for s in samples {
                    out.write_u32::<BigEndian>(s.size)?;
                }
                Ok(())
            })?;
            write_chunk_offsets(out, samples.iter().map(|s| s.offset))
        }
        (SampleTable::Audio { bytes_per_frame, chunks }, _) => {
            let total_frames: u64 = chunks.iter().map(|c| c.frames as u64).sum();
            write_full_box(out, b"stts", 0, 0, |out| {
                if total_frames == 0 {
                    out.write_u32::<BigEndian>(0)?;
                } else {
                    out.write_u32::<BigEndian>(1)?;
                    out.write_u32::<BigEndian>(clamp_u32(total_frames))?;
                    out.write_u32::<BigEndian>(1)?;
                }
                Ok(())
            })?;
            write_full_box(out, b"stsc", 0, 0, |out| {
                let frames: Vec<u32> = chunks.iter().map(|c| c.frames).collect();
                let mut entries = Vec::new();
                for (i, &n) in frames.iter().enumerate() {
                    if entries.last().map(|&(_, last)| last != n).unwrap_or(true) {
                        entries.push((i as u32 + 1, n));
                    }
                }
                out.write_u32::<BigEndian>(entries.len() as u32)?;
                for (first_chunk, per_chunk) in entries {
                    out.write_u32::<BigEndian>(first_chunk)?;
                    out.write_u32::<BigEndian>(per_chunk)?;
                    out.write_u32::<BigEndian>(1)?;
                }
                Ok(())
            })?;
            write_full_box(out, b"stsz", 0, 0, |out| {
                out.write_u32::<BigEndian>(*bytes_per_frame)?;
                out.write_u32::<BigEndian>(clamp_u32(total_frames))?;
                Ok(())
            })?;
            write_chunk_offsets(out, chunks.iter().map(|c| c.offset))
        }
        _ => Ok(()),
    }
}

fn write_chunk_offsets(out: &mut Vec<u8>, offsets: impl ExactSizeIterator<Item = u64>) -> WriteResult {
    write_full_box(out, b"co64", 0, 0, |out| {
        out.write_u32::<BigEndian>(offsets.len() as u32)?;
        for offset in offsets {
            out.write_u64::<BigEndian>(offset)?;
        }
        Ok(())
    })
}

fn write_visual_sample_entry(out: &mut Vec<u8>, v: &VideoSettings, avc: Option<&AvcConfig>) -> WriteResult {
    write_box(out, v.codec.fourcc(), |out| {
        out.write_all(&[0u8; 6])?;
        out.write_u16::<BigEndian>(1)?; // data reference index
        out.write_all(&[0u8; 16])?;
        out.write_u16::<BigEndian>(v.width.min(u16::MAX as u32) as u16)?;
        out.write_u16::<BigEndian>(v.height.min(u16::MAX as u32) as u16)?;
        out.write_u32::<BigEndian>(0x0048_0000)?; // 72 dpi
        out.write_u32::<BigEndian>(0x0048_0000)?;
        out.write_u32::<BigEndian>(0)?;
        out.write_u16::<BigEndian>(1)?; // frame count
        let name = v.codec.compressor_name().as_bytes();
        let mut compressor = [0u8; 32];
        compressor[0] = name.len().min(31) as u8;
        compressor[1..1 + name.len().min(31)].copy_from_slice(&name[..name.len().min(31)]);
        out.write_all(&compressor)?;
        out.write_u16::<BigEndian>(0x0018)?; // depth
        out.write_i16::<BigEndian>(-1)?;
        if let Some(avc) = avc {
            write_box(out, b"avcC", |out| {
                out.write_all(&avc.to_record())?;
                Ok(())
            })?;
        }
        write_box(out, b"btrt", |out| {
            out.write_u32::<BigEndian>(0)?;
            out.write_u32::<BigEndian>(v.average_bitrate)?;
            out.write_u32::<BigEndian>(v.average_bitrate)?;
            Ok(())
        })
    })
}

fn write_sound_sample_entry(out: &mut Vec<u8>, a: &AudioSettings) -> WriteResult {
    write_box(out, b"sowt", |out| {
        out.write_all(&[0u8; 6])?;
        out.write_u16::<BigEndian>(1)?;
        out.write_u16::<BigEndian>(0)?; // version
        out.write_u16::<BigEndian>(0)?; // revision
        out.write_u32::<BigEndian>(0)?; // vendor
        out.write_u16::<BigEndian>(a.channels)?;
        out.write_u16::<BigEndian>(16)?;
        out.write_u16::<BigEndian>(0)?;
        out.write_u16::<BigEndian>(0)?;
        out.write_u32::<BigEndian>(a.sample_rate.min(u16::MAX as u32) << 16)?;
        Ok(())
    })
}

fn write_ftyp(out: &mut Vec<u8>, format: ContainerFormat) -> WriteResult {
    write_box(out, b"ftyp", |out| {
        out.write_all(format.major_brand())?;
        match format {
            ContainerFormat::Mov => {
                out.write_u32::<BigEndian>(0x2005_0300)?;
                out.write_all(b"qt  ")?;
            }
            ContainerFormat::Mp4 => {
                out.write_u32::<BigEndian>(0x200)?;
                out.write_all(b"isom")?;
                out.write_all(b"iso2")?;
                out.write_all(b"mp41")?;
            }
        }
        Ok(())
    })
}

/// Write a box whose size is patched once `body` has run
fn write_box<F>(out: &mut Vec<u8>, box_type: &[u8; 4], body: F) -> WriteResult
where
    F: FnOnce(&mut Vec<u8>) -> WriteResult,
{
    let start = out.len();
    out.write_u32::<BigEndian>(0)?;
    out.write_all(box_type)?;
    body(out)?;
    let size = u32::try_from(out.len() - start)
        .map_err(|_| SinkError::Failed(format!("{:?} box exceeds 32-bit size", box_type)))?;
    out[start..start + 4].copy_from_slice(&size.to_be_bytes());
    Ok(())
}

fn write_full_box<F>(out: &mut Vec<u8>, box_type: &[u8; 4], version: u8, flags: u32, body: F) -> WriteResult
where
    F: FnOnce(&mut Vec<u8>) -> WriteResult,
{
    write_box(out, box_type, |out| {
        out.write_u32::<BigEndian>(((version as u32) << 24) | (flags & 0x00FF_FFFF))?;
        body(out)
    })
}

fn write_matrix(out: &mut Vec<u8>) -> WriteResult {
    for value in IDENTITY_MATRIX {
        out.write_u32::<BigEndian>(value)?;
    }
    Ok(())
}

/// Collapse consecutive equal durations into (count, delta) runs
fn run_length(durations: &[u32]) -> Vec<(u32, u32)> {
    let mut runs: Vec<(u32, u32)> = Vec::new();
    for &d in durations {
        match runs.last_mut() {
            Some((count, delta)) if *delta == d => *count += 1,
            _ => runs.push((1, d)),
        }
    }
    runs
}

fn movie_ticks(ticks: u64, timescale: u32) -> u64 {
    if timescale == 0 {
        return 0;
    }
    ((ticks as u128 * MOVIE_TIMESCALE as u128 + timescale as u128 / 2) / timescale as u128) as u64
}

fn clamp_u32(value: u64) -> u32 {
    value.min(u32::MAX as u64) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_run_length() {
        assert_eq!(run_length(&[20, 20, 20, 21, 20]), vec![(3, 20), (1, 21), (1, 20)]);
        assert!(run_length(&[]).is_empty());
    }

    #[test]
    fn test_movie_ticks_rounds() {
        assert_eq!(movie_ticks(600, 600), 1000);
        assert_eq!(movie_ticks(1, 600), 2);
        assert_eq!(movie_ticks(44_100, 44_100), 1000);
    }

    #[test]
    fn test_write_box_patches_size() {
        let mut out = Vec::new();
        write_full_box(&mut out, b"test", 1, 0x7, |out| {
            out.write_u32::<BigEndian>(42)?;
            Ok(())
        })
        .unwrap();
        assert_eq!(out.len(), 16);
        assert_eq!(&out[0..4], &16u32.to_be_bytes());
        assert_eq!(&out[4..8], b"test");
        assert_eq!(&out[8..12], &0x0100_0007u32.to_be_bytes());
    }

    #[test]
    fn test_create_replaces_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.mov");
        std::fs::write(&path, vec![0xAB; 4096]).unwrap();

        let writer = Mp4Writer::create(&path, ContainerFormat::Mov).unwrap();
        drop(writer);

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[4..8], b"ftyp");
        assert_eq!(&bytes[8..12], b"qt  ");
        assert!(bytes.len() < 4096);
    }

    #[test]
    fn test_finalize_writes_mdat_size_and_moov() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.mp4");
        let mut writer = Mp4Writer::create(&path, ContainerFormat::Mp4).unwrap();
        let video = writer
            .add_track(&TrackSettings::Video(VideoSettings::default()))
            .unwrap();
        let audio = writer
            .add_track(&TrackSettings::Audio(AudioSettings::default()))
            .unwrap();

        for i in 0..3u64 {
            writer
                .write_sample(
                    video,
                    EncodedSample {
                        time: i * 20,
                        duration: None,
                        data: Bytes::from(vec![1u8; 100]),
                        sync: true,
                    },
                )
                .unwrap();
        }
        writer
            .write_sample(
                audio,
                EncodedSample {
                    time: 0,
                    duration: Some(10),
                    data: Bytes::from(vec![0u8; 21]),
                    sync: true,
                },
            )
            .unwrap();
        writer.finalize().unwrap();

        let bytes = std::fs::read(&path).unwrap();
        let ftyp_len = u32::from_be_bytes(bytes[0..4].try_into().unwrap()) as usize;
        let mdat = &bytes[ftyp_len..];
        assert_eq!(&mdat[4..8], b"mdat");
        let mdat_size = u64::from_be_bytes(mdat[8..16].try_into().unwrap()) as usize;
        // 3 video samples of 100 bytes + 10 whole mono frames of audio
        assert_eq!(mdat_size, 16 + 300 + 20);

        let moov = &bytes[ftyp_len + mdat_size..];
        assert_eq!(&moov[4..8], b"moov");
        assert_eq!(ftyp_len + mdat_size + moov.len(), bytes.len());
    }

    fn contains(haystack: &[u8], needle: &[u8]) -> bool {
        haystack.windows(needle.len()).any(|w| w == needle)
    }

    #[test]
    fn test_video_entry_carries_avcc_and_sync_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("avc.mov");
        let mut writer = Mp4Writer::create(&path, ContainerFormat::Mov).unwrap();
        let video = writer
            .add_track(&TrackSettings::Video(VideoSettings::default()))
            .unwrap();
        let config = AvcConfig {
            sps: vec![0x67, 0x42, 0xC0, 0x1F, 0xDA],
            pps: vec![0x68, 0xCE, 0x3C, 0x80],
        };
        writer.set_avc_config(video, config.clone()).unwrap();

        for i in 0..4u64 {
            writer
                .write_sample(
                    video,
                    EncodedSample {
                        time: i * 20,
                        duration: None,
                        data: Bytes::from(vec![0u8, 0, 0, 2, 0x65, 0x88]),
                        sync: i % 2 == 0,
                    },
                )
                .unwrap();
        }
        writer.finalize().unwrap();

        let bytes = std::fs::read(&path).unwrap();
        let mut avcc = Vec::new();
        avcc.extend_from_slice(&((8 + config.to_record().len()) as u32).to_be_bytes());
        avcc.extend_from_slice(b"avcC");
        avcc.extend_from_slice(&config.to_record());
        assert!(contains(&bytes, &avcc));

        // samples 1 and 3 are sync
        let mut stss = Vec::new();
        stss.extend_from_slice(&24u32.to_be_bytes());
        stss.extend_from_slice(b"stss");
        for value in [0u32, 2, 1, 3] {
            stss.extend_from_slice(&value.to_be_bytes());
        }
        assert!(contains(&bytes, &stss));
    }

    #[test]
    fn test_all_sync_track_omits_stss() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("intra.mov");
        let mut writer = Mp4Writer::create(&path, ContainerFormat::Mov).unwrap();
        let video = writer
            .add_track(&TrackSettings::Video(VideoSettings::default()))
            .unwrap();
        writer
            .write_sample(
                video,
                EncodedSample {
                    time: 0,
                    duration: None,
                    data: Bytes::from_static(&[0, 0, 0, 1, 0x65]),
                    sync: true,
                },
            )
            .unwrap();
        writer.finalize().unwrap();
        assert!(!contains(&std::fs::read(&path).unwrap(), b"stss"));
    }

    #[test]
    fn test_avc_config_rejected_on_audio_track() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = Mp4Writer::create(&dir.path().join("a.mov"), ContainerFormat::Mov).unwrap();
        let audio = writer
            .add_track(&TrackSettings::Audio(AudioSettings::default()))
            .unwrap();
        let config = AvcConfig {
            sps: vec![0x67],
            pps: vec![0x68],
        };
        assert!(matches!(
            writer.set_avc_config(audio, config.clone()),
            Err(SinkError::InvalidSettings(_))
        ));
        assert!(matches!(
            writer.set_avc_config(7, config),
            Err(SinkError::UnknownTrack(7))
        ));
    }

    #[test]
    fn test_duplicate_track_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = Mp4Writer::create(&dir.path().join("dup.mov"), ContainerFormat::Mov).unwrap();
        writer
            .add_track(&TrackSettings::Video(VideoSettings::default()))
            .unwrap();
        assert!(matches!(
            writer.add_track(&TrackSettings::Video(VideoSettings::default())),
            Err(SinkError::DuplicateTrack(_))
        ));
    }
}
