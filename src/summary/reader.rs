//! Movie file reader
//!
//! Walks the box tree of a finished QuickTime/MP4 file and reports
//! track-level metadata of its first video track.

use byteorder::{BigEndian, ReadBytesExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Cursor, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Reader errors
#[derive(Error, Debug)]
pub enum ReadError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Not a readable movie file: {0}")]
    NotReadable(String),

    #[error("File has no video track")]
    NoVideoTrack,
}

/// Metadata of the first video track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoSummary {
    /// Samples per second of media time
    pub frame_rate: f64,
    pub width: u32,
    pub height: u32,
    /// Sample data bits per second of media time
    pub estimated_bitrate: f64,
    pub total_video_bytes: u64,
    pub duration_secs: f64,
}

impl VideoSummary {
    pub fn display_lines(&self) -> Vec<String> {
        vec![
            format!("Frame Rate: {:.2}fps", self.frame_rate),
            format!("Resolution: {}x{}", self.width, self.height),
            format!("Bitrate: {:.0}bps", self.estimated_bitrate),
            format!(
                "Video Size: {:.2}mb",
                self.total_video_bytes as f64 / 1024.0 / 1024.0
            ),
        ]
    }
}

impl fmt::Display for VideoSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_lines().join("\n"))
    }
}

#[derive(Debug, Clone, Default)]
struct TrackInfo {
    handler: [u8; 4],
    codec: [u8; 4],
    width: u32,
    height: u32,
    timescale: u32,
    duration: u64,
    sample_count: u64,
    stts_duration: u64,
    total_bytes: u64,
    /// AVCDecoderConfigurationRecord from the sample entry
    avc_config: Option<Vec<u8>>,
}

impl TrackInfo {
    fn is_video(&self) -> bool {
        &self.handler == b"vide"
    }

    fn duration_secs(&self) -> f64 {
        if self.timescale == 0 {
            return 0.0;
        }
        let ticks = if self.duration > 0 {
            self.duration
        } else {
            self.stts_duration
        };
        ticks as f64 / self.timescale as f64
    }
}

/// Read-only view of a finished movie file
#[derive(Debug)]
pub struct AssetReader {
    path: PathBuf,
    major_brand: [u8; 4],
    tracks: Vec<TrackInfo>,
}

impl AssetReader {
    /// Open and parse a movie file
    pub fn open(path: &Path) -> Result<Self, ReadError> {
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        let mut major_brand = None;
        let mut moov = None;
        let mut offset = 0u64;

        while offset < file_len {
            reader.seek(SeekFrom::Start(offset))?;
            let (box_type, size, header_len) =
                read_header(&mut reader, file_len - offset).map_err(not_readable)?;
            let end = if size == 0 {
                file_len
            } else {
                offset.checked_add(size).unwrap_or(u64::MAX)
            };
            if end > file_len {
                return Err(ReadError::NotReadable(format!(
                    "box '{}' at {} runs past the end of the file",
                    fourcc_str(&box_type),
                    offset
                )));
            }

            if offset == 0 && &box_type != b"ftyp" {
                return Err(ReadError::NotReadable("missing ftyp box".into()));
            }
            let content_len = (end - offset - header_len) as usize;
            match &box_type {
                b"ftyp" => {
                    let mut brand = [0u8; 4];
                    reader.read_exact(&mut brand).map_err(not_readable)?;
                    major_brand = Some(brand);
                }
                b"moov" => {
                    let mut data = vec![0u8; content_len];
                    reader.read_exact(&mut data).map_err(not_readable)?;
                    moov = Some(data);
                }
                _ => {}
            }
            tracing::trace!("Box '{}' at {} ({} bytes)", fourcc_str(&box_type), offset, end - offset);
            offset = end;
        }

        let major_brand =
            major_brand.ok_or_else(|| ReadError::NotReadable("missing ftyp box".into()))?;
        let moov = moov.ok_or_else(|| ReadError::NotReadable("missing moov box".into()))?;
        let tracks = parse_moov(&moov).map_err(not_readable)?;

        tracing::debug!("Opened {:?}: {} tracks", path, tracks.len());
        Ok(Self {
            path: path.to_path_buf(),
            major_brand,
            tracks,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn major_brand(&self) -> String {
        fourcc_str(&self.major_brand)
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    /// Codec FourCC of the first video track
    pub fn video_codec(&self) -> Option<String> {
        self.tracks
            .iter()
            .find(|t| t.is_video())
            .map(|t| fourcc_str(&t.codec))
    }

    /// `avcC` record of the first video track, if it has one
    pub fn video_decoder_config(&self) -> Option<&[u8]> {
        self.tracks
            .iter()
            .find(|t| t.is_video())
            .and_then(|t| t.avc_config.as_deref())
    }

    /// Summarize the first video track
    pub fn summarize(&self) -> Result<VideoSummary, ReadError> {
        let track = self
            .tracks
            .iter()
            .find(|t| t.is_video())
            .ok_or(ReadError::NoVideoTrack)?;

        let duration_secs = track.duration_secs();
        let (frame_rate, estimated_bitrate) = if duration_secs > 0.0 {
            (
                track.sample_count as f64 / duration_secs,
                track.total_bytes as f64 * 8.0 / duration_secs,
            )
        } else {
            (0.0, 0.0)
        };

        Ok(VideoSummary {
            frame_rate,
            width: track.width,
            height: track.height,
            estimated_bitrate,
            total_video_bytes: track.total_bytes,
            duration_secs,
        })
    }
}

fn not_readable(e: io::Error) -> ReadError {
    ReadError::NotReadable(e.to_string())
}

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

fn fourcc_str(code: &[u8; 4]) -> String {
    code.iter()
        .map(|&b| {
            if b.is_ascii_graphic() || b == b' ' {
                b as char
            } else {
                '?'
            }
        })
        .collect()
}

/// Read a box header; returns (type, total size or 0 for "to end", header length)
fn read_header<R: Read>(reader: &mut R, remaining: u64) -> io::Result<([u8; 4], u64, u64)> {
    if remaining < 8 {
        return Err(invalid("truncated box header"));
    }
    let size32 = reader.read_u32::<BigEndian>()?;
    let mut box_type = [0u8; 4];
    reader.read_exact(&mut box_type)?;

    let (size, header_len) = match size32 {
        0 => (0, 8),
        1 => (reader.read_u64::<BigEndian>()?, 16),
        n => (n as u64, 8),
    };
    if size != 0 && size < header_len {
        return Err(invalid(format!(
            "box '{}' has invalid size {}",
            fourcc_str(&box_type),
            size
        )));
    }
    Ok((box_type, size, header_len))
}

/// Split a container box's content into its child boxes
fn children(data: &[u8]) -> io::Result<Vec<([u8; 4], &[u8])>> {
    let mut boxes = Vec::new();
    let mut pos = 0usize;
    while pos < data.len() {
        let mut cursor = Cursor::new(&data[pos..]);
        let (box_type, size, header_len) = read_header(&mut cursor, (data.len() - pos) as u64)?;
        let size = if size == 0 { (data.len() - pos) as u64 } else { size };
        let end = (pos as u64).checked_add(size).unwrap_or(u64::MAX);
        if end > data.len() as u64 {
            return Err(invalid(format!(
                "box '{}' overruns its parent",
                fourcc_str(&box_type)
            )));
        }
        boxes.push((box_type, &data[pos + header_len as usize..end as usize]));
        pos = end as usize;
    }
    Ok(boxes)
}

fn child<'a>(data: &'a [u8], box_type: &[u8; 4]) -> io::Result<Option<&'a [u8]>> {
    Ok(children(data)?
        .into_iter()
        .find(|(t, _)| t == box_type)
        .map(|(_, content)| content))
}

fn parse_moov(moov: &[u8]) -> io::Result<Vec<TrackInfo>> {
    let mut tracks = Vec::new();
    for (box_type, content) in children(moov)? {
        if &box_type == b"trak" {
            tracks.push(parse_trak(content)?);
        }
    }
    Ok(tracks)
}

fn parse_trak(trak: &[u8]) -> io::Result<TrackInfo> {
    let mut info = TrackInfo::default();

    if let Some(tkhd) = child(trak, b"tkhd")? {
        let mut r = Cursor::new(tkhd);
        let version = r.read_u8()?;
        // flags, times, track id, reserved, duration
        let skip = if version == 1 { 3 + 8 + 8 + 4 + 4 + 8 } else { 3 + 4 + 4 + 4 + 4 + 4 };
        // reserved, layer, alternate group, volume, reserved, matrix
        r.seek(SeekFrom::Current(skip + 8 + 2 + 2 + 2 + 2 + 36))?;
        info.width = r.read_u32::<BigEndian>()? >> 16;
        info.height = r.read_u32::<BigEndian>()? >> 16;
    }

    let mdia = child(trak, b"mdia")?.ok_or_else(|| invalid("trak without mdia"))?;
    let mdhd = child(mdia, b"mdhd")?.ok_or_else(|| invalid("mdia without mdhd"))?;
    let mut r = Cursor::new(mdhd);
    let version = r.read_u8()?;
    if version == 1 {
        r.seek(SeekFrom::Current(3 + 8 + 8))?;
        info.timescale = r.read_u32::<BigEndian>()?;
        info.duration = r.read_u64::<BigEndian>()?;
    } else {
        r.seek(SeekFrom::Current(3 + 4 + 4))?;
        info.timescale = r.read_u32::<BigEndian>()?;
        info.duration = r.read_u32::<BigEndian>()? as u64;
    }

    if let Some(hdlr) = child(mdia, b"hdlr")? {
        let mut r = Cursor::new(hdlr);
        r.seek(SeekFrom::Start(8))?;
        r.read_exact(&mut info.handler)?;
    }

    let stbl = child(mdia, b"minf")?
        .map(|minf| child(minf, b"stbl"))
        .transpose()?
        .flatten();
    if let Some(stbl) = stbl {
        parse_stbl(stbl, &mut info)?;
    }
    Ok(info)
}

/// Fixed fields of a visual sample entry before its child boxes
const VISUAL_SAMPLE_ENTRY_LEN: usize = 78;

fn parse_stbl(stbl: &[u8], info: &mut TrackInfo) -> io::Result<()> {
    if let Some(stsd) = child(stbl, b"stsd")? {
        let entries = stsd.get(8..).ok_or_else(|| invalid("truncated stsd"))?;
        if let Some((codec, entry)) = children(entries)?.into_iter().next() {
            info.codec = codec;
            if info.is_video() && entry.len() > VISUAL_SAMPLE_ENTRY_LEN {
                info.avc_config = child(&entry[VISUAL_SAMPLE_ENTRY_LEN..], b"avcC")?.map(<[u8]>::to_vec);
            }
        }
    }

    if let Some(stts) = child(stbl, b"stts")? {
        let mut r = Cursor::new(stts);
        r.seek(SeekFrom::Start(4))?;
        let entries = r.read_u32::<BigEndian>()?;
        let mut samples = 0u64;
        let mut ticks = 0u64;
        for _ in 0..entries {
            let count = r.read_u32::<BigEndian>()? as u64;
            let delta = r.read_u32::<BigEndian>()? as u64;
            samples += count;
            ticks += count * delta;
        }
        info.sample_count = samples;
        info.stts_duration = ticks;
    }

    if let Some(stsz) = child(stbl, b"stsz")? {
        let mut r = Cursor::new(stsz);
        r.seek(SeekFrom::Start(4))?;
        let uniform = r.read_u32::<BigEndian>()? as u64;
        let count = r.read_u32::<BigEndian>()? as u64;
        info.total_bytes = if uniform != 0 {
            uniform * count
        } else {
            let mut total = 0u64;
            for _ in 0..count {
                total += r.read_u32::<BigEndian>()? as u64;
            }
            total
        };
        if info.sample_count == 0 {
            info.sample_count = count;
        }
    }
    Ok(())
}
