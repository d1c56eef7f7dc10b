//! Encoding to a container file
//!
//! The encode sink owns the writer state machine and per-track inputs. Video
//! is compressed to H.264 on the writer thread; the MP4 writer lays the
//! samples out as a QuickTime/ISO-BMFF movie.

pub mod mp4;
pub mod nal;
pub mod sink;
pub mod types;
pub mod video;

pub use mp4::Mp4Writer;
pub use nal::AvcConfig;
pub use sink::{EncodeSink, TrackInput};
pub use video::{EncodedFrame, H264Encoder, I420Frame};
pub use types::{
    AudioSettings, ContainerFormat, ContainerWriter, EncodedSample, FinishResult, SinkError,
    TrackSettings, VideoCodec, VideoSettings, WriterState, MOVIE_TIMESCALE, VIDEO_TIMESCALE,
};
