//! Local session recording
//!
//! The recorder reads the shared capture stream (never mutating it), encodes
//! it with the first supported encoding and keeps the output in memory until
//! the call ends and the user asks for the file.

pub mod encoder;
mod recorder;

pub use encoder::{
    EncoderFactory, EncoderOptions, MediaEncoder, WavEncoder, WavEncoderFactory,
    DEFAULT_BITS_PER_SECOND, MIME_CANDIDATES,
};
pub use recorder::{LocalRecorder, RecorderConfig, RecordingFile};
