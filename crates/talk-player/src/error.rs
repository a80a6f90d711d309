//! Error types for each pipeline stage.
//!
//! End-of-stream is never an error at the reader/decoder level; it is reported as a
//! value ([`crate::reader::DecodeOutcome::EndOfStream`] or `Ok(None)`).

use std::path::PathBuf;

use crate::reader::MediaKind;

/// Failures while opening a container, a caption script or an output device.
#[derive(Debug, thiserror::Error)]
pub enum OpenError {
    #[error("cannot open {path:?}: {source}")]
    NotFound {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unrecognised container {path:?}: {reason}")]
    Probe { path: PathBuf, reason: String },

    #[error("no {kind} stream in {path:?}")]
    NoStream { path: PathBuf, kind: MediaKind },

    #[error("no decoder for {codec} in {path:?}")]
    NoDecoder { path: PathBuf, codec: String },

    /// A sample format nothing downstream can play without conversion.
    #[error("unsupported sample format: {0}")]
    UnsupportedFormat(String),

    #[error("output device error: {0}")]
    Device(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SeekError {
    #[error("seek before open")]
    NotInitialized,

    #[error("seek to {target_us} us failed: {reason}")]
    IoFailure { target_us: i64, reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("decode before open")]
    NotInitialized,

    #[error("read failed: {0}")]
    IoFailure(String),

    #[error("codec failure: {0}")]
    Codec(String),

    /// The decoder emitted a layout other than the one negotiated at open.
    #[error("decoded format changed from {expected} to {actual}")]
    FormatChanged { expected: String, actual: String },
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("cannot {op} while {state:?}")]
    InvalidState {
        op: &'static str,
        state: crate::playback::SinkState,
    },

    #[error("output device error: {0}")]
    Device(String),
}

#[derive(Debug, thiserror::Error)]
pub enum CaptionError {
    #[error("line {line}: {reason}")]
    Parse { line: usize, reason: String },

    #[error("invalid caption json: {0}")]
    Json(#[from] serde_json::Error),

    /// `merge` was asked to join captions separated by a gap.
    #[error("caption starting at {next_start_us} us does not touch one ending at {end_us} us")]
    Gap { end_us: i64, next_start_us: i64 },
}

/// Failures surfaced by the sync controller.
#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    #[error("no more captions")]
    NoMoreCaptions,

    #[error("audio ended before caption {index} finished")]
    EndOfStream { index: usize },

    #[error("caption index {index} out of range (0..{len})")]
    OutOfRange { index: usize, len: usize },

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Seek(#[from] SeekError),

    #[error(transparent)]
    Sink(#[from] SinkError),
}
