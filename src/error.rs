//! Error types for the media tooling and the annotation store.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Result type for annotation store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised while probing, counting or re-encoding videos.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("ffmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("ffprobe not found in PATH")]
    FfprobeNotFound,

    #[error("video not found: {0}")]
    FileNotFound(PathBuf),

    #[error("ffprobe failed: {message}")]
    ProbeFailed {
        message: String,
        stderr: Option<String>,
    },

    #[error("unparsable probe output: {0}")]
    UnparsableProbe(String),

    #[error("ffmpeg re-encode failed with exit code {exit_code:?}")]
    EncodeFailed {
        exit_code: Option<i32>,
        stderr: Option<String>,
    },

    #[error("re-encoded video still has {actual} frames, expected {expected}")]
    CorrectionIneffective { expected: u64, actual: u64 },

    /// The original could not be swapped out; the corrected copy is left at `orphan`.
    #[error("could not replace {original}: {source}; corrected copy left at {orphan}")]
    ReplaceFailed {
        original: PathBuf,
        orphan: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),
}

impl MediaError {
    pub fn probe_failed(message: impl Into<String>, stderr: Option<String>) -> Self {
        Self::ProbeFailed {
            message: message.into(),
            stderr,
        }
    }
}

/// Errors raised by annotation mutations. Every variant leaves the dataset
/// file as it was before the call; an edit whose action-log append fails is
/// written back to its prior contents before `ActionLog` is returned.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid dataset name: {0:?}")]
    InvalidName(String),

    #[error("dataset {path} could not be read: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("dataset {path} is malformed: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("record {0} not found")]
    RecordNotFound(String),

    #[error("{count} records share id {id}")]
    DuplicateId { id: String, count: usize },

    #[error("invalid bounding box {0:?}: expected x1 < x2 and y1 < y2")]
    InvalidBox([f32; 4]),

    #[error("confidence {0} outside [0, 1]")]
    InvalidConfidence(f32),

    #[error("dataset {0} changed while it was being edited")]
    Conflict(String),

    #[error("action {0} not found")]
    ActionNotFound(String),

    #[error("action {0} was already undone")]
    AlreadyUndone(String),

    #[error("action {0} is an undo and cannot itself be undone")]
    NotUndoable(String),

    #[error("cannot undo action {action_id}: {reason}")]
    UndoPrecondition { action_id: String, reason: String },

    #[error("writing dataset {path} failed: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("action log {path} failed: {message}")]
    ActionLog { path: PathBuf, message: String },
}
