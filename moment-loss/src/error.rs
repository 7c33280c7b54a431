use thiserror::Error;

use crate::config::SimTerm;

/// Errors that can occur while computing the similarity-aware span loss.
#[derive(Error, Debug)]
pub enum MomentLossError {
    /// No span pairs were provided.
    #[error("empty batch: at least one span pair is required")]
    EmptyBatch,

    /// A span with `end < start` was found. Signals a malformed upstream span.
    #[error("{set} span at row {row} has end < start")]
    InvertedSpan {
        /// Which span set contains the span (`"predicted"` or `"ground truth"`).
        set: &'static str,
        /// Batch row of the offending span.
        row: usize,
    },

    /// An input does not have one entry per batch row.
    #[error("batch size mismatch: {what} has {actual} rows, expected {expected}")]
    BatchSizeMismatch {
        /// The mismatched input.
        what: &'static str,
        /// The batch size.
        expected: usize,
        /// The size that was provided.
        actual: usize,
    },

    /// A batch row points to a video that does not exist.
    #[error("video index {index} at row {row} is out of range for {num_videos} videos")]
    VideoIndexOutOfRange {
        /// Batch row.
        row: usize,
        /// The video index found at that row.
        index: usize,
        /// Number of videos in the batch.
        num_videos: usize,
    },

    /// Duration-based clip lengths were configured but no durations were given.
    #[error("durations are required when clip lengths are derived from video durations")]
    MissingDurations,

    /// Clip lengths cannot be derived from the provided inputs.
    #[error("cannot derive clip length: provide durations or a similarity tensor")]
    UnknownClipLength,

    /// An enabled term needs a similarity tensor that was not provided.
    #[error("term {term:?} requires the {tensor} similarity tensor")]
    MissingSimilarity {
        /// The enabled term.
        term: SimTerm,
        /// The missing tensor.
        tensor: &'static str,
    },

    /// A video maps to zero clips.
    #[error("video {video} has no clips (duration {duration})")]
    EmptyClipSequence {
        /// Video index.
        video: usize,
        /// Duration that produced the empty sequence.
        duration: f32,
    },

    /// Tensor shape incompatibility.
    #[error("tensor dimension mismatch: expected {expected}, got {actual}")]
    ShapeMismatch {
        /// Expected shape.
        expected: String,
        /// Actual shape.
        actual: String,
    },

    /// Invalid configuration value.
    #[error("invalid parameter '{parameter}': {reason}")]
    InvalidParameter {
        /// Parameter name.
        parameter: String,
        /// Why it is invalid.
        reason: String,
    },
}

/// A specialized `Result` type for span loss operations.
pub type MomentLossResult<T> = Result<T, MomentLossError>;
