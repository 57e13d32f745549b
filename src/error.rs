use thiserror::Error;

use crate::providers::ModelError;

/// Fatal conditions for a single image.
///
/// None of these corrupt the pipeline; the same instance can keep
/// processing subsequent images.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("text detection failed")]
    Detection(#[source] ModelError),

    #[error("orientation classification failed")]
    Classification(#[source] ModelError),

    #[error("text recognition failed")]
    Recognition(#[source] ModelError),

    /// The classifier broke its contract of one verdict per crop.
    #[error("classifier returned {got} orientations for {expected} crops")]
    ClassifierMismatch { expected: usize, got: usize },

    /// The recognizer broke its contract of one line per crop.
    #[error("recognizer returned {got} lines for {expected} crops")]
    RecognizerMismatch { expected: usize, got: usize },

    #[error("slice strides must be non-zero")]
    ZeroStride,

    #[error("slicing would produce {count} tiles along one axis (limit {limit}); raise the stride")]
    TooManyTiles { count: usize, limit: usize },
}

/// Why a box could not be turned into a crop.
///
/// These are recovered locally: the pipeline drops the box and carries on.
#[derive(Debug, Error)]
pub enum CropError {
    #[error("quad crop needs exactly 4 points, got {0}")]
    PointCount(usize),

    #[error("degenerate box yields an empty crop")]
    Degenerate,
}
