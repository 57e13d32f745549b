use image::RgbImage;

use crate::{TextBox, TextLine};

/// Errors reported by a provider implementation.
pub type ModelError = Box<dyn std::error::Error + Send + Sync>;

/// Locates text regions in a decoded image.
///
/// Implementations apply their own confidence filtering; every returned
/// box is taken at face value. Boxes are in the coordinate space of the
/// image passed in: when the pipeline tiles a large image, `detect` runs
/// once per tile and the pipeline reconciles the offsets.
///
/// `&mut self` reflects that a provider instance is not assumed reentrant;
/// run one pipeline per worker or serialize access externally.
pub trait TextDetector {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<TextBox>, ModelError>;
}

/// Classifies the orientation of a batch of rectified crops.
///
/// Must return exactly one verdict per crop, in input order. The pipeline
/// applies the 180° rotation for crops reported as flipped.
pub trait OrientationClassifier {
    fn classify(&mut self, crops: &[RgbImage]) -> Result<Vec<Orientation>, ModelError>;
}

/// Transcribes a batch of rectified crops.
///
/// Must return exactly one line per crop, in input order; anything else is
/// treated as a broken contract by the pipeline.
pub trait TextRecognizer {
    fn recognize(&mut self, crops: &[RgbImage]) -> Result<Vec<TextLine>, ModelError>;
}

/// Orientation verdict for one crop.
#[derive(Debug, Clone, Copy)]
pub struct Orientation {
    /// True when the crop is upside down and needs a 180° rotation.
    pub flipped: bool,
    pub score: f32,
}
