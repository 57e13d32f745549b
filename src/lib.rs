//! Image-to-text extraction pipeline: detection, reading-order sorting,
//! crop rectification, optional orientation correction, recognition and
//! confidence filtering, over pluggable model providers.
//!
//! A pipeline instance owns its providers and processes one image at a
//! time. For parallel throughput, build one instance per worker and shard
//! the input list across them (for example by index modulo worker count);
//! nothing is shared between instances.

use std::time::Instant;

use image::{imageops, RgbImage};
use tracing::instrument;

mod error;
pub mod providers;
mod result;
pub mod slice;
pub mod util;

pub use error::{CropError, PipelineError};
pub use providers::{
    ModelError, Orientation, OrientationClassifier, TextDetector, TextRecognizer,
};
pub use result::*;
pub use slice::SliceConfig;

/// Crop counts above this get a debug-log advisory before recognition;
/// not a limit.
const RECOGNITION_ADVISORY: usize = 1000;

/// How the detector describes regions, which picks the crop strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoxKind {
    /// Clean 4-point quads in detector order; perspective-rectified.
    Quad,
    /// Arbitrary polygons; cropped via their minimum rotated rectangle.
    Polygon,
}

/// Per-call tuning for [`TextPipeline::process`].
#[derive(Debug, Clone, Copy)]
pub struct ProcessOptions {
    pub box_kind: BoxKind,
    /// Minimum recognition confidence for a result to survive.
    pub drop_score: f32,
    /// Height/width ratio above which a crop is treated as a sideways
    /// line and rotated 90°.
    pub rotate_threshold: f32,
    /// Enables tiled detection for images beyond the detector's working
    /// resolution.
    pub slice: Option<SliceConfig>,
    /// Applies orientation correction when a classifier was supplied.
    pub classify: bool,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            box_kind: BoxKind::Quad,
            drop_score: 0.5,
            rotate_threshold: 1.5,
            slice: None,
            classify: true,
        }
    }
}

pub struct TextPipelineBuilder {
    detector: Box<dyn TextDetector>,
    classifier: Option<Box<dyn OrientationClassifier>>,
    recognizer: Box<dyn TextRecognizer>,
}

impl TextPipelineBuilder {
    pub fn new(
        detector: impl TextDetector + 'static,
        recognizer: impl TextRecognizer + 'static,
    ) -> Self {
        Self {
            detector: Box::new(detector),
            classifier: None,
            recognizer: Box::new(recognizer),
        }
    }

    /// Adds 180°-flip correction between cropping and recognition.
    pub fn classifier(mut self, classifier: impl OrientationClassifier + 'static) -> Self {
        self.classifier = Some(Box::new(classifier));
        self
    }

    pub fn build(self) -> TextPipeline {
        TextPipeline {
            detector: self.detector,
            classifier: self.classifier,
            recognizer: self.recognizer,
            #[cfg(feature = "debug")]
            crop_index: 0,
        }
    }
}

pub struct TextPipeline {
    detector: Box<dyn TextDetector>,
    classifier: Option<Box<dyn OrientationClassifier>>,
    recognizer: Box<dyn TextRecognizer>,
    /// Running index for dumped crops, continued across calls.
    #[cfg(feature = "debug")]
    crop_index: u64,
}

impl TextPipeline {
    /// Runs the full pipeline over one decoded image.
    ///
    /// Returns the sentinel output (`regions: None`) for an empty input
    /// image or when nothing is detected; that is a normal outcome, not
    /// an error. Provider failures and batch-count contract violations
    /// abort this image only; the pipeline stays usable.
    #[instrument(level = "debug", skip(self, image))]
    pub fn process(
        &mut self,
        image: &RgbImage,
        options: ProcessOptions,
    ) -> Result<PipelineOutput, PipelineError> {
        let mut timing = TimingRecord::default();

        if image.width() == 0 || image.height() == 0 {
            log::debug!("no valid image provided");
            return Ok(PipelineOutput {
                regions: None,
                timing,
            });
        }

        let start = Instant::now();

        let detect_start = Instant::now();
        let mut boxes = match &options.slice {
            Some(config) => slice::detect_sliced(self.detector.as_mut(), image, config)?,
            None => self
                .detector
                .detect(image)
                .map_err(PipelineError::Detection)?,
        };
        timing.detection = detect_start.elapsed();

        if boxes.is_empty() {
            log::debug!(
                "no text regions found, detection took {:?}",
                timing.detection
            );
            timing.total = start.elapsed();
            return Ok(PipelineOutput {
                regions: None,
                timing,
            });
        }
        log::debug!(
            "{} text regions detected in {:?}",
            boxes.len(),
            timing.detection
        );

        for text_box in &mut boxes {
            text_box.clamp_to(image.width(), image.height());
        }

        let boxes = util::sort_boxes(boxes);

        let mut kept = Vec::with_capacity(boxes.len());
        let mut crops = Vec::with_capacity(boxes.len());
        for text_box in boxes {
            let crop = match options.box_kind {
                BoxKind::Quad => util::crop_quad(image, &text_box, options.rotate_threshold),
                BoxKind::Polygon => util::crop_min_rect(image, &text_box, options.rotate_threshold),
            };
            match crop {
                Ok(crop) => {
                    kept.push(text_box);
                    crops.push(crop);
                }
                Err(err) => log::trace!("skipping region: {err}"),
            }
        }

        if options.classify {
            if let Some(classifier) = self.classifier.as_mut() {
                let classify_start = Instant::now();
                let orientations = classifier
                    .classify(&crops)
                    .map_err(PipelineError::Classification)?;
                if orientations.len() != crops.len() {
                    return Err(PipelineError::ClassifierMismatch {
                        expected: crops.len(),
                        got: orientations.len(),
                    });
                }
                for (crop, orientation) in crops.iter_mut().zip(&orientations) {
                    if orientation.flipped {
                        *crop = imageops::rotate180(crop);
                    }
                }
                timing.classification = classify_start.elapsed();
                log::debug!(
                    "classified {} crops in {:?}",
                    crops.len(),
                    timing.classification
                );
            }
        }

        #[cfg(feature = "debug")]
        self.dump_crops(&crops);

        if crops.len() > RECOGNITION_ADVISORY {
            log::debug!(
                "recognizing {} crops, time and memory cost may be large",
                crops.len()
            );
        }

        let recognize_start = Instant::now();
        let lines = self
            .recognizer
            .recognize(&crops)
            .map_err(PipelineError::Recognition)?;
        timing.recognition = recognize_start.elapsed();
        if lines.len() != crops.len() {
            return Err(PipelineError::RecognizerMismatch {
                expected: crops.len(),
                got: lines.len(),
            });
        }
        log::debug!(
            "recognized {} lines in {:?}",
            lines.len(),
            timing.recognition
        );

        let regions = kept
            .into_iter()
            .zip(lines)
            .filter(|(_, line)| line.score >= options.drop_score)
            .map(|(bounds, text)| OcrResult { bounds, text })
            .collect();
        timing.total = start.elapsed();

        Ok(PipelineOutput {
            regions: Some(regions),
            timing,
        })
    }

    #[cfg(feature = "debug")]
    fn dump_crops(&mut self, crops: &[RgbImage]) {
        std::fs::create_dir_all("crop_dump").unwrap();
        for crop in crops {
            crop.save(format!("crop_dump/{}.png", self.crop_index))
                .unwrap();
            self.crop_index += 1;
        }
    }
}
