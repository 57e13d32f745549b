use std::time::Duration;

use geo::{BoundingRect, Coord, LineString, MapCoords, Polygon, Rect, Translate};

/// A detected text region.
///
/// The wrapped polygon is either a quad (exactly 4 vertices in the
/// detector's order, first vertex at the top-left) or an arbitrary
/// polygon with at least 4 vertices. Coordinates are clamped to the
/// image bounds by the pipeline before sorting and cropping.
#[derive(Debug, Clone, PartialEq)]
pub struct TextBox {
    pub rect: Polygon<f32>,
}

impl TextBox {
    pub fn new(rect: Polygon<f32>) -> Self {
        Self { rect }
    }

    pub fn from_points(points: impl IntoIterator<Item = (f32, f32)>) -> Self {
        let coords = points
            .into_iter()
            .map(|(x, y)| Coord { x, y })
            .collect::<Vec<_>>();
        Self {
            rect: Polygon::new(LineString::new(coords), vec![]),
        }
    }

    /// Vertices in detector order, without the closing vertex geo appends.
    pub fn points(&self) -> &[Coord<f32>] {
        let ring = &self.rect.exterior().0;
        match ring.len() {
            0 => ring,
            n => &ring[..n - 1],
        }
    }

    /// The first vertex, which detectors emit as the top-left corner.
    /// Used as the reading-order sort key.
    pub fn top_left(&self) -> Coord<f32> {
        self.points()
            .first()
            .copied()
            .unwrap_or(Coord { x: 0.0, y: 0.0 })
    }

    /// Axis-aligned bounding extent.
    pub fn extent(&self) -> Rect<f32> {
        self.rect
            .bounding_rect()
            .unwrap_or_else(|| Rect::new(Coord { x: 0.0, y: 0.0 }, Coord { x: 0.0, y: 0.0 }))
    }

    pub(crate) fn clamp_to(&mut self, width: u32, height: u32) {
        let max_x = width.saturating_sub(1) as f32;
        let max_y = height.saturating_sub(1) as f32;
        self.rect = self.rect.map_coords(|c| Coord {
            x: c.x.clamp(0.0, max_x),
            y: c.y.clamp(0.0, max_y),
        });
    }

    pub(crate) fn translate_by(&mut self, dx: f32, dy: f32) {
        self.rect = self.rect.translate(dx, dy);
    }
}

/// One recognized line of text with its confidence.
#[derive(Debug, Clone, PartialEq)]
pub struct TextLine {
    pub text: String,
    pub score: f32,
}

/// A surviving region: its box paired with its transcription.
#[derive(Debug, Clone)]
pub struct OcrResult {
    pub bounds: TextBox,
    pub text: TextLine,
}

/// Wall-clock time spent in each stage of one `process` call.
///
/// Stages that did not run stay at zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimingRecord {
    pub detection: Duration,
    pub classification: Duration,
    pub recognition: Duration,
    pub total: Duration,
}

/// The outcome of processing one image.
///
/// `regions` is `None` when nothing was detected (or the input image was
/// empty); `Some` with an empty vec means everything fell below the drop
/// score.
#[derive(Debug)]
pub struct PipelineOutput {
    pub regions: Option<Vec<OcrResult>>,
    pub timing: TimingRecord,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn points_excludes_closing_vertex() {
        let tb = TextBox::from_points([(0.0, 0.0), (4.0, 0.0), (4.0, 2.0), (0.0, 2.0)]);
        assert_eq!(tb.points().len(), 4);
        assert_eq!(tb.top_left(), Coord { x: 0.0, y: 0.0 });
    }

    #[test]
    fn clamp_limits_coordinates_to_image_bounds() {
        let mut tb = TextBox::from_points([(-3.0, 5.0), (120.0, 5.0), (120.0, 60.0), (-3.0, 60.0)]);
        tb.clamp_to(100, 50);
        let pts = tb.points().to_vec();
        assert_eq!(pts[0], Coord { x: 0.0, y: 5.0 });
        assert_eq!(pts[1], Coord { x: 99.0, y: 5.0 });
        assert_eq!(pts[2], Coord { x: 99.0, y: 49.0 });
    }

    #[test]
    fn translate_shifts_every_vertex() {
        let mut tb = TextBox::from_points([(1.0, 1.0), (2.0, 1.0), (2.0, 2.0), (1.0, 2.0)]);
        tb.translate_by(10.0, 20.0);
        assert_eq!(tb.top_left(), Coord { x: 11.0, y: 21.0 });
    }

    #[test]
    fn extent_spans_all_vertices() {
        let tb = TextBox::from_points([(2.0, 3.0), (8.0, 1.0), (9.0, 6.0), (1.0, 7.0)]);
        let extent = tb.extent();
        assert_eq!(extent.min(), Coord { x: 1.0, y: 1.0 });
        assert_eq!(extent.max(), Coord { x: 9.0, y: 7.0 });
    }
}
