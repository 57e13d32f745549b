use geo::{Coord, Rect};
use image::{imageops, RgbImage};
use tracing::instrument;

use crate::{
    error::PipelineError,
    providers::TextDetector,
    TextBox,
};

/// Pixels of extra context on each interior tile edge, so a line that
/// straddles a seam is fully contained in at least one tile.
const TILE_OVERLAP: u32 = 10;

/// Refuse to run detection over absurd tile counts; almost always a
/// mis-entered stride.
const MAX_TILES_PER_AXIS: usize = 500;

/// Tiled-detection tuning. Strides partition the image; the merge
/// thresholds decide how close two fragments must be, per axis, to be
/// rejoined across a seam.
#[derive(Debug, Clone, Copy)]
pub struct SliceConfig {
    pub horizontal_stride: u32,
    pub vertical_stride: u32,
    pub merge_x_threshold: f32,
    pub merge_y_threshold: f32,
}

impl Default for SliceConfig {
    fn default() -> Self {
        Self {
            horizontal_stride: 300,
            vertical_stride: 500,
            merge_x_threshold: 50.0,
            merge_y_threshold: 35.0,
        }
    }
}

/// A rectangular sub-region of the source image, by offset and size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Tile {
    pub v_start: u32,
    pub h_start: u32,
    pub width: u32,
    pub height: u32,
}

pub(crate) fn tiles(
    width: u32,
    height: u32,
    config: &SliceConfig,
) -> Result<Vec<Tile>, PipelineError> {
    if config.horizontal_stride == 0 || config.vertical_stride == 0 {
        return Err(PipelineError::ZeroStride);
    }
    let v_count = height.div_ceil(config.vertical_stride) as usize;
    let h_count = width.div_ceil(config.horizontal_stride) as usize;
    for count in [v_count, h_count] {
        if count >= MAX_TILES_PER_AXIS {
            return Err(PipelineError::TooManyTiles {
                count,
                limit: MAX_TILES_PER_AXIS,
            });
        }
    }

    let mut tiles = Vec::with_capacity(v_count * h_count);
    for v in 0..v_count as u32 {
        let v_start = (v * config.vertical_stride).saturating_sub(TILE_OVERLAP);
        let v_end = ((v + 1) * config.vertical_stride + TILE_OVERLAP).min(height);
        for h in 0..h_count as u32 {
            let h_start = (h * config.horizontal_stride).saturating_sub(TILE_OVERLAP);
            let h_end = ((h + 1) * config.horizontal_stride + TILE_OVERLAP).min(width);
            tiles.push(Tile {
                v_start,
                h_start,
                width: h_end - h_start,
                height: v_end - v_start,
            });
        }
    }
    Ok(tiles)
}

/// Runs the detector once per overlapping tile, lifts each tile's boxes
/// into global coordinates, and rejoins fragments split across seams.
#[instrument(level = "debug", skip(detector, image, config))]
pub(crate) fn detect_sliced(
    detector: &mut dyn TextDetector,
    image: &RgbImage,
    config: &SliceConfig,
) -> Result<Vec<TextBox>, PipelineError> {
    let tiles = tiles(image.width(), image.height(), config)?;
    log::debug!(
        "slicing {}x{} image into {} tiles",
        image.width(),
        image.height(),
        tiles.len()
    );

    let mut collected = Vec::new();
    for tile in tiles {
        let view =
            imageops::crop_imm(image, tile.h_start, tile.v_start, tile.width, tile.height)
                .to_image();
        let boxes = detector.detect(&view).map_err(PipelineError::Detection)?;
        log::trace!("tile at ({}, {}): {} boxes", tile.h_start, tile.v_start, boxes.len());
        for mut text_box in boxes {
            text_box.translate_by(tile.h_start as f32, tile.v_start as f32);
            collected.push(text_box);
        }
    }

    let before = collected.len();
    let merged = merge_fragments(collected, config.merge_x_threshold, config.merge_y_threshold);
    if merged.len() != before {
        log::debug!("merged {} fragments into {} boxes", before, merged.len());
    }
    Ok(merged)
}

/// Rejoins boxes fragmented across tile seams.
///
/// Union-find over bounding extents: two boxes unite when the gap between
/// their extents is within the threshold on both axes (overlap counts),
/// and uniting is transitive. A group of one keeps its original box
/// untouched; a group of two or more becomes the axis-aligned quad of the
/// union extent.
pub(crate) fn merge_fragments(
    boxes: Vec<TextBox>,
    x_threshold: f32,
    y_threshold: f32,
) -> Vec<TextBox> {
    if boxes.len() < 2 {
        return boxes;
    }

    let extents = boxes.iter().map(TextBox::extent).collect::<Vec<_>>();
    let mut parent = (0..boxes.len()).collect::<Vec<_>>();

    fn find(parent: &mut [usize], mut i: usize) -> usize {
        while parent[i] != i {
            parent[i] = parent[parent[i]];
            i = parent[i];
        }
        i
    }

    for i in 0..extents.len() {
        for j in (i + 1)..extents.len() {
            if within_threshold(&extents[i], &extents[j], x_threshold, y_threshold) {
                let (a, b) = (find(&mut parent, i), find(&mut parent, j));
                if a != b {
                    // Smaller index wins so output follows scan order.
                    parent[a.max(b)] = a.min(b);
                }
            }
        }
    }

    let mut groups = vec![Vec::new(); boxes.len()];
    for i in 0..boxes.len() {
        let root = find(&mut parent, i);
        groups[root].push(i);
    }

    let mut boxes = boxes.into_iter().map(Some).collect::<Vec<_>>();
    let mut merged = Vec::new();
    for group in &groups {
        match group.as_slice() {
            [] => {}
            [single] => merged.push(boxes[*single].take().expect("box consumed once")),
            members => {
                let union = members
                    .iter()
                    .map(|&i| extents[i])
                    .reduce(union_rect)
                    .expect("group is non-empty");
                let (min, max) = (union.min(), union.max());
                merged.push(TextBox::from_points([
                    (min.x, min.y),
                    (max.x, min.y),
                    (max.x, max.y),
                    (min.x, max.y),
                ]));
            }
        }
    }
    merged
}

fn within_threshold(a: &Rect<f32>, b: &Rect<f32>, x_threshold: f32, y_threshold: f32) -> bool {
    let x_gap = a.min().x.max(b.min().x) - a.max().x.min(b.max().x);
    let y_gap = a.min().y.max(b.min().y) - a.max().y.min(b.max().y);
    x_gap <= x_threshold && y_gap <= y_threshold
}

fn union_rect(a: Rect<f32>, b: Rect<f32>) -> Rect<f32> {
    Rect::new(
        Coord {
            x: a.min().x.min(b.min().x),
            y: a.min().y.min(b.min().y),
        },
        Coord {
            x: a.max().x.max(b.max().x),
            y: a.max().y.max(b.max().y),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ModelError;

    fn config(h_stride: u32, v_stride: u32) -> SliceConfig {
        SliceConfig {
            horizontal_stride: h_stride,
            vertical_stride: v_stride,
            ..SliceConfig::default()
        }
    }

    fn quad(x: f32, y: f32, w: f32, h: f32) -> TextBox {
        TextBox::from_points([(x, y), (x + w, y), (x + w, y + h), (x, y + h)])
    }

    #[test]
    fn image_within_one_stride_gets_a_single_full_tile() {
        let tiles = tiles(200, 400, &config(300, 500)).unwrap();
        assert_eq!(
            tiles,
            vec![Tile {
                v_start: 0,
                h_start: 0,
                width: 200,
                height: 400
            }]
        );
    }

    #[test]
    fn tiles_overlap_across_the_seam() {
        let tiles = tiles(100, 800, &config(300, 500)).unwrap();
        assert_eq!(tiles.len(), 2);
        assert_eq!(tiles[0].v_start, 0);
        assert_eq!(tiles[0].height, 510);
        assert_eq!(tiles[1].v_start, 490);
        assert_eq!(tiles[1].height, 310);
        // Both rows of tiles see the 20 pixels around y=500.
    }

    #[test]
    fn zero_stride_is_rejected() {
        assert!(matches!(
            tiles(100, 100, &config(0, 500)),
            Err(PipelineError::ZeroStride)
        ));
    }

    #[test]
    fn absurd_tile_counts_are_rejected() {
        assert!(matches!(
            tiles(100, 10_000, &config(300, 1)),
            Err(PipelineError::TooManyTiles { .. })
        ));
    }

    #[test]
    fn nearby_fragments_merge_to_the_union_extent() {
        let merged = merge_fragments(
            vec![quad(0.0, 0.0, 100.0, 20.0), quad(110.0, 2.0, 80.0, 20.0)],
            50.0,
            35.0,
        );
        assert_eq!(merged.len(), 1);
        let extent = merged[0].extent();
        assert_eq!(extent.min(), Coord { x: 0.0, y: 0.0 });
        assert_eq!(extent.max(), Coord { x: 190.0, y: 22.0 });
    }

    #[test]
    fn distant_boxes_stay_distinct() {
        let merged = merge_fragments(
            vec![quad(0.0, 0.0, 100.0, 20.0), quad(200.0, 300.0, 80.0, 20.0)],
            50.0,
            35.0,
        );
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn merging_is_transitive_across_a_chain() {
        let merged = merge_fragments(
            vec![
                quad(0.0, 0.0, 100.0, 20.0),
                quad(260.0, 0.0, 100.0, 20.0),
                quad(130.0, 0.0, 100.0, 20.0),
            ],
            50.0,
            35.0,
        );
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].extent().max(), Coord { x: 360.0, y: 20.0 });
    }

    #[test]
    fn singleton_groups_keep_their_original_box() {
        // A rotated quad must come back bit-for-bit when nothing merges,
        // not be flattened to its bounding extent.
        let rotated = TextBox::from_points([(10.0, 5.0), (30.0, 10.0), (25.0, 30.0), (5.0, 25.0)]);
        let far_away = quad(500.0, 500.0, 60.0, 20.0);
        let merged = merge_fragments(vec![rotated.clone(), far_away.clone()], 50.0, 35.0);
        assert_eq!(merged, vec![rotated, far_away]);
    }

    struct OneBoxPerTile;

    impl TextDetector for OneBoxPerTile {
        fn detect(&mut self, _image: &RgbImage) -> Result<Vec<TextBox>, ModelError> {
            Ok(vec![quad(5.0, 5.0, 20.0, 10.0)])
        }
    }

    #[test]
    fn tile_boxes_are_lifted_into_global_coordinates() {
        let image = RgbImage::new(100, 800);
        let mut detector = OneBoxPerTile;
        // Thresholds tightened so the two tiles' boxes stay separate.
        let config = SliceConfig {
            merge_x_threshold: 5.0,
            merge_y_threshold: 5.0,
            ..config(300, 500)
        };
        let boxes = detect_sliced(&mut detector, &image, &config).unwrap();
        assert_eq!(boxes.len(), 2);
        assert_eq!(boxes[0].top_left(), Coord { x: 5.0, y: 5.0 });
        assert_eq!(boxes[1].top_left(), Coord { x: 5.0, y: 495.0 });
    }
}
