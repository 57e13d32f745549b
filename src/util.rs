use float_ord::FloatOrd;
use geo::{Coord, MinimumRotatedRect};
use image::{imageops, Rgb, RgbImage};
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};
use tracing::instrument;

use crate::{error::CropError, TextBox};

/// Boxes whose first vertices are within this many source pixels
/// vertically count as the same visual row.
pub(crate) const ROW_TOLERANCE: f32 = 10.0;

/// Sorts boxes into reading order: top to bottom, then left to right.
///
/// A stable sort on the first vertex's `(y, x)` gets rows roughly right;
/// a single bounded backward pass then fixes adjacent pairs that landed on
/// the same visual row in the wrong horizontal order. The backward scan
/// stops at the first pair it does not swap, so boxes never migrate across
/// rows. O(n²) worst case on pathological inputs, which real pages don't
/// produce.
pub fn sort_boxes(mut boxes: Vec<TextBox>) -> Vec<TextBox> {
    boxes.sort_by_key(|b| {
        let tl = b.top_left();
        (FloatOrd(tl.y), FloatOrd(tl.x))
    });

    for i in 0..boxes.len().saturating_sub(1) {
        for j in (0..=i).rev() {
            let later = boxes[j + 1].top_left();
            let earlier = boxes[j].top_left();
            if (later.y - earlier.y).abs() < ROW_TOLERANCE && later.x < earlier.x {
                boxes.swap(j, j + 1);
            } else {
                break;
            }
        }
    }

    boxes
}

/// Rectifies a quad region into an upright crop.
///
/// The destination size comes from the longer of each pair of opposite
/// edges, so slanted lines keep their full extent. Crops that come out
/// taller than `rotate_threshold` times their width are assumed to be
/// sideways text and rotated 90° counter-clockwise.
#[instrument(level = "trace", skip(image))]
pub fn crop_quad(
    image: &RgbImage,
    text_box: &TextBox,
    rotate_threshold: f32,
) -> Result<RgbImage, CropError> {
    let points = text_box.points();
    if points.len() != 4 {
        return Err(CropError::PointCount(points.len()));
    }
    let quad = [points[0], points[1], points[2], points[3]];
    rectify(image, &quad, rotate_threshold)
}

/// Crop for detectors that emit arbitrary polygons instead of clean quads:
/// takes the minimum rotated rectangle around the polygon and rectifies
/// that.
#[instrument(level = "trace", skip(image))]
pub fn crop_min_rect(
    image: &RgbImage,
    text_box: &TextBox,
    rotate_threshold: f32,
) -> Result<RgbImage, CropError> {
    let rect = text_box
        .rect
        .minimum_rotated_rect()
        .ok_or(CropError::Degenerate)?;
    let ring = &rect.exterior().0;
    if ring.len() < 5 {
        return Err(CropError::Degenerate);
    }
    let quad = order_corners([ring[0], ring[1], ring[2], ring[3]]);
    rectify(image, &quad, rotate_threshold)
}

fn rectify(
    image: &RgbImage,
    quad: &[Coord<f32>; 4],
    rotate_threshold: f32,
) -> Result<RgbImage, CropError> {
    let width = edge(quad[0], quad[1]).max(edge(quad[2], quad[3])).round() as u32;
    let height = edge(quad[0], quad[3]).max(edge(quad[1], quad[2])).round() as u32;
    if width == 0 || height == 0 {
        return Err(CropError::Degenerate);
    }

    let from = [
        (quad[0].x, quad[0].y),
        (quad[1].x, quad[1].y),
        (quad[2].x, quad[2].y),
        (quad[3].x, quad[3].y),
    ];
    let to = [
        (0.0, 0.0),
        (width as f32, 0.0),
        (width as f32, height as f32),
        (0.0, height as f32),
    ];
    // Collinear control points have no projective mapping.
    let projection = Projection::from_control_points(from, to).ok_or(CropError::Degenerate)?;

    let mut crop = RgbImage::new(width, height);
    warp_into(
        image,
        &projection,
        Interpolation::Bilinear,
        Rgb([0, 0, 0]),
        &mut crop,
    );

    if crop.height() as f32 >= crop.width() as f32 * rotate_threshold {
        log::trace!(
            "rotating {}x{} crop assumed to be a sideways line",
            crop.width(),
            crop.height()
        );
        crop = imageops::rotate270(&crop);
    }

    Ok(crop)
}

/// Orders rectangle corners as top-left, top-right, bottom-right,
/// bottom-left: sort by x, then within the left and right pairs the
/// smaller y is the top corner.
fn order_corners(mut corners: [Coord<f32>; 4]) -> [Coord<f32>; 4] {
    corners.sort_by_key(|c| FloatOrd(c.x));
    let (tl, bl) = if corners[0].y <= corners[1].y {
        (corners[0], corners[1])
    } else {
        (corners[1], corners[0])
    };
    let (tr, br) = if corners[2].y <= corners[3].y {
        (corners[2], corners[3])
    } else {
        (corners[3], corners[2])
    };
    [tl, tr, br, bl]
}

fn edge(a: Coord<f32>, b: Coord<f32>) -> f32 {
    (a.x - b.x).hypot(a.y - b.y)
}
