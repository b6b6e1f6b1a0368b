//! Drawing and warping of pass results onto colour frames.
//!
//! Available when the `image-io` feature is enabled.

use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect;

use crate::detect::Detection;
use crate::features::Keypoint;
use crate::geometry::{warp_perspective, Quad};
use crate::matching::Correspondence;
use crate::pipeline::{BestMatch, PassOutcome};

/// Outline colour for the matched region.
pub const QUAD_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
/// Outline width in pixels.
pub const QUAD_THICKNESS: i32 = 3;

const INSIDE_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const OUTSIDE_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

/// How a pass result is turned into an output image.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RenderMode {
    /// Draw the projected reference outline on the frame.
    #[default]
    BoundingBox,
    /// Warp the frame into the reference's coordinate frame.
    Aligned,
}

fn thick_line(img: &mut RgbImage, a: (f32, f32), b: (f32, f32), color: Rgb<u8>, thickness: i32) {
    let half = thickness / 2;
    for off in -half..=(thickness - 1 - half) {
        let o = off as f32;
        draw_line_segment_mut(img, (a.0 + o, a.1), (b.0 + o, b.1), color);
        draw_line_segment_mut(img, (a.0, a.1 + o), (b.0, b.1 + o), color);
    }
}

/// Draws a closed quadrilateral.
pub fn draw_quad(img: &mut RgbImage, quad: &Quad, color: Rgb<u8>, thickness: i32) {
    for i in 0..quad.len() {
        let p = quad[i];
        let q = quad[(i + 1) % quad.len()];
        thick_line(
            img,
            (p[0] as f32, p[1] as f32),
            (q[0] as f32, q[1] as f32),
            color,
            thickness.max(1),
        );
    }
}

/// Draws a detection box, green when inside the visible region, red otherwise.
pub fn draw_detection(img: &mut RgbImage, detection: &Detection) {
    let b = detection.display_box;
    let color = if detection.inside {
        INSIDE_COLOR
    } else {
        OUTSIDE_COLOR
    };
    let width = b.width().round() as i64;
    let height = b.height().round() as i64;
    if width <= 0 || height <= 0 {
        return;
    }
    for inset in 0..2i32 {
        let w = width - 2 * inset as i64;
        let h = height - 2 * inset as i64;
        if w <= 0 || h <= 0 {
            break;
        }
        let rect = Rect::at(b.x1.round() as i32 + inset, b.y1.round() as i32 + inset)
            .of_size(w as u32, h as u32);
        draw_hollow_rect_mut(img, rect, color);
    }
}

/// Warps `frame` into a canvas the size of the matched reference.
///
/// Returns `None` when the stored transform cannot be inverted.
pub fn aligned_output(frame: &RgbImage, best: &BestMatch) -> Option<RgbImage> {
    // The stored transform maps frame to reference; sampling needs the reverse.
    let ref_to_frame = best.homography.inverse()?;
    let (out_w, out_h) = best.reference_size;
    let data = warp_perspective(
        frame.as_raw(),
        frame.width() as usize,
        frame.height() as usize,
        3,
        &ref_to_frame,
        out_w,
        out_h,
    );
    RgbImage::from_raw(out_w as u32, out_h as u32, data)
}

/// Renders a pass outcome.
///
/// Bounding-box mode always yields an image (the plain frame when nothing
/// matched); aligned mode yields `None` without a match.
pub fn render_outcome(frame: &RgbImage, outcome: &PassOutcome, mode: RenderMode) -> Option<RgbImage> {
    match mode {
        RenderMode::BoundingBox => {
            let mut out = frame.clone();
            if let Some(best) = &outcome.best {
                draw_quad(&mut out, &best.corners, QUAD_COLOR, QUAD_THICKNESS);
            }
            Some(out)
        }
        RenderMode::Aligned => outcome.best.as_ref().and_then(|b| aligned_output(frame, b)),
    }
}

/// Side-by-side visualisation of correspondences between two images.
///
/// `query` keypoints belong to `left`, `train` keypoints to `right`.
/// Correspondences pointing outside either keypoint list are skipped.
pub fn draw_matches(
    left: &RgbImage,
    query: &[Keypoint],
    right: &RgbImage,
    train: &[Keypoint],
    matches: &[Correspondence],
) -> RgbImage {
    let width = left.width() + right.width();
    let height = left.height().max(right.height());
    let mut out = RgbImage::new(width, height);
    image::imageops::replace(&mut out, left, 0, 0);
    image::imageops::replace(&mut out, right, left.width() as i64, 0);

    let offset = left.width() as f32;
    for (i, m) in matches.iter().enumerate() {
        let (Some(a), Some(b)) = (query.get(m.query_idx), train.get(m.train_idx)) else {
            continue;
        };
        let color = palette(i);
        let pa = (a.x, a.y);
        let pb = (b.x + offset, b.y);
        draw_line_segment_mut(&mut out, pa, pb, color);
        draw_filled_circle_mut(&mut out, (pa.0.round() as i32, pa.1.round() as i32), 3, color);
        draw_filled_circle_mut(&mut out, (pb.0.round() as i32, pb.1.round() as i32), 3, color);
    }
    out
}

fn palette(i: usize) -> Rgb<u8> {
    const COLORS: [[u8; 3]; 6] = [
        [255, 64, 64],
        [64, 255, 64],
        [64, 128, 255],
        [255, 200, 0],
        [255, 0, 255],
        [0, 220, 220],
    ];
    Rgb(COLORS[i % COLORS.len()])
}
