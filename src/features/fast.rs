//! FAST-9 segment test corner detector with 3x3 non-maximum suppression.

use crate::image::OwnedImage;

/// Bresenham circle of radius 3, clockwise from 12 o'clock.
const CIRCLE: [(isize, isize); 16] = [
    (0, -3),
    (1, -3),
    (2, -2),
    (3, -1),
    (3, 0),
    (3, 1),
    (2, 2),
    (1, 3),
    (0, 3),
    (-1, 3),
    (-2, 2),
    (-3, 1),
    (-3, 0),
    (-3, -1),
    (-2, -2),
    (-1, -3),
];

const ARC: usize = 9;

/// A FAST corner in level pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Corner {
    pub x: usize,
    pub y: usize,
    pub score: f32,
}

/// Returns the corner score at `(x, y)` or `None` when the segment test fails.
///
/// The score is the larger of the summed excess brightness and darkness over
/// the circle, which grows with contrast.
fn corner_score(img: &OwnedImage, x: usize, y: usize, threshold: i16) -> Option<f32> {
    let width = img.width();
    let data = img.data();
    let center = data[y * width + x] as i16;

    let mut ring = [0i16; 16];
    for (slot, &(dx, dy)) in ring.iter_mut().zip(CIRCLE.iter()) {
        let idx = (y as isize + dy) as usize * width + (x as isize + dx) as usize;
        *slot = data[idx] as i16 - center;
    }

    // Quick rejection on the four compass points.
    let compass = [ring[0], ring[4], ring[8], ring[12]];
    let bright = compass.iter().filter(|&&d| d > threshold).count();
    let dark = compass.iter().filter(|&&d| d < -threshold).count();
    if bright < 2 && dark < 2 {
        return None;
    }

    let mut has_arc = false;
    for sign in [1i16, -1] {
        let mut run = 0usize;
        for i in 0..16 + ARC {
            if ring[i % 16] * sign > threshold {
                run += 1;
                if run >= ARC {
                    has_arc = true;
                    break;
                }
            } else {
                run = 0;
            }
        }
        if has_arc {
            break;
        }
    }
    if !has_arc {
        return None;
    }

    let mut sum_bright = 0i32;
    let mut sum_dark = 0i32;
    for &d in &ring {
        if d > threshold {
            sum_bright += (d - threshold) as i32;
        } else if d < -threshold {
            sum_dark += (-d - threshold) as i32;
        }
    }
    Some(sum_bright.max(sum_dark) as f32)
}

/// Detects FAST-9 corners at least `border` pixels away from every edge.
///
/// Survivors of a 3x3 non-maximum suppression are returned in raster order.
/// Equal scores are resolved in favour of the earlier pixel in raster order.
pub fn detect(img: &OwnedImage, threshold: u8, border: usize) -> Vec<Corner> {
    let width = img.width();
    let height = img.height();
    let border = border.max(3);
    if width <= 2 * border || height <= 2 * border {
        return Vec::new();
    }

    let threshold = threshold as i16;
    let mut scores = vec![0.0f32; width * height];
    let mut any = false;
    for y in border..height - border {
        for x in border..width - border {
            if let Some(score) = corner_score(img, x, y, threshold) {
                scores[y * width + x] = score.max(f32::MIN_POSITIVE);
                any = true;
            }
        }
    }
    if !any {
        return Vec::new();
    }

    let mut corners = Vec::new();
    for y in border..height - border {
        for x in border..width - border {
            let idx = y * width + x;
            let score = scores[idx];
            if score <= 0.0 {
                continue;
            }
            let mut is_max = true;
            'nbr: for dy in -1isize..=1 {
                for dx in -1isize..=1 {
                    if dx == 0 && dy == 0 {
                        continue;
                    }
                    let nidx = ((y as isize + dy) as usize) * width + (x as isize + dx) as usize;
                    let other = scores[nidx];
                    let earlier = nidx < idx;
                    if other > score || (earlier && other == score) {
                        is_max = false;
                        break 'nbr;
                    }
                }
            }
            if is_max {
                corners.push(Corner { x, y, score });
            }
        }
    }
    corners
}
