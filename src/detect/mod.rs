//! Neural object detection: tensor preparation and output decoding.
//!
//! The model consumes a square NCHW RGB tensor in `[0, 1]` and emits a
//! channel-major `[cx, cy, w, h, score0, score1]` block per proposal. The
//! decoding here is runtime independent; [`onnx`] wires it to `ort`.

#[cfg(feature = "onnx")]
pub mod onnx;

use crate::util::{RefMatchError, RefMatchResult};

/// Channels per proposal in the model output.
pub const OUTPUT_CHANNELS: usize = 6;

/// One decoded proposal in model input pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Prediction {
    /// Box centre x.
    pub cx: f32,
    /// Box centre y.
    pub cy: f32,
    /// Box width.
    pub w: f32,
    /// Box height.
    pub h: f32,
    /// `max(score0, score1)`.
    pub confidence: f32,
    /// 1 iff `score1 > score0`.
    pub class_id: usize,
}

/// Corner box in display pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DisplayBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl DisplayBox {
    /// Width of the box.
    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    /// Height of the box.
    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }
}

impl Prediction {
    /// Converts the centre/size box from a square `input_size` tensor to
    /// corners on a `display_width x display_height` canvas.
    pub fn to_display_box(
        &self,
        input_size: usize,
        display_width: usize,
        display_height: usize,
    ) -> DisplayBox {
        let sx = display_width as f32 / input_size as f32;
        let sy = display_height as f32 / input_size as f32;
        DisplayBox {
            x1: (self.cx - self.w / 2.0) * sx,
            y1: (self.cy - self.h / 2.0) * sy,
            x2: (self.cx + self.w / 2.0) * sx,
            y2: (self.cy + self.h / 2.0) * sy,
        }
    }
}

/// Raw proposal rows `[cx, cy, w, h, score0, score1]`.
pub type RawPrediction = [f32; OUTPUT_CHANNELS];

/// Splits a channel-major output tensor into per-proposal rows.
///
/// Trailing values that do not fill a whole proposal are ignored.
pub fn parse_predictions(output: &[f32]) -> Vec<RawPrediction> {
    let n = output.len() / OUTPUT_CHANNELS;
    (0..n)
        .map(|i| std::array::from_fn(|c| output[i + c * n]))
        .collect()
}

/// Picks the most confident proposal strictly above `threshold`.
///
/// Comparisons are strict, so ties keep the earliest proposal.
pub fn best_prediction(preds: &[RawPrediction], threshold: f32) -> Option<Prediction> {
    let mut best: Option<Prediction> = None;
    let mut best_conf = 0.0f32;
    for &[cx, cy, w, h, c0, c1] in preds {
        let confidence = c0.max(c1);
        if confidence > threshold && confidence > best_conf {
            best_conf = confidence;
            best = Some(Prediction {
                cx,
                cy,
                w,
                h,
                confidence,
                class_id: usize::from(c1 > c0),
            });
        }
    }
    best
}

/// Region of the display the object must lie in.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VisibleRegion {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl Default for VisibleRegion {
    fn default() -> Self {
        Self {
            x1: 64.0,
            y1: 80.0,
            x2: 576.0,
            y2: 400.0,
        }
    }
}

impl VisibleRegion {
    /// True iff `b` lies fully inside the region (edges inclusive).
    pub fn contains(&self, b: &DisplayBox) -> bool {
        b.x1 >= self.x1 && b.y1 >= self.y1 && b.x2 <= self.x2 && b.y2 <= self.y2
    }
}

/// Detection settings.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DetectionConfig {
    /// Square model input size.
    pub input_size: usize,
    /// Confidence threshold (strict).
    pub threshold: f32,
    /// Display canvas width.
    pub display_width: usize,
    /// Display canvas height.
    pub display_height: usize,
    /// Region the box must fall in.
    pub visible: VisibleRegion,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            input_size: 640,
            threshold: 0.5,
            display_width: 640,
            display_height: 480,
            visible: VisibleRegion::default(),
        }
    }
}

/// Decoded detection mapped onto the display.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Detection {
    /// Winning proposal in model pixels.
    pub prediction: Prediction,
    /// Box on the display canvas.
    pub display_box: DisplayBox,
    /// Whether the box lies inside the visible region.
    pub inside: bool,
}

impl DetectionConfig {
    /// Decodes a raw output tensor into the best detection, if any.
    pub fn decode(&self, output: &[f32]) -> Option<Detection> {
        let prediction = best_prediction(&parse_predictions(output), self.threshold)?;
        let display_box =
            prediction.to_display_box(self.input_size, self.display_width, self.display_height);
        Some(Detection {
            prediction,
            display_box,
            inside: self.visible.contains(&display_box),
        })
    }
}

/// Resizes an interleaved RGB (or RGBA) buffer to `size x size` and lays it
/// out as a `1x3xHxW` tensor normalised to `[0, 1]`.
pub fn preprocess_rgb(
    data: &[u8],
    width: usize,
    height: usize,
    channels: usize,
    size: usize,
) -> RefMatchResult<Vec<f32>> {
    if width == 0 || height == 0 || size == 0 {
        return Err(RefMatchError::InvalidDimensions { width, height });
    }
    if channels < 3 {
        return Err(RefMatchError::InvalidConfig {
            reason: "preprocess_rgb needs at least 3 channels",
        });
    }
    let needed = width * height * channels;
    if data.len() < needed {
        return Err(RefMatchError::BufferTooSmall {
            needed,
            got: data.len(),
        });
    }

    let plane = size * size;
    let mut tensor = vec![0.0f32; 3 * plane];
    let sx = width as f32 / size as f32;
    let sy = height as f32 / size as f32;
    let max_x = (width - 1) as f32;
    let max_y = (height - 1) as f32;
    let px = |x: usize, y: usize, c: usize| data[(y * width + x) * channels + c] as f32;
    for y in 0..size {
        let src_y = ((y as f32 + 0.5) * sy - 0.5).clamp(0.0, max_y);
        let y0 = src_y.floor() as usize;
        let y1 = (y0 + 1).min(height - 1);
        let fy = src_y - y0 as f32;
        for x in 0..size {
            let src_x = ((x as f32 + 0.5) * sx - 0.5).clamp(0.0, max_x);
            let x0 = src_x.floor() as usize;
            let x1 = (x0 + 1).min(width - 1);
            let fx = src_x - x0 as f32;
            for c in 0..3 {
                let top = px(x0, y0, c) * (1.0 - fx) + px(x1, y0, c) * fx;
                let bottom = px(x0, y1, c) * (1.0 - fx) + px(x1, y1, c) * fx;
                tensor[c * plane + y * size + x] = (top * (1.0 - fy) + bottom * fy) / 255.0;
            }
        }
    }
    Ok(tensor)
}

#[cfg(test)]
mod tests {
    use super::{parse_predictions, preprocess_rgb};

    #[test]
    fn parse_is_channel_major() {
        // Two proposals: channel c of proposal i lives at i + c * 2.
        let out = [1.0, 2.0, 10.0, 20.0, 3.0, 4.0, 5.0, 6.0, 0.1, 0.2, 0.9, 0.8, 99.0];
        let preds = parse_predictions(&out);
        assert_eq!(preds.len(), 2);
        assert_eq!(preds[0], [1.0, 10.0, 3.0, 5.0, 0.1, 0.9]);
        assert_eq!(preds[1], [2.0, 20.0, 4.0, 6.0, 0.2, 0.8]);
    }

    #[test]
    fn preprocess_splits_planes() {
        let rgb = [255u8, 0, 51].repeat(4);
        let t = preprocess_rgb(&rgb, 2, 2, 3, 4).unwrap();
        assert_eq!(t.len(), 3 * 16);
        assert!(t[..16].iter().all(|&v| (v - 1.0).abs() < 1e-6));
        assert!(t[16..32].iter().all(|&v| v == 0.0));
        assert!(t[32..].iter().all(|&v| (v - 0.2).abs() < 1e-6));
    }
}
