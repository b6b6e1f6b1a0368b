//! Frame capture: normalise a source frame to the display size and crop the
//! centred guide rectangle.

use crate::image::filter::resize_bilinear;
use crate::image::{ImageView, OwnedImage};
use crate::util::{RefMatchError, RefMatchResult};

/// Display frame width used by the capture guide.
pub const FRAME_WIDTH: usize = 640;
/// Display frame height used by the capture guide.
pub const FRAME_HEIGHT: usize = 480;

/// Axis-aligned crop rectangle in display pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CaptureRegion {
    /// Left edge.
    pub x: usize,
    /// Top edge.
    pub y: usize,
    /// Width.
    pub width: usize,
    /// Height.
    pub height: usize,
}

impl CaptureRegion {
    /// Centres a rectangle of `width_fraction` of the frame width with the
    /// given aspect ratio (`aspect_w:aspect_h`).
    ///
    /// For 640x480, 0.8 and 16:10 this yields `(64, 80, 512, 320)`.
    pub fn centered(
        frame_width: usize,
        frame_height: usize,
        width_fraction: f64,
        aspect: (usize, usize),
    ) -> RefMatchResult<Self> {
        if frame_width == 0 || frame_height == 0 {
            return Err(RefMatchError::InvalidDimensions {
                width: frame_width,
                height: frame_height,
            });
        }
        if !(width_fraction > 0.0 && width_fraction <= 1.0) {
            return Err(RefMatchError::InvalidConfig {
                reason: "width_fraction must be in (0, 1]",
            });
        }
        if aspect.0 == 0 || aspect.1 == 0 {
            return Err(RefMatchError::InvalidConfig {
                reason: "aspect ratio terms must be > 0",
            });
        }
        let width = (frame_width as f64 * width_fraction).round() as usize;
        let height = (width as f64 * aspect.1 as f64 / aspect.0 as f64).round() as usize;
        if width == 0 || height == 0 || height > frame_height {
            return Err(RefMatchError::InvalidConfig {
                reason: "capture region does not fit the frame",
            });
        }
        Ok(Self {
            x: (frame_width - width) / 2,
            y: (frame_height - height) / 2,
            width,
            height,
        })
    }

    /// Right edge (exclusive).
    pub fn right(&self) -> usize {
        self.x + self.width
    }

    /// Bottom edge (exclusive).
    pub fn bottom(&self) -> usize {
        self.y + self.height
    }
}

impl Default for CaptureRegion {
    fn default() -> Self {
        Self {
            x: 64,
            y: 80,
            width: 512,
            height: 320,
        }
    }
}

/// Resizes frames to a fixed display size and crops a region out of them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameCapture {
    frame_width: usize,
    frame_height: usize,
    region: CaptureRegion,
}

impl Default for FrameCapture {
    fn default() -> Self {
        Self {
            frame_width: FRAME_WIDTH,
            frame_height: FRAME_HEIGHT,
            region: CaptureRegion::default(),
        }
    }
}

impl FrameCapture {
    /// Creates a capture for a custom display size and region.
    pub fn new(
        frame_width: usize,
        frame_height: usize,
        region: CaptureRegion,
    ) -> RefMatchResult<Self> {
        if frame_width == 0 || frame_height == 0 {
            return Err(RefMatchError::InvalidDimensions {
                width: frame_width,
                height: frame_height,
            });
        }
        if region.width == 0
            || region.height == 0
            || region.right() > frame_width
            || region.bottom() > frame_height
        {
            return Err(RefMatchError::RoiOutOfBounds {
                x: region.x,
                y: region.y,
                width: region.width,
                height: region.height,
                img_width: frame_width,
                img_height: frame_height,
            });
        }
        Ok(Self {
            frame_width,
            frame_height,
            region,
        })
    }

    /// Crop rectangle in display pixels.
    pub fn region(&self) -> CaptureRegion {
        self.region
    }

    /// Display size.
    pub fn frame_size(&self) -> (usize, usize) {
        (self.frame_width, self.frame_height)
    }

    /// Grayscale capture: resize to the display size, then crop.
    pub fn capture_gray(&self, frame: ImageView<'_, u8>) -> RefMatchResult<OwnedImage> {
        let display = if frame.width() == self.frame_width && frame.height() == self.frame_height
        {
            OwnedImage::from_view(frame)?
        } else {
            resize_bilinear(frame, self.frame_width, self.frame_height)?
        };
        let r = self.region;
        let crop = display.view().roi(r.x, r.y, r.width, r.height)?;
        OwnedImage::from_view(crop)
    }

    /// Colour capture encoded as JPEG.
    #[cfg(feature = "image-io")]
    pub fn capture_jpeg(&self, frame: &image::DynamicImage, quality: u8) -> RefMatchResult<Vec<u8>> {
        let rgb = self.capture_rgb(frame);
        crate::image::io::encode_jpeg(&rgb, quality)
    }

    /// Colour capture as an RGB buffer.
    #[cfg(feature = "image-io")]
    pub fn capture_rgb(&self, frame: &image::DynamicImage) -> image::RgbImage {
        use image::imageops::{self, FilterType};
        let rgb = frame.to_rgb8();
        let display = if rgb.width() as usize == self.frame_width
            && rgb.height() as usize == self.frame_height
        {
            rgb
        } else {
            imageops::resize(
                &rgb,
                self.frame_width as u32,
                self.frame_height as u32,
                FilterType::Triangle,
            )
        };
        let r = self.region;
        imageops::crop_imm(
            &display,
            r.x as u32,
            r.y as u32,
            r.width as u32,
            r.height as u32,
        )
        .to_image()
    }
}

#[cfg(test)]
mod tests {
    use super::{CaptureRegion, FrameCapture};
    use crate::image::OwnedImage;

    #[test]
    fn default_region_matches_centered_guide() {
        let region = CaptureRegion::centered(640, 480, 0.8, (16, 10)).unwrap();
        assert_eq!(region, CaptureRegion::default());
        assert_eq!((region.right(), region.bottom()), (576, 400));
    }

    #[test]
    fn region_taller_than_frame_is_rejected() {
        assert!(CaptureRegion::centered(640, 100, 0.8, (1, 1)).is_err());
    }

    #[test]
    fn capture_crops_after_resize() {
        // A 1280x960 frame with a bright block covering the guide region.
        let mut frame = OwnedImage::filled(1280, 960, 0).unwrap();
        let block = OwnedImage::filled(1024, 640, 200).unwrap();
        frame.paste(block.view(), 128, 160);
        let out = FrameCapture::default().capture_gray(frame.view()).unwrap();
        assert_eq!((out.width(), out.height()), (512, 320));
        assert_eq!(out.data()[0], 200);
        assert_eq!(out.data()[out.data().len() - 1], 200);
    }
}
