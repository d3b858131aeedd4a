use anyhow::{anyhow, Result};
use image::imageops::{self, FilterType};
use image::{GrayImage, Rgb, RgbImage};

use crate::detect::backend::{Analysis, DetectorBackend};

const THUMB_WIDTH: u32 = 32;
const THUMB_HEIGHT: u32 = 24;
const BORDER_PX: u32 = 4;
const BORDER_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

/// Default mean absolute luma difference (0..255) that counts as presence.
pub const DEFAULT_MOTION_THRESHOLD: f32 = 12.0;

/// Frame-differencing presence detector.
///
/// Compares a small grayscale thumbnail of each frame with the previous one.
/// Thumbnails smooth out JPEG noise so a static scene reads as empty. When the
/// difference crosses the threshold the annotated frame gets a green border.
pub struct MotionBackend {
    threshold: f32,
    previous: Option<GrayImage>,
}

impl MotionBackend {
    pub fn new(threshold: f32) -> Result<Self> {
        if !(threshold > 0.0 && threshold <= 255.0) {
            return Err(anyhow!(
                "motion threshold must be in (0, 255], got {}",
                threshold
            ));
        }
        Ok(Self {
            threshold,
            previous: None,
        })
    }

    fn thumbnail(image: &RgbImage) -> GrayImage {
        let gray = imageops::grayscale(image);
        imageops::resize(&gray, THUMB_WIDTH, THUMB_HEIGHT, FilterType::Triangle)
    }
}

impl Default for MotionBackend {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_MOTION_THRESHOLD,
            previous: None,
        }
    }
}

impl DetectorBackend for MotionBackend {
    fn name(&self) -> &'static str {
        "motion"
    }

    fn analyze(&mut self, mut image: RgbImage) -> Result<Analysis> {
        if image.width() == 0 || image.height() == 0 {
            return Err(anyhow!("cannot analyze an empty image"));
        }
        let thumb = Self::thumbnail(&image);
        let present = self
            .previous
            .as_ref()
            .is_some_and(|prev| mean_abs_diff(prev, &thumb) >= self.threshold);
        self.previous = Some(thumb);

        if present {
            draw_border(&mut image, BORDER_PX, BORDER_COLOR);
        }
        Ok(Analysis {
            subject_present: present,
            annotated: image,
        })
    }
}

fn mean_abs_diff(a: &GrayImage, b: &GrayImage) -> f32 {
    let total: u64 = a
        .as_raw()
        .iter()
        .zip(b.as_raw())
        .map(|(x, y)| u64::from(x.abs_diff(*y)))
        .sum();
    total as f32 / a.as_raw().len().max(1) as f32
}

fn draw_border(image: &mut RgbImage, thickness: u32, color: Rgb<u8>) {
    let (width, height) = image.dimensions();
    let t = thickness.min(width / 2).min(height / 2).max(1);
    for y in 0..height {
        for x in 0..width {
            if x < t || y < t || x >= width - t || y >= height - t {
                image.put_pixel(x, y, color);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(value: u8) -> RgbImage {
        RgbImage::from_pixel(64, 48, Rgb([value, value, value]))
    }

    #[test]
    fn motion_backend_detects_change() {
        let mut backend = MotionBackend::default();

        let first = backend.analyze(solid(10)).unwrap();
        assert!(!first.subject_present);
        assert_eq!(first.annotated.get_pixel(0, 0), &Rgb([10, 10, 10]));

        let changed = backend.analyze(solid(200)).unwrap();
        assert!(changed.subject_present);
        assert_eq!(changed.annotated.get_pixel(0, 0), &BORDER_COLOR);
        assert_eq!(changed.annotated.get_pixel(32, 24), &Rgb([200, 200, 200]));

        let still = backend.analyze(solid(200)).unwrap();
        assert!(!still.subject_present);
    }

    #[test]
    fn small_changes_stay_below_threshold() {
        let mut backend = MotionBackend::new(20.0).unwrap();
        backend.analyze(solid(100)).unwrap();
        assert!(!backend.analyze(solid(110)).unwrap().subject_present);
    }

    #[test]
    fn rejects_invalid_threshold() {
        assert!(MotionBackend::new(0.0).is_err());
        assert!(MotionBackend::new(300.0).is_err());
        assert!(MotionBackend::new(f32::NAN).is_err());
    }
}
