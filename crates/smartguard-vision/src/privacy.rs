use image::{codecs::jpeg::JpegEncoder, imageops, ColorType, RgbImage};
use imageproc::filter::gaussian_blur_f32;
use smartguard_types::{config::PrivacyConfig, frame::Region, Result};

use crate::{kernel_sigma, vision_error};

/// Blurs a frame everywhere except a margin around each face.
///
/// Patches are copied from the unmodified frame before blurring and pasted
/// back in face order. Overlapping boxes therefore both stay sharp: the
/// later paste rewrites the same original pixels.
#[derive(Debug, Clone)]
pub struct PrivacyFilter {
    margin: f32,
    sigma: f32,
}

impl PrivacyFilter {
    pub fn new(config: &PrivacyConfig) -> Self {
        Self {
            margin: config.margin,
            sigma: kernel_sigma(config.blur_kernel),
        }
    }

    /// Face box grown by the margin on every side, clamped to the frame.
    pub fn unblurred_bounds(&self, face: &Region, width: u32, height: u32) -> Region {
        let margin_x = (face.w as f32 * self.margin) as u32;
        let margin_y = (face.h as f32 * self.margin) as u32;

        let x_from = face.x.saturating_sub(margin_x).min(width);
        let y_from = face.y.saturating_sub(margin_y).min(height);
        let x_to = face.x.saturating_add(face.w).saturating_add(margin_x).min(width);
        let y_to = face.y.saturating_add(face.h).saturating_add(margin_y).min(height);

        Region::from_box(x_from, y_from, x_to - x_from, y_to - y_from)
    }

    pub fn apply(&self, frame: &RgbImage, faces: &[Region]) -> RgbImage {
        let (width, height) = frame.dimensions();
        let patches: Vec<(Region, RgbImage)> = faces
            .iter()
            .map(|face| self.unblurred_bounds(face, width, height))
            .filter(|bounds| bounds.w > 0 && bounds.h > 0)
            .map(|bounds| {
                let patch =
                    imageops::crop_imm(frame, bounds.x, bounds.y, bounds.w, bounds.h).to_image();
                (bounds, patch)
            })
            .collect();

        let mut blurred = gaussian_blur_f32(frame, self.sigma);
        for (bounds, patch) in &patches {
            imageops::replace(&mut blurred, patch, bounds.x as i64, bounds.y as i64);
        }
        blurred
    }
}

/// Encodes a frame as JPEG.
pub fn encode_jpeg(frame: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, quality)
        .encode(frame.as_raw(), frame.width(), frame.height(), ColorType::Rgb8)
        .map_err(|err| vision_error(format!("jpeg encoding failed: {err}")))?;
    Ok(bytes)
}
