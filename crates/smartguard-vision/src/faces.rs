use image::{GrayImage, RgbImage};
use smartguard_types::{config::FaceConfig, frame::Region, Result};
use tracing::{debug, info};

use crate::vision_error;

/// Any classifier producing axis-aligned face boxes from a grayscale frame.
pub trait FaceDetector {
    fn detect(&mut self, gray: &GrayImage) -> Vec<Region>;
}

/// Runs a [`FaceDetector`] and keeps only faces whose center lies strictly
/// inside a moving region, discarding static false positives such as
/// photos or posters.
pub struct FaceLocator<D> {
    detector: D,
}

impl<D: FaceDetector> FaceLocator<D> {
    pub fn new(detector: D) -> Self {
        Self { detector }
    }

    pub fn locate(&mut self, frame: &RgbImage, motion: &[Region]) -> Vec<Region> {
        if motion.is_empty() {
            return Vec::new();
        }
        let gray = image::imageops::grayscale(frame);
        let candidates = self.detector.detect(&gray);
        let candidate_count = candidates.len();
        let faces: Vec<Region> = candidates
            .into_iter()
            .filter(|face| {
                let (cx, cy) = face.center();
                motion.iter().any(|region| region.contains_strictly(cx, cy))
            })
            .map(|face| Region::from_box(face.x, face.y, face.w, face.h))
            .collect();
        if candidate_count > faces.len() {
            debug!(
                candidates = candidate_count,
                kept = faces.len(),
                "discarded static face candidates"
            );
        }
        faces
    }
}

/// SeetaFace cascade backend.
///
/// The pyramid step is the inverse of `scale_step`. `min_neighbors` belongs
/// to sliding-window cascades that group raw hits; this backend merges its
/// windows itself and filters on `score_threshold` instead.
pub struct SeetaFaceDetector {
    inner: Box<dyn rustface::Detector>,
}

impl SeetaFaceDetector {
    /// Loads the model. A missing or unreadable model is fatal to the
    /// pipeline and is reported as an error.
    pub fn from_config(config: &FaceConfig) -> Result<Self> {
        let mut inner = rustface::create_detector(&config.model_path).map_err(|err| {
            vision_error(format!(
                "failed to load face model {}: {err:?}",
                config.model_path
            ))
        })?;
        inner.set_min_face_size(config.min_face_size);
        inner.set_score_thresh(config.score_threshold);
        inner.set_pyramid_scale_factor(1.0 / config.scale_step);
        inner.set_slide_window_step(4, 4);
        info!(
            "Loaded face model {} (scale step {}, min face {}px)",
            config.model_path, config.scale_step, config.min_face_size
        );
        Ok(Self { inner })
    }
}

impl FaceDetector for SeetaFaceDetector {
    fn detect(&mut self, gray: &GrayImage) -> Vec<Region> {
        let (width, height) = gray.dimensions();
        let mut image = rustface::ImageData::new(gray.as_raw(), width, height);
        self.inner
            .detect(&mut image)
            .into_iter()
            .filter_map(|face| {
                let bbox = face.bbox();
                let x = bbox.x().max(0) as u32;
                let y = bbox.y().max(0) as u32;
                if x >= width || y >= height {
                    return None;
                }
                let w = bbox.width().min(width - x);
                let h = bbox.height().min(height - y);
                Some(Region::from_box(x, y, w, h))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedDetector {
        boxes: Vec<Region>,
        calls: usize,
    }

    impl FaceDetector for FixedDetector {
        fn detect(&mut self, _gray: &GrayImage) -> Vec<Region> {
            self.calls += 1;
            self.boxes.clone()
        }
    }

    fn locator(boxes: Vec<Region>) -> FaceLocator<FixedDetector> {
        FaceLocator::new(FixedDetector { boxes, calls: 0 })
    }

    #[test]
    fn keeps_faces_centered_in_motion() {
        let mut locator = locator(vec![
            Region::from_box(250, 170, 50, 50),
            Region::from_box(10, 10, 40, 40),
        ]);
        let motion = [Region::new(180, 130, 190, 140, 26_000)];

        let faces = locator.locate(&RgbImage::new(600, 400), &motion);
        assert_eq!(faces, vec![Region::from_box(250, 170, 50, 50)]);
        assert_eq!(faces[0].area, 2_500);
    }

    #[test]
    fn center_on_region_border_is_rejected() {
        // Center (200, 150) sits exactly on the left border of the region.
        let mut locator = locator(vec![Region::from_box(180, 130, 40, 40)]);
        let motion = [Region::new(200, 100, 100, 100, 10_000)];
        assert!(locator.locate(&RgbImage::new(600, 400), &motion).is_empty());
    }

    #[test]
    fn skips_detection_without_motion() {
        let mut locator = locator(vec![Region::from_box(10, 10, 40, 40)]);
        assert!(locator.locate(&RgbImage::new(600, 400), &[]).is_empty());
        assert_eq!(locator.detector.calls, 0);
    }

    #[test]
    fn missing_model_is_an_error() {
        let config = FaceConfig {
            model_path: "/nonexistent/seeta_fd_frontal_v1.0.bin".into(),
            ..Default::default()
        };
        assert!(SeetaFaceDetector::from_config(&config).is_err());
    }
}
