use std::{fs, path::PathBuf};

use chrono::Utc;
use image::{Rgb, RgbImage};
use imageproc::{drawing::draw_hollow_rect_mut, rect::Rect};
use smartguard_types::{frame::Region, Result};

use crate::vision_error;

const MOTION_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const FACE_COLOR: Rgb<u8> = Rgb([0, 0, 255]);

/// Persists frames with their motion and face boxes drawn in, for the
/// `display` debug mode.
pub struct DebugRecorder {
    dir: PathBuf,
    sequence: u64,
}

impl DebugRecorder {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .map_err(|err| vision_error(format!("failed to create debug dir {:?}: {err}", dir)))?;
        Ok(Self { dir, sequence: 0 })
    }

    pub fn annotate(frame: &RgbImage, motion: &[Region], faces: &[Region]) -> RgbImage {
        let mut canvas = frame.clone();
        for (regions, color) in [(motion, MOTION_COLOR), (faces, FACE_COLOR)] {
            for region in regions {
                let rect = Rect::at(region.x as i32, region.y as i32)
                    .of_size(region.w.max(1), region.h.max(1));
                draw_hollow_rect_mut(&mut canvas, rect, color);
            }
        }
        canvas
    }

    pub fn persist(
        &mut self,
        frame: &RgbImage,
        motion: &[Region],
        faces: &[Region],
    ) -> Result<PathBuf> {
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S_%3f");
        self.sequence += 1;
        let path = self
            .dir
            .join(format!("frame_{}_{:06}.png", timestamp, self.sequence));
        Self::annotate(frame, motion, faces)
            .save(&path)
            .map_err(|err| vision_error(format!("failed to save debug frame: {err}")))?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn annotate_draws_box_outlines() {
        let frame = RgbImage::new(50, 50);
        let canvas = DebugRecorder::annotate(
            &frame,
            &[Region::from_box(5, 5, 20, 20)],
            &[Region::from_box(30, 30, 10, 10)],
        );
        assert_eq!(*canvas.get_pixel(5, 5), MOTION_COLOR);
        assert_eq!(*canvas.get_pixel(30, 39), FACE_COLOR);
        assert_eq!(*canvas.get_pixel(15, 15), Rgb([0, 0, 0]));
    }

    #[test]
    fn persist_writes_png() {
        let dir = std::env::temp_dir().join(format!("smartguard-debug-{}", std::process::id()));
        let mut recorder = DebugRecorder::new(&dir).expect("create recorder");
        let path = recorder
            .persist(&RgbImage::new(16, 16), &[Region::from_box(1, 1, 4, 4)], &[])
            .expect("persist frame");
        assert!(path.exists());
        fs::remove_dir_all(&dir).expect("cleanup debug dir");
    }
}
