use std::sync::Arc;

use chrono::{DateTime, Utc};
use image::RgbImage;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

/// Axis-aligned box with its area in pixels.
///
/// Motion regions carry the area of the changed blob, face regions carry
/// `w * h`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
    pub area: u64,
}

impl Region {
    pub const fn new(x: u32, y: u32, w: u32, h: u32, area: u64) -> Self {
        Self { x, y, w, h, area }
    }

    /// Region whose area is the area of its box.
    pub const fn from_box(x: u32, y: u32, w: u32, h: u32) -> Self {
        Self::new(x, y, w, h, w as u64 * h as u64)
    }

    /// Integer center of the box, rounded towards the top-left.
    pub const fn center(&self) -> (u32, u32) {
        (self.x + self.w / 2, self.y + self.h / 2)
    }

    /// True when the point lies inside the box, borders excluded.
    pub const fn contains_strictly(&self, px: u32, py: u32) -> bool {
        self.x < px && px < self.x + self.w && self.y < py && py < self.y + self.h
    }
}

/// Frame as delivered by a video source.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub image: RgbImage,
    pub captured_at: DateTime<Utc>,
}

impl VideoFrame {
    pub fn new(image: RgbImage) -> Self {
        Self {
            image,
            captured_at: Utc::now(),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Captured frame plus the regions detected in it and its lazily computed
/// quality score.
#[derive(Debug, Clone)]
pub struct AnnotatedFrame {
    pub timestamp: DateTime<Utc>,
    pub motion_regions: Vec<Region>,
    pub face_regions: Vec<Region>,
    pixels: Option<Arc<RgbImage>>,
    score: OnceCell<u32>,
}

impl AnnotatedFrame {
    /// Pixels are kept only when at least one motion region was found;
    /// otherwise the frame is metadata-only.
    pub fn new(
        timestamp: DateTime<Utc>,
        pixels: Arc<RgbImage>,
        motion_regions: Vec<Region>,
        face_regions: Vec<Region>,
    ) -> Self {
        let pixels = (!motion_regions.is_empty()).then_some(pixels);
        Self {
            timestamp,
            motion_regions,
            face_regions,
            pixels,
            score: OnceCell::new(),
        }
    }

    pub fn metadata_only(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            motion_regions: Vec::new(),
            face_regions: Vec::new(),
            pixels: None,
            score: OnceCell::new(),
        }
    }

    pub fn raw_pixels(&self) -> Option<&Arc<RgbImage>> {
        self.pixels.as_ref()
    }

    pub fn score(&self) -> Option<u32> {
        self.score.get().copied()
    }

    /// Returns the memoized score, computing it with `compute` on first use.
    /// Once set the score never changes.
    pub fn score_or_init<F>(&self, compute: F) -> u32
    where
        F: FnOnce(&Self) -> u32,
    {
        *self.score.get_or_init(|| compute(self))
    }
}
