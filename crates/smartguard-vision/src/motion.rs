use std::collections::{BTreeMap, BTreeSet};

use image::{GrayImage, Luma, Rgb, RgbImage};
use imageproc::{
    distance_transform::Norm,
    filter::gaussian_blur_f32,
    morphology::dilate,
    region_labelling::{connected_components, Connectivity},
};
use smartguard_types::{config::MotionConfig, frame::Region};
use tracing::trace;

use crate::kernel_sigma;

/// Frame differencing motion detector.
///
/// The pipeline is: absolute difference, grayscale, gaussian smoothing,
/// binary threshold, dilation, hole filling, then one region per connected
/// blob. A blob's area covers everything inside its outer boundary, so
/// enclosed holes and islands count towards it and islands never become
/// regions of their own. Blobs whose area does not exceed the minimum are
/// dropped. The minimum is
/// expressed at `reference_width` and scales with the square of the frame
/// width.
#[derive(Debug, Clone)]
pub struct MotionDetector {
    config: MotionConfig,
}

#[derive(Debug, Clone, Copy)]
struct Blob {
    min_x: u32,
    min_y: u32,
    max_x: u32,
    max_y: u32,
    pixels: u64,
}

impl Blob {
    fn at(x: u32, y: u32) -> Self {
        Self {
            min_x: x,
            min_y: y,
            max_x: x,
            max_y: y,
            pixels: 0,
        }
    }

    fn include(&mut self, x: u32, y: u32) {
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
        self.pixels += 1;
    }

    fn region(&self) -> Region {
        Region::new(
            self.min_x,
            self.min_y,
            self.max_x - self.min_x + 1,
            self.max_y - self.min_y + 1,
            self.pixels,
        )
    }
}

impl MotionDetector {
    pub fn new(config: MotionConfig) -> Self {
        Self { config }
    }

    /// Minimum blob area for frames of the given width.
    pub fn min_area_for(&self, width: u32) -> u64 {
        let scale = width as f64 / self.config.reference_width.max(1) as f64;
        (self.config.min_area as f64 * scale * scale).round() as u64
    }

    /// Moving regions between two consecutive frames.
    ///
    /// # Panics
    /// Both frames must have the same dimensions.
    pub fn detect(&self, previous: &RgbImage, current: &RgbImage) -> Vec<Region> {
        assert_eq!(
            previous.dimensions(),
            current.dimensions(),
            "motion detection needs frames of equal size"
        );

        let diff = absolute_difference(previous, current);
        let gray = image::imageops::grayscale(&diff);
        let smoothed = gaussian_blur_f32(&gray, kernel_sigma(self.config.blur_kernel));
        let mask = binary_threshold(&smoothed, self.config.threshold);
        let dilated = dilate(&mask, Norm::LInf, self.config.dilate_iterations);
        let filled = fill_holes(&dilated);

        let min_area = self.min_area_for(current.width());
        let regions: Vec<Region> = blobs(&filled)
            .into_iter()
            .map(|blob| blob.region())
            .filter(|region| region.area > min_area)
            .collect();
        trace!(count = regions.len(), min_area, "motion regions");
        regions
    }
}

fn absolute_difference(previous: &RgbImage, current: &RgbImage) -> RgbImage {
    let mut diff = RgbImage::new(current.width(), current.height());
    for ((out, a), b) in diff
        .pixels_mut()
        .zip(previous.pixels())
        .zip(current.pixels())
    {
        *out = Rgb([
            a[0].abs_diff(b[0]),
            a[1].abs_diff(b[1]),
            a[2].abs_diff(b[2]),
        ]);
    }
    diff
}

fn binary_threshold(image: &GrayImage, cut: u8) -> GrayImage {
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        if image.get_pixel(x, y)[0] > cut {
            Luma([255u8])
        } else {
            Luma([0u8])
        }
    })
}

/// Sets every background pixel that cannot reach the frame border through
/// 4-connected background to foreground.
fn fill_holes(mask: &GrayImage) -> GrayImage {
    let (width, height) = mask.dimensions();
    if width == 0 || height == 0 {
        return mask.clone();
    }
    let background = GrayImage::from_fn(width, height, |x, y| {
        if mask.get_pixel(x, y)[0] == 0 {
            Luma([255u8])
        } else {
            Luma([0u8])
        }
    });
    let labels = connected_components(&background, Connectivity::Four, Luma([0u8]));

    let mut outside = BTreeSet::new();
    let border = (0..width)
        .flat_map(|x| [(x, 0), (x, height.saturating_sub(1))])
        .chain((0..height).flat_map(|y| [(0, y), (width.saturating_sub(1), y)]));
    for (x, y) in border {
        let label = labels.get_pixel(x, y)[0];
        if label != 0 {
            outside.insert(label);
        }
    }

    GrayImage::from_fn(width, height, |x, y| {
        let label = labels.get_pixel(x, y)[0];
        if label != 0 && outside.contains(&label) {
            Luma([0u8])
        } else {
            Luma([255u8])
        }
    })
}

/// One blob per 8-connected foreground component, in raster order of first
/// appearance. The area of a blob is its pixel count.
fn blobs(mask: &GrayImage) -> Vec<Blob> {
    let labels = connected_components(mask, Connectivity::Eight, Luma([0u8]));
    let mut by_label: BTreeMap<u32, Blob> = BTreeMap::new();
    for (x, y, label) in labels.enumerate_pixels() {
        let label = label[0];
        if label == 0 {
            continue;
        }
        by_label
            .entry(label)
            .or_insert_with(|| Blob::at(x, y))
            .include(x, y);
    }
    by_label.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_with_box(width: u32, height: u32, boxes: &[(u32, u32, u32, u32)]) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            let inside = boxes
                .iter()
                .any(|&(bx, by, bw, bh)| x >= bx && x < bx + bw && y >= by && y < by + bh);
            if inside {
                Rgb([230, 220, 210])
            } else {
                Rgb([10, 10, 10])
            }
        })
    }

    #[test]
    fn static_pair_has_no_motion() {
        let detector = MotionDetector::new(MotionConfig::default());
        let frame = frame_with_box(600, 400, &[(100, 100, 150, 100)]);
        assert!(detector.detect(&frame, &frame.clone()).is_empty());
    }

    #[test]
    fn moving_blob_yields_one_region() {
        let detector = MotionDetector::new(MotionConfig::default());
        let previous = frame_with_box(600, 400, &[]);
        let current = frame_with_box(600, 400, &[(200, 150, 150, 100)]);

        let regions = detector.detect(&previous, &current);
        assert_eq!(regions.len(), 1);
        let region = regions[0];
        assert!(region.area > 10_000);
        assert!(region.x <= 200 && region.y <= 150);
        assert!(region.x + region.w >= 350 && region.y + region.h >= 250);
        // Smoothing and dilation only grow the blob by a bounded margin.
        assert!(region.w <= 150 + 2 * 25 && region.h <= 100 + 2 * 25);
    }

    #[test]
    fn small_changes_are_ignored() {
        let detector = MotionDetector::new(MotionConfig::default());
        let previous = frame_with_box(600, 400, &[]);
        let current = frame_with_box(600, 400, &[(300, 200, 10, 10)]);
        assert!(detector.detect(&previous, &current).is_empty());
    }

    #[test]
    fn distant_blobs_stay_separate() {
        let detector = MotionDetector::new(MotionConfig::default());
        let previous = frame_with_box(600, 400, &[]);
        let current = frame_with_box(600, 400, &[(20, 20, 120, 120), (420, 240, 120, 120)]);

        let regions = detector.detect(&previous, &current);
        assert_eq!(regions.len(), 2);
        assert!(regions[0].x < regions[1].x);
    }

    fn frame_with_ring(width: u32, height: u32, outer: (u32, u32, u32), thickness: u32) -> RgbImage {
        let (ox, oy, side) = outer;
        RgbImage::from_fn(width, height, |x, y| {
            let inside_outer = x >= ox && x < ox + side && y >= oy && y < oy + side;
            let inside_inner = x >= ox + thickness
                && x < ox + side - thickness
                && y >= oy + thickness
                && y < oy + side - thickness;
            if inside_outer && !inside_inner {
                Rgb([230, 220, 210])
            } else {
                Rgb([10, 10, 10])
            }
        })
    }

    #[test]
    fn enclosed_hole_counts_towards_area() {
        let detector = MotionDetector::new(MotionConfig::default());
        let previous = frame_with_box(600, 400, &[]);
        let current = frame_with_ring(600, 400, (150, 100, 200), 8);

        let regions = detector.detect(&previous, &current);
        assert_eq!(regions.len(), 1);
        let region = regions[0];
        let bounding = region.w as u64 * region.h as u64;
        // The dilated ring alone covers about two thirds of its box.
        assert!(region.area * 10 >= bounding * 9, "area {} of {}", region.area, bounding);
    }

    #[test]
    fn island_inside_a_hole_joins_the_outer_blob() {
        let detector = MotionDetector::new(MotionConfig::default());
        let previous = frame_with_box(600, 400, &[]);
        let mut current = frame_with_ring(600, 400, (100, 20, 360), 6);
        // Big enough to pass the area filter on its own.
        for x in 250..310 {
            for y in 170..230 {
                current.put_pixel(x, y, Rgb([230, 220, 210]));
            }
        }

        let regions = detector.detect(&previous, &current);
        assert_eq!(regions.len(), 1);
        assert!(regions[0].contains_strictly(280, 200));
    }

    #[test]
    fn min_area_scales_with_width() {
        let detector = MotionDetector::new(MotionConfig::default());
        assert_eq!(detector.min_area_for(600), 10_000);
        assert_eq!(detector.min_area_for(1200), 40_000);
        assert_eq!(detector.min_area_for(300), 2_500);
    }

    #[test]
    #[should_panic(expected = "equal size")]
    fn mismatched_frames_are_a_contract_violation() {
        let detector = MotionDetector::new(MotionConfig::default());
        detector.detect(&RgbImage::new(10, 10), &RgbImage::new(12, 10));
    }
}
