use image::GrayImage;
use imageproc::contours::{find_contours, BorderType, Contour};
use imageproc::distance_transform::Norm;
use imageproc::morphology;
use imageproc::point::Point;

use crate::shared::constants::{DEFAULT_KERNEL_SIZE, DEFAULT_MIN_AREA, DEFAULT_THRESHOLD};
use crate::shared::foreground_mask::ForegroundMask;
use crate::shared::region::Region;

/// Which of the surviving regions to report.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SelectionPolicy {
    /// Every region at or above the area floor.
    AllRegions,
    /// Only the region with the largest area, if any survives the floor.
    LargestOnly,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MotionConfig {
    /// Noise floor in pixels; smaller regions are discarded.
    pub min_area: f64,
    /// Side of the square structuring element.
    pub kernel_size: usize,
    /// Mask values above this cut count as foreground.
    pub threshold: u8,
    /// Run closing then opening on the thresholded mask.
    pub cleanup: bool,
    pub selection: SelectionPolicy,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            min_area: DEFAULT_MIN_AREA,
            kernel_size: DEFAULT_KERNEL_SIZE,
            threshold: DEFAULT_THRESHOLD,
            cleanup: true,
            selection: SelectionPolicy::AllRegions,
        }
    }
}

/// Turns a raw foreground mask into motion regions.
///
/// Steps: binary threshold → closing → opening → outer contours →
/// area floor → selection policy. Never fails; a degenerate mask simply
/// yields no regions.
#[derive(Clone, Debug, Default)]
pub struct MotionDetector {
    config: MotionConfig,
}

impl MotionDetector {
    pub fn new(config: MotionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MotionConfig {
        &self.config
    }

    pub fn extract(&self, mask: &ForegroundMask) -> Vec<Region> {
        if mask.is_empty() {
            return Vec::new();
        }
        let Some(binary) = self.binarize(mask) else {
            return Vec::new();
        };

        let regions = find_contours::<i32>(&binary)
            .into_iter()
            .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
            .filter_map(|c| region_of(&c))
            .filter(|r| r.area >= self.config.min_area);

        match self.config.selection {
            SelectionPolicy::AllRegions => regions.collect(),
            SelectionPolicy::LargestOnly => regions
                .fold(None::<Region>, |best, r| match best {
                    Some(b) if b.area >= r.area => Some(b),
                    _ => Some(r),
                })
                .into_iter()
                .collect(),
        }
    }

    /// Thresholds the mask, then closes and opens it with a square element.
    /// Flat morphology commutes with thresholding, so cleaning the binary
    /// mask matches cleaning the grayscale one.
    fn binarize(&self, mask: &ForegroundMask) -> Option<GrayImage> {
        let mut binary = GrayImage::from_raw(mask.width(), mask.height(), mask.data().to_vec())?;
        let cut = self.config.threshold;
        for v in binary.iter_mut() {
            *v = if *v > cut { u8::MAX } else { 0 };
        }
        if !self.config.cleanup {
            return Some(binary);
        }
        // L-infinity ball of radius r is the (2r+1)-wide square.
        let radius = u8::try_from(self.config.kernel_size / 2).unwrap_or(u8::MAX);
        let closed = morphology::close(&binary, Norm::LInf, radius);
        Some(morphology::open(&closed, Norm::LInf, radius))
    }
}

/// Bounding box of the contour plus the area enclosed by its border polygon.
fn region_of(contour: &Contour<i32>) -> Option<Region> {
    let points = &contour.points;
    let min_x = points.iter().map(|p| p.x).min()?;
    let max_x = points.iter().map(|p| p.x).max()?;
    let min_y = points.iter().map(|p| p.y).min()?;
    let max_y = points.iter().map(|p| p.y).max()?;
    Some(Region::new(
        min_x,
        min_y,
        max_x - min_x + 1,
        max_y - min_y + 1,
        polygon_area(points),
    ))
}

/// Shoelace formula over the closed border.
fn polygon_area(points: &[Point<i32>]) -> f64 {
    let twice: i64 = points
        .iter()
        .zip(points.iter().cycle().skip(1))
        .map(|(a, b)| a.x as i64 * b.y as i64 - b.x as i64 * a.y as i64)
        .sum();
    twice.abs() as f64 / 2.0
}
