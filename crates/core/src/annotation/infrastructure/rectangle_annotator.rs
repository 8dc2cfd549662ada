use image::{ImageBuffer, Luma, Pixel, Rgb, Rgba};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use crate::annotation::domain::frame_annotator::FrameAnnotator;
use crate::shared::constants::{HIGHLIGHT_COLOR, STROKE_WIDTH};
use crate::shared::frame::Frame;
use crate::shared::region::Region;

/// Outlines each region with an unfilled rectangle.
///
/// The stroke is drawn inside the region bounds and clipped to the frame.
#[derive(Clone, Debug)]
pub struct RectangleAnnotator {
    stroke: u32,
    color: [u8; 3],
}

impl RectangleAnnotator {
    pub fn new(stroke: u32, color: [u8; 3]) -> Self {
        Self {
            stroke: stroke.max(1),
            color,
        }
    }

    pub fn stroke(&self) -> u32 {
        self.stroke
    }

    pub fn color(&self) -> [u8; 3] {
        self.color
    }

    /// Region bounds clamped to the frame, one rectangle per stroke ring.
    fn rings(&self, frame: &Frame, region: &Region) -> Vec<Rect> {
        let fw = frame.width() as i64;
        let fh = frame.height() as i64;
        let left = (region.x as i64).clamp(0, fw);
        let top = (region.y as i64).clamp(0, fh);
        let right = (region.right() as i64).clamp(0, fw);
        let bottom = (region.bottom() as i64).clamp(0, fh);

        (0..self.stroke as i64)
            .map(|inset| {
                (
                    left + inset,
                    top + inset,
                    right - left - 2 * inset,
                    bottom - top - 2 * inset,
                )
            })
            .take_while(|&(_, _, w, h)| w > 0 && h > 0)
            .map(|(x, y, w, h)| Rect::at(x as i32, y as i32).of_size(w as u32, h as u32))
            .collect()
    }

    fn outline<P>(&self, frame: &Frame, regions: &[Region], color: P) -> Option<Frame>
    where
        P: Pixel<Subpixel = u8>,
    {
        let mut canvas: ImageBuffer<P, Vec<u8>> =
            ImageBuffer::from_raw(frame.width(), frame.height(), frame.data().to_vec())?;
        for rect in regions.iter().flat_map(|r| self.rings(frame, r)) {
            draw_hollow_rect_mut(&mut canvas, rect, color);
        }
        Some(Frame::new(
            canvas.into_raw(),
            frame.width(),
            frame.height(),
            frame.channels(),
            frame.index(),
        ))
    }
}

impl Default for RectangleAnnotator {
    fn default() -> Self {
        Self::new(STROKE_WIDTH, HIGHLIGHT_COLOR)
    }
}

impl FrameAnnotator for RectangleAnnotator {
    fn draw(&self, frame: &Frame, regions: &[Region]) -> Frame {
        if regions.is_empty() || frame.is_empty() {
            return frame.clone();
        }
        let [r, g, b] = self.color;
        // Single-channel frames get the brightest tone.
        let drawn = match frame.channels() {
            1 => self.outline::<Luma<u8>>(frame, regions, Luma([u8::MAX])),
            3 => self.outline::<Rgb<u8>>(frame, regions, Rgb(self.color)),
            4 => self.outline::<Rgba<u8>>(frame, regions, Rgba([r, g, b, u8::MAX])),
            other => {
                log::warn!("Cannot annotate a {other}-channel frame; passing it through");
                None
            }
        };
        drawn.unwrap_or_else(|| frame.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(x: i32, y: i32, w: i32, h: i32) -> Region {
        Region::new(x, y, w, h, (w * h) as f64)
    }

    fn is_highlight(frame: &Frame, x: u32, y: u32) -> bool {
        frame.pixel(x, y) == HIGHLIGHT_COLOR
    }

    #[test]
    fn test_no_regions_returns_unchanged_copy() {
        let frame = Frame::new(vec![7u8; 10 * 8 * 3], 10, 8, 3, 3);
        let out = RectangleAnnotator::default().draw(&frame, &[]);
        assert_eq!(out, frame);
    }

    #[test]
    fn test_source_frame_is_not_mutated() {
        let frame = Frame::filled(20, 20, 3, 0);
        let out = RectangleAnnotator::default().draw(&frame, &[region(2, 2, 10, 10)]);
        assert!(frame.data().iter().all(|&v| v == 0));
        assert_ne!(out, frame);
    }

    #[test]
    fn test_outline_is_two_pixels_inward_and_unfilled() {
        let frame = Frame::filled(20, 20, 3, 0);
        let out = RectangleAnnotator::default().draw(&frame, &[region(4, 5, 10, 8)]);

        // Edges and the second stroke row.
        assert!(is_highlight(&out, 4, 5));
        assert!(is_highlight(&out, 13, 12));
        assert!(is_highlight(&out, 8, 6));
        assert!(is_highlight(&out, 5, 9));
        assert!(is_highlight(&out, 12, 9));
        // Interior and exterior untouched.
        assert_eq!(out.pixel(8, 8), &[0u8, 0, 0]);
        assert_eq!(out.pixel(3, 5), &[0u8, 0, 0]);
        assert_eq!(out.pixel(14, 12), &[0u8, 0, 0]);
        assert_eq!(out.pixel(8, 13), &[0u8, 0, 0]);
    }

    #[test]
    fn test_region_past_frame_edge_is_clipped() {
        let frame = Frame::filled(10, 10, 3, 0);
        let out = RectangleAnnotator::default().draw(&frame, &[region(-3, 6, 20, 20)]);
        assert!(is_highlight(&out, 0, 6));
        assert!(is_highlight(&out, 9, 9));
        assert_eq!(out.pixel(5, 5), &[0u8, 0, 0]);
    }

    #[test]
    fn test_region_outside_frame_is_ignored() {
        let frame = Frame::filled(10, 10, 3, 0);
        let out = RectangleAnnotator::default().draw(&frame, &[region(30, 30, 5, 5)]);
        assert_eq!(out, frame);
    }

    #[test]
    fn test_thin_region_is_filled_solid() {
        let frame = Frame::filled(10, 10, 3, 0);
        let out = RectangleAnnotator::default().draw(&frame, &[region(2, 2, 1, 6)]);
        for y in 2..8 {
            assert!(is_highlight(&out, 2, y));
        }
    }

    #[test]
    fn test_grayscale_frame_uses_white() {
        let frame = Frame::filled(10, 10, 1, 0);
        let out = RectangleAnnotator::default().draw(&frame, &[region(1, 1, 5, 5)]);
        assert_eq!(out.pixel(1, 1), &[255u8]);
    }

    #[test]
    fn test_frame_index_preserved() {
        let frame = Frame::filled(10, 10, 3, 0).with_index(9);
        let out = RectangleAnnotator::default().draw(&frame, &[region(1, 1, 5, 5)]);
        assert_eq!(out.index(), 9);
    }
}
