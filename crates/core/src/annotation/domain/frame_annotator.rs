use crate::shared::frame::Frame;
use crate::shared::region::Region;

/// Draws region outlines onto frames.
///
/// Implementations return a new frame; the input is never modified so the
/// caller may keep using it.
pub trait FrameAnnotator: Send + Sync {
    fn draw(&self, frame: &Frame, regions: &[Region]) -> Frame;
}
