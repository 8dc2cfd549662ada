use thiserror::Error;

use crate::shared::foreground_mask::ForegroundMask;
use crate::shared::frame::Frame;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("background model lock poisoned; its statistics can no longer be trusted")]
    Poisoned,
}

/// Running statistical estimate of the static scene.
///
/// `apply` both classifies the frame and folds it into the statistics, so
/// implementations hold mutable state and are not safe to call concurrently.
/// Share one across threads through
/// [`SharedBackgroundModel`](super::shared_background_model::SharedBackgroundModel).
///
/// A frame whose size or channel count differs from the statistics restarts
/// the model from that frame, which then yields an all-background mask.
pub trait BackgroundModel: Send {
    /// Classifies `frame` and updates the model.
    ///
    /// `learning_rate` overrides the configured rate for this call only;
    /// `None` uses the model's own schedule.
    fn apply_with_rate(
        &mut self,
        frame: &Frame,
        learning_rate: Option<f64>,
    ) -> Result<ForegroundMask, ModelError>;

    fn apply(&mut self, frame: &Frame) -> Result<ForegroundMask, ModelError> {
        self.apply_with_rate(frame, None)
    }

    /// `(width, height)` once the first frame has been seen.
    fn dimensions(&self) -> Option<(u32, u32)>;

    /// Forgets all statistics; the next frame re-initialises the model.
    fn reset(&mut self);
}

/// Primes `model` with repeated applications of a static reference image so
/// the empty scene is not reported as motion when live traffic starts.
pub fn warm_start(
    model: &mut dyn BackgroundModel,
    reference: &Frame,
    iterations: usize,
    learning_rate: f64,
) -> Result<(), ModelError> {
    for _ in 0..iterations {
        model.apply_with_rate(reference, Some(learning_rate))?;
    }
    log::debug!(
        "Warm-started background model with {iterations} iterations of a {}x{} reference",
        reference.width(),
        reference.height()
    );
    Ok(())
}

/// Resolves the per-call learning rate for models with an automatic schedule.
///
/// With no explicit or configured rate the model averages over the frames
/// seen so far, capped at `history`.
pub(crate) fn effective_rate(
    explicit: Option<f64>,
    configured: Option<f64>,
    frames_seen: u64,
    history: usize,
) -> f64 {
    explicit
        .or(configured)
        .unwrap_or_else(|| 1.0 / (frames_seen.max(1).min(history.max(1) as u64)) as f64)
        .clamp(0.0, 1.0)
}

/// True when `frame` no longer fits statistics built for `current`
/// (`width`, `height`, `channels`). Logs the change.
pub(crate) fn geometry_changed(current: (u32, u32, u8), frame: &Frame) -> bool {
    let incoming = (frame.width(), frame.height(), frame.channels());
    if incoming == current {
        return false;
    }
    log::warn!(
        "Frame geometry changed from {}x{}x{} to {}x{}x{}; re-initialising background model",
        current.0,
        current.1,
        current.2,
        incoming.0,
        incoming.1,
        incoming.2
    );
    true
}
