use crate::detection::domain::background_model::{
    effective_rate, geometry_changed, BackgroundModel, ModelError,
};
use crate::shared::constants::{DEFAULT_HISTORY, MASK_FOREGROUND, MASK_SHADOW};
use crate::shared::foreground_mask::ForegroundMask;
use crate::shared::frame::Frame;

pub const DEFAULT_VARIANCE_THRESHOLD: f32 = 16.0;
pub const DEFAULT_SHADOW_RATIO: f32 = 0.5;
const VARIANCE_INIT: f32 = 15.0;
const VARIANCE_MIN: f32 = 4.0;
const VARIANCE_MAX: f32 = 75.0;

#[derive(Clone, Debug, PartialEq)]
pub struct GaussianParams {
    /// Fixed learning rate; `None` averages over the last `history` frames.
    pub learning_rate: Option<f64>,
    pub history: usize,
    /// Squared Mahalanobis distance below which a pixel is background.
    pub variance_threshold: f32,
    pub detect_shadows: bool,
    /// Darkest brightness ratio still accepted as a shadow.
    pub shadow_ratio: f32,
}

impl Default for GaussianParams {
    fn default() -> Self {
        Self {
            learning_rate: None,
            history: DEFAULT_HISTORY,
            variance_threshold: DEFAULT_VARIANCE_THRESHOLD,
            detect_shadows: true,
            shadow_ratio: DEFAULT_SHADOW_RATIO,
        }
    }
}

struct Statistics {
    width: u32,
    height: u32,
    channels: u8,
    mean: Vec<f32>,
    variance: Vec<f32>,
}

/// One adaptive Gaussian per pixel: per-channel mean, shared variance.
///
/// Lightweight relative of the mixture-of-Gaussians subtractor; good enough
/// for a fixed camera with gradual lighting change.
pub struct GaussianBackgroundModel {
    params: GaussianParams,
    stats: Option<Statistics>,
    frames_seen: u64,
}

impl GaussianBackgroundModel {
    pub fn new(params: GaussianParams) -> Self {
        Self {
            params,
            stats: None,
            frames_seen: 0,
        }
    }

    pub fn params(&self) -> &GaussianParams {
        &self.params
    }

    fn initialise(&mut self, frame: &Frame) -> ForegroundMask {
        let pixels = (frame.width() as usize) * (frame.height() as usize);
        self.stats = Some(Statistics {
            width: frame.width(),
            height: frame.height(),
            channels: frame.channels(),
            mean: frame.data().iter().map(|&v| v as f32).collect(),
            variance: vec![VARIANCE_INIT; pixels],
        });
        ForegroundMask::zeros(frame.width(), frame.height())
    }
}

impl Default for GaussianBackgroundModel {
    fn default() -> Self {
        Self::new(GaussianParams::default())
    }
}

impl BackgroundModel for GaussianBackgroundModel {
    fn apply_with_rate(
        &mut self,
        frame: &Frame,
        learning_rate: Option<f64>,
    ) -> Result<ForegroundMask, ModelError> {
        if let Some(stats) = &self.stats {
            if geometry_changed((stats.width, stats.height, stats.channels), frame) {
                self.reset();
            }
        }
        self.frames_seen += 1;
        let alpha = effective_rate(
            learning_rate,
            self.params.learning_rate,
            self.frames_seen,
            self.params.history,
        ) as f32;

        let Some(stats) = self.stats.as_mut() else {
            return Ok(self.initialise(frame));
        };

        let channels = stats.channels as usize;
        let threshold = self.params.variance_threshold;
        let mut mask = vec![0u8; stats.variance.len()];

        for (i, pixel) in frame.data().chunks_exact(channels).enumerate() {
            let mean = &mut stats.mean[i * channels..(i + 1) * channels];
            let var = &mut stats.variance[i];

            let dist2: f32 = pixel
                .iter()
                .zip(mean.iter())
                .map(|(&x, &m)| (x as f32 - m).powi(2))
                .sum();

            mask[i] = if dist2 < threshold * *var {
                0
            } else if self.params.detect_shadows
                && is_shadow(pixel, mean, *var, threshold, self.params.shadow_ratio)
            {
                MASK_SHADOW
            } else {
                MASK_FOREGROUND
            };

            for (m, &x) in mean.iter_mut().zip(pixel) {
                *m += alpha * (x as f32 - *m);
            }
            *var = (*var + alpha * (dist2 - *var)).clamp(VARIANCE_MIN, VARIANCE_MAX);
        }

        Ok(ForegroundMask::new(mask, stats.width, stats.height))
    }

    fn dimensions(&self) -> Option<(u32, u32)> {
        self.stats.as_ref().map(|s| (s.width, s.height))
    }

    fn reset(&mut self) {
        self.stats = None;
        self.frames_seen = 0;
    }
}

/// A shadow is a darker copy of the background colour: brightness ratio in
/// `[shadow_ratio, 1]` with a small chromatic residual.
fn is_shadow(pixel: &[u8], mean: &[f32], var: f32, threshold: f32, shadow_ratio: f32) -> bool {
    let dot: f32 = pixel.iter().zip(mean).map(|(&x, &m)| x as f32 * m).sum();
    let norm: f32 = mean.iter().map(|m| m * m).sum();
    if norm <= f32::EPSILON {
        return false;
    }
    let ratio = dot / norm;
    if !(shadow_ratio..=1.0).contains(&ratio) {
        return false;
    }
    let residual: f32 = pixel
        .iter()
        .zip(mean)
        .map(|(&x, &m)| (x as f32 - ratio * m).powi(2))
        .sum();
    residual < threshold * var * ratio * ratio
}
