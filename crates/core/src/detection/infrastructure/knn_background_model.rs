use crate::detection::domain::background_model::{
    effective_rate, geometry_changed, BackgroundModel, ModelError,
};
use crate::shared::constants::{DEFAULT_HISTORY, MASK_FOREGROUND, MASK_SHADOW};
use crate::shared::foreground_mask::ForegroundMask;
use crate::shared::frame::Frame;

use super::gaussian_background_model::DEFAULT_SHADOW_RATIO;

pub const DEFAULT_SAMPLES: usize = 7;
pub const DEFAULT_NEIGHBORS: usize = 2;
pub const DEFAULT_DISTANCE_THRESHOLD: f32 = 400.0;

#[derive(Clone, Debug, PartialEq)]
pub struct KnnParams {
    pub learning_rate: Option<f64>,
    pub history: usize,
    /// Samples kept per pixel.
    pub samples: usize,
    /// Close samples required to call a pixel background.
    pub neighbors: usize,
    /// Squared colour distance for a sample to count as close.
    pub distance_threshold: f32,
    pub detect_shadows: bool,
    pub shadow_ratio: f32,
}

impl Default for KnnParams {
    fn default() -> Self {
        Self {
            learning_rate: None,
            history: DEFAULT_HISTORY,
            samples: DEFAULT_SAMPLES,
            neighbors: DEFAULT_NEIGHBORS,
            distance_threshold: DEFAULT_DISTANCE_THRESHOLD,
            detect_shadows: true,
            shadow_ratio: DEFAULT_SHADOW_RATIO,
        }
    }
}

struct SampleBank {
    width: u32,
    height: u32,
    channels: u8,
    /// `samples` whole frames, one after another.
    slots: Vec<Vec<u8>>,
    cursor: usize,
    /// Fractional slot replacements owed by the learning rate.
    credit: f64,
}

/// Non-parametric model: a pixel is background when enough of its stored
/// samples are close to the current value.
pub struct KnnBackgroundModel {
    params: KnnParams,
    bank: Option<SampleBank>,
    frames_seen: u64,
}

impl KnnBackgroundModel {
    pub fn new(params: KnnParams) -> Self {
        Self {
            params: KnnParams {
                samples: params.samples.max(1),
                neighbors: params.neighbors.clamp(1, params.samples.max(1)),
                ..params
            },
            bank: None,
            frames_seen: 0,
        }
    }

    pub fn params(&self) -> &KnnParams {
        &self.params
    }
}

impl Default for KnnBackgroundModel {
    fn default() -> Self {
        Self::new(KnnParams::default())
    }
}

impl BackgroundModel for KnnBackgroundModel {
    fn apply_with_rate(
        &mut self,
        frame: &Frame,
        learning_rate: Option<f64>,
    ) -> Result<ForegroundMask, ModelError> {
        if let Some(bank) = &self.bank {
            if geometry_changed((bank.width, bank.height, bank.channels), frame) {
                self.reset();
            }
        }
        self.frames_seen += 1;
        let alpha = effective_rate(
            learning_rate,
            self.params.learning_rate,
            self.frames_seen,
            self.params.history,
        );

        let Some(bank) = self.bank.as_mut() else {
            self.bank = Some(SampleBank {
                width: frame.width(),
                height: frame.height(),
                channels: frame.channels(),
                slots: vec![frame.data().to_vec(); self.params.samples],
                cursor: 0,
                credit: 0.0,
            });
            return Ok(ForegroundMask::zeros(frame.width(), frame.height()));
        };

        let channels = bank.channels as usize;
        let pixels = (bank.width as usize) * (bank.height as usize);
        let mut mask = vec![0u8; pixels];

        for (i, pixel) in frame.data().chunks_exact(channels).enumerate() {
            let range = i * channels..(i + 1) * channels;
            let samples = bank.slots.iter().map(|slot| &slot[range.clone()]);
            mask[i] = classify(pixel, samples, &self.params);
        }

        bank.credit += alpha * bank.slots.len() as f64;
        while bank.credit >= 1.0 {
            let cursor = bank.cursor;
            bank.slots[cursor].copy_from_slice(frame.data());
            bank.cursor = (cursor + 1) % bank.slots.len();
            bank.credit -= 1.0;
        }

        Ok(ForegroundMask::new(mask, bank.width, bank.height))
    }

    fn dimensions(&self) -> Option<(u32, u32)> {
        self.bank.as_ref().map(|b| (b.width, b.height))
    }

    fn reset(&mut self) {
        self.bank = None;
        self.frames_seen = 0;
    }
}

fn classify<'a>(
    pixel: &[u8],
    samples: impl Iterator<Item = &'a [u8]> + Clone,
    params: &KnnParams,
) -> u8 {
    let close = samples
        .clone()
        .filter(|s| distance2(pixel, s) < params.distance_threshold)
        .take(params.neighbors)
        .count();
    if close >= params.neighbors {
        return 0;
    }
    if params.detect_shadows {
        let shadows = samples
            .filter(|s| is_shadow_of(pixel, s, params))
            .take(params.neighbors)
            .count();
        if shadows >= params.neighbors {
            return MASK_SHADOW;
        }
    }
    MASK_FOREGROUND
}

fn distance2(a: &[u8], b: &[u8]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(&x, &y)| (x as f32 - y as f32).powi(2))
        .sum()
}

fn is_shadow_of(pixel: &[u8], sample: &[u8], params: &KnnParams) -> bool {
    let dot: f32 = pixel.iter().zip(sample).map(|(&x, &s)| x as f32 * s as f32).sum();
    let norm: f32 = sample.iter().map(|&s| (s as f32).powi(2)).sum();
    if norm <= f32::EPSILON {
        return false;
    }
    let ratio = dot / norm;
    if !(params.shadow_ratio..=1.0).contains(&ratio) {
        return false;
    }
    let residual: f32 = pixel
        .iter()
        .zip(sample)
        .map(|(&x, &s)| (x as f32 - ratio * s as f32).powi(2))
        .sum();
    residual < params.distance_threshold * ratio * ratio
}
