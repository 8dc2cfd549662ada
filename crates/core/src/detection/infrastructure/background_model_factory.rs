use crate::detection::domain::background_model::{warm_start, BackgroundModel, ModelError};
use crate::detection::domain::shared_background_model::SharedBackgroundModel;
use crate::shared::constants::{DEFAULT_HISTORY, DEFAULT_WARMUP_ITERATIONS, DEFAULT_WARMUP_LEARNING_RATE};
use crate::shared::frame::Frame;

use super::gaussian_background_model::{GaussianBackgroundModel, GaussianParams};
use super::knn_background_model::{KnnBackgroundModel, KnnParams};

/// Background subtraction algorithm.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelKind {
    Gaussian,
    Knn,
}

/// Whether sessions observe one camera or independent sources.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelSharing {
    /// Every session feeds the same model, serialized by its lock.
    Shared,
    /// Each session gets a fresh model of its own.
    PerSession,
}

#[derive(Clone, Debug, PartialEq)]
pub struct BackgroundConfig {
    pub kind: ModelKind,
    pub learning_rate: Option<f64>,
    pub history: usize,
    pub detect_shadows: bool,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            kind: ModelKind::Gaussian,
            learning_rate: None,
            history: DEFAULT_HISTORY,
            detect_shadows: true,
        }
    }
}

/// Static reference image used to prime new models.
#[derive(Clone, Debug)]
pub struct WarmStart {
    pub reference: Frame,
    pub iterations: usize,
    pub learning_rate: f64,
}

impl WarmStart {
    pub fn new(reference: Frame) -> Self {
        Self {
            reference,
            iterations: DEFAULT_WARMUP_ITERATIONS,
            learning_rate: DEFAULT_WARMUP_LEARNING_RATE,
        }
    }
}

pub fn create_background_model(config: &BackgroundConfig) -> Box<dyn BackgroundModel> {
    log::info!(
        "Creating {:?} background model (learning_rate={}, history={}, shadows={})",
        config.kind,
        config
            .learning_rate
            .map_or_else(|| "auto".to_string(), |r| r.to_string()),
        config.history,
        config.detect_shadows
    );
    match config.kind {
        ModelKind::Gaussian => Box::new(GaussianBackgroundModel::new(GaussianParams {
            learning_rate: config.learning_rate,
            history: config.history,
            detect_shadows: config.detect_shadows,
            ..GaussianParams::default()
        })),
        ModelKind::Knn => Box::new(KnnBackgroundModel::new(KnnParams {
            learning_rate: config.learning_rate,
            history: config.history,
            detect_shadows: config.detect_shadows,
            ..KnnParams::default()
        })),
    }
}

/// Hands each new session the background model it should use.
pub struct BackgroundModelProvider {
    config: BackgroundConfig,
    warm: Option<WarmStart>,
    shared: Option<SharedBackgroundModel>,
}

impl BackgroundModelProvider {
    /// Under [`ModelSharing::Shared`] the single model is built and primed
    /// here, once.
    pub fn new(
        config: BackgroundConfig,
        sharing: ModelSharing,
        warm: Option<WarmStart>,
    ) -> Result<Self, ModelError> {
        let mut provider = Self {
            config,
            warm,
            shared: None,
        };
        if sharing == ModelSharing::Shared {
            provider.shared = Some(SharedBackgroundModel::new(provider.build()?));
        }
        Ok(provider)
    }

    pub fn sharing(&self) -> ModelSharing {
        if self.shared.is_some() {
            ModelSharing::Shared
        } else {
            ModelSharing::PerSession
        }
    }

    pub fn model_for_session(&self) -> Result<SharedBackgroundModel, ModelError> {
        match &self.shared {
            Some(model) => Ok(model.clone()),
            None => Ok(SharedBackgroundModel::new(self.build()?)),
        }
    }

    fn build(&self) -> Result<Box<dyn BackgroundModel>, ModelError> {
        let mut model = create_background_model(&self.config);
        if let Some(warm) = &self.warm {
            warm_start(
                model.as_mut(),
                &warm.reference,
                warm.iterations,
                warm.learning_rate,
            )?;
        }
        Ok(model)
    }
}
