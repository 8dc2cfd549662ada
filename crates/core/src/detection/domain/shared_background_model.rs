use std::sync::{Arc, Mutex};

use crate::detection::domain::background_model::{BackgroundModel, ModelError};
use crate::shared::foreground_mask::ForegroundMask;
use crate::shared::frame::Frame;

/// Mutual-exclusion guard around one background model.
///
/// Cloning yields another handle to the *same* model; sessions that observe
/// the same camera share one, independent sources each get their own. The
/// lock is held for a single `apply`, never for the rest of the pipeline.
#[derive(Clone)]
pub struct SharedBackgroundModel {
    inner: Arc<Mutex<Box<dyn BackgroundModel>>>,
}

impl SharedBackgroundModel {
    pub fn new(model: Box<dyn BackgroundModel>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(model)),
        }
    }

    pub fn apply(&self, frame: &Frame) -> Result<ForegroundMask, ModelError> {
        self.with_model(|model| model.apply(frame))?
    }

    /// Runs `f` with exclusive access to the model.
    ///
    /// A poisoned lock means an update panicked half-way; the statistics are
    /// then unusable and callers must treat [`ModelError::Poisoned`] as fatal.
    pub fn with_model<R>(
        &self,
        f: impl FnOnce(&mut dyn BackgroundModel) -> R,
    ) -> Result<R, ModelError> {
        let mut guard = self.inner.lock().map_err(|_| ModelError::Poisoned)?;
        Ok(f(guard.as_mut()))
    }

    /// True when both handles point at the same underlying model.
    pub fn same_model(&self, other: &SharedBackgroundModel) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    /// Fails the test if two applies ever overlap.
    struct ExclusiveModel {
        busy: Arc<AtomicBool>,
        applied: Arc<AtomicUsize>,
    }

    impl BackgroundModel for ExclusiveModel {
        fn apply_with_rate(
            &mut self,
            frame: &Frame,
            _learning_rate: Option<f64>,
        ) -> Result<ForegroundMask, ModelError> {
            assert!(
                !self.busy.swap(true, Ordering::SeqCst),
                "concurrent apply detected"
            );
            thread::sleep(Duration::from_millis(1));
            self.applied.fetch_add(1, Ordering::SeqCst);
            self.busy.store(false, Ordering::SeqCst);
            Ok(ForegroundMask::zeros(frame.width(), frame.height()))
        }

        fn dimensions(&self) -> Option<(u32, u32)> {
            None
        }

        fn reset(&mut self) {}
    }

    struct PanickingModel;

    impl BackgroundModel for PanickingModel {
        fn apply_with_rate(
            &mut self,
            _frame: &Frame,
            _learning_rate: Option<f64>,
        ) -> Result<ForegroundMask, ModelError> {
            panic!("statistics corrupted");
        }

        fn dimensions(&self) -> Option<(u32, u32)> {
            None
        }

        fn reset(&mut self) {}
    }

    #[test]
    fn test_applies_from_many_threads_are_serialized() {
        let applied = Arc::new(AtomicUsize::new(0));
        let shared = SharedBackgroundModel::new(Box::new(ExclusiveModel {
            busy: Arc::new(AtomicBool::new(false)),
            applied: applied.clone(),
        }));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let model = shared.clone();
                thread::spawn(move || {
                    let frame = Frame::filled(2, 2, 3, 0);
                    for _ in 0..10 {
                        model.apply(&frame).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(applied.load(Ordering::SeqCst), 40);
    }

    #[test]
    fn test_clones_share_one_model() {
        let a = SharedBackgroundModel::new(Box::new(PanickingModel));
        let b = a.clone();
        let c = SharedBackgroundModel::new(Box::new(PanickingModel));
        assert!(a.same_model(&b));
        assert!(!a.same_model(&c));
    }

    #[test]
    fn test_panic_during_apply_poisons_the_model() {
        let shared = SharedBackgroundModel::new(Box::new(PanickingModel));
        let cloned = shared.clone();
        let result = thread::spawn(move || cloned.apply(&Frame::filled(1, 1, 3, 0))).join();
        assert!(result.is_err());

        assert_eq!(
            shared.apply(&Frame::filled(1, 1, 3, 0)),
            Err(ModelError::Poisoned)
        );
    }
}
