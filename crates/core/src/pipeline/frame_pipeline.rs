use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;

use crate::annotation::domain::frame_annotator::FrameAnnotator;
use crate::detection::domain::background_model::ModelError;
use crate::detection::domain::motion_detector::MotionDetector;
use crate::detection::domain::shared_background_model::SharedBackgroundModel;
use crate::pipeline::diagnostics::DiagnosticHook;
use crate::pipeline::pipeline_logger::PipelineLogger;
use crate::shared::frame::Frame;
use crate::shared::region::Region;
use crate::video::domain::frame_codec::{CodecError, FrameCodec};

/// Why a single frame was dropped.
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("could not decode frame: {0}")]
    Decode(CodecError),
    #[error("decoded frame has no pixels")]
    EmptyFrame,
    #[error("background model rejected frame: {0}")]
    ModelApply(ModelError),
    #[error("could not encode annotated frame: {0}")]
    Encode(CodecError),
    #[error("message of {size} bytes exceeds the {limit} byte limit")]
    Oversized { size: usize, limit: usize },
}

impl FrameError {
    /// A poisoned model means shared state may be half-updated; nothing
    /// downstream of it can be trusted, so the process must stop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, FrameError::ModelApply(ModelError::Poisoned))
    }
}

/// Result of running one message through the pipeline.
#[derive(Debug)]
pub struct ProcessedFrame {
    pub index: usize,
    pub width: u32,
    pub height: u32,
    pub regions: Vec<Region>,
    pub encoded: Vec<u8>,
}

/// decode → background model → motion regions → annotate → encode.
///
/// Cloning is cheap and keeps the same model handle, so a clone of a
/// pipeline built on a shared model feeds the same statistics.
#[derive(Clone)]
pub struct FramePipeline {
    codec: Arc<dyn FrameCodec>,
    model: SharedBackgroundModel,
    detector: MotionDetector,
    annotator: Arc<dyn FrameAnnotator>,
    hook: Option<Arc<dyn DiagnosticHook>>,
}

impl FramePipeline {
    pub fn new(
        codec: Arc<dyn FrameCodec>,
        model: SharedBackgroundModel,
        detector: MotionDetector,
        annotator: Arc<dyn FrameAnnotator>,
    ) -> Self {
        Self {
            codec,
            model,
            detector,
            annotator,
            hook: None,
        }
    }

    pub fn with_hook(mut self, hook: Arc<dyn DiagnosticHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    pub fn model(&self) -> &SharedBackgroundModel {
        &self.model
    }

    pub fn detector(&self) -> &MotionDetector {
        &self.detector
    }

    pub fn process(
        &self,
        bytes: &[u8],
        index: usize,
        logger: &mut dyn PipelineLogger,
    ) -> Result<ProcessedFrame, FrameError> {
        let frame = timed(logger, "decode", || self.codec.decode(bytes))
            .map_err(FrameError::Decode)?
            .with_index(index);
        if frame.is_empty() {
            return Err(FrameError::EmptyFrame);
        }

        let (annotated, regions) = self.analyze(&frame, logger)?;

        let encoded =
            timed(logger, "encode", || self.codec.encode(&annotated)).map_err(FrameError::Encode)?;

        Ok(ProcessedFrame {
            index,
            width: frame.width(),
            height: frame.height(),
            regions,
            encoded,
        })
    }

    /// Runs the model, detector and annotator on an already decoded frame.
    ///
    /// The model lock is taken for the `apply` call alone.
    pub fn analyze(
        &self,
        frame: &Frame,
        logger: &mut dyn PipelineLogger,
    ) -> Result<(Frame, Vec<Region>), FrameError> {
        let mask = timed(logger, "model", || self.model.apply(frame)).map_err(FrameError::ModelApply)?;

        if let Some(hook) = &self.hook {
            if let Err(e) = hook.on_mask(frame.index(), &mask) {
                log::warn!("Diagnostic hook failed on frame {}: {e}", frame.index());
            }
        }

        let regions = timed(logger, "detect", || self.detector.extract(&mask));
        logger.metric("regions", regions.len() as f64);

        let annotated = timed(logger, "annotate", || self.annotator.draw(frame, &regions));
        Ok((annotated, regions))
    }
}

fn timed<T>(logger: &mut dyn PipelineLogger, stage: &str, f: impl FnOnce() -> T) -> T {
    let start = Instant::now();
    let out = f();
    logger.timing(stage, start.elapsed().as_secs_f64() * 1000.0);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::infrastructure::rectangle_annotator::RectangleAnnotator;
    use crate::detection::domain::background_model::warm_start;
    use crate::detection::domain::motion_detector::{MotionConfig, SelectionPolicy};
    use crate::detection::infrastructure::background_model_factory::{
        create_background_model, BackgroundConfig, ModelKind,
    };
    use crate::pipeline::pipeline_logger::{LogPipelineLogger, NullPipelineLogger};
    use crate::shared::constants::HIGHLIGHT_COLOR;
    use crate::shared::foreground_mask::ForegroundMask;
    use crate::video::infrastructure::image_frame_codec::ImageFrameCodec;
    use rstest::rstest;
    use std::sync::Mutex;

    const W: u32 = 96;
    const H: u32 = 64;

    fn reference() -> Frame {
        Frame::filled(W, H, 3, 60)
    }

    /// Reference scene with a solid block, aligned to JPEG blocks so the
    /// surrounding background survives compression untouched.
    fn with_block(base: &Frame, x: u32, y: u32, w: u32, h: u32) -> Frame {
        let mut frame = base.clone();
        for row in y..y + h {
            for col in x..x + w {
                let idx = ((row * W + col) * 3) as usize;
                frame.data_mut()[idx..idx + 3].fill(220);
            }
        }
        frame
    }

    fn warm_model(kind: ModelKind, reference: &Frame) -> SharedBackgroundModel {
        let mut model = create_background_model(&BackgroundConfig {
            kind,
            ..BackgroundConfig::default()
        });
        warm_start(model.as_mut(), reference, 30, 0.1).unwrap();
        SharedBackgroundModel::new(model)
    }

    fn pipeline(model: SharedBackgroundModel) -> FramePipeline {
        FramePipeline::new(
            Arc::new(ImageFrameCodec::new()),
            model,
            MotionDetector::default(),
            Arc::new(RectangleAnnotator::default()),
        )
    }

    fn jpeg(frame: &Frame) -> Vec<u8> {
        ImageFrameCodec::new().encode(frame).unwrap()
    }

    #[rstest]
    #[case::gaussian(ModelKind::Gaussian)]
    #[case::knn(ModelKind::Knn)]
    fn test_reference_frame_yields_no_regions(#[case] kind: ModelKind) {
        let reference = reference();
        let p = pipeline(warm_model(kind, &reference));

        let (annotated, regions) = p.analyze(&reference, &mut NullPipelineLogger).unwrap();

        assert!(regions.is_empty());
        assert_eq!(annotated, reference);
    }

    #[rstest]
    #[case::gaussian(ModelKind::Gaussian)]
    #[case::knn(ModelKind::Knn)]
    fn test_inserted_block_is_outlined(#[case] kind: ModelKind) {
        let reference = reference();
        let p = pipeline(warm_model(kind, &reference));
        let moved = with_block(&reference, 16, 16, 32, 32);

        let (annotated, regions) = p.analyze(&moved, &mut NullPipelineLogger).unwrap();

        assert_eq!(regions.len(), 1);
        let r = &regions[0];
        assert_eq!((r.x, r.y, r.width, r.height), (16, 16, 32, 32));
        assert_eq!(annotated.pixel(16, 16), HIGHLIGHT_COLOR);
        assert_eq!(annotated.pixel(47, 30), HIGHLIGHT_COLOR);
        assert_eq!(annotated.pixel(30, 30), &[220u8, 220, 220]);
    }

    #[test]
    fn test_process_through_jpeg_finds_inserted_block() {
        let reference = reference();
        let decoded_reference = ImageFrameCodec::new().decode(&jpeg(&reference)).unwrap();
        let p = pipeline(warm_model(ModelKind::Gaussian, &decoded_reference));

        let still = p.process(&jpeg(&reference), 0, &mut NullPipelineLogger).unwrap();
        assert!(still.regions.is_empty());

        let block = Region::new(16, 16, 32, 32, 1024.0);
        let moved = jpeg(&with_block(&reference, 16, 16, 32, 32));
        let out = p.process(&moved, 1, &mut NullPipelineLogger).unwrap();

        assert_eq!(out.index, 1);
        assert_eq!((out.width, out.height), (W, H));
        assert!(!out.regions.is_empty());
        assert!(out.regions.iter().any(|r| r.intersects(&block)));
        assert_eq!(&out.encoded[..2], &[0xFF, 0xD8]);

        let round_trip = ImageFrameCodec::new().decode(&out.encoded).unwrap();
        assert_eq!((round_trip.width(), round_trip.height()), (W, H));
        assert_eq!(round_trip.channels(), 3);
        let edge = round_trip.pixel(16, 30);
        assert!(
            edge[0] as i32 - edge[1] as i32 > 60,
            "expected highlight, got {edge:?}"
        );
    }

    #[test]
    fn test_largest_only_keeps_bigger_block() {
        let reference = reference();
        let p = FramePipeline::new(
            Arc::new(ImageFrameCodec::new()),
            warm_model(ModelKind::Gaussian, &reference),
            MotionDetector::new(MotionConfig {
                selection: SelectionPolicy::LargestOnly,
                ..MotionConfig::default()
            }),
            Arc::new(RectangleAnnotator::default()),
        );
        let two = with_block(&with_block(&reference, 8, 8, 24, 24), 48, 16, 40, 40);

        let (_, regions) = p.analyze(&two, &mut NullPipelineLogger).unwrap();

        assert_eq!(regions.len(), 1);
        assert_eq!((regions[0].x, regions[0].y), (48, 16));
    }

    #[rstest]
    #[case::empty(&[][..])]
    #[case::garbage(&[1u8, 2, 3, 4][..])]
    fn test_undecodable_input_is_decode_error(#[case] bytes: &[u8]) {
        let p = pipeline(warm_model(ModelKind::Gaussian, &reference()));
        let err = p.process(bytes, 0, &mut NullPipelineLogger).unwrap_err();
        assert!(matches!(err, FrameError::Decode(_)));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_camera_resolution_change_restarts_model() {
        let p = pipeline(warm_model(ModelKind::Gaussian, &Frame::filled(32, 32, 3, 60)));

        let first = p.process(&jpeg(&reference()), 0, &mut NullPipelineLogger).unwrap();
        assert!(first.regions.is_empty());
        assert_eq!((first.width, first.height), (W, H));
        assert_eq!(p.model().with_model(|m| m.dimensions()).unwrap(), Some((W, H)));

        for i in 1..5 {
            p.process(&jpeg(&reference()), i, &mut NullPipelineLogger).unwrap();
        }
        let moved = jpeg(&with_block(&reference(), 16, 16, 32, 32));
        let out = p.process(&moved, 5, &mut NullPipelineLogger).unwrap();
        assert!(!out.regions.is_empty());
    }

    #[test]
    fn test_poisoned_model_is_fatal() {
        let model = warm_model(ModelKind::Gaussian, &reference());
        let poisoner = model.clone();
        let _ = std::thread::spawn(move || {
            let _ = poisoner.with_model(|_| panic!("update blew up"));
        })
        .join();

        let err = pipeline(model)
            .analyze(&reference(), &mut NullPipelineLogger)
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_records_stage_timings() {
        let p = pipeline(warm_model(ModelKind::Gaussian, &reference()));
        let mut logger = LogPipelineLogger::new("t");
        p.process(&jpeg(&reference()), 0, &mut logger).unwrap();
        for stage in ["decode", "model", "detect", "annotate", "encode"] {
            assert_eq!(logger.timings_for(stage).map(<[f64]>::len), Some(1), "{stage}");
        }
        assert_eq!(logger.metrics_for("regions").unwrap(), &[0.0]);
    }

    struct RecordingHook {
        seen: Mutex<Vec<(usize, usize)>>,
    }

    impl DiagnosticHook for RecordingHook {
        fn on_mask(
            &self,
            index: usize,
            mask: &ForegroundMask,
        ) -> Result<(), Box<dyn std::error::Error>> {
            self.seen.lock().unwrap().push((index, mask.foreground_count()));
            Err("disk full".into())
        }
    }

    #[test]
    fn test_hook_sees_raw_mask_and_failures_are_ignored() {
        let reference = reference();
        let hook = Arc::new(RecordingHook {
            seen: Mutex::new(Vec::new()),
        });
        let p = pipeline(warm_model(ModelKind::Gaussian, &reference)).with_hook(hook.clone());

        let moved = with_block(&reference, 16, 16, 32, 32).with_index(7);
        let (_, regions) = p.analyze(&moved, &mut NullPipelineLogger).unwrap();

        assert_eq!(regions.len(), 1);
        assert_eq!(*hook.seen.lock().unwrap(), vec![(7, 1024)]);
    }
}
