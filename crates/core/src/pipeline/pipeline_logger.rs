use std::collections::HashMap;
use std::time::Instant;

/// Per-session observer for frame processing.
///
/// Sessions report stage timings and metrics here instead of logging
/// directly, so the server, tests and future front ends can each decide
/// what to keep.
pub trait PipelineLogger: Send {
    /// Record how long a named stage took for one frame.
    fn timing(&mut self, stage: &str, duration_ms: f64);

    /// Record a point-in-time metric (e.g. region count, subscriber count).
    fn metric(&mut self, name: &str, value: f64);

    /// Mark one frame as fully handled, published or dropped.
    fn frame_completed(&mut self) {}

    fn info(&mut self, message: &str);

    /// Emit an end-of-session summary. Default: no-op.
    fn summary(&self) {}
}

/// Discards everything.
pub struct NullPipelineLogger;

impl PipelineLogger for NullPipelineLogger {
    fn timing(&mut self, _stage: &str, _duration_ms: f64) {}
    fn metric(&mut self, _name: &str, _value: f64) {}
    fn info(&mut self, _message: &str) {}
}

/// Collects timings and metrics for one session and reports them through
/// the `log` facade when the session ends.
pub struct LogPipelineLogger {
    label: String,
    timings: HashMap<String, Vec<f64>>,
    metrics: HashMap<String, Vec<f64>>,
    start_time: Instant,
    frames: usize,
}

impl LogPipelineLogger {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            timings: HashMap::new(),
            metrics: HashMap::new(),
            start_time: Instant::now(),
            frames: 0,
        }
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Returns the formatted summary, or `None` if nothing was recorded.
    pub fn summary_string(&self) -> Option<String> {
        if self.timings.is_empty() && self.metrics.is_empty() {
            return None;
        }

        let elapsed_ms = self.start_time.elapsed().as_secs_f64() * 1000.0;
        let frames = self.frames;
        let mut lines = vec![format!(
            "Session {} summary ({frames} frames, {:.1}s):",
            self.label,
            elapsed_ms / 1000.0
        )];

        let mut stages: Vec<_> = self.timings.keys().collect();
        stages.sort();
        for stage in stages {
            let durations = &self.timings[stage];
            let max_ms = durations.iter().copied().fold(0.0, f64::max);
            lines.push(format!(
                "  {stage:10}: avg {:6.2}ms  max {max_ms:6.2}ms",
                average(durations)
            ));
        }

        let mut names: Vec<_> = self.metrics.keys().collect();
        names.sort();
        for name in names {
            lines.push(format!("  {name}: avg {:.1}", average(&self.metrics[name])));
        }

        if frames > 0 && elapsed_ms > 0.0 {
            let fps = frames as f64 / (elapsed_ms / 1000.0);
            lines.push(format!("  Throughput: {fps:.1} fps"));
        }

        Some(lines.join("\n"))
    }

    pub fn timings_for(&self, stage: &str) -> Option<&[f64]> {
        self.timings.get(stage).map(|v| v.as_slice())
    }

    pub fn metrics_for(&self, name: &str) -> Option<&[f64]> {
        self.metrics.get(name).map(|v| v.as_slice())
    }
}

fn average(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

impl PipelineLogger for LogPipelineLogger {
    fn timing(&mut self, stage: &str, duration_ms: f64) {
        self.timings
            .entry(stage.to_string())
            .or_default()
            .push(duration_ms);
    }

    fn metric(&mut self, name: &str, value: f64) {
        self.metrics
            .entry(name.to_string())
            .or_default()
            .push(value);
    }

    fn frame_completed(&mut self) {
        self.frames += 1;
    }

    fn info(&mut self, message: &str) {
        log::info!("[{}] {message}", self.label);
    }

    fn summary(&self) {
        if let Some(text) = self.summary_string() {
            log::info!("\n{text}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_null_logger_all_methods_are_noop() {
        let mut logger = NullPipelineLogger;
        logger.timing("decode", 5.0);
        logger.metric("regions", 3.0);
        logger.frame_completed();
        logger.info("hello");
        logger.summary();
    }

    #[test]
    fn test_timing_records_values() {
        let mut logger = LogPipelineLogger::new("s1");
        logger.timing("model", 20.0);
        logger.timing("model", 30.0);
        logger.timing("encode", 5.0);

        assert_eq!(logger.timings_for("model").unwrap(), &[20.0, 30.0]);
        assert_eq!(logger.timings_for("encode").unwrap().len(), 1);
        assert!(logger.timings_for("publish").is_none());
    }

    #[test]
    fn test_metric_average_in_summary() {
        let mut logger = LogPipelineLogger::new("s1");
        logger.metric("subscribers", 3.0);
        logger.metric("subscribers", 4.0);

        let values = logger.metrics_for("subscribers").unwrap();
        assert_relative_eq!(average(values), 3.5);

        let summary = logger.summary_string().unwrap();
        assert!(summary.contains("subscribers: avg 3.5"));
        assert!(summary.contains("Session s1"));
    }

    #[test]
    fn test_summary_lists_stages_and_throughput() {
        let mut logger = LogPipelineLogger::new("s2");
        logger.timing("decode", 1.0);
        logger.timing("publish", 2.0);
        for _ in 0..10 {
            logger.frame_completed();
        }

        let summary = logger.summary_string().unwrap();
        assert!(summary.contains("decode"));
        assert!(summary.contains("publish"));
        assert!(summary.contains("10 frames"));
        assert!(summary.contains("fps"));
        assert_eq!(logger.frames(), 10);
    }

    #[test]
    fn test_empty_summary_returns_none() {
        assert!(LogPipelineLogger::new("idle").summary_string().is_none());
    }

    #[test]
    fn test_average_of_empty_is_zero() {
        assert_relative_eq!(average(&[]), 0.0);
    }
}
