//! Frame-to-token glue: normalizer → outlier filter → window → classifier → smoother.
//!
//! [`FramePipeline`] owns the per-session mutable state (window and
//! recognition state) and is driven from a single task. The two blocking
//! calls, landmark extraction and classification, are exposed as free-standing
//! pieces ([`FramePipeline::normalizer`], [`run_classifier`]) so the session can
//! move them onto the blocking pool and feed the results back in.

use crate::clock::Clock;
use crate::defaults;
use crate::error::Result;
use crate::frame::VideoFrame;
use crate::pipeline::classifier::{Classifier, PredictionEvent, WindowTensor, classify};
use crate::pipeline::error::{ErrorReporter, LogReporter, StageError};
use crate::pipeline::smoother::{Outcome, RecognitionSmoother, RecognitionState, SmootherConfig};
use crate::pipeline::window::{PushOutcome, Window, WindowPolicy};
use crate::pose::normalizer::SampleNormalizer;
use crate::pose::outlier::{OutlierFilter, Verdict};
use crate::pose::sample::Sample;
use crate::transport::{DataChannel, ReadyState};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Construction parameters for one [`FramePipeline`].
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub window_capacity: usize,
    pub window_policy: WindowPolicy,
    pub outlier_z: f32,
    pub smoother: SmootherConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            window_capacity: defaults::WINDOW_CAPACITY,
            window_policy: WindowPolicy::default(),
            outlier_z: defaults::OUTLIER_Z,
            smoother: SmootherConfig::default(),
        }
    }
}

/// Counters for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub samples: u64,
    pub no_hand: u64,
    pub outliers: u64,
    pub extraction_errors: u64,
    pub windows: u64,
    pub inference_errors: u64,
    pub emitted: u64,
    pub sent: u64,
    pub dropped_messages: u64,
}

/// Per-session recognition pipeline.
pub struct FramePipeline {
    normalizer: SampleNormalizer,
    filter: OutlierFilter,
    window: Window,
    classifier: Arc<dyn Classifier>,
    smoother: RecognitionSmoother,
    reporter: Arc<dyn ErrorReporter>,
    generation: u64,
    stats: PipelineStats,
}

impl FramePipeline {
    pub fn new(
        config: PipelineConfig,
        normalizer: SampleNormalizer,
        classifier: Arc<dyn Classifier>,
    ) -> Self {
        Self {
            normalizer,
            filter: OutlierFilter::new(config.outlier_z),
            window: Window::new(config.window_capacity, config.window_policy),
            classifier,
            smoother: RecognitionSmoother::new(config.smoother),
            reporter: Arc::new(LogReporter),
            generation: 0,
            stats: PipelineStats::default(),
        }
    }

    /// Replaces the smoother clock (for deterministic testing).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.smoother = RecognitionSmoother::with_clock(self.smoother.config().clone(), clock);
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Cheap handle for running extraction off the session task.
    pub fn normalizer(&self) -> SampleNormalizer {
        self.normalizer.clone()
    }

    /// Shared handle for running inference off the session task.
    pub fn classifier(&self) -> Arc<dyn Classifier> {
        Arc::clone(&self.classifier)
    }

    /// Incremented on every reset; results computed for an older generation
    /// must be discarded.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn state(&self) -> &RecognitionState {
        self.smoother.state()
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    /// Takes the result of landmark extraction for one frame.
    ///
    /// Returns the window tensor when the window just became ready.
    pub fn on_extraction(&mut self, result: Result<Sample>) -> Option<WindowTensor> {
        match result {
            Ok(sample) => self.accept_sample(sample),
            Err(e) => {
                self.stats.extraction_errors += 1;
                self.reporter
                    .report("extraction", &StageError::Recoverable(e.to_string()));
                None
            }
        }
    }

    /// Filters one sample into the window.
    ///
    /// Invalid and outlier samples are skipped. When the window is ready its
    /// snapshot is returned; the batch policy clears the window at that point.
    pub fn accept_sample(&mut self, sample: Sample) -> Option<WindowTensor> {
        if !sample.is_valid() {
            self.stats.no_hand += 1;
            return None;
        }
        if let Verdict::Reject { max_z } = self.filter.check(&sample) {
            self.stats.outliers += 1;
            log::debug!("Outlier sample skipped (|z| = {:.2})", max_z);
            return None;
        }

        self.stats.samples += 1;
        if self.window.push(sample) == PushOutcome::Rejected {
            // Batch windows are cleared on firing, so this only happens if a
            // caller fed samples without draining.
            log::debug!("Window full, sample dropped");
        }
        if !self.window.is_ready() {
            return None;
        }

        let tensor = WindowTensor::from_samples(&self.window.snapshot());
        if self.window.policy() == WindowPolicy::Batch {
            self.window.clear();
        }
        self.stats.windows += 1;
        Some(tensor)
    }

    /// Takes the classifier result for one window and runs the smoother.
    ///
    /// A classifier failure is reported and yields `None`; the window is not
    /// touched.
    pub fn on_prediction(&mut self, result: Result<PredictionEvent>) -> Option<Outcome> {
        let event = match result {
            Ok(event) => event,
            Err(e) => {
                self.stats.inference_errors += 1;
                self.reporter
                    .report("classifier", &StageError::Recoverable(e.to_string()));
                return None;
            }
        };

        let outcome = self.smoother.observe(&event);
        match &outcome {
            Outcome::Emitted { token, .. } => {
                self.stats.emitted += 1;
                log::info!(
                    "Recognized '{}' ({:.2}), sentence: {}",
                    token,
                    event.confidence,
                    self.smoother.state().sentence_text()
                );
            }
            Outcome::Held { label, repetitions } => {
                log::debug!("Holding '{}' after {} repeats", label, repetitions)
            }
            Outcome::BelowThreshold {
                confidence,
                threshold,
            } => log::debug!(
                "'{}' below threshold ({:.2} < {:.2})",
                event.label,
                confidence,
                threshold
            ),
            Outcome::CoolingDown { remaining } => {
                log::trace!("Cooling down, {:?} remaining", remaining)
            }
        }
        Some(outcome)
    }

    /// Sends the outcome's message over the data channel if it is open.
    ///
    /// Messages that cannot be sent are dropped, never queued. Returns whether
    /// a message went out.
    pub fn transmit(&mut self, outcome: &Outcome, channel: Option<&dyn DataChannel>) -> bool {
        let Some(message) = outcome.message() else {
            return false;
        };
        let channel = match channel {
            Some(c) if c.ready_state() == ReadyState::Open => c,
            Some(c) => {
                self.stats.dropped_messages += 1;
                log::warn!(
                    "Data channel {} is {}, dropping '{}'",
                    c.label(),
                    c.ready_state(),
                    message
                );
                return false;
            }
            None => {
                self.stats.dropped_messages += 1;
                log::warn!("No data channel, dropping '{}'", message);
                return false;
            }
        };
        match channel.send(message) {
            Ok(()) => {
                self.stats.sent += 1;
                true
            }
            Err(e) => {
                self.stats.dropped_messages += 1;
                self.reporter
                    .report("transmit", &StageError::Recoverable(e.to_string()));
                false
            }
        }
    }

    /// Runs one frame through every stage on the calling thread.
    pub fn process_frame(&mut self, frame: &VideoFrame) -> Option<Outcome> {
        let extracted = self.normalizer.normalize(frame);
        let tensor = self.on_extraction(extracted)?;
        let prediction = run_classifier(self.classifier.as_ref(), &tensor);
        self.on_prediction(prediction)
    }

    /// Drops the window and recognition state and starts a new generation.
    pub fn reset(&mut self) {
        self.window.clear();
        self.smoother.reset();
        self.generation += 1;
    }
}

/// Classifies one window, timestamped now.
pub fn run_classifier(classifier: &dyn Classifier, tensor: &WindowTensor) -> Result<PredictionEvent> {
    classify(classifier, tensor, Instant::now())
}

/// Limits frame intake to a target cadence.
///
/// After a frame is taken, the next one is not accepted before one interval
/// has elapsed.
#[derive(Debug, Clone)]
pub struct FrameThrottle {
    interval: Duration,
    next: Option<tokio::time::Instant>,
}

impl FrameThrottle {
    /// A zero rate disables throttling.
    pub fn new(target_fps: u32) -> Self {
        let interval = if target_fps == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs(1) / target_fps
        };
        Self {
            interval,
            next: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Waits until the next frame may be accepted. Cancel-safe.
    pub async fn wait(&self) {
        if let Some(next) = self.next {
            tokio::time::sleep_until(next).await;
        }
    }

    /// Records that a frame was just accepted.
    pub fn mark(&mut self) {
        if !self.interval.is_zero() {
            self.next = Some(tokio::time::Instant::now() + self.interval);
        }
    }

    pub fn reset(&mut self) {
        self.next = None;
    }
}
