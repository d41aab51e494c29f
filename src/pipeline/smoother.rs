//! Recognition smoothing: turns noisy per-window predictions into a stable,
//! incrementally growing sentence.
//!
//! One [`PredictionEvent`] goes through, in order:
//!
//! ```text
//! cooldown gate ──within cooldown──▶ CoolingDown (nothing mutated)
//!     │
//!     ▼
//! confidence < threshold ──▶ BelowThreshold
//! label == previous, repeats ≥ limit ──▶ Held
//! otherwise ──▶ Emitted (token appended to sentence)
//!     │
//!     ▼
//! history push + threshold = clamp(mean(history))
//! ```

use crate::clock::{Clock, SystemClock};
use crate::defaults;
use crate::pipeline::classifier::PredictionEvent;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Tuning knobs for the smoother.
#[derive(Debug, Clone, PartialEq)]
pub struct SmootherConfig {
    /// Minimum time between two events that pass the confidence gate.
    pub cooldown: Duration,
    /// Consecutive repeats after which a label is treated as a hold.
    pub repetition_threshold: u32,
    /// Number of recent predictions kept for threshold adaptation.
    pub history_len: usize,
    pub initial_threshold: f32,
    pub min_threshold: f32,
    pub max_threshold: f32,
}

impl Default for SmootherConfig {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs_f64(defaults::COOLDOWN_SECS),
            repetition_threshold: defaults::REPETITION_THRESHOLD,
            history_len: defaults::HISTORY_LEN,
            initial_threshold: defaults::INITIAL_THRESHOLD,
            min_threshold: defaults::MIN_THRESHOLD,
            max_threshold: defaults::MAX_THRESHOLD,
        }
    }
}

/// Running recognition state of one session.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionState {
    pub sentence: Vec<String>,
    pub previous_label: Option<String>,
    pub repetition_count: u32,
    pub dynamic_threshold: f32,
    pub history: VecDeque<(String, f32)>,
    pub last_emission: Option<Instant>,
    pub last_accepted: Option<Instant>,
}

impl RecognitionState {
    pub fn new(config: &SmootherConfig) -> Self {
        Self {
            sentence: Vec::new(),
            previous_label: None,
            repetition_count: 0,
            dynamic_threshold: config
                .initial_threshold
                .clamp(config.min_threshold, config.max_threshold),
            history: VecDeque::with_capacity(config.history_len),
            last_emission: None,
            last_accepted: None,
        }
    }

    /// Sentence tokens joined by single spaces.
    pub fn sentence_text(&self) -> String {
        self.sentence.join(" ")
    }
}

/// What the smoother decided for one prediction.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Arrived within the cooldown; computed but not acted on.
    CoolingDown { remaining: Duration },
    /// Confidence under the current dynamic threshold.
    BelowThreshold { confidence: f32, threshold: f32 },
    /// Same label held past the repetition limit; no new token.
    Held { label: String, repetitions: u32 },
    /// New token appended. `message` is the `label|sentence` wire form.
    Emitted { token: String, message: String },
}

impl Outcome {
    pub fn message(&self) -> Option<&str> {
        match self {
            Outcome::Emitted { message, .. } => Some(message),
            _ => None,
        }
    }
}

/// Decision engine owning one [`RecognitionState`].
pub struct RecognitionSmoother {
    config: SmootherConfig,
    state: RecognitionState,
    clock: Arc<dyn Clock>,
}

impl RecognitionSmoother {
    pub fn new(config: SmootherConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Creates a smoother with a custom clock (for deterministic testing).
    pub fn with_clock(config: SmootherConfig, clock: Arc<dyn Clock>) -> Self {
        let state = RecognitionState::new(&config);
        Self {
            config,
            state,
            clock,
        }
    }

    pub fn state(&self) -> &RecognitionState {
        &self.state
    }

    pub fn config(&self) -> &SmootherConfig {
        &self.config
    }

    /// Drops the sentence and all adaptation history.
    pub fn reset(&mut self) {
        self.state = RecognitionState::new(&self.config);
    }

    /// Feeds one prediction through the smoothing rules.
    pub fn observe(&mut self, event: &PredictionEvent) -> Outcome {
        let now = self.clock.now();

        if let Some(last) = self.state.last_accepted {
            let elapsed = now.saturating_duration_since(last);
            if elapsed < self.config.cooldown {
                return Outcome::CoolingDown {
                    remaining: self.config.cooldown - elapsed,
                };
            }
        }

        let outcome = self.decide(event, now);
        self.record(event);
        outcome
    }

    fn decide(&mut self, event: &PredictionEvent, now: Instant) -> Outcome {
        let threshold = self.state.dynamic_threshold;
        if event.confidence < threshold {
            return Outcome::BelowThreshold {
                confidence: event.confidence,
                threshold,
            };
        }
        self.state.last_accepted = Some(now);

        let same_label = self.state.previous_label.as_deref() == Some(event.label.as_str());
        if same_label {
            self.state.repetition_count += 1;
            if self.state.repetition_count >= self.config.repetition_threshold {
                return Outcome::Held {
                    label: event.label.clone(),
                    repetitions: self.state.repetition_count,
                };
            }
        } else {
            self.state.repetition_count = 0;
            self.state.previous_label = Some(event.label.clone());
        }

        self.state.sentence.push(event.label.clone());
        self.state.last_emission = Some(now);
        Outcome::Emitted {
            token: event.label.clone(),
            message: format!(
                "{}{}{}",
                event.label,
                defaults::MESSAGE_DELIMITER,
                self.state.sentence_text()
            ),
        }
    }

    fn record(&mut self, event: &PredictionEvent) {
        let limit = self.config.history_len.max(1);
        while self.state.history.len() >= limit {
            self.state.history.pop_front();
        }
        self.state
            .history
            .push_back((event.label.clone(), event.confidence));

        let mean = self.state.history.iter().map(|(_, c)| *c).sum::<f32>()
            / self.state.history.len() as f32;
        self.state.dynamic_threshold =
            mean.clamp(self.config.min_threshold, self.config.max_threshold);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;

    fn smoother() -> (RecognitionSmoother, MockClock) {
        let clock = MockClock::new();
        let smoother =
            RecognitionSmoother::with_clock(SmootherConfig::default(), Arc::new(clock.clone()));
        (smoother, clock)
    }

    fn event(label: &str, confidence: f32) -> PredictionEvent {
        PredictionEvent::new(label, confidence, Instant::now())
    }

    fn after_cooldown(clock: &MockClock) {
        clock.advance(Duration::from_millis(2001));
    }

    #[test]
    fn test_first_confident_prediction_is_emitted() {
        let (mut smoother, _clock) = smoother();
        let outcome = smoother.observe(&event("HELLO", 0.95));
        assert_eq!(
            outcome,
            Outcome::Emitted {
                token: "HELLO".to_string(),
                message: "HELLO|HELLO".to_string(),
            }
        );
        assert_eq!(smoother.state().sentence, vec!["HELLO"]);
        // mean(0.95) clamped to the upper bound
        assert!((smoother.state().dynamic_threshold - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_message_carries_full_sentence() {
        let (mut smoother, clock) = smoother();
        smoother.observe(&event("I", 0.95));
        after_cooldown(&clock);
        let outcome = smoother.observe(&event("LOVE", 0.95));
        assert_eq!(outcome.message(), Some("LOVE|I LOVE"));
    }

    #[test]
    fn test_repetition_is_capped_at_threshold() {
        let (mut smoother, clock) = smoother();
        let limit = smoother.config().repetition_threshold;
        for _ in 0..=limit {
            smoother.observe(&event("A", 0.95));
            after_cooldown(&clock);
        }
        let count = smoother.state().sentence.iter().filter(|t| *t == "A").count();
        assert_eq!(count, limit as usize);
    }

    #[test]
    fn test_hold_continues_while_label_unchanged() {
        let (mut smoother, clock) = smoother();
        for _ in 0..10 {
            smoother.observe(&event("A", 0.95));
            after_cooldown(&clock);
        }
        assert_eq!(smoother.state().sentence.len(), 5);
        assert!(matches!(
            smoother.observe(&event("A", 0.95)),
            Outcome::Held { .. }
        ));
    }

    #[test]
    fn test_label_change_resets_repetition() {
        let (mut smoother, clock) = smoother();
        for _ in 0..6 {
            smoother.observe(&event("A", 0.95));
            after_cooldown(&clock);
        }
        smoother.observe(&event("B", 0.95));
        after_cooldown(&clock);
        assert_eq!(smoother.state().repetition_count, 0);
        let outcome = smoother.observe(&event("A", 0.95));
        assert!(matches!(outcome, Outcome::Emitted { .. }));
    }

    #[test]
    fn test_below_threshold_never_touches_sentence_or_previous_label() {
        let (mut smoother, clock) = smoother();
        smoother.observe(&event("A", 0.95));
        after_cooldown(&clock);
        let threshold = smoother.state().dynamic_threshold;

        let outcome = smoother.observe(&event("B", threshold - 0.05));
        assert!(matches!(outcome, Outcome::BelowThreshold { .. }));
        assert_eq!(smoother.state().sentence, vec!["A"]);
        assert_eq!(smoother.state().previous_label.as_deref(), Some("A"));
    }

    #[test]
    fn test_cooldown_suppresses_without_mutation() {
        let (mut smoother, clock) = smoother();
        smoother.observe(&event("A", 0.95));
        let before = smoother.state().clone();

        clock.advance(Duration::from_millis(500));
        let outcome = smoother.observe(&event("B", 0.99));
        assert!(matches!(
            outcome,
            Outcome::CoolingDown { remaining } if remaining == Duration::from_millis(1500)
        ));
        assert_eq!(smoother.state(), &before);

        clock.advance(Duration::from_millis(1500));
        assert!(matches!(
            smoother.observe(&event("B", 0.99)),
            Outcome::Emitted { .. }
        ));
    }

    #[test]
    fn test_rejected_events_do_not_start_cooldown() {
        let (mut smoother, clock) = smoother();
        smoother.observe(&event("A", 0.95));
        after_cooldown(&clock);
        smoother.observe(&event("B", 0.1));
        clock.advance(Duration::from_millis(10));
        // mean(0.95, 0.1) pulled the threshold down to 0.525.
        assert!(matches!(
            smoother.observe(&event("C", 0.6)),
            Outcome::Emitted { .. }
        ));
    }

    #[test]
    fn test_threshold_stays_in_bounds() {
        for confidence in [0.0f32, 1.0, 0.5, 0.9, 0.3] {
            let (mut smoother, clock) = smoother();
            for _ in 0..25 {
                smoother.observe(&event("X", confidence));
                let t = smoother.state().dynamic_threshold;
                assert!((0.5..=0.9).contains(&t), "threshold {} out of bounds", t);
                after_cooldown(&clock);
            }
        }
    }

    #[test]
    fn test_history_is_bounded() {
        let (mut smoother, clock) = smoother();
        for i in 0..25 {
            smoother.observe(&event(&format!("L{}", i), 0.95));
            after_cooldown(&clock);
        }
        assert_eq!(smoother.state().history.len(), 10);
        assert_eq!(smoother.state().history.front().map(|(l, _)| l.as_str()), Some("L15"));
    }

    #[test]
    fn test_threshold_follows_recent_mean() {
        let (mut smoother, clock) = smoother();
        smoother.observe(&event("A", 0.95));
        after_cooldown(&clock);
        smoother.observe(&event("B", 0.55));
        // mean(0.95, 0.55) = 0.75
        assert!((smoother.state().dynamic_threshold - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_reset_clears_everything() {
        let (mut smoother, _clock) = smoother();
        smoother.observe(&event("A", 0.95));
        smoother.reset();
        assert_eq!(
            smoother.state(),
            &RecognitionState::new(&SmootherConfig::default())
        );
        assert!(matches!(
            smoother.observe(&event("A", 0.95)),
            Outcome::Emitted { .. }
        ));
    }
}
