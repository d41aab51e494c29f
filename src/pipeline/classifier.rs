//! Classifier capability: full window in, probability vector out.
//!
//! The classifier is constructed once and shared read-only across sessions
//! (`Arc<dyn Classifier>`); nothing in it is mutated after load.

use crate::defaults::SAMPLE_LEN;
use crate::error::{Result, SigncastError};
use crate::pose::sample::Sample;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

/// A window flattened to `frames × 21 × 3` values.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowTensor {
    frames: usize,
    data: Vec<f32>,
}

impl WindowTensor {
    pub fn from_samples(samples: &[Sample]) -> Self {
        let mut data = Vec::with_capacity(samples.len() * SAMPLE_LEN);
        for sample in samples {
            data.extend(sample.values());
        }
        Self {
            frames: samples.len(),
            data,
        }
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// The 63 values of one frame.
    pub fn frame(&self, index: usize) -> Option<&[f32]> {
        let start = index.checked_mul(SAMPLE_LEN)?;
        self.data.get(start..start + SAMPLE_LEN)
    }

    /// Per-coordinate mean over all frames. Zeros for an empty tensor.
    pub fn mean_frame(&self) -> [f32; SAMPLE_LEN] {
        let mut mean = [0.0f32; SAMPLE_LEN];
        if self.frames == 0 {
            return mean;
        }
        for frame in self.data.chunks_exact(SAMPLE_LEN) {
            for (acc, value) in mean.iter_mut().zip(frame) {
                *acc += value;
            }
        }
        for value in mean.iter_mut() {
            *value /= self.frames as f32;
        }
        mean
    }
}

/// Maps a full window to a probability distribution over a fixed label set.
pub trait Classifier: Send + Sync {
    /// The label set, in output-vector order.
    fn labels(&self) -> &[String];

    /// One probability per label.
    fn predict(&self, input: &WindowTensor) -> Result<Vec<f32>>;

    /// Name for logging.
    fn name(&self) -> &str {
        "classifier"
    }
}

impl<T: Classifier> Classifier for Arc<T> {
    fn labels(&self) -> &[String] {
        (**self).labels()
    }

    fn predict(&self, input: &WindowTensor) -> Result<Vec<f32>> {
        (**self).predict(input)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// The top-scoring label of one classifier invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionEvent {
    pub label: String,
    /// Probability of `label`, within 0..=1.
    pub confidence: f32,
    pub timestamp: Instant,
}

impl PredictionEvent {
    pub fn new(label: impl Into<String>, confidence: f32, timestamp: Instant) -> Self {
        Self {
            label: label.into(),
            confidence: confidence.clamp(0.0, 1.0),
            timestamp,
        }
    }
}

/// Runs the classifier and picks the argmax label.
pub fn classify(
    classifier: &dyn Classifier,
    input: &WindowTensor,
    timestamp: Instant,
) -> Result<PredictionEvent> {
    let probabilities = classifier.predict(input)?;
    let labels = classifier.labels();
    if probabilities.len() != labels.len() {
        return Err(SigncastError::Inference {
            message: format!(
                "{} returned {} scores for {} labels",
                classifier.name(),
                probabilities.len(),
                labels.len()
            ),
        });
    }
    let (index, confidence) = probabilities
        .iter()
        .copied()
        .enumerate()
        .filter(|(_, p)| p.is_finite())
        .fold(None, |best: Option<(usize, f32)>, (i, p)| match best {
            Some((_, bp)) if bp >= p => best,
            _ => Some((i, p)),
        })
        .ok_or_else(|| SigncastError::Inference {
            message: format!("{} returned no finite scores", classifier.name()),
        })?;
    Ok(PredictionEvent::new(
        labels[index].clone(),
        confidence,
        timestamp,
    ))
}

#[derive(Debug, Deserialize)]
struct TemplateFile {
    labels: Vec<String>,
    templates: Vec<Vec<f32>>,
    #[serde(default = "default_temperature")]
    temperature: f32,
}

fn default_temperature() -> f32 {
    0.05
}

/// Nearest-template classifier.
///
/// Each label owns a 63-value template pose. The window is reduced to its mean
/// pose, and scores are a softmax over negative Euclidean distances scaled by
/// `temperature`.
#[derive(Debug, Clone)]
pub struct TemplateClassifier {
    labels: Vec<String>,
    templates: Vec<[f32; SAMPLE_LEN]>,
    temperature: f32,
}

impl TemplateClassifier {
    pub fn new(
        labels: Vec<String>,
        templates: Vec<Vec<f32>>,
        temperature: f32,
    ) -> Result<Self> {
        if labels.is_empty() {
            return Err(SigncastError::InvalidModel {
                message: "label set is empty".to_string(),
            });
        }
        if labels.len() != templates.len() {
            return Err(SigncastError::InvalidModel {
                message: format!(
                    "{} labels but {} templates",
                    labels.len(),
                    templates.len()
                ),
            });
        }
        if !(temperature.is_finite() && temperature > 0.0) {
            return Err(SigncastError::InvalidModel {
                message: format!("temperature must be positive, got {}", temperature),
            });
        }
        let templates = templates
            .into_iter()
            .zip(&labels)
            .map(|(values, label)| {
                <[f32; SAMPLE_LEN]>::try_from(values.as_slice()).map_err(|_| {
                    SigncastError::InvalidModel {
                        message: format!(
                            "template for '{}' has {} values, expected {}",
                            label,
                            values.len(),
                            SAMPLE_LEN
                        ),
                    }
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            labels,
            templates,
            temperature,
        })
    }

    /// Parses the JSON model format.
    pub fn from_json(json: &str) -> Result<Self> {
        let file: TemplateFile = serde_json::from_str(json)?;
        Self::new(file.labels, file.templates, file.temperature)
    }

    /// Loads the JSON model from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SigncastError::ModelNotFound {
                    path: path.display().to_string(),
                }
            } else {
                SigncastError::Io(e)
            }
        })?;
        Self::from_json(&json)
    }
}

impl Classifier for TemplateClassifier {
    fn labels(&self) -> &[String] {
        &self.labels
    }

    fn predict(&self, input: &WindowTensor) -> Result<Vec<f32>> {
        if input.frames() == 0 {
            return Err(SigncastError::Inference {
                message: "empty window".to_string(),
            });
        }
        let mean = input.mean_frame();
        let logits: Vec<f32> = self
            .templates
            .iter()
            .map(|template| {
                let distance = template
                    .iter()
                    .zip(mean.iter())
                    .map(|(a, b)| (a - b) * (a - b))
                    .sum::<f32>()
                    .sqrt();
                -distance / self.temperature
            })
            .collect();
        Ok(softmax(&logits))
    }

    fn name(&self) -> &str {
        "template"
    }
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|l| (l - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Mock classifier for testing
#[derive(Debug, Clone)]
pub struct MockClassifier {
    labels: Vec<String>,
    outputs: Vec<(String, f32)>,
    should_fail: bool,
    calls: Arc<AtomicUsize>,
}

impl MockClassifier {
    /// Creates a mock that always answers the first label with confidence 1.0.
    pub fn new(labels: &[&str]) -> Self {
        let labels: Vec<String> = labels.iter().map(|l| l.to_string()).collect();
        let outputs = labels
            .first()
            .map(|l| vec![(l.clone(), 1.0)])
            .unwrap_or_default();
        Self {
            labels,
            outputs,
            should_fail: false,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Configure the mock to always answer `label` with `confidence`
    pub fn with_output(mut self, label: &str, confidence: f32) -> Self {
        self.outputs = vec![(label.to_string(), confidence)];
        self
    }

    /// Configure a sequence of answers, cycled per call
    pub fn with_sequence(mut self, outputs: &[(&str, f32)]) -> Self {
        self.outputs = outputs
            .iter()
            .map(|(l, c)| (l.to_string(), *c))
            .collect();
        self
    }

    /// Configure the mock to fail on predict
    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }

    /// Number of predict calls so far (shared between clones).
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Classifier for MockClassifier {
    fn labels(&self) -> &[String] {
        &self.labels
    }

    fn predict(&self, _input: &WindowTensor) -> Result<Vec<f32>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.should_fail {
            return Err(SigncastError::Inference {
                message: "mock inference failure".to_string(),
            });
        }
        let mut scores = vec![0.0; self.labels.len()];
        if self.outputs.is_empty() {
            return Ok(scores);
        }
        let (label, confidence) = &self.outputs[call % self.outputs.len()];
        let index = self
            .labels
            .iter()
            .position(|l| l == label)
            .ok_or_else(|| SigncastError::Inference {
                message: format!("mock label '{}' not in label set", label),
            })?;
        // Spread the remainder evenly so the vector still sums to one.
        let others = self.labels.len().saturating_sub(1);
        if others > 0 {
            let rest = (1.0 - confidence).max(0.0) / others as f32;
            scores.iter_mut().for_each(|s| *s = rest);
        }
        scores[index] = *confidence;
        Ok(scores)
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::sample::HandPose;

    fn window_of(value: f32, frames: usize) -> WindowTensor {
        let sample = Sample::new(HandPose::from_flat(&[value; SAMPLE_LEN]).unwrap());
        WindowTensor::from_samples(&vec![sample; frames])
    }

    #[test]
    fn test_tensor_shape() {
        let tensor = window_of(0.1, 40);
        assert_eq!(tensor.frames(), 40);
        assert_eq!(tensor.as_slice().len(), 40 * SAMPLE_LEN);
        assert_eq!(tensor.frame(39).map(|f| f.len()), Some(SAMPLE_LEN));
        assert!(tensor.frame(40).is_none());
    }

    #[test]
    fn test_classify_picks_argmax() {
        let classifier = MockClassifier::new(&["A", "B", "C"]).with_output("B", 0.8);
        let event = classify(&classifier, &window_of(0.0, 4), Instant::now()).unwrap();
        assert_eq!(event.label, "B");
        assert!((event.confidence - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_classify_propagates_failure() {
        let classifier = MockClassifier::new(&["A"]).with_failure();
        let result = classify(&classifier, &window_of(0.0, 4), Instant::now());
        assert!(matches!(result, Err(SigncastError::Inference { .. })));
        assert_eq!(classifier.call_count(), 1);
    }

    #[test]
    fn test_classify_rejects_wrong_length() {
        struct Broken(Vec<String>);
        impl Classifier for Broken {
            fn labels(&self) -> &[String] {
                &self.0
            }
            fn predict(&self, _input: &WindowTensor) -> Result<Vec<f32>> {
                Ok(vec![1.0])
            }
        }
        let broken = Broken(vec!["A".into(), "B".into()]);
        assert!(classify(&broken, &window_of(0.0, 1), Instant::now()).is_err());
    }

    #[test]
    fn test_mock_sequence_cycles() {
        let classifier = MockClassifier::new(&["A", "B"]).with_sequence(&[("A", 0.9), ("B", 0.7)]);
        let tensor = window_of(0.0, 1);
        let labels: Vec<String> = (0..3)
            .map(|_| classify(&classifier, &tensor, Instant::now()).unwrap().label)
            .collect();
        assert_eq!(labels, vec!["A", "B", "A"]);
    }

    #[test]
    fn test_template_classifier_prefers_nearest() {
        let json = format!(
            r#"{{"labels": ["LOW", "HIGH"], "templates": [{:?}, {:?}]}}"#,
            vec![0.1f32; SAMPLE_LEN],
            vec![0.9f32; SAMPLE_LEN]
        );
        let classifier = TemplateClassifier::from_json(&json).unwrap();
        let event = classify(&classifier, &window_of(0.85, 10), Instant::now()).unwrap();
        assert_eq!(event.label, "HIGH");
        assert!(event.confidence > 0.99);

        let probabilities = classifier.predict(&window_of(0.5, 10)).unwrap();
        let sum: f32 = probabilities.iter().sum();
        assert!((sum - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_template_classifier_validates_shape() {
        let err = TemplateClassifier::new(vec!["A".into()], vec![vec![0.0; 10]], 0.05);
        assert!(matches!(err, Err(SigncastError::InvalidModel { .. })));

        let err = TemplateClassifier::new(vec!["A".into(), "B".into()], vec![vec![0.0; 63]], 0.05);
        assert!(matches!(err, Err(SigncastError::InvalidModel { .. })));

        let err = TemplateClassifier::new(vec![], vec![], 0.05);
        assert!(matches!(err, Err(SigncastError::InvalidModel { .. })));
    }

    #[test]
    fn test_template_classifier_missing_file() {
        let result = TemplateClassifier::load(Path::new("/nonexistent/signcast/model.json"));
        assert!(matches!(result, Err(SigncastError::ModelNotFound { .. })));
    }

    #[test]
    fn test_template_classifier_rejects_empty_window() {
        let classifier =
            TemplateClassifier::new(vec!["A".into()], vec![vec![0.0; SAMPLE_LEN]], 0.05).unwrap();
        assert!(classifier.predict(&WindowTensor::from_samples(&[])).is_err());
    }
}
