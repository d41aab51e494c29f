//! Frame → sample reduction.
//!
//! Applies brightness correction, asks the landmark source for hands and
//! collapses however many hands it reports into exactly one [`Sample`].

use crate::error::{Result, SigncastError};
use crate::frame::VideoFrame;
use crate::pose::sample::{HandPose, Sample};
use std::sync::Arc;

/// Extracts hand poses from a frame. Pure query, must not mutate the frame.
pub trait LandmarkSource: Send + Sync {
    /// Returns zero or more detected hands.
    fn extract(&self, frame: &VideoFrame) -> Result<Vec<HandPose>>;

    /// Name for logging.
    fn name(&self) -> &str {
        "landmarks"
    }
}

/// Tone-maps a frame before extraction. Output keeps the input dimensions.
pub trait ImageAdjust: Send + Sync {
    fn normalize(&self, frame: &VideoFrame) -> VideoFrame;
}

/// Linear brightness correction chosen from mean luminance.
///
/// Dark frames are scaled up and lifted, overexposed frames scaled down and
/// lowered, everything else passes through untouched.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BrightnessAdjust {
    /// Frames with mean luma below this are brightened.
    pub dark_below: f32,
    /// Frames with mean luma above this are darkened.
    pub bright_above: f32,
    /// (scale, bias) for dark frames.
    pub brighten: (f32, f32),
    /// (scale, bias) for overexposed frames.
    pub darken: (f32, f32),
}

impl Default for BrightnessAdjust {
    fn default() -> Self {
        Self {
            dark_below: 80.0,
            bright_above: 180.0,
            brighten: (1.5, 30.0),
            darken: (0.8, -30.0),
        }
    }
}

impl BrightnessAdjust {
    /// The (scale, bias) pair applied for a given mean luminance.
    pub fn coefficients(&self, luminance: f32) -> Option<(f32, f32)> {
        if luminance < self.dark_below {
            Some(self.brighten)
        } else if luminance > self.bright_above {
            Some(self.darken)
        } else {
            None
        }
    }
}

impl ImageAdjust for BrightnessAdjust {
    fn normalize(&self, frame: &VideoFrame) -> VideoFrame {
        let Some((scale, bias)) = self.coefficients(frame.mean_luminance()) else {
            return frame.clone();
        };
        let mut adjusted = frame.clone();
        for value in adjusted.pixels.iter_mut() {
            *value = (*value as f32 * scale + bias).round().clamp(0.0, 255.0) as u8;
        }
        adjusted
    }
}

/// Reads hand poses an upstream tracker attached to the frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct AttachedLandmarks;

impl LandmarkSource for AttachedLandmarks {
    fn extract(&self, frame: &VideoFrame) -> Result<Vec<HandPose>> {
        Ok(frame.attached_hands.clone())
    }

    fn name(&self) -> &str {
        "attached"
    }
}

/// Mock landmark source for testing
#[derive(Debug, Clone, Default)]
pub struct MockLandmarkSource {
    hands: Vec<HandPose>,
    should_fail: bool,
}

impl MockLandmarkSource {
    /// Creates a source that never detects a hand.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure the mock to report these hands for every frame
    pub fn with_hands(mut self, hands: Vec<HandPose>) -> Self {
        self.hands = hands;
        self
    }

    /// Configure the mock to fail on extract
    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }
}

impl LandmarkSource for MockLandmarkSource {
    fn extract(&self, _frame: &VideoFrame) -> Result<Vec<HandPose>> {
        if self.should_fail {
            Err(SigncastError::Extraction {
                message: "mock extraction failure".to_string(),
            })
        } else {
            Ok(self.hands.clone())
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Reduces each frame to one fixed-shape sample.
#[derive(Clone)]
pub struct SampleNormalizer {
    adjust: Arc<dyn ImageAdjust>,
    source: Arc<dyn LandmarkSource>,
}

impl SampleNormalizer {
    /// Creates a normalizer with the default brightness correction.
    pub fn new(source: Arc<dyn LandmarkSource>) -> Self {
        Self {
            adjust: Arc::new(BrightnessAdjust::default()),
            source,
        }
    }

    /// Replaces the image adjustment step.
    pub fn with_adjust(mut self, adjust: Arc<dyn ImageAdjust>) -> Self {
        self.adjust = adjust;
        self
    }

    /// Produces the sample for one frame.
    ///
    /// Two hands are averaged element-wise, one hand passes through and no
    /// hand yields [`Sample::empty`]. Extraction errors propagate so the caller
    /// can skip the frame.
    pub fn normalize(&self, frame: &VideoFrame) -> Result<Sample> {
        let adjusted = self.adjust.normalize(frame);
        let hands = self.source.extract(&adjusted)?;
        Ok(match HandPose::mean(&hands) {
            Some(pose) => Sample::new(pose),
            None => Sample::empty(),
        })
    }
}
