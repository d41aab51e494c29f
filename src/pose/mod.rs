//! Hand-pose extraction: frame normalization and sample filtering.

pub mod normalizer;
pub mod outlier;
pub mod sample;

pub use normalizer::{
    AttachedLandmarks, BrightnessAdjust, ImageAdjust, LandmarkSource, MockLandmarkSource,
    SampleNormalizer,
};
pub use outlier::{OutlierFilter, Verdict};
pub use sample::{HandPose, Landmark, Sample};
