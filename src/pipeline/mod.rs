//! Recognition pipeline: windowing, classification and smoothing.
//!
//! Samples flow through the outlier filter into a fixed-capacity [`Window`];
//! each ready window is classified once and the prediction is smoothed into
//! the running sentence by [`RecognitionSmoother`].

pub mod classifier;
pub mod error;
pub mod recognizer;
pub mod smoother;
pub mod window;

pub use classifier::{
    Classifier, MockClassifier, PredictionEvent, TemplateClassifier, WindowTensor, classify,
};
pub use error::{CollectingReporter, ErrorReporter, LogReporter, StageError};
pub use recognizer::{FramePipeline, FrameThrottle, PipelineConfig, PipelineStats, run_classifier};
pub use smoother::{Outcome, RecognitionSmoother, RecognitionState, SmootherConfig};
pub use window::{PushOutcome, Window, WindowPolicy};
