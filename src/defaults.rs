//! Default configuration constants for signcast.
//!
//! Shared by the config structs, the pipeline and the supervisors so every
//! layer agrees on the same numbers.

/// Number of landmarks per detected hand.
pub const LANDMARKS_PER_HAND: usize = 21;

/// Coordinates per landmark (x, y, z).
pub const AXES: usize = 3;

/// Flattened length of one sample.
pub const SAMPLE_LEN: usize = LANDMARKS_PER_HAND * AXES;

/// Default number of samples per classification window.
///
/// The classifier was trained on 40-frame sequences (~1.3s at 30 fps).
pub const WINDOW_CAPACITY: usize = 40;

/// Window capacity used by degraded deployments with the short-sequence model.
pub const DEGRADED_WINDOW_CAPACITY: usize = 21;

/// Target frame processing cadence in frames per second.
pub const TARGET_FPS: u32 = 30;

/// Absolute z-score above which a coordinate marks a sample as an outlier.
pub const OUTLIER_Z: f32 = 2.5;

/// Blocking worker threads available for extraction and inference per agent.
pub const INFERENCE_THREADS: usize = 2;

/// Minimum seconds between two accepted predictions.
pub const COOLDOWN_SECS: f64 = 2.0;

/// Largest accepted cooldown, in seconds.
pub const MAX_COOLDOWN_SECS: f64 = 3600.0;

/// Consecutive repeats of a label after which it is treated as a hold.
pub const REPETITION_THRESHOLD: u32 = 5;

/// Number of recent (label, confidence) pairs kept for threshold adaptation.
pub const HISTORY_LEN: usize = 10;

/// Lower bound of the dynamic confidence threshold.
pub const MIN_THRESHOLD: f32 = 0.5;

/// Upper bound of the dynamic confidence threshold.
pub const MAX_THRESHOLD: f32 = 0.9;

/// Threshold before any prediction has been observed.
pub const INITIAL_THRESHOLD: f32 = 0.5;

/// Separator between the new token and the full sentence on the data channel.
pub const MESSAGE_DELIMITER: char = '|';

/// Default signaling server address.
pub const SIGNALING_ENDPOINT: &str = "127.0.0.1:4000";

/// Identifier advertised in the `from` field of outgoing negotiation messages.
pub const PEER_ID: &str = "123";

/// Signaling connect timeout in milliseconds.
pub const CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Length of generated session identifiers.
pub const SESSION_ID_LEN: usize = 12;

/// Public STUN servers handed to the media transport.
pub const STUN_SERVERS: [&str; 5] = [
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
    "stun:stun2.l.google.com:19302",
    "stun:stun3.l.google.com:19302",
    "stun:stun4.l.google.com:19302",
];

/// Number of worker slots kept alive by the pool.
pub const WORKERS: usize = 5;

/// Consecutive session failures that are each logged as a warning.
pub const FAILURE_WARN_BURST: u64 = 3;

/// Past the burst, only every Nth consecutive failure is logged as a warning.
pub const FAILURE_WARN_EVERY: u64 = 1000;

/// Delay before a dead slot is respawned, in seconds.
pub const RESTART_DELAY_SECS: u64 = 5;

/// Interval between slot liveness checks, in milliseconds.
pub const POLL_INTERVAL_MS: u64 = 1000;

/// Upper bound on waiting for workers to exit during shutdown, in seconds.
pub const SHUTDOWN_TIMEOUT_SECS: u64 = 10;

/// Largest accepted pool delay, poll interval or shutdown timeout, in seconds.
pub const MAX_POOL_WAIT_SECS: u64 = 86_400;

/// Environment variable carrying the slot index into a worker process.
pub const SLOT_ENV: &str = "SIGNCAST_SLOT";
