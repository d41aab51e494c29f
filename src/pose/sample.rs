//! Hand-pose samples: the unit that flows from extraction into the window.

use crate::defaults::{AXES, LANDMARKS_PER_HAND, SAMPLE_LEN};
use serde::{Deserialize, Serialize};

/// One landmark point (x, y, z) in normalized image coordinates.
pub type Landmark = [f32; AXES];

/// All landmarks of one detected hand.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HandPose(pub [Landmark; LANDMARKS_PER_HAND]);

impl HandPose {
    /// A hand with every coordinate at zero.
    pub const fn zeros() -> Self {
        Self([[0.0; AXES]; LANDMARKS_PER_HAND])
    }

    /// Builds a hand pose from a flat slice of 63 values.
    pub fn from_flat(values: &[f32]) -> Option<Self> {
        if values.len() != SAMPLE_LEN {
            return None;
        }
        let mut points = [[0.0; AXES]; LANDMARKS_PER_HAND];
        for (point, chunk) in points.iter_mut().zip(values.chunks_exact(AXES)) {
            point.copy_from_slice(chunk);
        }
        Some(Self(points))
    }

    /// Element-wise mean of several hands. Returns `None` for an empty slice.
    pub fn mean(hands: &[HandPose]) -> Option<Self> {
        let count = hands.len();
        if count == 0 {
            return None;
        }
        let mut acc = [[0.0f32; AXES]; LANDMARKS_PER_HAND];
        for hand in hands {
            for (dst, src) in acc.iter_mut().zip(hand.0.iter()) {
                for axis in 0..AXES {
                    dst[axis] += src[axis];
                }
            }
        }
        for point in acc.iter_mut() {
            for value in point.iter_mut() {
                *value /= count as f32;
            }
        }
        Some(Self(acc))
    }
}

/// One frame's normalized hand pose plus a validity flag.
///
/// Immutable once created; invalid samples carry an all-zero pose.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pose: HandPose,
    valid: bool,
}

impl Sample {
    /// A valid sample carrying the given pose.
    pub fn new(pose: HandPose) -> Self {
        Self { pose, valid: true }
    }

    /// The zero sample emitted when no hand was detected.
    pub fn empty() -> Self {
        Self {
            pose: HandPose::zeros(),
            valid: false,
        }
    }

    pub fn pose(&self) -> &HandPose {
        &self.pose
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Iterates the 63 coordinates in landmark-major order.
    pub fn values(&self) -> impl Iterator<Item = f32> + '_ {
        self.pose.0.iter().flat_map(|point| point.iter().copied())
    }

    /// Flattened copy of the coordinates.
    pub fn to_flat(&self) -> [f32; SAMPLE_LEN] {
        let mut flat = [0.0; SAMPLE_LEN];
        for (dst, src) in flat.iter_mut().zip(self.values()) {
            *dst = src;
        }
        flat
    }
}
