//! Fixed-capacity sample window that drives batch readiness.

use crate::pose::sample::Sample;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// What happens when a sample arrives at a full window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowPolicy {
    /// Reject pushes until the window is cleared after firing.
    #[default]
    Batch,
    /// Evict the oldest sample to make room.
    Rolling,
}

/// Result of a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Appended without displacing anything.
    Appended,
    /// Appended after evicting the oldest sample (rolling policy).
    Evicted,
    /// Dropped because the window is full (batch policy).
    Rejected,
}

/// Ordered buffer of at most `capacity` samples.
///
/// Single writer: owned by one pipeline and mutated from one task.
#[derive(Debug, Clone)]
pub struct Window {
    samples: VecDeque<Sample>,
    capacity: usize,
    policy: WindowPolicy,
}

impl Window {
    /// Creates an empty window. A zero capacity is raised to one.
    pub fn new(capacity: usize, policy: WindowPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            policy,
        }
    }

    pub fn push(&mut self, sample: Sample) -> PushOutcome {
        if self.samples.len() < self.capacity {
            self.samples.push_back(sample);
            return PushOutcome::Appended;
        }
        match self.policy {
            WindowPolicy::Batch => PushOutcome::Rejected,
            WindowPolicy::Rolling => {
                self.samples.pop_front();
                self.samples.push_back(sample);
                PushOutcome::Evicted
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        self.samples.len() == self.capacity
    }

    /// Ordered copy of the current samples; the window is left untouched.
    pub fn snapshot(&self) -> Vec<Sample> {
        self.samples.iter().copied().collect()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> WindowPolicy {
        self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defaults::{AXES, LANDMARKS_PER_HAND};
    use crate::pose::sample::HandPose;

    fn sample(value: f32) -> Sample {
        Sample::new(HandPose([[value; AXES]; LANDMARKS_PER_HAND]))
    }

    fn first_value(s: &Sample) -> f32 {
        s.pose().0[0][0]
    }

    #[test]
    fn test_becomes_ready_at_capacity() {
        let mut window = Window::new(3, WindowPolicy::Batch);
        window.push(sample(1.0));
        window.push(sample(2.0));
        assert!(!window.is_ready());
        window.push(sample(3.0));
        assert!(window.is_ready());
    }

    #[test]
    fn test_batch_rejects_when_full_until_cleared() {
        let mut window = Window::new(2, WindowPolicy::Batch);
        assert_eq!(window.push(sample(1.0)), PushOutcome::Appended);
        assert_eq!(window.push(sample(2.0)), PushOutcome::Appended);
        assert_eq!(window.push(sample(3.0)), PushOutcome::Rejected);
        let values: Vec<f32> = window.snapshot().iter().map(first_value).collect();
        assert_eq!(values, vec![1.0, 2.0]);

        window.clear();
        assert!(window.is_empty());
        assert_eq!(window.push(sample(4.0)), PushOutcome::Appended);
    }

    #[test]
    fn test_rolling_evicts_oldest() {
        let mut window = Window::new(2, WindowPolicy::Rolling);
        window.push(sample(1.0));
        window.push(sample(2.0));
        assert_eq!(window.push(sample(3.0)), PushOutcome::Evicted);
        let values: Vec<f32> = window.snapshot().iter().map(first_value).collect();
        assert_eq!(values, vec![2.0, 3.0]);
        assert!(window.is_ready());
    }

    #[test]
    fn test_length_never_exceeds_capacity() {
        for policy in [WindowPolicy::Batch, WindowPolicy::Rolling] {
            for capacity in [1, 21, 40] {
                let mut window = Window::new(capacity, policy);
                for i in 0..(capacity * 3 + 7) {
                    window.push(sample(i as f32));
                    assert!(
                        window.len() <= capacity,
                        "{:?} window exceeded capacity {}",
                        policy,
                        capacity
                    );
                    if policy == WindowPolicy::Batch && i % 17 == 16 {
                        window.clear();
                    }
                }
            }
        }
    }

    #[test]
    fn test_snapshot_does_not_mutate() {
        let mut window = Window::new(4, WindowPolicy::Batch);
        window.push(sample(1.0));
        let _ = window.snapshot();
        assert_eq!(window.len(), 1);
    }

    #[test]
    fn test_zero_capacity_is_raised() {
        let window = Window::new(0, WindowPolicy::Rolling);
        assert_eq!(window.capacity(), 1);
    }

    #[test]
    fn test_policy_deserializes_snake_case() {
        #[derive(Deserialize)]
        struct Wrapper {
            policy: WindowPolicy,
        }
        let parsed: Wrapper = toml::from_str("policy = \"rolling\"").unwrap();
        assert_eq!(parsed.policy, WindowPolicy::Rolling);
    }
}
