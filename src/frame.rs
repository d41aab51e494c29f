//! Decoded video frames as delivered by a media track.

use crate::pose::sample::HandPose;

/// One decoded RGB24 video frame.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    /// Packed RGB24 pixels, row-major, `width * height * 3` bytes.
    pub pixels: Vec<u8>,
    /// Presentation timestamp in the track's time base.
    pub pts: i64,
    /// Hand poses attached by an upstream tracker, if the sender runs one.
    pub attached_hands: Vec<HandPose>,
}

impl VideoFrame {
    /// Creates a frame from packed RGB24 pixels.
    pub fn new(width: u32, height: u32, pixels: Vec<u8>, pts: i64) -> Self {
        Self {
            width,
            height,
            pixels,
            pts,
            attached_hands: Vec::new(),
        }
    }

    /// Creates a uniformly colored frame (handy for tests and probes).
    pub fn solid(width: u32, height: u32, rgb: [u8; 3], pts: i64) -> Self {
        let pixels = rgb
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 3)
            .collect();
        Self::new(width, height, pixels, pts)
    }

    /// Attaches hand poses detected upstream.
    pub fn with_hands(mut self, hands: Vec<HandPose>) -> Self {
        self.attached_hands = hands;
        self
    }

    /// Mean Rec.601 luma over all pixels, in 0..=255. Zero for an empty frame.
    pub fn mean_luminance(&self) -> f32 {
        let pixel_count = self.pixels.len() / 3;
        if pixel_count == 0 {
            return 0.0;
        }
        let sum: f64 = self
            .pixels
            .chunks_exact(3)
            .map(|px| 0.299 * px[0] as f64 + 0.587 * px[1] as f64 + 0.114 * px[2] as f64)
            .sum();
        (sum / pixel_count as f64) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solid_frame_size() {
        let frame = VideoFrame::solid(4, 2, [10, 20, 30], 7);
        assert_eq!(frame.pixels.len(), 24);
        assert_eq!(&frame.pixels[..6], &[10, 20, 30, 10, 20, 30]);
        assert_eq!(frame.pts, 7);
    }

    #[test]
    fn test_mean_luminance_of_gray() {
        let frame = VideoFrame::solid(2, 2, [100, 100, 100], 0);
        assert!((frame.mean_luminance() - 100.0).abs() < 0.01);
    }

    #[test]
    fn test_mean_luminance_of_empty_frame() {
        let frame = VideoFrame::new(0, 0, Vec::new(), 0);
        assert_eq!(frame.mean_luminance(), 0.0);
    }
}
