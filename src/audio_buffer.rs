// src/audio_buffer.rs

use crate::config::Sends;

/// Planar stereo bus with a fixed capacity in frames.
#[derive(Debug, Clone)]
pub struct StereoBuffer {
    pub left: Vec<f32>,
    pub right: Vec<f32>,
}

impl StereoBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            left: vec![0.0; capacity],
            right: vec![0.0; capacity],
        }
    }

    #[inline]
    pub fn clear(&mut self, frames: usize) {
        self.left[..frames].fill(0.0);
        self.right[..frames].fill(0.0);
    }

    #[inline(always)]
    pub fn add(&mut self, frame: usize, left: f32, right: f32) {
        self.left[frame] += left;
        self.right[frame] += right;
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.left.len()
    }
}

/// Accumulation buses every engine renders into for one block:
/// the dry mix plus one bus per effect send.
#[derive(Debug, Clone)]
pub struct MixBus {
    pub dry: StereoBuffer,
    pub chorus: StereoBuffer,
    pub delay: StereoBuffer,
    pub reverb: StereoBuffer,
    frames: usize,
}

impl MixBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            dry: StereoBuffer::new(capacity),
            chorus: StereoBuffer::new(capacity),
            delay: StereoBuffer::new(capacity),
            reverb: StereoBuffer::new(capacity),
            frames: 0,
        }
    }

    /// Zero the first `frames` frames of every bus and make that the
    /// current block length.
    #[inline]
    pub fn begin_block(&mut self, frames: usize) {
        let frames = frames.min(self.dry.capacity());
        self.dry.clear(frames);
        self.chorus.clear(frames);
        self.delay.clear(frames);
        self.reverb.clear(frames);
        self.frames = frames;
    }

    #[inline]
    pub fn frames(&self) -> usize {
        self.frames
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.dry.capacity()
    }

    /// Add one frame to the dry bus and, scaled, to every send.
    #[inline(always)]
    pub fn add_with_sends(&mut self, frame: usize, left: f32, right: f32, sends: Sends) {
        self.dry.add(frame, left, right);
        self.chorus.add(frame, left * sends.chorus, right * sends.chorus);
        self.delay.add(frame, left * sends.delay, right * sends.delay);
        self.reverb.add(frame, left * sends.reverb, right * sends.reverb);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_block_clears_only_the_block() {
        let mut bus = MixBus::new(8);
        for i in 0..8 {
            bus.add_with_sends(i, 1.0, 1.0, Sends::new(0.5, 0.25, 0.125));
        }
        bus.begin_block(4);
        assert_eq!(bus.frames(), 4);
        assert!(bus.dry.left[..4].iter().all(|&s| s == 0.0));
        assert_eq!(bus.dry.left[5], 1.0);
        assert_eq!(bus.chorus.right[6], 0.5);
        assert_eq!(bus.delay.left[7], 0.25);
        assert_eq!(bus.reverb.right[4], 0.125);
        assert_eq!(bus.reverb.left[0], 0.0);
    }
}
