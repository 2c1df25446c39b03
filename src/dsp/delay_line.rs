// src/dsp/delay_line.rs

/// Fixed-capacity circular sample buffer with fractional reads.
///
/// `read` looks back from the next write position, so a delay of `d`
/// samples read before `write` returns the sample written `d` calls ago.
#[derive(Debug, Clone)]
pub struct DelayLine {
    buffer: Vec<f32>,
    write: usize,
}

impl DelayLine {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: vec![0.0; capacity.max(2)],
            write: 0,
        }
    }

    /// Capacity in samples for `secs` at `sample_rate`, plus interpolation headroom.
    pub fn with_duration(secs: f32, sample_rate: f32) -> Self {
        Self::new((secs * sample_rate).ceil() as usize + 2)
    }

    /// Longest delay `read` honors.
    #[inline]
    pub fn max_delay(&self) -> f32 {
        (self.buffer.len() - 1) as f32
    }

    /// Read `delay` samples back, linearly interpolating between neighbors.
    #[inline]
    pub fn read(&self, delay: f32) -> f32 {
        let len = self.buffer.len();
        let delay = delay.clamp(1.0, self.max_delay());
        let whole = delay.floor();
        let frac = delay - whole;
        let i0 = (self.write + len - whole as usize) % len;
        let i1 = (i0 + len - 1) % len;
        let a = self.buffer[i0];
        let b = self.buffer[i1];
        a + (b - a) * frac
    }

    #[inline]
    pub fn write(&mut self, sample: f32) {
        self.buffer[self.write] = sample;
        self.write += 1;
        if self.write == self.buffer.len() {
            self.write = 0;
        }
    }

    pub fn clear(&mut self) {
        self.buffer.fill(0.0);
        self.write = 0;
    }
}
