// src/post.rs
//
// Post processing: chorus, delay and reverb on the send buses, dry mix,
// peak limiter, final clamp.

use rand::Rng;

use crate::audio_buffer::MixBus;
use crate::conductor::ActivityLevels;
use crate::config::PostConfig;
use crate::dsp::{Chorus, FeedbackDelay, MAX_CHORUS_VOICES, PeakLimiter, Reverb};

pub struct PostProcessor {
    chorus: Chorus,
    delay: FeedbackDelay,
    reverb: Reverb,
    limiter: PeakLimiter,
    chorus_wet: f32,
    delay_wet: f32,
    reverb_wet: f32,
    chorus_enabled: bool,
    delay_enabled: bool,
    reverb_enabled: bool,
    non_finite: u64,
    peaks: [f32; 2],
}

#[inline]
fn finite_or_zero(sample: f32, counter: &mut u64) -> f32 {
    if sample.is_finite() {
        sample
    } else {
        *counter += 1;
        0.0
    }
}

impl PostProcessor {
    pub fn new(config: &PostConfig, sample_rate: f32, rng: &mut impl Rng) -> Self {
        let phases: [f32; MAX_CHORUS_VOICES] = std::array::from_fn(|_| rng.random::<f32>());
        Self {
            chorus: Chorus::new(&config.chorus, sample_rate, phases),
            delay: FeedbackDelay::new(&config.delay, sample_rate),
            reverb: Reverb::new(&config.reverb, sample_rate),
            limiter: PeakLimiter::new(&config.limiter, sample_rate),
            chorus_wet: config.chorus.wet,
            delay_wet: config.delay.wet,
            reverb_wet: config.reverb.wet,
            chorus_enabled: config.chorus.enabled,
            delay_enabled: config.delay.enabled,
            reverb_enabled: config.reverb.enabled,
            non_finite: 0,
            peaks: [0.0; 2],
        }
    }

    /// Mix the block in `bus` into `left`/`right` (which must hold at
    /// least `bus.frames()` frames). Output is always finite and within ±1.
    ///
    /// `master_fade` scales the reverb return so its long tail follows a
    /// master fade; the sources themselves are already faded.
    pub fn process(
        &mut self,
        bus: &MixBus,
        activity: &ActivityLevels,
        master_fade: f32,
        left: &mut [f32],
        right: &mut [f32],
    ) {
        let frames = bus.frames().min(left.len()).min(right.len());
        let chorus_wet = self.chorus_wet * activity.chorus;
        let delay_wet = self.delay_wet * activity.delay;
        let reverb_wet = self.reverb_wet * master_fade;
        let mut peaks = [0.0f32; 2];

        for i in 0..frames {
            let count = &mut self.non_finite;
            let mut l = finite_or_zero(bus.dry.left[i], count);
            let mut r = finite_or_zero(bus.dry.right[i], count);

            if self.chorus_enabled {
                let (cl, cr) = self.chorus.process(
                    finite_or_zero(bus.chorus.left[i], count),
                    finite_or_zero(bus.chorus.right[i], count),
                );
                l += cl * chorus_wet;
                r += cr * chorus_wet;
            }
            if self.delay_enabled {
                let (dl, dr) = self.delay.process(
                    finite_or_zero(bus.delay.left[i], count),
                    finite_or_zero(bus.delay.right[i], count),
                );
                l += dl * delay_wet;
                r += dr * delay_wet;
            }
            if self.reverb_enabled {
                let (wl, wr) = self.reverb.process(
                    finite_or_zero(bus.reverb.left[i], count),
                    finite_or_zero(bus.reverb.right[i], count),
                );
                l += wl * reverb_wet;
                r += wr * reverb_wet;
            }

            let (l, r) = self.limiter.process(l, r);
            let l = finite_or_zero(l, count).clamp(-1.0, 1.0);
            let r = finite_or_zero(r, count).clamp(-1.0, 1.0);
            peaks[0] = peaks[0].max(l.abs());
            peaks[1] = peaks[1].max(r.abs());
            left[i] = l;
            right[i] = r;
        }
        self.peaks = peaks;
    }

    /// Non-finite samples replaced since construction.
    pub fn non_finite_samples(&self) -> u64 {
        self.non_finite
    }

    pub fn limiter_gain(&self) -> f32 {
        self.limiter.gain()
    }

    /// Output peaks of the last processed block.
    pub fn peaks(&self) -> [f32; 2] {
        self.peaks
    }

    /// Clear every effect's memory so no tail outlives a dataset swap.
    pub fn reset(&mut self) {
        self.chorus.reset();
        self.delay.reset();
        self.reverb.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    use crate::config::Sends;

    fn processor() -> PostProcessor {
        PostProcessor::new(&PostConfig::default(), 48_000.0, &mut SmallRng::seed_from_u64(1))
    }

    #[test]
    fn non_finite_input_is_zeroed_and_counted() {
        let mut post = processor();
        let mut bus = MixBus::new(4);
        bus.begin_block(4);
        bus.dry.left[1] = f32::NAN;
        bus.dry.right[2] = f32::INFINITY;
        bus.chorus.left[3] = f32::NEG_INFINITY;
        let (mut l, mut r) = ([0.0; 4], [0.0; 4]);
        post.process(&bus, &ActivityLevels::FULL, 1.0, &mut l, &mut r);
        assert_eq!(post.non_finite_samples(), 3);
        assert!(l.iter().chain(&r).all(|s| s.is_finite()));
    }

    #[test]
    fn loud_input_is_limited_into_range() {
        let mut post = processor();
        let mut bus = MixBus::new(64);
        bus.begin_block(64);
        for i in 0..64 {
            bus.add_with_sends(i, 40.0, -40.0, Sends::new(1.0, 1.0, 1.0));
        }
        let (mut l, mut r) = ([0.0; 64], [0.0; 64]);
        post.process(&bus, &ActivityLevels::FULL, 1.0, &mut l, &mut r);
        assert!(l.iter().chain(&r).all(|s| s.abs() <= 0.85 + 1e-5));
        assert!(post.limiter_gain() < 0.1);
        assert!(post.peaks()[0] > 0.8);
    }

    #[test]
    fn delay_wet_follows_activity() {
        let mut config = PostConfig::default();
        config.chorus.enabled = false;
        config.reverb.enabled = false;
        let frames = (0.35 * 48_000.0) as usize + 256;
        let render = |delay_activity: f32| {
            let mut post = PostProcessor::new(&config, 48_000.0, &mut SmallRng::seed_from_u64(1));
            let mut bus = MixBus::new(frames);
            bus.begin_block(frames);
            bus.delay.left[0] = 1.0;
            let activity = ActivityLevels {
                delay: delay_activity,
                ..ActivityLevels::FULL
            };
            let (mut l, mut r) = (vec![0.0; frames], vec![0.0; frames]);
            post.process(&bus, &activity, 1.0, &mut l, &mut r);
            l.iter().fold(0.0f32, |m, s| m.max(s.abs()))
        };
        let full = render(1.0);
        let half = render(0.5);
        assert!(full > 0.15);
        assert!((half - full * 0.5).abs() < 1e-4);
    }

    #[test]
    fn delay_send_impulse_yields_a_single_scaled_echo() {
        let mut config = PostConfig::default();
        config.chorus.enabled = false;
        config.reverb.enabled = false;
        config.delay.time_secs = 0.25;
        config.delay.feedback = 0.0;
        config.delay.damping = 0.9;
        let sample_rate = 48_000.0;
        let echo_at = 12_000;
        let frames = echo_at * 2 + 64;

        let mut post = PostProcessor::new(&config, sample_rate, &mut SmallRng::seed_from_u64(3));
        let mut bus = MixBus::new(frames);
        bus.begin_block(frames);
        bus.delay.left[0] = 1.0;
        bus.delay.right[0] = 1.0;
        let activity = ActivityLevels {
            delay: 0.5,
            ..ActivityLevels::FULL
        };
        let (mut l, mut r) = (vec![0.0; frames], vec![0.0; frames]);
        post.process(&bus, &activity, 1.0, &mut l, &mut r);

        let expected = config.delay.wet * activity.delay;
        for (i, (&sl, &sr)) in l.iter().zip(&r).enumerate() {
            if i == echo_at {
                assert!((sl - expected).abs() < 1e-6, "echo {sl} != {expected}");
                assert!((sr - expected).abs() < 1e-6);
            } else {
                assert_eq!((sl, sr), (0.0, 0.0), "stray output at frame {i}");
            }
        }
    }

    #[test]
    fn reverb_send_rings_on_and_reset_silences_it() {
        let mut config = PostConfig::default();
        config.chorus.enabled = false;
        config.delay.enabled = false;
        let mut post = PostProcessor::new(&config, 48_000.0, &mut SmallRng::seed_from_u64(5));
        let frames = 4_800;
        let mut bus = MixBus::new(frames);
        bus.begin_block(frames);
        bus.reverb.left[0] = 1.0;
        let (mut l, mut r) = (vec![0.0; frames], vec![0.0; frames]);
        post.process(&bus, &ActivityLevels::FULL, 1.0, &mut l, &mut r);
        assert!(l.iter().any(|&s| s != 0.0));
        assert!(r.iter().all(|&s| s == 0.0));

        bus.begin_block(frames);
        post.process(&bus, &ActivityLevels::FULL, 1.0, &mut l, &mut r);
        assert!(l.iter().any(|&s| s != 0.0), "tail should carry into the next block");

        post.reset();
        post.process(&bus, &ActivityLevels::FULL, 1.0, &mut l, &mut r);
        assert!(l.iter().chain(&r).all(|&s| s == 0.0));
    }
}
