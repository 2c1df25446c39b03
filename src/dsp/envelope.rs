// src/dsp/envelope.rs
//
// Envelope shapes and smoothing helpers.

/// One-pole smoothing coefficient for a step of `dt` seconds toward a
/// target with time constant `tau` seconds. Always in (0, 1].
#[inline]
pub fn ease_coefficient(dt: f32, tau: f32) -> f32 {
    if tau <= 0.0 {
        return 1.0;
    }
    (1.0 - (-dt / tau).exp()).clamp(f32::MIN_POSITIVE, 1.0)
}

#[inline]
pub fn smoothstep(t: f32) -> f32 {
    let t = t.clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// Rise-and-fall arch over `t` in 0..1: smoothstep up to the midpoint,
/// mirrored down after it.
#[inline]
pub fn arch(t: f32) -> f32 {
    if t < 0.5 {
        smoothstep(t)
    } else {
        smoothstep(1.0 - t)
    }
}

/// Grain envelope: linear attack over the first `attack` share, linear
/// release over the last `release` share, smoothstep-shaped.
#[inline]
pub fn grain_envelope(progress: f32, attack: f32, release: f32) -> f32 {
    let linear = if progress < attack {
        progress / attack
    } else if progress > 1.0 - release {
        (1.0 - progress) / release
    } else {
        1.0
    };
    smoothstep(linear)
}

#[inline]
pub fn db_to_gain(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arch_is_symmetric_and_peaks_mid_way() {
        assert_eq!(arch(0.0), 0.0);
        assert!((arch(0.5) - 0.5).abs() < 1e-6);
        assert!((arch(0.2) - arch(0.8)).abs() < 1e-6);
        assert!(arch(0.999) < 0.01);
    }

    #[test]
    fn grain_envelope_starts_and_ends_silent() {
        assert_eq!(grain_envelope(0.0, 0.35, 0.45), 0.0);
        assert_eq!(grain_envelope(0.5, 0.35, 0.45), 1.0);
        assert_eq!(grain_envelope(1.0, 0.35, 0.45), 0.0);
    }

    #[test]
    fn coefficient_is_bounded() {
        let c = ease_coefficient(128.0 / 48_000.0, 0.15);
        assert!(c > 0.0 && c < 1.0);
        assert_eq!(ease_coefficient(0.1, 0.0), 1.0);
    }
}
