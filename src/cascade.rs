// src/cascade.rs
//
// Cascade fades: pathways enter most-consonant first and leave in reverse,
// each on its own staggered ramp.

use serde::{Deserialize, Serialize};

use crate::context::EntityTables;

pub const DEFAULT_FADE_IN_SECS: f32 = 4.8;
pub const DEFAULT_FADE_OUT_SECS: f32 = 0.9;

const IN_SPREAD: f32 = 0.6;
const IN_RAMP: f32 = 0.35;
const OUT_SPREAD: f32 = 0.5;
const OUT_RAMP: f32 = 0.45;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FadeDirection {
    In,
    Out,
}

impl FadeDirection {
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "in" => Some(FadeDirection::In),
            "out" => Some(FadeDirection::Out),
            _ => None,
        }
    }

    pub fn default_duration(self) -> f32 {
        match self {
            FadeDirection::In => DEFAULT_FADE_IN_SECS,
            FadeDirection::Out => DEFAULT_FADE_OUT_SECS,
        }
    }
}

#[inline]
fn ease_out_quad(t: f32) -> f32 {
    t * (2.0 - t)
}

#[inline]
fn ease_in_quad(t: f32) -> f32 {
    t * t
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CascadeFade {
    running: Option<(FadeDirection, f32)>,
    elapsed: f32,
}

impl CascadeFade {
    pub fn start(&mut self, direction: FadeDirection, duration_secs: f32) {
        let duration = if duration_secs.is_finite() && duration_secs > 0.0 {
            duration_secs
        } else {
            direction.default_duration()
        };
        self.running = Some((direction, duration));
        self.elapsed = 0.0;
    }

    pub fn stop(&mut self) {
        self.running = None;
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Advance by `dt` and write per-entity fade gains into `tables`.
    pub fn update(&mut self, dt: f32, tables: &mut EntityTables) {
        let Some((direction, duration)) = self.running else {
            return;
        };
        self.elapsed += dt;
        let progress = (self.elapsed / duration).min(1.0);
        let n = tables.cascade_order.len() as f32;

        for (rank, (&entity, &offset)) in tables
            .cascade_order
            .iter()
            .zip(&tables.cascade_offset)
            .enumerate()
        {
            let Some(fade) = tables.fade.get_mut(entity as usize) else {
                continue;
            };
            *fade = if progress >= 1.0 {
                match direction {
                    FadeDirection::In => 1.0,
                    FadeDirection::Out => 0.0,
                }
            } else {
                match direction {
                    FadeDirection::In => {
                        let start = rank as f32 / n * IN_SPREAD + offset;
                        ease_out_quad(((progress - start) / IN_RAMP).clamp(0.0, 1.0))
                    }
                    FadeDirection::Out => {
                        let start = (n - 1.0 - rank as f32) / n * OUT_SPREAD + offset;
                        1.0 - ease_in_quad(((progress - start) / OUT_RAMP).clamp(0.0, 1.0))
                    }
                }
            };
        }

        if progress >= 1.0 {
            self.running = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tables() -> EntityTables {
        let mut t = EntityTables::new(4);
        // most consonant first: 2, 0, 3, 1
        t.cascade_order = vec![2, 0, 3, 1];
        t
    }

    #[test]
    fn fade_in_enters_in_consonance_order() {
        let mut t = tables();
        let mut cascade = CascadeFade::default();
        cascade.start(FadeDirection::In, 1.0);
        cascade.update(0.25, &mut t);
        assert!(t.fade[2] > t.fade[0]);
        assert!(t.fade[0] > t.fade[3]);
        assert!(t.fade[3] >= t.fade[1]);
        for _ in 0..10 {
            cascade.update(0.1, &mut t);
        }
        assert!(!cascade.is_running());
        assert!(t.fade.iter().all(|&f| f == 1.0));
    }

    #[test]
    fn fade_out_leaves_in_reverse_and_settles_silent() {
        let mut t = tables();
        let mut cascade = CascadeFade::default();
        cascade.start(FadeDirection::Out, 1.0);
        cascade.update(0.3, &mut t);
        assert!(t.fade[1] < t.fade[2]);
        assert!(t.fade.iter().all(|&f| (0.0..=1.0).contains(&f)));
        cascade.update(1.0, &mut t);
        assert!(t.fade.iter().all(|&f| f == 0.0));
    }

    #[test]
    fn invalid_duration_falls_back_to_default() {
        let mut t = tables();
        let mut cascade = CascadeFade::default();
        cascade.start(FadeDirection::In, f32::NAN);
        cascade.update(DEFAULT_FADE_IN_SECS * 0.5, &mut t);
        assert!(cascade.is_running());
        assert_eq!(FadeDirection::parse(" OUT "), Some(FadeDirection::Out));
    }
}
