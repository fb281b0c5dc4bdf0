//! Fixed-timestep scheduler.
//!
//! Wall-clock frame time comes in as `f64` seconds and is turned into a whole
//! number of fixed ticks. Nothing inside the simulation ever sees the float;
//! it only sees "run N ticks". The leftover fraction is exposed for
//! presentation interpolation.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::math::Fixed;

/// Slack for float accumulation error when counting whole ticks.
const TICK_EPSILON: f64 = 1e-9;

/// Clock limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    /// Fixed ticks per simulated second.
    pub tick_rate: u32,
    /// Longest frame delta accepted before clamping, in seconds.
    pub max_frame_dt: f64,
    /// Most ticks run for a single frame; leftover time is dropped.
    ///
    /// The default covers a full `max_frame_dt`, so only the clamp drops
    /// time. A lower value drops time on frames shorter than the clamp.
    pub max_ticks_per_frame: u32,
}

impl Default for ClockConfig {
    fn default() -> Self {
        let tick_rate = 60;
        let max_frame_dt = 0.25;
        Self {
            tick_rate,
            max_frame_dt,
            max_ticks_per_frame: (max_frame_dt * f64::from(tick_rate)).ceil() as u32,
        }
    }
}

/// Fixed-timestep accumulator with time scaling and hit-stop.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationClock {
    config: ClockConfig,
    tick_secs: f64,
    accumulator: f64,
    base_scale: f64,
    hit_stop_scale: f64,
    hit_stop_remaining: f64,
}

impl SimulationClock {
    /// Create a clock. A zero tick rate is treated as 1 Hz.
    #[must_use]
    pub fn new(config: ClockConfig) -> Self {
        let rate = config.tick_rate.max(1);
        Self {
            config,
            tick_secs: 1.0 / f64::from(rate),
            accumulator: 0.0,
            base_scale: 1.0,
            hit_stop_scale: 1.0,
            hit_stop_remaining: 0.0,
        }
    }

    /// Seconds per tick.
    #[must_use]
    pub fn tick_secs(&self) -> f64 {
        self.tick_secs
    }

    /// Seconds per tick as simulation fixed-point.
    #[must_use]
    pub fn tick_dt(&self) -> Fixed {
        Fixed::ONE / Fixed::from_num(self.config.tick_rate.max(1))
    }

    /// Time-scale factor in effect: the hit-stop scale while one is
    /// active, the base scale otherwise.
    #[must_use]
    pub fn time_scale(&self) -> f64 {
        if self.in_hit_stop() {
            self.hit_stop_scale
        } else {
            self.base_scale
        }
    }

    /// Scale restored once a hit-stop ends.
    #[must_use]
    pub fn base_time_scale(&self) -> f64 {
        self.base_scale
    }

    /// Whether a hit-stop slow-down is active.
    #[must_use]
    pub fn in_hit_stop(&self) -> bool {
        self.hit_stop_remaining > 0.0
    }

    /// Set the base time scale. Negative or non-finite values become zero.
    ///
    /// During a hit-stop the new scale takes effect when the hit-stop ends.
    pub fn set_time_scale(&mut self, scale: f64) {
        self.base_scale = sanitize(scale);
    }

    /// Slow time to `scale` for `duration` real seconds.
    ///
    /// The countdown runs in unscaled time, so a hit-stop always ends after
    /// the same wall-clock duration regardless of the scale.
    pub fn trigger_hit_stop(&mut self, scale: f64, duration: f64) {
        self.hit_stop_scale = sanitize(scale);
        self.hit_stop_remaining = self.hit_stop_remaining.max(sanitize(duration));
    }

    /// Feed one frame of real time; returns how many fixed ticks to run.
    pub fn advance(&mut self, real_dt: f64) -> u32 {
        let dt = sanitize(real_dt).min(self.config.max_frame_dt);
        if dt < real_dt {
            debug!(real_dt, clamped = dt, "frame delta clamped");
        }

        self.accumulator += dt * self.time_scale();

        if self.hit_stop_remaining > 0.0 {
            self.hit_stop_remaining -= dt;
            if self.hit_stop_remaining <= TICK_EPSILON {
                self.hit_stop_remaining = 0.0;
                debug!(scale = self.base_scale, "hit-stop ended");
            }
        }

        let whole = ((self.accumulator + TICK_EPSILON) / self.tick_secs).floor();
        let ticks = (whole as u64).min(u64::from(self.config.max_ticks_per_frame)) as u32;
        self.accumulator = (self.accumulator - f64::from(ticks) * self.tick_secs).max(0.0);

        if self.accumulator + TICK_EPSILON >= self.tick_secs {
            debug!(dropped = self.accumulator, "tick budget exceeded, dropping accumulated time");
            self.accumulator = 0.0;
        }
        ticks
    }

    /// Fraction of a tick left in the accumulator, in `[0, 1)`.
    ///
    /// For presentation interpolation only.
    #[must_use]
    pub fn alpha(&self) -> f64 {
        (self.accumulator / self.tick_secs).clamp(0.0, 1.0)
    }
}

impl Default for SimulationClock {
    fn default() -> Self {
        Self::new(ClockConfig::default())
    }
}

fn sanitize(value: f64) -> f64 {
    if value.is_finite() {
        value.max(0.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accumulates_partial_frames() {
        let mut clock = SimulationClock::default();
        let half = clock.tick_secs() / 2.0;
        assert_eq!(clock.advance(half), 0);
        assert!((clock.alpha() - 0.5).abs() < 1e-6);
        assert_eq!(clock.advance(half), 1);
        assert!(clock.alpha() < 1e-6);
    }

    #[test]
    fn test_clamps_huge_delta() {
        let mut clock = SimulationClock::new(ClockConfig {
            tick_rate: 60,
            max_frame_dt: 0.1,
            max_ticks_per_frame: 100,
        });
        // A debugger pause of ten seconds runs at most 0.1 s of ticks.
        assert_eq!(clock.advance(10.0), 6);
    }

    #[test]
    fn test_caps_ticks_per_frame() {
        let mut clock = SimulationClock::new(ClockConfig {
            tick_rate: 60,
            max_frame_dt: 1.0,
            max_ticks_per_frame: 4,
        });
        assert_eq!(clock.advance(0.5), 4);
        // Excess was dropped rather than carried into the next frame.
        assert_eq!(clock.advance(0.0), 0);
    }

    #[test]
    fn test_hit_stop_scales_and_reverts() {
        let mut clock = SimulationClock::default();
        let tick = clock.tick_secs();
        clock.trigger_hit_stop(0.5, tick * 4.0);

        assert_eq!(clock.advance(tick), 0);
        assert_eq!(clock.advance(tick), 1);
        assert!(clock.in_hit_stop());
        assert_eq!(clock.advance(tick * 2.0), 1);
        assert!(!clock.in_hit_stop());
        assert!((clock.time_scale() - 1.0).abs() < f64::EPSILON);
        assert_eq!(clock.advance(tick), 1);
    }

    #[test]
    fn test_hit_stop_reverts_to_base_scale() {
        let mut clock = SimulationClock::default();
        clock.set_time_scale(2.0);
        clock.trigger_hit_stop(0.25, 0.05);
        assert!((clock.time_scale() - 0.25).abs() < f64::EPSILON);

        for _ in 0..10 {
            clock.advance(1.0 / 60.0);
        }
        assert!(!clock.in_hit_stop());
        assert!((clock.time_scale() - 2.0).abs() < f64::EPSILON);
        // Two ticks per frame at double speed.
        assert_eq!(clock.advance(clock.tick_secs()), 2);
    }

    #[test]
    fn test_scale_set_during_hit_stop_applies_after() {
        let mut clock = SimulationClock::default();
        clock.trigger_hit_stop(0.5, 0.1);
        clock.set_time_scale(0.0);
        assert!((clock.time_scale() - 0.5).abs() < f64::EPSILON);
        clock.advance(0.2);
        assert!(!clock.in_hit_stop());
        assert!((clock.base_time_scale()).abs() < f64::EPSILON);
        assert_eq!(clock.advance(0.1), 0);
    }

    #[test]
    fn test_default_cap_covers_clamped_frame() {
        let config = ClockConfig::default();
        assert_eq!(config.max_ticks_per_frame, 15);

        let mut clock = SimulationClock::new(config);
        // 200 ms is under the clamp, so none of it is dropped.
        assert_eq!(clock.advance(0.2), 12);
        assert!(clock.alpha() < 1e-6);
        assert_eq!(clock.advance(10.0), 15);
    }

    #[test]
    fn test_negative_and_nan_deltas_ignored() {
        let mut clock = SimulationClock::default();
        assert_eq!(clock.advance(-1.0), 0);
        assert_eq!(clock.advance(f64::NAN), 0);
        assert!(clock.alpha() < f64::EPSILON);
    }

    #[test]
    fn test_tick_dt_matches_rate() {
        let clock = SimulationClock::new(ClockConfig {
            tick_rate: 50,
            ..ClockConfig::default()
        });
        assert!((clock.tick_dt() - Fixed::from_num(0.02)).abs() < Fixed::from_num(0.0001));
    }
}
