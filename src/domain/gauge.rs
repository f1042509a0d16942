// Gauge needle animation - damped spring tracking with scheduled idle jitter
use crate::domain::scale::{VIEW_HEIGHT, VIEW_WIDTH};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::time::Duration;

/// Longest integration step; larger ticks are split so the spring stays stable.
const MAX_STEP_SECS: f64 = 1.0 / 120.0;
/// Elapsed time beyond this is dropped rather than integrated (e.g. after a stall).
const MAX_CATCH_UP_SECS: f64 = 5.0;

const DIAL_RADIUS: f64 = 24.0;
const DIAL_CENTER_Y: f64 = VIEW_HEIGHT - 2.0;

/// Sub-step that keeps semi-implicit Euler stable and non-oscillating:
/// `h * sqrt(k) <= 0.5` and `h * c <= 1`.
fn stable_step(stiffness: f64, damping: f64) -> f64 {
    let mut step = MAX_STEP_SECS;
    if stiffness > 0.0 {
        step = step.min(0.5 / stiffness.sqrt());
    }
    if damping > 0.0 {
        step = step.min(1.0 / damping);
    }
    step
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpringParams {
    pub stiffness: f64,
    pub damping: f64,
}

impl SpringParams {
    pub fn critically_damped(stiffness: f64) -> Self {
        Self {
            stiffness,
            damping: 2.0 * stiffness.sqrt(),
        }
    }
}

impl Default for SpringParams {
    fn default() -> Self {
        Self::critically_damped(120.0)
    }
}

/// Magnitude bounds of one idle perturbation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JitterRange {
    pub min: f64,
    pub max: f64,
}

impl Default for JitterRange {
    fn default() -> Self {
        Self { min: 0.1, max: 0.3 }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GaugeSettings {
    pub min: f64,
    pub max: f64,
    pub spring: SpringParams,
    pub settle_threshold: f64,
    pub quiet_delay: Duration,
    /// `None` disables idle jitter; the needle then rests in `Idle`.
    pub jitter: Option<JitterRange>,
    /// Needle sweep in degrees, measured clockwise from straight up.
    pub start_angle: f64,
    pub end_angle: f64,
}

impl Default for GaugeSettings {
    fn default() -> Self {
        Self {
            min: 0.0,
            max: 100.0,
            spring: SpringParams::default(),
            settle_threshold: 0.1,
            quiet_delay: Duration::from_millis(1200),
            jitter: Some(JitterRange::default()),
            start_angle: -90.0,
            end_angle: 90.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GaugePhase {
    Idle,
    Tracking,
    Settling,
}

/// Renderable state of a gauge at one instant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GaugeFrame {
    pub value: f64,
    pub target: f64,
    pub min: f64,
    pub max: f64,
    pub fraction: f64,
    pub angle: f64,
    pub track: String,
    pub arc: String,
    pub phase: GaugePhase,
}

#[derive(Debug, Clone)]
pub struct GaugeAnimator {
    settings: GaugeSettings,
    display: f64,
    velocity: f64,
    target: f64,
    anchor: f64,
    phase: GaugePhase,
    quiet_left: Duration,
    rng: StdRng,
}

impl GaugeAnimator {
    pub fn new(settings: GaugeSettings) -> Self {
        Self::with_rng(settings, StdRng::from_entropy())
    }

    pub fn with_rng(settings: GaugeSettings, rng: StdRng) -> Self {
        let rest = settings.min;
        Self {
            settings,
            display: rest,
            velocity: 0.0,
            target: rest,
            anchor: rest,
            phase: GaugePhase::Idle,
            quiet_left: Duration::ZERO,
            rng,
        }
    }

    fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.settings.min, self.settings.max)
    }

    /// Points the needle at a new reading. Out-of-range values are clamped.
    pub fn set_target(&mut self, value: f64) {
        if !value.is_finite() {
            return;
        }
        let value = self.clamp(value);
        self.anchor = value;
        self.target = value;
        self.phase = GaugePhase::Tracking;
    }

    /// Advances the animation by `elapsed`.
    pub fn tick(&mut self, elapsed: Duration) {
        match self.phase {
            GaugePhase::Idle => {}
            GaugePhase::Tracking => {
                self.integrate(elapsed.as_secs_f64().min(MAX_CATCH_UP_SECS));
                if self.is_settled() {
                    self.settle();
                }
            }
            GaugePhase::Settling => {
                self.quiet_left = self.quiet_left.saturating_sub(elapsed);
                if self.quiet_left.is_zero() {
                    self.jitter();
                }
            }
        }
    }

    fn integrate(&mut self, seconds: f64) {
        if seconds <= 0.0 {
            return;
        }
        let SpringParams { stiffness, damping } = self.settings.spring;
        let steps = (seconds / stable_step(stiffness, damping)).ceil().max(1.0);
        let h = seconds / steps;

        for _ in 0..steps as usize {
            let accel = stiffness * (self.target - self.display) - damping * self.velocity;
            self.velocity += accel * h;
            self.display += self.velocity * h;
        }

        let clamped = self.clamp(self.display);
        if clamped != self.display {
            self.display = clamped;
            self.velocity = 0.0;
        }
    }

    fn is_settled(&self) -> bool {
        let threshold = self.settings.settle_threshold;
        (self.target - self.display).abs() < threshold && self.velocity.abs() < threshold
    }

    fn settle(&mut self) {
        self.display = self.target;
        self.velocity = 0.0;
        match self.settings.jitter {
            Some(_) => {
                self.phase = GaugePhase::Settling;
                self.quiet_left = self.settings.quiet_delay;
            }
            None => self.phase = GaugePhase::Idle,
        }
    }

    fn jitter(&mut self) {
        let Some(range) = self.settings.jitter else {
            self.phase = GaugePhase::Idle;
            return;
        };
        if !(range.min.is_finite() && range.max.is_finite() && range.min <= range.max) {
            self.phase = GaugePhase::Idle;
            return;
        }
        let magnitude = self.rng.gen_range(range.min..=range.max);
        let offset = if self.rng.gen_bool(0.5) {
            magnitude
        } else {
            -magnitude
        };
        self.target = self.clamp(self.anchor + offset);
        self.phase = GaugePhase::Tracking;
    }

    /// How long the driver may sleep before the next `tick` matters.
    /// `None` means nothing is scheduled until a new target arrives.
    pub fn next_wakeup(&self, frame: Duration) -> Option<Duration> {
        match self.phase {
            GaugePhase::Idle => None,
            GaugePhase::Tracking => Some(frame),
            GaugePhase::Settling => Some(self.quiet_left),
        }
    }

    pub fn display(&self) -> f64 {
        self.clamp(self.display)
    }

    pub fn target(&self) -> f64 {
        self.target
    }

    /// The reading the needle is anchored to, excluding idle jitter.
    pub fn anchor(&self) -> f64 {
        self.anchor
    }

    pub fn phase(&self) -> GaugePhase {
        self.phase
    }

    /// Position of the displayed value within `[min, max]`, from 0 to 1.
    pub fn fraction(&self) -> f64 {
        let span = self.settings.max - self.settings.min;
        if span <= 0.0 {
            return 0.0;
        }
        (self.display() - self.settings.min) / span
    }

    pub fn needle_angle(&self) -> f64 {
        let GaugeSettings {
            start_angle,
            end_angle,
            ..
        } = self.settings;
        start_angle + self.fraction() * (end_angle - start_angle)
    }

    /// SVG path of the full dial track.
    pub fn track_path(&self) -> String {
        arc_path(self.settings.start_angle, self.settings.end_angle)
    }

    /// SVG path of the filled portion up to the needle.
    pub fn arc_path(&self) -> String {
        arc_path(self.settings.start_angle, self.needle_angle())
    }

    pub fn frame(&self) -> GaugeFrame {
        GaugeFrame {
            value: self.display(),
            target: self.target,
            min: self.settings.min,
            max: self.settings.max,
            fraction: self.fraction(),
            angle: self.needle_angle(),
            track: self.track_path(),
            arc: self.arc_path(),
            phase: self.phase,
        }
    }
}

fn dial_point(angle_deg: f64) -> (f64, f64) {
    let radians = angle_deg.to_radians();
    (
        VIEW_WIDTH / 2.0 + DIAL_RADIUS * radians.sin(),
        DIAL_CENTER_Y - DIAL_RADIUS * radians.cos(),
    )
}

fn arc_path(from_deg: f64, to_deg: f64) -> String {
    let (x0, y0) = dial_point(from_deg);
    let (x1, y1) = dial_point(to_deg);
    let sweep = (to_deg - from_deg).abs();
    let large_arc = u8::from(sweep > 180.0);
    let clockwise = u8::from(to_deg >= from_deg);
    format!(
        "M {x0:.2} {y0:.2} A {r:.2} {r:.2} 0 {large_arc} {clockwise} {x1:.2} {y1:.2}",
        r = DIAL_RADIUS
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME: Duration = Duration::from_millis(16);

    fn animator(settings: GaugeSettings) -> GaugeAnimator {
        GaugeAnimator::with_rng(settings, StdRng::seed_from_u64(7))
    }

    fn run_until_settled(gauge: &mut GaugeAnimator) {
        for _ in 0..2_000 {
            gauge.tick(FRAME);
            if gauge.phase() != GaugePhase::Tracking {
                return;
            }
        }
        panic!("gauge never settled");
    }

    #[test]
    fn test_stiff_springs_still_converge() {
        for stiffness in [2e4, 1e5, 1e6] {
            let mut gauge = animator(GaugeSettings {
                spring: SpringParams::critically_damped(stiffness),
                ..GaugeSettings::default()
            });
            gauge.set_target(50.0);

            let mut ticks = 0;
            while gauge.phase() == GaugePhase::Tracking {
                gauge.tick(FRAME);
                assert!(gauge.display() <= 50.0 + 1e-6, "overshoot at k={}", stiffness);
                ticks += 1;
                assert!(ticks < 100, "k={} never settled", stiffness);
            }
            assert_eq!(gauge.phase(), GaugePhase::Settling);
            assert_eq!(gauge.display(), 50.0);
        }
    }

    #[test]
    fn test_converges_then_jitters_within_bounds() {
        let settings = GaugeSettings::default();
        let mut gauge = animator(settings.clone());
        gauge.set_target(75.0);
        assert_eq!(gauge.phase(), GaugePhase::Tracking);

        gauge.tick(FRAME);
        assert!(gauge.display() > 0.0 && gauge.display() < 75.0);

        run_until_settled(&mut gauge);
        assert_eq!(gauge.phase(), GaugePhase::Settling);
        assert!((gauge.display() - 75.0).abs() < settings.settle_threshold);

        let mut jitter_events = 0;
        let mut last_phase = gauge.phase();
        for _ in 0..5_000 {
            gauge.tick(FRAME);
            if last_phase == GaugePhase::Settling && gauge.phase() == GaugePhase::Tracking {
                jitter_events += 1;
                let offset = (gauge.target() - 75.0).abs();
                assert!((0.1 - 1e-9..=0.3 + 1e-9).contains(&offset), "offset {offset}");
            }
            last_phase = gauge.phase();

            assert!((gauge.display() - 75.0).abs() <= 0.3 + 1e-6);
            assert!(gauge.display() >= settings.min && gauge.display() <= settings.max);
            assert_eq!(gauge.anchor(), 75.0);
        }
        assert!(jitter_events > 3);
    }

    #[test]
    fn test_targets_are_clamped() {
        let mut gauge = animator(GaugeSettings::default());
        gauge.set_target(250.0);
        assert_eq!(gauge.target(), 100.0);

        for _ in 0..5_000 {
            gauge.tick(FRAME);
            assert!(gauge.display() <= 100.0);
        }
        assert!((gauge.display() - 100.0).abs() <= 0.3 + 1e-6);

        gauge.set_target(-40.0);
        assert_eq!(gauge.target(), 0.0);
        gauge.set_target(f64::NAN);
        assert_eq!(gauge.target(), 0.0);
    }

    #[test]
    fn test_without_jitter_rests_idle() {
        let settings = GaugeSettings {
            jitter: None,
            ..GaugeSettings::default()
        };
        let mut gauge = animator(settings);
        assert_eq!(gauge.next_wakeup(FRAME), None);

        gauge.set_target(30.0);
        assert_eq!(gauge.next_wakeup(FRAME), Some(FRAME));
        run_until_settled(&mut gauge);

        assert_eq!(gauge.phase(), GaugePhase::Idle);
        assert_eq!(gauge.display(), 30.0);
        assert_eq!(gauge.next_wakeup(FRAME), None);
    }

    #[test]
    fn test_settling_schedules_single_wakeup() {
        let settings = GaugeSettings::default();
        let mut gauge = animator(settings.clone());
        gauge.set_target(10.0);
        run_until_settled(&mut gauge);
        assert_eq!(gauge.next_wakeup(FRAME), Some(settings.quiet_delay));

        gauge.tick(settings.quiet_delay);
        assert_eq!(gauge.phase(), GaugePhase::Tracking);
    }

    #[test]
    fn test_new_target_interrupts_settling() {
        let mut gauge = animator(GaugeSettings::default());
        gauge.set_target(20.0);
        run_until_settled(&mut gauge);
        gauge.set_target(60.0);
        assert_eq!(gauge.phase(), GaugePhase::Tracking);
        run_until_settled(&mut gauge);
        assert_eq!(gauge.anchor(), 60.0);
    }

    #[test]
    fn test_geometry() {
        let mut gauge = animator(GaugeSettings {
            jitter: None,
            ..GaugeSettings::default()
        });
        assert_eq!(gauge.needle_angle(), -90.0);

        gauge.set_target(50.0);
        run_until_settled(&mut gauge);
        assert_eq!(gauge.fraction(), 0.5);
        assert_eq!(gauge.needle_angle(), 0.0);

        let frame = gauge.frame();
        assert_eq!(frame.track, "M 26.00 28.00 A 24.00 24.00 0 0 1 74.00 28.00");
        assert_eq!(frame.arc, "M 26.00 28.00 A 24.00 24.00 0 0 1 50.00 4.00");
        assert_eq!(frame.phase, GaugePhase::Idle);
    }
}
