// Axis and scale engine - extents, nice ticks, labels and projection
use chrono::DateTime;
use serde::{Deserialize, Serialize};

/// Width of the normalized plotting viewbox.
pub const VIEW_WIDTH: f64 = 100.0;
/// Height of the normalized plotting viewbox.
pub const VIEW_HEIGHT: f64 = 30.0;

const DEGENERATE_HALF_SPAN: f64 = 0.5;
/// Degenerate temporal axes widen to whole seconds so tick labels stay distinct.
const DEGENERATE_TEMPORAL_HALF_SPAN_MS: f64 = 5_000.0;
const MAX_TICKS: usize = 1000;
const MAX_FRACTION_DIGITS: usize = 8;

const MINUTE_MS: f64 = 60_000.0;
const HOUR_MS: f64 = 60.0 * MINUTE_MS;
const DAY_MS: f64 = 24.0 * HOUR_MS;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Extent {
    pub min: f64,
    pub max: f64,
}

impl Extent {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn span(&self) -> f64 {
        self.max - self.min
    }

    /// Half of the span; stays finite for any pair of finite bounds.
    fn half_span(&self) -> f64 {
        self.max / 2.0 - self.min / 2.0
    }

    /// Widens a zero-width extent symmetrically so downstream scales never divide by zero.
    pub fn widened(self) -> Self {
        self.widened_by(DEGENERATE_HALF_SPAN)
    }

    pub fn widened_by(self, half_span: f64) -> Self {
        if self.min == self.max {
            Self::new(self.min - half_span, self.max + half_span)
        } else {
            self
        }
    }
}

/// Raw `{min, max}` over finite values. Empty input gives `{0, 0}`.
pub fn extent<I>(values: I) -> Extent
where
    I: IntoIterator<Item = f64>,
{
    values
        .into_iter()
        .filter(|v| v.is_finite())
        .fold(None, |acc: Option<Extent>, v| match acc {
            None => Some(Extent::new(v, v)),
            Some(e) => Some(Extent::new(e.min.min(v), e.max.max(v))),
        })
        .unwrap_or(Extent::new(0.0, 0.0))
}

/// Picks the `{1, 2, 5, 10} x 10^k` step whose tick count lands closest to `target`.
pub fn nice_step(span: f64, target: usize) -> f64 {
    let target = target.max(1) as f64;
    let span = span.abs();
    if !span.is_finite() || span == 0.0 {
        return 1.0;
    }

    let base = 10f64.powf((span / target).log10().floor());
    let mut best = base;
    let mut best_error = f64::INFINITY;
    for multiplier in [1.0, 2.0, 5.0, 10.0] {
        let step = multiplier * base;
        let error = (span / step - target).abs();
        if error < best_error {
            best = step;
            best_error = error;
        }
    }
    best
}

/// Evenly spaced round ticks from the first step multiple at or above `min` up to `max`.
pub fn make_ticks(min: f64, max: f64, target: usize) -> Vec<f64> {
    if !min.is_finite() || !max.is_finite() {
        return Vec::new();
    }
    if min == max {
        return vec![min];
    }

    let (lo, hi) = if min < max { (min, max) } else { (max, min) };
    let span = hi - lo;
    let step = if span.is_finite() {
        nice_step(span, target)
    } else {
        nice_step(hi / 2.0 - lo / 2.0, target)
    };
    let tolerance = step * 1e-9;
    let first = (lo / step).ceil();

    let mut previous = f64::NEG_INFINITY;
    (0..MAX_TICKS)
        .map(|i| (first + i as f64) * step)
        .take_while(|&v| {
            let increasing = v > previous;
            previous = v;
            increasing && v <= hi + tolerance
        })
        .collect()
}

/// Affine map of `[extent.min, extent.max]` onto `[padding, plot_span - padding]`.
pub fn project(value: f64, extent: Extent, plot_span: f64, padding: f64) -> f64 {
    let half = extent.half_span();
    if half == 0.0 || !half.is_finite() {
        return plot_span / 2.0;
    }
    let inner = plot_span - 2.0 * padding;
    padding + (value / 2.0 - extent.min / 2.0) / half * inner
}

/// Same as [`project`] but inverted, so larger values sit higher on screen.
pub fn project_y(value: f64, extent: Extent, plot_span: f64, padding: f64) -> f64 {
    plot_span - project(value, extent, plot_span, padding)
}

/// Decides when a numeric axis holds epoch-millisecond coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TemporalPolicy {
    pub magnitude_threshold: f64,
    pub span_threshold: f64,
}

impl Default for TemporalPolicy {
    fn default() -> Self {
        Self {
            magnitude_threshold: 1e9,
            span_threshold: 1e6,
        }
    }
}

impl TemporalPolicy {
    /// A policy that treats every axis as plain numbers.
    pub fn never() -> Self {
        Self {
            magnitude_threshold: f64::INFINITY,
            span_threshold: f64::INFINITY,
        }
    }

    pub fn is_temporal(&self, extent: Extent) -> bool {
        let magnitude = extent.min.abs().max(extent.max.abs());
        magnitude > self.magnitude_threshold || extent.span() > self.span_threshold
    }
}

/// Formats a tick value. Temporal axes pick their granularity from the total span.
pub fn format_tick(value: f64, extent: Extent, temporal: bool) -> String {
    if !temporal {
        return format_number(value);
    }

    let Some(time) = DateTime::from_timestamp_millis(value.round() as i64) else {
        return format_number(value);
    };

    let span = extent.span();
    let pattern = if span >= DAY_MS {
        "%m/%d"
    } else if span >= HOUR_MS {
        "%H:%M"
    } else {
        "%M:%S"
    };
    time.format(pattern).to_string()
}

/// Plain number with at most eight fractional digits and no trailing zeros.
pub fn format_number(value: f64) -> String {
    let text = format!("{:.*}", MAX_FRACTION_DIGITS, value);
    let trimmed = text.trim_end_matches('0').trim_end_matches('.');
    match trimmed {
        "-0" | "" => "0".to_string(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Horizontal,
    Vertical,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tick {
    pub value: f64,
    pub position: f64,
    pub label: String,
}

/// Everything a renderer needs to draw one axis.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Axis {
    pub extent: Extent,
    pub temporal: bool,
    pub ticks: Vec<Tick>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisLayout {
    pub orientation: Orientation,
    pub tick_count: usize,
    pub padding: f64,
}

impl AxisLayout {
    pub fn plot_span(&self) -> f64 {
        match self.orientation {
            Orientation::Horizontal => VIEW_WIDTH,
            Orientation::Vertical => VIEW_HEIGHT,
        }
    }

    pub fn position(&self, value: f64, extent: Extent) -> f64 {
        match self.orientation {
            Orientation::Horizontal => project(value, extent, self.plot_span(), self.padding),
            Orientation::Vertical => project_y(value, extent, self.plot_span(), self.padding),
        }
    }
}

impl Axis {
    pub fn build(extent: Extent, layout: AxisLayout, policy: &TemporalPolicy) -> Self {
        let temporal = policy.is_temporal(extent);
        let extent = if temporal {
            extent.widened_by(DEGENERATE_TEMPORAL_HALF_SPAN_MS)
        } else {
            extent.widened()
        };
        let ticks = make_ticks(extent.min, extent.max, layout.tick_count)
            .into_iter()
            .map(|value| Tick {
                value,
                position: layout.position(value, extent),
                label: format_tick(value, extent, temporal),
            })
            .collect();

        Self {
            extent,
            temporal,
            ticks,
        }
    }
}
