use crate::domain::chart::{ChartSettings, SeriesStyle};
use crate::domain::gauge::{GaugeSettings, JitterRange, SpringParams};
use crate::domain::scale::TemporalPolicy;
use crate::domain::telemetry::AxisMeta;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

const ENV_PREFIX: &str = "LIVE_TELEMETRY";
/// Upper bound on gauge stiffness; the spring integrator sub-steps finer as it grows.
const MAX_STIFFNESS: f64 = 1e6;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("widget `{widget}`: {reason}")]
    Invalid { widget: String, reason: String },
}

impl ConfigError {
    fn invalid(widget: &str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            widget: widget.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub server: ServerSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    #[serde(default = "default_bind")]
    pub bind: String,
    pub push_base_url: String,
    pub poll_base_url: String,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,
}

impl ServerSettings {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms.max(1))
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum SourceConfig {
    Push {
        path: String,
    },
    Poll {
        path: String,
        #[serde(default = "default_poll_interval_ms")]
        interval_ms: u64,
        /// Replace the series with each response instead of appending.
        #[serde(default)]
        replace: bool,
    },
}

impl SourceConfig {
    pub fn path(&self) -> &str {
        match self {
            SourceConfig::Push { path } | SourceConfig::Poll { path, .. } => path,
        }
    }

    /// Same delivery mode pointed at a different path.
    pub fn with_path(&self, new_path: String) -> Self {
        match self {
            SourceConfig::Push { .. } => SourceConfig::Push { path: new_path },
            SourceConfig::Poll {
                interval_ms,
                replace,
                ..
            } => SourceConfig::Poll {
                path: new_path,
                interval_ms: *interval_ms,
                replace: *replace,
            },
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct WidgetsConfig {
    /// Substituted into `${name}` placeholders of source paths.
    #[serde(default)]
    pub vars: HashMap<String, String>,
    #[serde(default)]
    pub charts: Vec<ChartConfig>,
    #[serde(default)]
    pub gauges: Vec<GaugeConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChartConfig {
    pub id: String,
    pub title: String,
    pub source: SourceConfig,
    #[serde(default)]
    pub x_axis: Option<AxisMeta>,
    #[serde(default = "default_window")]
    pub window: usize,
    #[serde(default = "default_x_ticks")]
    pub x_ticks: usize,
    #[serde(default = "default_y_ticks")]
    pub y_ticks: usize,
    pub y_min: Option<f64>,
    pub y_max: Option<f64>,
    #[serde(default)]
    pub temporal: Option<TemporalPolicy>,
    #[serde(default)]
    pub series: Vec<SeriesConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SeriesConfig {
    pub key: String,
    pub label: Option<String>,
    pub color: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GaugeConfig {
    pub id: String,
    pub title: String,
    pub source: SourceConfig,
    pub field: Option<String>,
    #[serde(default)]
    pub min: f64,
    #[serde(default = "default_gauge_max")]
    pub max: f64,
    #[serde(default = "default_stiffness")]
    pub stiffness: f64,
    /// Defaults to critical damping for the configured stiffness.
    pub damping: Option<f64>,
    #[serde(default = "default_settle_threshold")]
    pub settle_threshold: f64,
    #[serde(default = "default_quiet_ms")]
    pub quiet_ms: u64,
    #[serde(default = "default_true")]
    pub jitter: bool,
    #[serde(default = "default_jitter_min")]
    pub jitter_min: f64,
    #[serde(default = "default_jitter_max")]
    pub jitter_max: f64,
    #[serde(default = "default_start_angle")]
    pub start_angle: f64,
    #[serde(default = "default_end_angle")]
    pub end_angle: f64,
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_reconnect_delay_ms() -> u64 {
    3000
}

fn default_frame_interval_ms() -> u64 {
    16
}

fn default_poll_interval_ms() -> u64 {
    5000
}

fn default_window() -> usize {
    300
}

fn default_x_ticks() -> usize {
    5
}

fn default_y_ticks() -> usize {
    4
}

fn default_gauge_max() -> f64 {
    100.0
}

fn default_stiffness() -> f64 {
    120.0
}

fn default_settle_threshold() -> f64 {
    0.1
}

fn default_quiet_ms() -> u64 {
    1200
}

fn default_true() -> bool {
    true
}

fn default_jitter_min() -> f64 {
    0.1
}

fn default_jitter_max() -> f64 {
    0.3
}

fn default_start_angle() -> f64 {
    -90.0
}

fn default_end_angle() -> f64 {
    90.0
}

impl ChartConfig {
    pub fn settings(&self) -> ChartSettings {
        let styles = self
            .series
            .iter()
            .map(|s| {
                (
                    s.key.clone(),
                    SeriesStyle {
                        label: s.label.clone(),
                        color: s.color.clone(),
                    },
                )
            })
            .collect();

        ChartSettings {
            x_meta: self.x_axis.clone(),
            window: self.window,
            x_ticks: self.x_ticks,
            y_ticks: self.y_ticks,
            y_min: self.y_min,
            y_max: self.y_max,
            temporal: self.temporal.unwrap_or_default(),
            styles,
            ..ChartSettings::default()
        }
    }
}

impl GaugeConfig {
    pub fn settings(&self) -> GaugeSettings {
        let spring = match self.damping {
            Some(damping) => SpringParams {
                stiffness: self.stiffness,
                damping,
            },
            None => SpringParams::critically_damped(self.stiffness),
        };

        GaugeSettings {
            min: self.min,
            max: self.max,
            spring,
            settle_threshold: self.settle_threshold,
            quiet_delay: Duration::from_millis(self.quiet_ms),
            jitter: self.jitter.then_some(JitterRange {
                min: self.jitter_min,
                max: self.jitter_max,
            }),
            start_angle: self.start_angle,
            end_angle: self.end_angle,
        }
    }
}

impl WidgetsConfig {
    /// Rejects settings no widget could run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        let ids = self
            .charts
            .iter()
            .map(|c| c.id.as_str())
            .chain(self.gauges.iter().map(|g| g.id.as_str()));
        for id in ids {
            if !seen.insert(id) {
                return Err(ConfigError::invalid(id, "duplicate widget id"));
            }
        }

        for chart in &self.charts {
            validate_source(&chart.id, &chart.source)?;
            if chart.x_ticks == 0 || chart.y_ticks == 0 {
                return Err(ConfigError::invalid(&chart.id, "tick counts must be positive"));
            }
            if [chart.y_min, chart.y_max].into_iter().flatten().any(|v| !v.is_finite()) {
                return Err(ConfigError::invalid(&chart.id, "y bounds must be finite"));
            }
            if let (Some(min), Some(max)) = (chart.y_min, chart.y_max) {
                if min >= max {
                    return Err(ConfigError::invalid(&chart.id, "y_min must be below y_max"));
                }
            }
        }

        for gauge in &self.gauges {
            validate_source(&gauge.id, &gauge.source)?;
            validate_gauge(gauge)?;
        }

        Ok(())
    }
}

fn validate_gauge(gauge: &GaugeConfig) -> Result<(), ConfigError> {
    let id = gauge.id.as_str();
    if !gauge.min.is_finite() || !gauge.max.is_finite() {
        return Err(ConfigError::invalid(id, "min and max must be finite"));
    }
    if gauge.min >= gauge.max {
        return Err(ConfigError::invalid(id, "min must be below max"));
    }
    if !(gauge.stiffness.is_finite() && gauge.stiffness > 0.0) {
        return Err(ConfigError::invalid(id, "stiffness must be a positive number"));
    }
    if gauge.stiffness > MAX_STIFFNESS {
        return Err(ConfigError::invalid(
            id,
            format!("stiffness must not exceed {}", MAX_STIFFNESS),
        ));
    }
    if gauge.damping.is_some_and(|d| !(d.is_finite() && d >= 0.0)) {
        return Err(ConfigError::invalid(id, "damping must be a non-negative number"));
    }
    if !(gauge.settle_threshold.is_finite() && gauge.settle_threshold > 0.0) {
        return Err(ConfigError::invalid(id, "settle_threshold must be positive"));
    }
    if gauge.jitter {
        if !gauge.jitter_min.is_finite() || !gauge.jitter_max.is_finite() {
            return Err(ConfigError::invalid(id, "jitter bounds must be finite"));
        }
        if !(0.0 <= gauge.jitter_min && gauge.jitter_min <= gauge.jitter_max) {
            return Err(ConfigError::invalid(id, "jitter range is inverted"));
        }
    }
    if !gauge.start_angle.is_finite() || !gauge.end_angle.is_finite() {
        return Err(ConfigError::invalid(id, "sweep angles must be finite"));
    }
    Ok(())
}

fn validate_source(widget: &str, source: &SourceConfig) -> Result<(), ConfigError> {
    if source.path().trim().is_empty() {
        return Err(ConfigError::invalid(widget, "source path is empty"));
    }
    if let SourceConfig::Poll { interval_ms: 0, .. } = source {
        return Err(ConfigError::invalid(widget, "poll interval must be positive"));
    }
    Ok(())
}

pub fn load_server_config() -> Result<ServerConfig, ConfigError> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("config/server"))
        .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
        .build()?;

    Ok(settings.try_deserialize()?)
}

pub fn load_widgets_config() -> Result<WidgetsConfig, ConfigError> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("config/widgets"))
        .build()?;

    let widgets: WidgetsConfig = settings.try_deserialize()?;
    widgets.validate()?;
    Ok(widgets)
}

/// Parses widget definitions from an in-memory TOML document.
pub fn parse_widgets_config(toml: &str) -> Result<WidgetsConfig, ConfigError> {
    let settings = config::Config::builder()
        .add_source(config::File::from_str(toml, config::FileFormat::Toml))
        .build()?;

    let widgets: WidgetsConfig = settings.try_deserialize()?;
    widgets.validate()?;
    Ok(widgets)
}

/// Replace template variables in a source path, URL-encoding the values
pub fn prepare_path(path: &str, vars: &HashMap<String, String>) -> String {
    let mut result = path.to_string();
    for (key, value) in vars {
        let placeholder = format!("${{{}}}", key);
        result = result.replace(&placeholder, &urlencoding::encode(value));
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::telemetry::{ValueFormat, ValueType};

    const WIDGETS: &str = r##"
[vars]
host = "reef tank"

[[charts]]
id = "temps"
title = "Temperatures"
window = 120
x_axis = { type = "number", format = "date_time" }
source = { mode = "push", path = "/ws/${host}/temps" }

[[charts.series]]
key = "water"
label = "Water"
color = "#38bdf8"

[[charts]]
id = "load"
title = "Load"
source = { mode = "poll", path = "/api/load", interval_ms = 1000, replace = true }

[[gauges]]
id = "ph"
title = "pH"
field = "ph"
min = 6.0
max = 9.0
source = { mode = "push", path = "/ws/ph" }
"##;

    #[test]
    fn test_prepare_path() {
        let mut vars = HashMap::new();
        vars.insert("source".to_string(), "reef".to_string());
        vars.insert("name".to_string(), "tank 2".to_string());

        let path = "/ws/${source}/probes?name=${name}";
        assert_eq!(prepare_path(path, &vars), "/ws/reef/probes?name=tank%202");
    }

    #[test]
    fn test_parse_widgets() {
        let widgets = parse_widgets_config(WIDGETS).unwrap();
        assert_eq!(widgets.charts.len(), 2);
        assert_eq!(widgets.gauges.len(), 1);

        let temps = &widgets.charts[0];
        assert_eq!(temps.window, 120);
        assert_eq!(temps.y_ticks, 4);
        let meta = temps.x_axis.clone().unwrap();
        assert_eq!(meta.value_type, Some(ValueType::Number));
        assert_eq!(meta.format, Some(ValueFormat::DateTime));

        let settings = temps.settings();
        assert_eq!(settings.styles["water"].label.as_deref(), Some("Water"));

        assert_eq!(
            widgets.charts[1].source,
            SourceConfig::Poll {
                path: "/api/load".to_string(),
                interval_ms: 1000,
                replace: true,
            }
        );

        let gauge = widgets.gauges[0].settings();
        assert_eq!(gauge.min, 6.0);
        assert_eq!(gauge.spring, SpringParams::critically_damped(120.0));
        assert_eq!(gauge.jitter, Some(JitterRange::default()));
        assert_eq!(gauge.quiet_delay, Duration::from_millis(1200));
    }

    #[test]
    fn test_validation_rejects_bad_widgets() {
        let duplicate = r#"
[[charts]]
id = "a"
title = "A"
source = { mode = "push", path = "/a" }

[[gauges]]
id = "a"
title = "A"
source = { mode = "push", path = "/a" }
"#;
        assert!(matches!(
            parse_widgets_config(duplicate),
            Err(ConfigError::Invalid { .. })
        ));

        let inverted = r#"
[[gauges]]
id = "g"
title = "G"
min = 10.0
max = 10.0
source = { mode = "push", path = "/g" }
"#;
        assert!(parse_widgets_config(inverted).is_err());

        let zero_poll = r#"
[[charts]]
id = "c"
title = "C"
source = { mode = "poll", path = "/c", interval_ms = 0 }
"#;
        assert!(parse_widgets_config(zero_poll).is_err());
    }

    fn gauge_with(extra: &str) -> String {
        format!(
            "[[gauges]]\nid = \"g\"\ntitle = \"G\"\n{}\nsource = {{ mode = \"push\", path = \"/g\" }}\n",
            extra
        )
    }

    #[test]
    fn test_validation_rejects_non_finite_gauge_values() {
        for extra in [
            "jitter_max = inf",
            "jitter_min = nan",
            "stiffness = nan",
            "stiffness = inf",
            "stiffness = 2000000.0",
            "damping = nan",
            "settle_threshold = 0.0",
            "settle_threshold = nan",
            "min = -inf\nmax = inf",
            "max = nan",
            "end_angle = inf",
        ] {
            let result = parse_widgets_config(&gauge_with(extra));
            assert!(
                matches!(result, Err(ConfigError::Invalid { .. })),
                "accepted `{}`",
                extra
            );
        }

        assert!(parse_widgets_config(&gauge_with("stiffness = 1000000.0")).is_ok());
        assert!(parse_widgets_config(&gauge_with("jitter = false\njitter_max = inf")).is_ok());
    }

    #[test]
    fn test_validation_rejects_non_finite_chart_bounds() {
        let chart = r#"
[[charts]]
id = "c"
title = "C"
y_max = inf
source = { mode = "push", path = "/c" }
"#;
        assert!(matches!(
            parse_widgets_config(chart),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn test_with_path_keeps_mode() {
        let source = SourceConfig::Poll {
            path: "/old".to_string(),
            interval_ms: 250,
            replace: true,
        };
        let moved = source.with_path("/new".to_string());
        assert_eq!(moved.path(), "/new");
        assert!(matches!(moved, SourceConfig::Poll { interval_ms: 250, replace: true, .. }));
    }
}
