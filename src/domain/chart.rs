// Chart model - fixed schema, windowed series and render geometry
use crate::domain::payload::{detect_keys, normalize_x, normalize_y, Envelope, Schema};
use crate::domain::scale::{extent, Axis, AxisLayout, Extent, Orientation, TemporalPolicy};
use crate::domain::series::SeriesStore;
use crate::domain::telemetry::{AxisMeta, Point, Row};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

/// Fallback series colors, indexed by series position.
pub const PALETTE: [&str; 8] = [
    "#f97316", "#22d3ee", "#a3e635", "#f43f5e", "#8b5cf6", "#e879f9", "#10b981", "#fbbf24",
];

pub fn series_color(index: usize) -> &'static str {
    PALETTE[index % PALETTE.len()]
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeriesStyle {
    pub label: Option<String>,
    pub color: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChartSettings {
    pub x_meta: Option<AxisMeta>,
    /// Maximum points kept per series; 0 keeps everything.
    pub window: usize,
    pub x_ticks: usize,
    pub y_ticks: usize,
    pub padding: f64,
    pub y_min: Option<f64>,
    pub y_max: Option<f64>,
    pub temporal: TemporalPolicy,
    pub styles: HashMap<String, SeriesStyle>,
}

impl Default for ChartSettings {
    fn default() -> Self {
        Self {
            x_meta: None,
            window: 300,
            x_ticks: 5,
            y_ticks: 4,
            padding: 2.0,
            y_min: None,
            y_max: None,
            temporal: TemporalPolicy::default(),
            styles: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestMode {
    Append,
    /// Clear every series before applying the payload (poll refresh).
    Replace,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesFrame {
    pub key: String,
    pub label: String,
    pub color: String,
    /// `x,y` pairs for an SVG polyline in the normalized viewbox.
    pub path: String,
    pub latest: Option<f64>,
    pub points: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartFrame {
    pub revision: u64,
    pub schema: Option<Schema>,
    pub x_axis: Axis,
    pub y_axis: Axis,
    pub series: Vec<SeriesFrame>,
}

#[derive(Debug, Clone)]
pub struct ChartModel {
    settings: ChartSettings,
    schema: Option<Schema>,
    store: SeriesStore,
}

impl ChartModel {
    pub fn new(settings: ChartSettings) -> Self {
        Self {
            settings,
            schema: None,
            store: SeriesStore::new(),
        }
    }

    pub fn schema(&self) -> Option<&Schema> {
        self.schema.as_ref()
    }

    pub fn store(&self) -> &SeriesStore {
        &self.store
    }

    /// Normalizes one raw payload into the series.
    ///
    /// Returns `None` when the payload has no recognizable rows; nothing is
    /// touched in that case, not even in `Replace` mode. Otherwise returns
    /// the number of points appended.
    pub fn ingest(&mut self, payload: Value, mode: IngestMode) -> Option<usize> {
        let envelope = Envelope::classify(payload);
        if !envelope.is_recognized() {
            return None;
        }
        if mode == IngestMode::Replace {
            self.store.reset_all();
        }
        Some(self.ingest_rows(envelope.into_rows()))
    }

    pub fn ingest_rows(&mut self, rows: Vec<Row>) -> usize {
        let mut batch = Vec::new();

        for row in &rows {
            if self.schema.is_none() {
                self.adopt_schema(row);
            }
            let Some(schema) = &self.schema else {
                continue;
            };

            let Some(x) = row
                .get(&schema.x_field)
                .and_then(|raw| normalize_x(raw, self.settings.x_meta.as_ref()))
            else {
                continue;
            };

            for field in &schema.y_fields {
                let point = row
                    .get(field)
                    .and_then(normalize_y)
                    .and_then(|y| Point::new(x, y));
                if let Some(point) = point {
                    batch.push((field.clone(), point));
                }
            }
        }

        self.store.push_batch(batch, self.settings.window)
    }

    fn adopt_schema(&mut self, row: &Row) {
        if let Some(schema) = detect_keys(row) {
            for field in &schema.y_fields {
                self.store.ensure(field);
            }
            self.schema = Some(schema);
        }
    }

    pub fn revision(&self) -> u64 {
        self.store.revision()
    }

    /// Computes axes and projected series geometry from the current snapshot.
    pub fn frame(&self) -> ChartFrame {
        let snapshots = self.store.snapshots();
        let all_points = || snapshots.iter().flat_map(|(_, points)| points.iter());

        let x_layout = AxisLayout {
            orientation: Orientation::Horizontal,
            tick_count: self.settings.x_ticks,
            padding: self.settings.padding,
        };
        let y_layout = AxisLayout {
            orientation: Orientation::Vertical,
            tick_count: self.settings.y_ticks,
            padding: self.settings.padding,
        };

        let x_axis = Axis::build(
            extent(all_points().map(|p| p.x)),
            x_layout,
            &self.settings.temporal,
        );
        let y_axis = Axis::build(
            self.bounded_y(extent(all_points().map(|p| p.y))),
            y_layout,
            &TemporalPolicy::never(),
        );

        let series = snapshots
            .iter()
            .enumerate()
            .map(|(index, (key, points))| {
                let style = self.settings.styles.get(key);
                let path = points
                    .iter()
                    .map(|p| {
                        format!(
                            "{:.2},{:.2}",
                            x_layout.position(p.x, x_axis.extent),
                            y_layout.position(p.y, y_axis.extent)
                        )
                    })
                    .collect::<Vec<_>>()
                    .join(" ");

                SeriesFrame {
                    key: key.clone(),
                    label: style
                        .and_then(|s| s.label.clone())
                        .unwrap_or_else(|| key.clone()),
                    color: style
                        .and_then(|s| s.color.clone())
                        .unwrap_or_else(|| series_color(index).to_string()),
                    path,
                    latest: points.back().map(|p| p.y),
                    points: points.len(),
                }
            })
            .collect();

        ChartFrame {
            revision: self.store.revision(),
            schema: self.schema.clone(),
            x_axis,
            y_axis,
            series,
        }
    }

    fn bounded_y(&self, data: Extent) -> Extent {
        let min = self.settings.y_min.unwrap_or(data.min);
        let max = self.settings.y_max.unwrap_or(data.max);
        Extent::new(min.min(max), max.max(min))
    }
}
