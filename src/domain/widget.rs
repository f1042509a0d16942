// Widget frame - what a renderer receives for one live widget
use super::chart::ChartFrame;
use super::gauge::GaugeFrame;
use super::telemetry::ConnectionStatus;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WidgetKind {
    Chart,
    Gauge,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum WidgetView {
    Chart(ChartFrame),
    Gauge(GaugeFrame),
}

impl WidgetView {
    pub fn kind(&self) -> WidgetKind {
        match self {
            WidgetView::Chart(_) => WidgetKind::Chart,
            WidgetView::Gauge(_) => WidgetKind::Gauge,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WidgetFrame {
    pub id: String,
    pub title: String,
    pub status: ConnectionStatus,
    pub status_text: String,
    #[serde(flatten)]
    pub view: WidgetView,
}

impl WidgetFrame {
    pub fn new(id: String, title: String, status: ConnectionStatus, view: WidgetView) -> Self {
        let status_text = status.to_string();
        Self {
            id,
            title,
            status,
            status_text,
            view,
        }
    }
}
