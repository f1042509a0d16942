// Widget service - runs live chart and gauge widgets over their subscriptions
use crate::application::subscription::{ConnectionRegistry, SubscriptionHandle};
use crate::application::telemetry_source::{PollSource, SourceEvent, StreamSource};
use crate::domain::chart::{ChartModel, IngestMode};
use crate::domain::gauge::GaugeAnimator;
use crate::domain::payload::extract_scalar;
use crate::domain::telemetry::ConnectionStatus;
use crate::domain::widget::{WidgetFrame, WidgetKind, WidgetView};
use crate::infrastructure::config::{
    prepare_path, ChartConfig, GaugeConfig, SourceConfig, WidgetsConfig,
};
use anyhow::Context;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;

const EVENT_BUFFER: usize = 256;
const SWITCH_BUFFER: usize = 4;

/// Where widgets get their data from.
#[derive(Clone)]
pub struct Sources {
    pub push: Arc<dyn StreamSource>,
    pub poll: Arc<dyn PollSource>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WidgetSummary {
    pub id: String,
    pub title: String,
    pub kind: WidgetKind,
    pub status: String,
}

#[derive(Debug, Clone)]
struct WidgetIdentity {
    id: String,
    title: String,
}

impl WidgetIdentity {
    fn frame(&self, status: &ConnectionStatus, view: WidgetView) -> WidgetFrame {
        WidgetFrame::new(self.id.clone(), self.title.clone(), status.clone(), view)
    }
}

/// Events of the current subscription. A retarget hands over a fresh
/// receiver; whatever the old one still holds is dropped unread.
struct EventFeed {
    events: mpsc::Receiver<SourceEvent>,
    switch: mpsc::Receiver<mpsc::Receiver<SourceEvent>>,
}

impl EventFeed {
    fn new() -> (
        Self,
        mpsc::Sender<SourceEvent>,
        mpsc::Sender<mpsc::Receiver<SourceEvent>>,
    ) {
        let (events_tx, events) = mpsc::channel(EVENT_BUFFER);
        let (switch_tx, switch) = mpsc::channel(SWITCH_BUFFER);
        (Self { events, switch }, events_tx, switch_tx)
    }

    async fn next(&mut self) -> Option<SourceEvent> {
        loop {
            tokio::select! {
                biased;
                Some(fresh) = self.switch.recv() => self.events = fresh,
                event = self.events.recv() => return event,
            }
        }
    }
}

/// One mounted widget: its consumer task plus the subscription feeding it.
struct LiveWidget {
    title: String,
    source: SourceConfig,
    events: mpsc::Sender<SourceEvent>,
    switch: mpsc::Sender<mpsc::Receiver<SourceEvent>>,
    frames: watch::Receiver<WidgetFrame>,
    subscription: Option<SubscriptionHandle>,
    consumer: JoinHandle<()>,
}

impl Drop for LiveWidget {
    fn drop(&mut self) {
        self.consumer.abort();
    }
}

#[derive(Clone)]
pub struct WidgetService {
    registry: ConnectionRegistry,
    sources: Sources,
    frame_interval: Duration,
    vars: Arc<HashMap<String, String>>,
    widgets: Arc<Mutex<BTreeMap<String, LiveWidget>>>,
}

impl WidgetService {
    pub fn new(registry: ConnectionRegistry, sources: Sources, frame_interval: Duration) -> Self {
        Self {
            registry,
            sources,
            frame_interval,
            vars: Arc::new(HashMap::new()),
            widgets: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    /// Mounts every configured widget.
    pub async fn start(&mut self, config: &WidgetsConfig) -> anyhow::Result<()> {
        config.validate().context("invalid widget configuration")?;
        self.vars = Arc::new(config.vars.clone());

        for chart in &config.charts {
            self.mount_chart(chart).await;
        }
        for gauge in &config.gauges {
            self.mount_gauge(gauge).await;
        }

        tracing::info!(
            charts = config.charts.len(),
            gauges = config.gauges.len(),
            "widgets mounted"
        );
        Ok(())
    }

    pub async fn mount_chart(&self, config: &ChartConfig) {
        let identity = WidgetIdentity {
            id: config.id.clone(),
            title: config.title.clone(),
        };
        let model = ChartModel::new(config.settings());
        let mode = match config.source {
            SourceConfig::Poll { replace: true, .. } => IngestMode::Replace,
            _ => IngestMode::Append,
        };

        let initial = identity.frame(
            &ConnectionStatus::Connecting,
            WidgetView::Chart(model.frame()),
        );
        let (frames_tx, frames_rx) = watch::channel(initial);
        let (feed, events_tx, switch_tx) = EventFeed::new();

        let consumer = tokio::spawn(run_chart(identity, model, mode, feed, frames_tx));
        self.install(
            config.id.clone(),
            config.title.clone(),
            config.source.clone(),
            events_tx,
            switch_tx,
            frames_rx,
            consumer,
        )
        .await;
    }

    pub async fn mount_gauge(&self, config: &GaugeConfig) {
        let identity = WidgetIdentity {
            id: config.id.clone(),
            title: config.title.clone(),
        };
        let animator = GaugeAnimator::new(config.settings());

        let initial = identity.frame(
            &ConnectionStatus::Connecting,
            WidgetView::Gauge(animator.frame()),
        );
        let (frames_tx, frames_rx) = watch::channel(initial);
        let (feed, events_tx, switch_tx) = EventFeed::new();

        let consumer = tokio::spawn(run_gauge(
            identity,
            animator,
            config.field.clone(),
            self.frame_interval,
            feed,
            frames_tx,
        ));
        self.install(
            config.id.clone(),
            config.title.clone(),
            config.source.clone(),
            events_tx,
            switch_tx,
            frames_rx,
            consumer,
        )
        .await;
    }

    #[allow(clippy::too_many_arguments)]
    async fn install(
        &self,
        id: String,
        title: String,
        source: SourceConfig,
        events: mpsc::Sender<SourceEvent>,
        switch: mpsc::Sender<mpsc::Receiver<SourceEvent>>,
        frames: watch::Receiver<WidgetFrame>,
        consumer: JoinHandle<()>,
    ) {
        let previous = self.widgets.lock().await.remove(&id);
        if let Some(previous) = previous {
            tracing::info!(widget = %id, "replacing mounted widget");
            unmount(previous).await;
        }

        let subscription = self.open(&source, events.clone());
        let widget = LiveWidget {
            title,
            source,
            events,
            switch,
            frames,
            subscription: Some(subscription),
            consumer,
        };
        self.widgets.lock().await.insert(id, widget);
    }

    fn open(&self, source: &SourceConfig, events: mpsc::Sender<SourceEvent>) -> SubscriptionHandle {
        let path = prepare_path(source.path(), &self.vars);
        match source {
            SourceConfig::Push { .. } => {
                self.registry
                    .open_push(self.sources.push.clone(), path, events)
            }
            SourceConfig::Poll { interval_ms, .. } => self.registry.open_poll(
                self.sources.poll.clone(),
                path,
                Duration::from_millis(*interval_ms),
                events,
            ),
        }
    }

    /// Points a widget at a new path. The old subscription is fully closed
    /// before the new one opens and its undelivered events are discarded;
    /// series data is kept. Returns `false` for unknown widgets.
    pub async fn retarget(&self, id: &str, path: String) -> bool {
        let mut widgets = self.widgets.lock().await;
        let Some(widget) = widgets.get_mut(id) else {
            return false;
        };

        if let Some(old) = widget.subscription.take() {
            tracing::debug!(widget = %id, subscription = old.id(), "closing superseded subscription");
            old.cancel().await;
        }

        let (events, fresh) = mpsc::channel(EVENT_BUFFER);
        if widget.switch.send(fresh).await.is_err() {
            tracing::warn!(widget = %id, "widget consumer is gone");
        }
        widget.events = events;
        widget.source = widget.source.with_path(path);
        let subscription = self.open(&widget.source, widget.events.clone());
        widget.subscription = Some(subscription);

        tracing::info!(widget = %id, path = %widget.source.path(), "widget retargeted");
        true
    }

    pub async fn list(&self) -> Vec<WidgetSummary> {
        self.widgets
            .lock()
            .await
            .iter()
            .map(|(id, widget)| {
                let frame = widget.frames.borrow();
                WidgetSummary {
                    id: id.clone(),
                    title: widget.title.clone(),
                    kind: frame.view.kind(),
                    status: frame.status_text.clone(),
                }
            })
            .collect()
    }

    pub async fn frame(&self, id: &str) -> Option<WidgetFrame> {
        self.widgets
            .lock()
            .await
            .get(id)
            .map(|widget| widget.frames.borrow().clone())
    }

    /// A receiver that observes every frame published for the widget.
    pub async fn watch(&self, id: &str) -> Option<watch::Receiver<WidgetFrame>> {
        self.widgets
            .lock()
            .await
            .get(id)
            .map(|widget| widget.frames.clone())
    }

    /// Unmounts one widget, releasing its subscription and consumer.
    pub async fn stop(&self, id: &str) -> bool {
        let removed = self.widgets.lock().await.remove(id);
        match removed {
            Some(widget) => {
                unmount(widget).await;
                true
            }
            None => false,
        }
    }

    pub async fn shutdown(&self) {
        let widgets = std::mem::take(&mut *self.widgets.lock().await);
        for (_, widget) in widgets {
            unmount(widget).await;
        }
        self.registry.shutdown();
    }
}

async fn unmount(mut widget: LiveWidget) {
    if let Some(subscription) = widget.subscription.take() {
        subscription.cancel().await;
    }
    widget.consumer.abort();
}

fn apply_lifecycle(status: &mut ConnectionStatus, event: &SourceEvent) {
    match event {
        SourceEvent::Open => *status = ConnectionStatus::Connected,
        SourceEvent::Close => *status = ConnectionStatus::Disconnected,
        SourceEvent::Error(message) => *status = ConnectionStatus::Error(message.clone()),
        SourceEvent::Payload(_) => {}
    }
}

async fn run_chart(
    identity: WidgetIdentity,
    mut model: ChartModel,
    mode: IngestMode,
    mut feed: EventFeed,
    frames: watch::Sender<WidgetFrame>,
) {
    let mut status = ConnectionStatus::Connecting;

    while let Some(event) = feed.next().await {
        apply_lifecycle(&mut status, &event);

        if let SourceEvent::Payload(value) = event {
            match model.ingest(value, mode) {
                Some(points) => {
                    tracing::trace!(widget = %identity.id, points, "payload applied");
                }
                None => {
                    tracing::debug!(widget = %identity.id, "unrecognized payload skipped");
                    continue;
                }
            }
        }

        frames.send_replace(identity.frame(&status, WidgetView::Chart(model.frame())));
    }

    tracing::debug!(widget = %identity.id, "chart consumer stopped");
}

async fn run_gauge(
    identity: WidgetIdentity,
    mut animator: GaugeAnimator,
    field: Option<String>,
    frame_interval: Duration,
    mut feed: EventFeed,
    frames: watch::Sender<WidgetFrame>,
) {
    let mut status = ConnectionStatus::Connecting;
    let mut last_tick = Instant::now();

    loop {
        let wakeup = animator.next_wakeup(frame_interval);
        let event = tokio::select! {
            event = feed.next() => match event {
                Some(event) => Some(event),
                None => break,
            },
            _ = sleep_for(wakeup) => None,
        };

        let now = Instant::now();
        animator.tick(now.duration_since(last_tick));
        last_tick = now;

        if let Some(event) = event {
            apply_lifecycle(&mut status, &event);
            if let SourceEvent::Payload(value) = &event {
                match extract_scalar(value, field.as_deref()) {
                    Some(reading) => animator.set_target(reading),
                    None => {
                        tracing::debug!(widget = %identity.id, "no gauge reading in payload");
                        continue;
                    }
                }
            }
        }

        frames.send_replace(identity.frame(&status, WidgetView::Gauge(animator.frame())));
    }

    tracing::debug!(widget = %identity.id, "gauge consumer stopped");
}

async fn sleep_for(wakeup: Option<Duration>) {
    match wakeup {
        Some(delay) => tokio::time::sleep(delay).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::telemetry_source::SourceError;
    use crate::domain::gauge::GaugePhase;
    use crate::infrastructure::config::parse_widgets_config;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::Mutex as StdMutex;

    /// Replays a fixed script on every session, then stays connected.
    struct ScriptedStream {
        script: Vec<Value>,
        paths: StdMutex<Vec<String>>,
    }

    impl ScriptedStream {
        fn new(script: Vec<Value>) -> Arc<Self> {
            Arc::new(Self {
                script,
                paths: StdMutex::new(Vec::new()),
            })
        }

        fn paths(&self) -> Vec<String> {
            self.paths.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl StreamSource for ScriptedStream {
        async fn subscribe(
            &self,
            path: &str,
            events: mpsc::Sender<SourceEvent>,
        ) -> Result<(), SourceError> {
            self.paths.lock().unwrap().push(path.to_string());
            let _ = events.send(SourceEvent::from_message(json!({"__meta": "open"}))).await;
            for message in &self.script {
                let _ = events.send(SourceEvent::from_message(message.clone())).await;
            }
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    struct FixedPoll(Value);

    #[async_trait]
    impl PollSource for FixedPoll {
        async fn fetch(&self, _path: &str) -> Result<Value, SourceError> {
            Ok(self.0.clone())
        }
    }

    fn service(push: Arc<dyn StreamSource>, poll: Arc<dyn PollSource>) -> WidgetService {
        WidgetService::new(
            ConnectionRegistry::default(),
            Sources { push, poll },
            Duration::from_millis(16),
        )
    }

    async fn wait_for<F>(rx: &mut watch::Receiver<WidgetFrame>, mut done: F) -> WidgetFrame
    where
        F: FnMut(&WidgetFrame) -> bool,
    {
        loop {
            {
                let frame = rx.borrow_and_update();
                if done(&frame) {
                    return frame.clone();
                }
            }
            rx.changed().await.expect("widget stopped publishing");
        }
    }

    fn chart_points(frame: &WidgetFrame, key: &str) -> usize {
        match &frame.view {
            WidgetView::Chart(chart) => chart
                .series
                .iter()
                .find(|s| s.key == key)
                .map(|s| s.points)
                .unwrap_or(0),
            WidgetView::Gauge(_) => 0,
        }
    }

    const CHART: &str = r#"
[vars]
room = "lab 1"

[[charts]]
id = "env"
title = "Environment"
window = 2
source = { mode = "push", path = "/ws/${room}" }
"#;

    #[tokio::test(start_paused = true)]
    async fn test_chart_widget_streams_frames() {
        let stream = ScriptedStream::new(vec![
            json!({"t": 1, "temp": 20.5, "hum": 40}),
            json!("not rows"),
            json!({"data": [{"t": 2, "temp": 21.0, "hum": 41}, {"t": 3, "temp": 21.5}]}),
        ]);
        let mut widgets = service(stream.clone(), Arc::new(FixedPoll(json!([]))));
        widgets.start(&parse_widgets_config(CHART).unwrap()).await.unwrap();

        let mut rx = widgets.watch("env").await.unwrap();
        let frame = wait_for(&mut rx, |f| chart_points(f, "temp") == 2).await;

        assert_eq!(frame.status, ConnectionStatus::Connected);
        assert_eq!(frame.status_text, "live");
        assert_eq!(chart_points(&frame, "hum"), 2);
        let WidgetView::Chart(chart) = &frame.view else {
            panic!("expected chart frame");
        };
        assert_eq!(chart.series[0].latest, Some(21.5));
        assert_eq!(stream.paths(), vec!["/ws/lab%201".to_string()]);

        let listed = widgets.list().await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].kind, WidgetKind::Chart);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retarget_closes_old_subscription_first() {
        let stream = ScriptedStream::new(vec![json!({"t": 1, "v": 1})]);
        let mut widgets = service(stream.clone(), Arc::new(FixedPoll(json!([]))));
        widgets.start(&parse_widgets_config(CHART).unwrap()).await.unwrap();

        let mut rx = widgets.watch("env").await.unwrap();
        wait_for(&mut rx, |f| chart_points(f, "v") == 1).await;

        assert!(widgets.retarget("env", "/ws/other".to_string()).await);
        let frame = wait_for(&mut rx, |f| chart_points(f, "v") == 2).await;

        assert_eq!(chart_points(&frame, "v"), 2);
        assert_eq!(
            stream.paths(),
            vec!["/ws/lab%201".to_string(), "/ws/other".to_string()]
        );
        assert_eq!(widgets.registry.active(), 1);
        assert!(!widgets.retarget("missing", "/x".to_string()).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_switched_feed_drops_undelivered_events() {
        let identity = WidgetIdentity {
            id: "env".to_string(),
            title: "Environment".to_string(),
        };
        let model = ChartModel::new(Default::default());
        let initial = identity.frame(
            &ConnectionStatus::Connecting,
            WidgetView::Chart(model.frame()),
        );
        let (frames_tx, mut rx) = watch::channel(initial);
        let (feed, old_tx, switch_tx) = EventFeed::new();

        for t in 0..5 {
            old_tx
                .send(SourceEvent::Payload(json!({"t": t, "v": 99})))
                .await
                .unwrap();
        }
        let (new_tx, fresh) = mpsc::channel(EVENT_BUFFER);
        switch_tx.send(fresh).await.unwrap();
        drop(old_tx);

        tokio::spawn(run_chart(identity, model, IngestMode::Append, feed, frames_tx));
        new_tx.send(SourceEvent::Open).await.unwrap();
        new_tx
            .send(SourceEvent::Payload(json!({"t": 10, "v": 5})))
            .await
            .unwrap();

        let frame = wait_for(&mut rx, |f| chart_points(f, "v") >= 1).await;
        assert_eq!(chart_points(&frame, "v"), 1);
        let WidgetView::Chart(chart) = &frame.view else {
            panic!("expected chart frame");
        };
        assert_eq!(chart.series[0].latest, Some(5.0));
        assert_eq!(frame.status, ConnectionStatus::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_replace_does_not_duplicate_rows() {
        let config = parse_widgets_config(
            r#"
[[charts]]
id = "snap"
title = "Snapshot"
source = { mode = "poll", path = "/api/rows", interval_ms = 500, replace = true }
"#,
        )
        .unwrap();
        let rows = json!({"items": [{"t": 1, "v": 1}, {"t": 2, "v": 2}, {"t": 3, "v": 3}]});
        let mut widgets = service(ScriptedStream::new(Vec::new()), Arc::new(FixedPoll(rows)));
        widgets.start(&config).await.unwrap();

        let mut rx = widgets.watch("snap").await.unwrap();
        let first = wait_for(&mut rx, |f| chart_points(f, "v") == 3).await;
        let WidgetView::Chart(first_chart) = &first.view else {
            panic!("expected chart frame");
        };
        let first_revision = first_chart.revision;

        let later = wait_for(&mut rx, |f| match &f.view {
            WidgetView::Chart(chart) => chart.revision >= first_revision + 4,
            WidgetView::Gauge(_) => false,
        })
        .await;
        assert_eq!(chart_points(&later, "v"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gauge_widget_tracks_readings() {
        let config = parse_widgets_config(
            r#"
[[gauges]]
id = "pressure"
title = "Pressure"
field = "psi"
source = { mode = "push", path = "/ws/pressure" }
"#,
        )
        .unwrap();
        let stream = ScriptedStream::new(vec![json!({"t": 1, "psi": 75})]);
        let mut widgets = service(stream, Arc::new(FixedPoll(json!([]))));
        widgets.start(&config).await.unwrap();

        let mut rx = widgets.watch("pressure").await.unwrap();
        let frame = wait_for(&mut rx, |f| match &f.view {
            WidgetView::Gauge(g) => g.phase == GaugePhase::Settling,
            WidgetView::Chart(_) => false,
        })
        .await;

        let WidgetView::Gauge(gauge) = &frame.view else {
            panic!("expected gauge frame");
        };
        assert!((gauge.value - 75.0).abs() < 0.1);
        assert_eq!(gauge.target, 75.0);
        assert_eq!(frame.status, ConnectionStatus::Connected);

        let jittered = wait_for(&mut rx, |f| match &f.view {
            WidgetView::Gauge(g) => g.phase == GaugePhase::Tracking && g.target != 75.0,
            WidgetView::Chart(_) => false,
        })
        .await;
        let WidgetView::Gauge(gauge) = &jittered.view else {
            panic!("expected gauge frame");
        };
        assert!((gauge.target - 75.0).abs() <= 0.3 + 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_and_shutdown_release_resources() {
        let stream = ScriptedStream::new(Vec::new());
        let mut widgets = service(stream, Arc::new(FixedPoll(json!([]))));
        widgets.start(&parse_widgets_config(CHART).unwrap()).await.unwrap();
        assert_eq!(widgets.registry.active(), 1);

        assert!(widgets.stop("env").await);
        assert!(!widgets.stop("env").await);
        assert_eq!(widgets.registry.active(), 0);
        assert!(widgets.frame("env").await.is_none());

        widgets.start(&parse_widgets_config(CHART).unwrap()).await.unwrap();
        widgets.shutdown().await;
        assert_eq!(widgets.registry.active(), 0);
        assert!(widgets.list().await.is_empty());
    }
}
