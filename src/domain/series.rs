// Series store - bounded per-key point buffers with copy-on-write snapshots
use crate::domain::telemetry::Point;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// Shared, read-only view of one series at the time it was taken.
pub type SeriesSnapshot = Arc<VecDeque<Point>>;

#[derive(Debug, Clone, Default)]
pub struct SeriesStore {
    series: HashMap<String, SeriesSnapshot>,
    order: Vec<String>,
    revision: u64,
}

impl SeriesStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a key so it keeps its position even before data arrives.
    pub fn ensure(&mut self, key: &str) {
        if !self.series.contains_key(key) {
            self.order.push(key.to_string());
            self.series.insert(key.to_string(), SeriesSnapshot::default());
        }
    }

    /// Appends one point, evicting from the front when `window > 0` is exceeded.
    pub fn push(&mut self, key: &str, point: Point, window: usize) {
        self.append(key, point, window);
        self.revision += 1;
    }

    /// Applies every point of one payload as a single revision.
    /// Returns the number of points appended.
    pub fn push_batch<I>(&mut self, batch: I, window: usize) -> usize
    where
        I: IntoIterator<Item = (String, Point)>,
    {
        let mut appended = 0;
        for (key, point) in batch {
            self.append(&key, point, window);
            appended += 1;
        }
        if appended > 0 {
            self.revision += 1;
        }
        appended
    }

    fn append(&mut self, key: &str, point: Point, window: usize) {
        self.ensure(key);
        let Some(entry) = self.series.get_mut(key) else {
            return;
        };

        // Clones only while a reader still holds the previous snapshot.
        let buffer = Arc::make_mut(entry);
        buffer.push_back(point);
        if window > 0 {
            while buffer.len() > window {
                buffer.pop_front();
            }
        }
    }

    pub fn reset(&mut self, key: &str) {
        if let Some(entry) = self.series.get_mut(key) {
            if !entry.is_empty() {
                *entry = SeriesSnapshot::default();
                self.revision += 1;
            }
        }
    }

    pub fn reset_all(&mut self) {
        let mut cleared = false;
        for entry in self.series.values_mut() {
            if !entry.is_empty() {
                *entry = SeriesSnapshot::default();
                cleared = true;
            }
        }
        if cleared {
            self.revision += 1;
        }
    }

    pub fn snapshot(&self, key: &str) -> Option<SeriesSnapshot> {
        self.series.get(key).cloned()
    }

    /// Snapshots of every series in registration order.
    pub fn snapshots(&self) -> Vec<(String, SeriesSnapshot)> {
        self.order
            .iter()
            .filter_map(|key| self.series.get(key).map(|s| (key.clone(), s.clone())))
            .collect()
    }

    pub fn keys(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self, key: &str) -> usize {
        self.series.get(key).map(|s| s.len()).unwrap_or(0)
    }

    pub fn latest(&self, key: &str) -> Option<Point> {
        self.series.get(key).and_then(|s| s.back().copied())
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }
}
