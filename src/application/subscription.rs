// Connection registry - owns every live subscription and its retry loop
use crate::application::telemetry_source::{PollSource, SourceEvent, StreamSource};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::MissedTickBehavior;

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(3000);

/// Explicit, injectable registry of subscription tasks.
///
/// Created at application start and shut down at stop. Every subscription
/// it opens is returned as a [`SubscriptionHandle`] that can be cancelled
/// on its own.
#[derive(Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    next_id: AtomicU64,
    tasks: Mutex<HashMap<u64, AbortHandle>>,
    reconnect_delay: Duration,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_RECONNECT_DELAY)
    }
}

impl ConnectionRegistry {
    pub fn new(reconnect_delay: Duration) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                next_id: AtomicU64::new(1),
                tasks: Mutex::new(HashMap::new()),
                reconnect_delay,
            }),
        }
    }

    fn tasks(&self) -> MutexGuard<'_, HashMap<u64, AbortHandle>> {
        self.inner.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Opens a push subscription that reconnects after every close or failure.
    pub fn open_push(
        &self,
        source: Arc<dyn StreamSource>,
        path: String,
        events: mpsc::Sender<SourceEvent>,
    ) -> SubscriptionHandle {
        let delay = self.inner.reconnect_delay;
        self.spawn(run_push(source, path, events, delay))
    }

    /// Opens a poll loop; the first fetch happens immediately.
    pub fn open_poll(
        &self,
        source: Arc<dyn PollSource>,
        path: String,
        interval: Duration,
        events: mpsc::Sender<SourceEvent>,
    ) -> SubscriptionHandle {
        self.spawn(run_poll(source, path, interval, events))
    }

    fn spawn<F>(&self, work: F) -> SubscriptionHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let registry = self.clone();

        // Held across spawn so a task that finishes at once cannot
        // deregister before it is registered.
        let mut tasks = self.tasks();
        let task = tokio::spawn(async move {
            work.await;
            registry.forget(id);
        });
        tasks.insert(id, task.abort_handle());
        drop(tasks);

        SubscriptionHandle {
            id,
            task: Some(task),
            registry: self.clone(),
        }
    }

    fn forget(&self, id: u64) {
        self.tasks().remove(&id);
    }

    /// Number of subscriptions still running.
    pub fn active(&self) -> usize {
        self.tasks().len()
    }

    /// Cancels every subscription this registry opened.
    pub fn shutdown(&self) {
        let tasks: Vec<AbortHandle> = self.tasks().drain().map(|(_, task)| task).collect();
        tracing::info!(count = tasks.len(), "closing all subscriptions");
        for task in tasks {
            task.abort();
        }
    }
}

/// Owner of one subscription. Dropping it unsubscribes.
pub struct SubscriptionHandle {
    id: u64,
    task: Option<JoinHandle<()>>,
    registry: ConnectionRegistry,
}

impl SubscriptionHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Unsubscribes and waits until the subscription task has stopped.
    pub async fn cancel(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
        self.registry.forget(self.id);
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.registry.forget(self.id);
    }
}

async fn run_push(
    source: Arc<dyn StreamSource>,
    path: String,
    events: mpsc::Sender<SourceEvent>,
    reconnect_delay: Duration,
) {
    loop {
        tracing::debug!(path = %path, "opening push subscription");

        let outcome = match source.subscribe(&path, events.clone()).await {
            Ok(()) => {
                tracing::info!(path = %path, "push subscription closed");
                SourceEvent::Close
            }
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "push subscription failed");
                SourceEvent::Error(e.to_string())
            }
        };

        if events.send(outcome).await.is_err() {
            break;
        }

        tracing::debug!(
            path = %path,
            delay_ms = reconnect_delay.as_millis() as u64,
            "reconnecting after delay"
        );
        tokio::time::sleep(reconnect_delay).await;
    }
}

async fn run_poll(
    source: Arc<dyn PollSource>,
    path: String,
    interval: Duration,
    events: mpsc::Sender<SourceEvent>,
) {
    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut connected = false;

    loop {
        ticker.tick().await;

        let delivered = match source.fetch(&path).await {
            Ok(value) => {
                let opened = if connected {
                    true
                } else {
                    connected = true;
                    events.send(SourceEvent::Open).await.is_ok()
                };
                opened && events.send(SourceEvent::Payload(value)).await.is_ok()
            }
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "poll failed");
                connected = false;
                events.send(SourceEvent::Error(e.to_string())).await.is_ok()
            }
        };

        if !delivered {
            break;
        }
    }
}
