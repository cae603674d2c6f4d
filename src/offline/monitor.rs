//! Connectivity monitoring.
//!
//! A two-state machine fed from two directions: the platform reports edge
//! events through `report_online`/`report_offline`, and an active probe
//! confirms reachability on an interval. A probe is judged purely by
//! whether the exchange completed; payload and status code are irrelevant.
//! Every state transition is emitted as an event so the offline queue can
//! drain the moment connectivity returns.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Connectivity as last determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectivityState {
    Online,
    Offline,
}

impl ConnectivityState {
    pub fn is_online(self) -> bool {
        matches!(self, ConnectivityState::Online)
    }

    pub fn as_label(self) -> &'static str {
        match self {
            ConnectivityState::Online => "online",
            ConnectivityState::Offline => "offline",
        }
    }
}

/// Emitted on every state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
    Online,
    Offline,
}

/// Snapshot for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct NetworkStatus {
    pub state: ConnectivityState,
    pub last_checked: DateTime<Utc>,
}

/// Reachability check. Behind a trait so tests can script results and apps
/// can point it at whatever endpoint is cheap for them.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    /// True when a round trip to the probe target completed.
    async fn check(&self) -> bool;
}

const _: () = {
    fn _assert_object_safe(_: &dyn ConnectivityProbe) {}
};

/// Client-side timeout so a black-holed probe target cannot stall the loop.
const PROBE_HTTP_TIMEOUT: Duration = Duration::from_secs(5);

/// HTTP HEAD probe.
///
/// Any completed exchange counts as online; a 404 still proves the network
/// path works. The cache-bypass header keeps intermediaries from answering
/// on behalf of the origin.
pub struct HttpProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpProbe {
    pub fn new(url: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(PROBE_HTTP_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ConnectivityProbe for HttpProbe {
    async fn check(&self) -> bool {
        self.client
            .head(&self.url)
            .header(reqwest::header::CACHE_CONTROL, "no-cache, no-store")
            .send()
            .await
            .is_ok()
    }
}

struct MonitorInner {
    state: ConnectivityState,
    last_checked: DateTime<Utc>,
}

/// Two-state connectivity machine with passive reports and an active probe
/// loop.
pub struct ConnectivityMonitor {
    probe: Arc<dyn ConnectivityProbe>,
    probe_interval: Duration,
    inner: Arc<Mutex<MonitorInner>>,
    events_tx: mpsc::Sender<ConnectivityEvent>,
    stop_flag: Arc<AtomicBool>,
    task_handle: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectivityMonitor {
    /// `initial` is the platform's currently reported connectivity; the
    /// monitor starts there rather than assuming either state.
    pub fn new(
        probe: Arc<dyn ConnectivityProbe>,
        initial: ConnectivityState,
        probe_interval: Duration,
    ) -> (Self, mpsc::Receiver<ConnectivityEvent>) {
        let (events_tx, events_rx) = mpsc::channel(16);
        (
            Self {
                probe,
                probe_interval,
                inner: Arc::new(Mutex::new(MonitorInner {
                    state: initial,
                    last_checked: Utc::now(),
                })),
                events_tx,
                stop_flag: Arc::new(AtomicBool::new(false)),
                task_handle: Mutex::new(None),
            },
            events_rx,
        )
    }

    pub fn state(&self) -> ConnectivityState {
        self.inner_guard().state
    }

    pub fn is_online(&self) -> bool {
        self.state().is_online()
    }

    pub fn status(&self) -> NetworkStatus {
        let inner = self.inner_guard();
        NetworkStatus {
            state: inner.state,
            last_checked: inner.last_checked,
        }
    }

    /// Platform says connectivity returned.
    pub fn report_online(&self) {
        Self::apply(&self.inner, &self.events_tx, ConnectivityState::Online);
    }

    /// Platform says connectivity dropped.
    pub fn report_offline(&self) {
        Self::apply(&self.inner, &self.events_tx, ConnectivityState::Offline);
    }

    /// Start the periodic probe loop. No-op when already running.
    pub fn start(&self) {
        let mut handle = self.handle_guard();
        if handle.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        self.stop_flag.store(false, Ordering::SeqCst);

        let probe = Arc::clone(&self.probe);
        let inner = Arc::clone(&self.inner);
        let events_tx = self.events_tx.clone();
        let stop_flag = Arc::clone(&self.stop_flag);
        let interval = self.probe_interval;
        *handle = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if stop_flag.load(Ordering::SeqCst) {
                    break;
                }
                let reachable = probe.check().await;
                if stop_flag.load(Ordering::SeqCst) {
                    break;
                }
                let next = if reachable {
                    ConnectivityState::Online
                } else {
                    ConnectivityState::Offline
                };
                Self::apply(&inner, &events_tx, next);
            }
        }));
    }

    /// Stop the probe loop and wait for it to exit.
    pub async fn stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        let handle = self.handle_guard().take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle_guard()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    fn apply(
        inner: &Mutex<MonitorInner>,
        events_tx: &mpsc::Sender<ConnectivityEvent>,
        next: ConnectivityState,
    ) {
        let changed = {
            let mut inner = inner.lock().unwrap_or_else(PoisonError::into_inner);
            inner.last_checked = Utc::now();
            if inner.state == next {
                false
            } else {
                inner.state = next;
                true
            }
        };
        if changed {
            tracing::info!(state = next.as_label(), "connectivity changed");
            let event = match next {
                ConnectivityState::Online => ConnectivityEvent::Online,
                ConnectivityState::Offline => ConnectivityEvent::Offline,
            };
            if events_tx.try_send(event).is_err() {
                tracing::warn!(
                    state = next.as_label(),
                    "connectivity event dropped; receiver gone or backlogged"
                );
            }
        }
    }

    fn inner_guard(&self) -> MutexGuard<'_, MonitorInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handle_guard(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.task_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
