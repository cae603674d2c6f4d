//! Offline-first operation handling.
//!
//! Connectivity is tracked by [`ConnectivityMonitor`] (passive platform
//! reports plus an active HTTP probe). Work that cannot reach the backend
//! lands in [`OfflineQueue`], is journaled to disk, and is replayed in
//! submission order when connectivity returns.

use std::env;
use std::time::Duration;

pub mod journal;
pub mod monitor;
pub mod operation;
pub mod queue;

pub use journal::{JournalError, JournalResult, QueueJournal};
pub use monitor::{
    ConnectivityEvent, ConnectivityMonitor, ConnectivityProbe, ConnectivityState, HttpProbe,
    NetworkStatus,
};
pub use operation::{OperationDispatcher, PendingRecord, PlanDispatcher, QueuedOperation};
pub use queue::{DrainReport, OfflineError, OfflineQueue, QueueStatus, SubmitOutcome, TaskOutcome};

/// Environment variable overriding the pending-queue capacity.
pub const QUEUE_CAPACITY_ENV_VAR: &str = "MEALSYNC_QUEUE_CAPACITY";

/// Environment variable overriding the probe interval, in seconds.
pub const PROBE_INTERVAL_SECS_ENV_VAR: &str = "MEALSYNC_PROBE_INTERVAL_SECS";

/// Environment variable overriding the probe endpoint.
pub const PROBE_URL_ENV_VAR: &str = "MEALSYNC_PROBE_URL";

/// Default maximum number of pending entries.
pub const DEFAULT_QUEUE_CAPACITY: usize = 50;

/// Default interval between active reachability probes.
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(30);

/// Default probe endpoint: cheap, cache-hostile, returns an empty body.
pub const DEFAULT_PROBE_URL: &str = "https://www.gstatic.com/generate_204";

/// Configuration for the offline subsystem.
#[derive(Debug, Clone)]
pub struct OfflineConfig {
    /// Maximum pending entries before submissions are rejected.
    pub queue_capacity: usize,
    /// How often the active probe re-checks reachability.
    pub probe_interval: Duration,
    /// Endpoint the active probe targets.
    pub probe_url: String,
}

impl OfflineConfig {
    pub fn new() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            probe_interval: DEFAULT_PROBE_INTERVAL,
            probe_url: DEFAULT_PROBE_URL.to_string(),
        }
    }

    /// Read overrides from `MEALSYNC_*` environment variables. Unset or
    /// unparseable values fall back to the defaults.
    pub fn from_env() -> Self {
        let queue_capacity = env::var(QUEUE_CAPACITY_ENV_VAR)
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(DEFAULT_QUEUE_CAPACITY);
        let probe_interval = env::var(PROBE_INTERVAL_SECS_ENV_VAR)
            .ok()
            .and_then(|value| value.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_PROBE_INTERVAL);
        let probe_url = env::var(PROBE_URL_ENV_VAR)
            .ok()
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_PROBE_URL.to_string());
        Self {
            queue_capacity,
            probe_interval,
            probe_url,
        }
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval;
        self
    }

    pub fn with_probe_url(mut self, url: impl Into<String>) -> Self {
        self.probe_url = url.into();
        self
    }
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, PoisonError};

    // Env mutations race across tests in one process.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    #[test]
    fn defaults() {
        let config = OfflineConfig::new();
        assert_eq!(config.queue_capacity, 50);
        assert_eq!(config.probe_interval, Duration::from_secs(30));
        assert_eq!(config.probe_url, DEFAULT_PROBE_URL);
    }

    #[test]
    fn builders_override_each_field() {
        let config = OfflineConfig::new()
            .with_queue_capacity(5)
            .with_probe_interval(Duration::from_secs(2))
            .with_probe_url("https://probe.example/ping");
        assert_eq!(config.queue_capacity, 5);
        assert_eq!(config.probe_interval, Duration::from_secs(2));
        assert_eq!(config.probe_url, "https://probe.example/ping");
    }

    #[test]
    fn from_env_reads_overrides() {
        let _guard = ENV_MUTEX.lock().unwrap_or_else(PoisonError::into_inner);
        env::set_var(QUEUE_CAPACITY_ENV_VAR, "7");
        env::set_var(PROBE_INTERVAL_SECS_ENV_VAR, "12");
        env::set_var(PROBE_URL_ENV_VAR, "https://probe.example/generate_204");

        let config = OfflineConfig::from_env();
        assert_eq!(config.queue_capacity, 7);
        assert_eq!(config.probe_interval, Duration::from_secs(12));
        assert_eq!(config.probe_url, "https://probe.example/generate_204");

        env::remove_var(QUEUE_CAPACITY_ENV_VAR);
        env::remove_var(PROBE_INTERVAL_SECS_ENV_VAR);
        env::remove_var(PROBE_URL_ENV_VAR);
    }

    #[test]
    fn from_env_falls_back_on_garbage() {
        let _guard = ENV_MUTEX.lock().unwrap_or_else(PoisonError::into_inner);
        env::set_var(QUEUE_CAPACITY_ENV_VAR, "not-a-number");
        env::set_var(PROBE_URL_ENV_VAR, "");

        let config = OfflineConfig::from_env();
        assert_eq!(config.queue_capacity, DEFAULT_QUEUE_CAPACITY);
        assert_eq!(config.probe_url, DEFAULT_PROBE_URL);

        env::remove_var(QUEUE_CAPACITY_ENV_VAR);
        env::remove_var(PROBE_URL_ENV_VAR);
    }
}
