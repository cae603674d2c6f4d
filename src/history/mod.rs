//! Undo history and debounced autosave.

pub mod stack;

pub use stack::{AutosaveEvent, AutosaveTrigger, HistoryStack};

use std::time::Duration;

/// Configuration for undo history and autosave debouncing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryConfig {
    /// Maximum retained undo snapshots; the oldest is discarded once the
    /// stack grows past this. Default: 5
    pub max_snapshots: usize,
    /// Quiet period after the last edit before the autosave closure runs.
    /// Default: 2000ms
    pub autosave_debounce: Duration,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_snapshots: 5,
            autosave_debounce: Duration::from_millis(2000),
        }
    }
}

impl HistoryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_snapshots(mut self, max_snapshots: usize) -> Self {
        self.max_snapshots = max_snapshots;
        self
    }

    pub fn with_autosave_debounce(mut self, debounce: Duration) -> Self {
        self.autosave_debounce = debounce;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = HistoryConfig::default();
        assert_eq!(config.max_snapshots, 5);
        assert_eq!(config.autosave_debounce, Duration::from_millis(2000));
    }

    #[test]
    fn builders_apply() {
        let config = HistoryConfig::new()
            .with_max_snapshots(10)
            .with_autosave_debounce(Duration::from_millis(500));
        assert_eq!(config.max_snapshots, 10);
        assert_eq!(config.autosave_debounce, Duration::from_millis(500));
    }
}
