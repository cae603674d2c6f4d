//! Heuristic failure classification.
//!
//! The offline queue has to decide, from an opaque collaborator error,
//! whether retrying later can help. Transport-level failures (unreachable
//! backend, timed-out exchange, dropped connection) are network-class and
//! retryable; anything else is application-class and would fail the same
//! way again.

use serde::{Deserialize, Serialize};

use super::ApiError;

/// Backend codes that always mean a transport-level failure.
const NETWORK_CODES: &[&str] = &["unavailable", "deadline-exceeded", "network"];

/// Message fragments that mean a transport-level failure when no code is
/// present. Matched case-insensitively.
const NETWORK_MESSAGE_MARKERS: &[&str] = &["network", "timeout", "fetch", "connection"];

/// Coarse class of a collaborator failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Transport-level failure; the same operation may succeed once
    /// connectivity returns.
    Network,
    /// Application-level failure; retrying repeats the same outcome.
    Application,
}

impl FailureClass {
    /// Whether the offline queue should hold the operation for replay.
    pub fn is_retryable(self) -> bool {
        matches!(self, FailureClass::Network)
    }
}

/// Classify a collaborator error as network-class or application-class.
///
/// The code allowlist wins when a code is present; otherwise the message is
/// scanned for known transport markers.
pub fn classify_api_error(error: &ApiError) -> FailureClass {
    if let Some(code) = &error.code {
        if NETWORK_CODES.contains(&code.as_str()) {
            return FailureClass::Network;
        }
    }
    let message = error.message.to_lowercase();
    if NETWORK_MESSAGE_MARKERS
        .iter()
        .any(|marker| message.contains(marker))
    {
        FailureClass::Network
    } else {
        FailureClass::Application
    }
}

/// Stable label for log fields and status output.
pub fn failure_class_label(class: FailureClass) -> &'static str {
    match class {
        FailureClass::Network => "network",
        FailureClass::Application => "application",
    }
}
