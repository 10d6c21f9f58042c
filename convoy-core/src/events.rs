//! Container lifecycle events with structured tracing
//!
//! Supervisors send these to their group's controller, which folds them into
//! the group status and re-broadcasts them to subscribers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime};

use crate::ContainerRuntimeState;

/// Events emitted during container lifecycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContainerEvent {
    /// Container moved to a new state
    StateChanged {
        /// Container name
        container: String,
        /// New state
        state: ContainerRuntimeState,
        /// Timestamp
        #[serde(with = "systemtime_serde")]
        timestamp: SystemTime,
    },

    /// A restart has been scheduled
    Restarting {
        /// Container name
        container: String,
        /// Restart number, starting at 1
        attempt: u32,
        /// Backoff before the restart
        #[serde(with = "duration_serde")]
        delay: Duration,
        /// Timestamp
        #[serde(with = "systemtime_serde")]
        timestamp: SystemTime,
    },

    /// Restart budget exhausted; the container stays failed
    GaveUp {
        /// Container name
        container: String,
        /// Restarts performed
        restarts: u32,
        /// Timestamp
        #[serde(with = "systemtime_serde")]
        timestamp: SystemTime,
    },

    /// Driver error
    Error {
        /// Container name
        container: String,
        /// Error message
        message: String,
        /// Timestamp
        #[serde(with = "systemtime_serde")]
        timestamp: SystemTime,
    },
}

impl ContainerEvent {
    /// State change stamped with the current time
    #[must_use]
    pub fn state_changed(container: impl Into<String>, state: ContainerRuntimeState) -> Self {
        Self::StateChanged {
            container: container.into(),
            state,
            timestamp: SystemTime::now(),
        }
    }

    /// Get the container name from any event
    #[must_use]
    pub fn container(&self) -> &str {
        match self {
            Self::StateChanged { container, .. }
            | Self::Restarting { container, .. }
            | Self::GaveUp { container, .. }
            | Self::Error { container, .. } => container,
        }
    }

    /// Get the timestamp from any event
    #[must_use]
    pub const fn timestamp(&self) -> SystemTime {
        match self {
            Self::StateChanged { timestamp, .. }
            | Self::Restarting { timestamp, .. }
            | Self::GaveUp { timestamp, .. }
            | Self::Error { timestamp, .. } => *timestamp,
        }
    }

    /// Check if this is a critical event
    #[must_use]
    pub const fn is_critical(&self) -> bool {
        matches!(self, Self::GaveUp { .. } | Self::Error { .. })
    }

    /// Emit structured tracing event
    pub fn emit_trace(&self, group: &str) {
        match self {
            Self::StateChanged {
                container, state, ..
            } => {
                if state.is_failed() {
                    tracing::warn!(
                        group,
                        container = %container,
                        state = %state,
                        event = "state_changed",
                        "Container failed"
                    );
                } else {
                    tracing::info!(
                        group,
                        container = %container,
                        state = %state,
                        event = "state_changed",
                        "Container state changed"
                    );
                }
            }
            Self::Restarting {
                container,
                attempt,
                delay,
                ..
            } => {
                tracing::info!(
                    group,
                    container = %container,
                    attempt,
                    delay_ms = delay.as_millis(),
                    event = "restarting",
                    "Container restart scheduled"
                );
            }
            Self::GaveUp {
                container,
                restarts,
                ..
            } => {
                tracing::error!(
                    group,
                    container = %container,
                    restarts,
                    event = "gave_up",
                    "Restart budget exhausted"
                );
            }
            Self::Error {
                container, message, ..
            } => {
                tracing::error!(
                    group,
                    container = %container,
                    message = %message,
                    event = "error",
                    "Container error"
                );
            }
        }
    }
}

impl fmt::Display for ContainerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StateChanged {
                container, state, ..
            } => write!(f, "Container {container} is {state}"),
            Self::Restarting {
                container,
                attempt,
                delay,
                ..
            } => write!(f, "Container {container} restart #{attempt} in {delay:?}"),
            Self::GaveUp {
                container,
                restarts,
                ..
            } => write!(f, "Container {container} gave up after {restarts} restart(s)"),
            Self::Error {
                container, message, ..
            } => write!(f, "Container {container} error: {message}"),
        }
    }
}

// Custom Duration serialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[allow(clippy::cast_possible_truncation)]
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

// Custom SystemTime serialization
mod systemtime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::{SystemTime, UNIX_EPOCH};

    pub fn serialize<S>(time: &SystemTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let since_epoch = time
            .duration_since(UNIX_EPOCH)
            .map_err(serde::ser::Error::custom)?;
        serializer.serialize_u64(since_epoch.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SystemTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(UNIX_EPOCH + std::time::Duration::from_secs(secs))
    }
}
