//! Group controller configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use convoy_resources::DEFAULT_VOLUME_ROOT;

use crate::restart::RestartPolicy;

/// Settings shared by every group a controller runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Time a container gets to stop before it is killed
    #[serde(with = "millis")]
    pub grace_period: Duration,

    /// Extra time teardown waits for supervisors beyond the grace period
    /// before force-killing their containers
    #[serde(with = "millis")]
    pub kill_margin: Duration,

    /// Directory under which group volumes are created
    pub volume_root: PathBuf,

    /// Restart policy applied to every container
    pub restart: RestartPolicy,

    /// Capacity of the lifecycle event channels
    pub event_buffer: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(10),
            kill_margin: Duration::from_secs(5),
            volume_root: PathBuf::from(DEFAULT_VOLUME_ROOT),
            restart: RestartPolicy::default(),
            event_buffer: 256,
        }
    }
}

impl ControllerConfig {
    /// Set the stop grace period
    #[must_use]
    pub const fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    /// Set the kill margin
    #[must_use]
    pub const fn with_kill_margin(mut self, margin: Duration) -> Self {
        self.kill_margin = margin;
        self
    }

    /// Set the volume root
    #[must_use]
    pub fn with_volume_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.volume_root = root.into();
        self
    }

    /// Set the restart policy
    #[must_use]
    pub const fn with_restart(mut self, policy: RestartPolicy) -> Self {
        self.restart = policy;
        self
    }

    /// Set the event channel capacity
    #[must_use]
    pub fn with_event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity.max(1);
        self
    }

    /// Total time teardown waits for one supervisor
    #[must_use]
    pub fn stop_deadline(&self) -> Duration {
        self.grace_period.saturating_add(self.kill_margin)
    }
}

// Durations as integer milliseconds
pub(crate) mod millis {
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
