//! Runtime state machines for containers and groups

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::GroupName;

/// Lifecycle state of one container
///
/// Transitioned only by the container's supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ContainerRuntimeState {
    /// Admitted, not yet created
    Pending,
    /// Being created, attached and started
    Provisioning,
    /// Running
    Running,
    /// Exited unexpectedly or failed to start
    Failed {
        /// Exit code, if the process ran
        exit_code: Option<i32>,
        /// Human readable cause
        reason: String,
        /// No further restart will be attempted
        permanent: bool,
    },
    /// Stop requested, waiting for the process to go away
    Terminating,
    /// Stopped and removed
    Terminated,
}

impl ContainerRuntimeState {
    /// Whether the container is running
    #[must_use]
    pub const fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Whether the container is failed, permanently or not
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// Whether the container is failed with no restart left
    #[must_use]
    pub const fn is_permanently_failed(&self) -> bool {
        matches!(self, Self::Failed { permanent: true, .. })
    }

    /// Whether the container is gone for good
    #[must_use]
    pub const fn is_terminated(&self) -> bool {
        matches!(self, Self::Terminated)
    }
}

impl fmt::Display for ContainerRuntimeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Provisioning => write!(f, "provisioning"),
            Self::Running => write!(f, "running"),
            Self::Failed {
                exit_code,
                reason,
                permanent,
            } => {
                write!(f, "failed")?;
                if let Some(code) = exit_code {
                    write!(f, " (exit {code})")?;
                }
                write!(f, ": {reason}")?;
                if *permanent {
                    write!(f, " [permanent]")?;
                }
                Ok(())
            }
            Self::Terminating => write!(f, "terminating"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

/// Aggregate state of a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupRuntimeState {
    /// Containers are still coming up for the first time
    Initializing,
    /// Every container is running
    Ready,
    /// At least one container is not running
    Degraded,
    /// Teardown in progress
    Terminating,
    /// Teardown finished
    Terminated,
}

impl GroupRuntimeState {
    /// Compute the group state from its containers
    ///
    /// `settled` is true once every container has reached `Running` or
    /// `Failed` at least once. Teardown states are never produced here; the
    /// controller sets them directly.
    pub fn aggregate<'a, I>(states: I, settled: bool) -> Self
    where
        I: IntoIterator<Item = &'a ContainerRuntimeState>,
    {
        if !settled {
            return Self::Initializing;
        }
        if states.into_iter().all(ContainerRuntimeState::is_running) {
            Self::Ready
        } else {
            Self::Degraded
        }
    }

    /// Whether the group state machine allows moving to `next`
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Terminated, _) => false,
            (Self::Terminating, next) => matches!(next, Self::Terminated),
            (_, Self::Terminating) => true,
            (Self::Initializing, next) => matches!(next, Self::Ready | Self::Degraded),
            (Self::Ready | Self::Degraded, next) => matches!(next, Self::Ready | Self::Degraded),
        }
    }
}

impl fmt::Display for GroupRuntimeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initializing => write!(f, "initializing"),
            Self::Ready => write!(f, "ready"),
            Self::Degraded => write!(f, "degraded"),
            Self::Terminating => write!(f, "terminating"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

/// Point-in-time status of one container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerStatus {
    /// Container name
    pub name: String,
    /// Current state
    pub state: ContainerRuntimeState,
    /// Restarts performed so far
    pub restarts: u32,
}

/// Point-in-time status of a group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupStatus {
    /// Group name
    pub group: GroupName,
    /// Aggregate state
    pub state: GroupRuntimeState,
    /// Containers in declaration order
    pub containers: Vec<ContainerStatus>,
}

impl GroupStatus {
    /// Look up one container
    #[must_use]
    pub fn container(&self, name: &str) -> Option<&ContainerStatus> {
        self.containers.iter().find(|c| c.name == name)
    }
}

impl fmt::Display for GroupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Group {}: {}", self.group, self.state)?;
        for c in &self.containers {
            writeln!(f, "  {:<24} {} (restarts: {})", c.name, c.state, c.restarts)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed() -> ContainerRuntimeState {
        ContainerRuntimeState::Failed {
            exit_code: Some(1),
            reason: "exited".to_string(),
            permanent: false,
        }
    }

    #[test]
    fn test_aggregate_initializing_until_settled() {
        let states = [ContainerRuntimeState::Running, ContainerRuntimeState::Provisioning];
        assert_eq!(
            GroupRuntimeState::aggregate(&states, false),
            GroupRuntimeState::Initializing
        );
    }

    #[test]
    fn test_aggregate_ready_and_degraded() {
        let all_running = [ContainerRuntimeState::Running, ContainerRuntimeState::Running];
        assert_eq!(
            GroupRuntimeState::aggregate(&all_running, true),
            GroupRuntimeState::Ready
        );

        let one_failed = [ContainerRuntimeState::Running, failed()];
        assert_eq!(
            GroupRuntimeState::aggregate(&one_failed, true),
            GroupRuntimeState::Degraded
        );

        let restarting = [ContainerRuntimeState::Running, ContainerRuntimeState::Provisioning];
        assert_eq!(
            GroupRuntimeState::aggregate(&restarting, true),
            GroupRuntimeState::Degraded
        );
    }

    #[test]
    fn test_aggregate_empty_group_is_ready() {
        let none: [ContainerRuntimeState; 0] = [];
        assert_eq!(
            GroupRuntimeState::aggregate(&none, true),
            GroupRuntimeState::Ready
        );
    }

    #[test]
    fn test_group_transitions() {
        use GroupRuntimeState::*;

        assert!(Initializing.can_transition_to(Ready));
        assert!(Initializing.can_transition_to(Degraded));
        assert!(Degraded.can_transition_to(Ready));
        assert!(Ready.can_transition_to(Degraded));
        assert!(Initializing.can_transition_to(Terminating));
        assert!(Terminating.can_transition_to(Terminated));
        assert!(!Terminating.can_transition_to(Ready));
        assert!(!Terminated.can_transition_to(Ready));
        assert!(!Terminated.can_transition_to(Terminating));
        assert!(!Ready.can_transition_to(Initializing));
    }

    #[test]
    fn test_state_display() {
        let state = ContainerRuntimeState::Failed {
            exit_code: Some(137),
            reason: "killed".to_string(),
            permanent: true,
        };
        assert_eq!(state.to_string(), "failed (exit 137): killed [permanent]");
        assert!(state.is_permanently_failed());
    }

    #[test]
    fn test_state_serde() {
        let json = serde_json::to_string(&failed()).unwrap();
        assert!(json.contains("\"state\":\"failed\""));
        let back: ContainerRuntimeState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, failed());
    }
}
