//! Error types for Convoy
//!
//! Each failure class has its own enum so callers can tell an invariant
//! violation from a provisioning failure without string matching. [`Error`]
//! wraps all of them for the `apply` path.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::manifest::Protocol;

/// Manifest-level invariant violation. Nothing has been provisioned when
/// one of these is returned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ValidationError {
    /// A name is not a valid RFC 1035 label
    #[error("{field} is invalid: {value:?}")]
    InvalidName {
        /// Location of the offending field
        field: String,
        /// Rejected value
        value: String,
    },

    /// A container has no image
    #[error("containers[{container}] has no image")]
    MissingImage {
        /// Container name
        container: String,
    },

    /// Two containers share a name
    #[error("containers[{index}].name is not unique: {name}")]
    DuplicateContainer {
        /// Position of the second occurrence
        index: usize,
        /// Duplicated name
        name: String,
    },

    /// Two volumes share a name
    #[error("volumes[{index}].name is not unique: {name}")]
    DuplicateVolume {
        /// Position of the second occurrence
        index: usize,
        /// Duplicated name
        name: String,
    },

    /// Two port mappings share a name somewhere in the group
    #[error("port name {port} is not unique group-wide (containers {first} and {second})")]
    DuplicatePortName {
        /// Duplicated port name
        port: String,
        /// Container declaring it first
        first: String,
        /// Container declaring it again
        second: String,
    },

    /// A volume mount references a volume that is not declared
    #[error("containers[{container}].volumeMounts[{volume}] is not a known volume")]
    UnknownVolume {
        /// Container name
        container: String,
        /// Referenced volume
        volume: String,
    },

    /// The same mount path appears twice in one container
    #[error("containers[{container}].volumeMounts path is not unique: {path}")]
    DuplicateMountPath {
        /// Container name
        container: String,
        /// Duplicated path
        path: String,
    },

    /// A path is relative or too long
    #[error("{field} is invalid: {path:?}")]
    InvalidPath {
        /// Location of the offending field
        field: String,
        /// Rejected path
        path: String,
    },

    /// A port number is out of range
    #[error("{field} is invalid: {port}")]
    InvalidPort {
        /// Location of the offending field
        field: String,
        /// Rejected port
        port: u16,
    },

    /// An environment key is not a C identifier
    #[error("containers[{container}].env key is invalid: {key:?}")]
    InvalidEnvKey {
        /// Container name
        container: String,
        /// Rejected key
        key: String,
    },

    /// Manifest version is not supported
    #[error("config version '{version}' is not supported")]
    UnsupportedVersion {
        /// Version found in the manifest
        version: String,
    },

    /// Manifest text could not be decoded
    #[error("manifest could not be parsed: {message}")]
    Parse {
        /// Decoder message
        message: String,
    },
}

/// Which port space a conflict happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortSpace {
    /// Ports published on the host
    Host,
    /// Ports listened on inside the shared namespace
    Container,
}

impl fmt::Display for PortSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host => write!(f, "host"),
            Self::Container => write!(f, "container"),
        }
    }
}

/// Fully qualified owner of a port mapping.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PortOwner {
    /// Group name
    pub group: String,
    /// Container name
    pub container: String,
    /// Port mapping name
    pub port: String,
}

impl fmt::Display for PortOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.group, self.container, self.port)
    }
}

/// Two port mappings resolve to the same port and protocol.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{space} port {port}/{protocol} is claimed by both {first} and {second}")]
pub struct PortConflictError {
    /// Port space of the collision
    pub space: PortSpace,
    /// Colliding port number
    pub port: u16,
    /// Colliding protocol
    pub protocol: Protocol,
    /// Mapping that holds the port
    pub first: PortOwner,
    /// Mapping that asked for it
    pub second: PortOwner,
}

impl PortConflictError {
    /// Names of both colliding port mappings, holder first
    #[must_use]
    pub fn port_names(&self) -> (&str, &str) {
        (&self.first.port, &self.second.port)
    }
}

/// Namespace or volume provisioning failure.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ResourceError {
    /// Group already owns an active namespace
    #[error("group {group} already has an active namespace")]
    NamespaceExists {
        /// Group name
        group: String,
    },

    /// Namespace still has attached containers
    #[error("namespace of group {group} still has {attached} attached container(s)")]
    NamespaceBusy {
        /// Group name
        group: String,
        /// Number of containers still attached
        attached: usize,
    },

    /// No namespace was provisioned for the group
    #[error("group {group} has no active namespace")]
    UnknownNamespace {
        /// Group name
        group: String,
    },

    /// Namespace backend failure
    #[error("namespace error for group {group}: {message}")]
    Namespace {
        /// Group name
        group: String,
        /// Error message
        message: String,
    },

    /// A mount references a volume that was never provisioned
    #[error("volume {volume} is not provisioned")]
    UnknownVolume {
        /// Volume name
        volume: String,
    },

    /// Volume filesystem operation failed
    #[error("volume I/O error at {path}: {source}")]
    VolumeIo {
        /// Path of the failed operation
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },
}

/// Driver-level failure scoped to one container.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum RuntimeError {
    /// Container could not be created
    #[error("failed to create container {container}: {message}")]
    Create {
        /// Container name
        container: String,
        /// Error message
        message: String,
    },

    /// Container could not be started
    #[error("failed to start container {container}: {message}")]
    Start {
        /// Container name or reference
        container: String,
        /// Error message
        message: String,
    },

    /// Waiting for exit failed
    #[error("failed to wait for container {container}: {message}")]
    Wait {
        /// Container reference
        container: String,
        /// Error message
        message: String,
    },

    /// Container could not be stopped
    #[error("failed to stop container {container}: {message}")]
    Stop {
        /// Container reference
        container: String,
        /// Error message
        message: String,
    },

    /// Container could not be removed
    #[error("failed to remove container {container}: {message}")]
    Remove {
        /// Container reference
        container: String,
        /// Error message
        message: String,
    },

    /// Driver does not know the reference
    #[error("unknown container: {container}")]
    UnknownContainer {
        /// Container reference
        container: String,
    },

    /// Namespace attachment was refused
    #[error("failed to attach container {container} to namespace: {message}")]
    Attach {
        /// Container name
        container: String,
        /// Error message
        message: String,
    },
}

/// Restart budget exhausted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SupervisionError {
    /// No restarts left
    #[error("container {container} exhausted its restart budget after {restarts} restart(s)")]
    RestartBudgetExhausted {
        /// Container name
        container: String,
        /// Restarts performed
        restarts: u32,
    },
}

/// One failed step of a teardown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeardownFailure {
    /// What failed to stop or release (container, `ports`, `volumes`, `namespace`)
    pub target: String,
    /// Error message
    pub message: String,
}

impl fmt::Display for TeardownFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.target, self.message)
    }
}

/// Every failure observed while tearing a group down.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub struct TeardownError {
    /// Collected failures, in the order they were observed
    pub failures: Vec<TeardownFailure>,
}

impl fmt::Display for TeardownError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "teardown finished with {} failure(s)", self.failures.len())?;
        for (i, failure) in self.failures.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{sep}{failure}")?;
        }
        Ok(())
    }
}

/// Convoy error types
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Manifest invariant violation
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Port collision
    #[error("port conflict: {0}")]
    PortConflict(#[from] PortConflictError),

    /// Namespace or volume provisioning failure
    #[error("resource error: {0}")]
    Resource(#[from] ResourceError),

    /// Container runtime failure
    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    /// Restart budget exhausted
    #[error("supervision error: {0}")]
    Supervision(#[from] SupervisionError),

    /// Teardown failures
    #[error("{0}")]
    Teardown(#[from] TeardownError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Convoy operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    fn owner(container: &str, port: &str) -> PortOwner {
        PortOwner {
            group: "default".to_string(),
            container: container.to_string(),
            port: port.to_string(),
        }
    }

    #[test]
    fn test_port_conflict_display_names_both_mappings() {
        let err = PortConflictError {
            space: PortSpace::Host,
            port: 8080,
            protocol: Protocol::Tcp,
            first: owner("a", "p"),
            second: owner("b", "q"),
        };

        let msg = err.to_string();
        assert!(msg.contains("default/a/p"));
        assert!(msg.contains("default/b/q"));
        assert!(msg.contains("8080/TCP"));
        assert_eq!(err.port_names(), ("p", "q"));
    }

    #[test]
    fn test_teardown_error_lists_every_failure() {
        let err = TeardownError {
            failures: vec![
                TeardownFailure {
                    target: "web".to_string(),
                    message: "stop timed out".to_string(),
                },
                TeardownFailure {
                    target: "namespace".to_string(),
                    message: "busy".to_string(),
                },
            ],
        };

        assert_eq!(
            err.to_string(),
            "teardown finished with 2 failure(s): web: stop timed out; namespace: busy"
        );
    }

    #[test]
    fn test_error_conversion() {
        let err: Error = ValidationError::MissingImage {
            container: "web".to_string(),
        }
        .into();
        assert!(matches!(err, Error::Validation(_)));
    }
}
