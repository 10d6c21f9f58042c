//! Group manifest model
//!
//! The wire form mirrors the `v1beta1` container manifest: camelCase keys,
//! YAML or JSON (YAML is a superset), unknown fields rejected. Everything in
//! here is plain data; invariants are checked by [`crate::validate`].

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{GroupName, ValidationError};

/// Transport protocol of a port mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Protocol {
    /// TCP (default)
    #[default]
    #[serde(rename = "TCP")]
    Tcp,
    /// UDP
    #[serde(rename = "UDP")]
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => write!(f, "TCP"),
            Self::Udp => write!(f, "UDP"),
        }
    }
}

/// Environment variable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnvVar {
    /// Variable name
    pub key: String,
    /// Variable value
    pub value: String,
}

impl EnvVar {
    /// Create an environment variable
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Port exposed by a container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PortMapping {
    /// Port name, unique within the group
    pub name: String,
    /// Port the process listens on
    pub container_port: u16,
    /// Port published on the host; defaults to `container_port`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_port: Option<u16>,
    /// Transport protocol
    #[serde(default)]
    pub protocol: Protocol,
}

impl PortMapping {
    /// TCP mapping publishing `container_port` on the same host port
    #[must_use]
    pub fn new(name: impl Into<String>, container_port: u16) -> Self {
        Self {
            name: name.into(),
            container_port,
            host_port: None,
            protocol: Protocol::Tcp,
        }
    }

    /// Publish on a different host port
    #[must_use]
    pub fn with_host_port(mut self, port: u16) -> Self {
        self.host_port = Some(port);
        self
    }

    /// Set the protocol
    #[must_use]
    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    /// Host port after applying the default
    #[must_use]
    pub fn resolved_host_port(&self) -> u16 {
        self.host_port.unwrap_or(self.container_port)
    }
}

/// Mount of a group volume into one container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct VolumeMount {
    /// Name of a declared [`Volume`]
    pub name: String,
    /// Absolute mount path inside the container
    pub path: String,
    /// Mount read-only
    #[serde(default)]
    pub read_only: bool,
}

impl VolumeMount {
    /// Read-write mount of `name` at `path`
    #[must_use]
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            read_only: false,
        }
    }

    /// Mount read-only
    #[must_use]
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }
}

/// Storage shared by reference among the containers of a group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Volume {
    /// Volume name, unique within the group
    pub name: String,
}

impl Volume {
    /// Declare a volume
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// One container of a group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ContainerSpec {
    /// Container name, unique within the group
    pub name: String,
    /// Image reference
    #[serde(default)]
    pub image: String,
    /// Command line; empty means the image default
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    /// Initial working directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    /// Volume mounts
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_mounts: Vec<VolumeMount>,
    /// Port mappings
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<PortMapping>,
    /// Environment variables
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
}

impl ContainerSpec {
    /// Create a container spec with no command, mounts, ports or env
    #[must_use]
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            command: Vec::new(),
            working_dir: None,
            volume_mounts: Vec::new(),
            ports: Vec::new(),
            env: Vec::new(),
        }
    }

    /// Set the command line
    #[must_use]
    pub fn with_command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command = command.into_iter().map(Into::into).collect();
        self
    }

    /// Set the working directory
    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Add a volume mount
    #[must_use]
    pub fn with_mount(mut self, mount: VolumeMount) -> Self {
        self.volume_mounts.push(mount);
        self
    }

    /// Add a port mapping
    #[must_use]
    pub fn with_port(mut self, port: PortMapping) -> Self {
        self.ports.push(port);
        self
    }

    /// Add an environment variable
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push(EnvVar::new(key, value));
        self
    }

    /// Environment with duplicate keys collapsed, last write wins
    ///
    /// Each key keeps the position of its first occurrence and the value of
    /// its last one.
    #[must_use]
    pub fn resolved_env(&self) -> Vec<(String, String)> {
        let mut resolved: Vec<(String, String)> = Vec::with_capacity(self.env.len());
        for var in &self.env {
            match resolved.iter_mut().find(|(key, _)| *key == var.key) {
                Some(entry) => entry.1.clone_from(&var.value),
                None => resolved.push((var.key.clone(), var.value.clone())),
            }
        }
        resolved
    }
}

/// A set of containers sharing one network namespace and a set of volumes
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Group {
    /// Group name
    pub name: GroupName,
    /// Containers in declaration order
    pub containers: Vec<ContainerSpec>,
    /// Declared volumes
    pub volumes: Vec<Volume>,
}

impl Group {
    /// Create an empty group
    #[must_use]
    pub fn new(name: GroupName) -> Self {
        Self {
            name,
            containers: Vec::new(),
            volumes: Vec::new(),
        }
    }

    /// Add a container
    #[must_use]
    pub fn with_container(mut self, container: ContainerSpec) -> Self {
        self.containers.push(container);
        self
    }

    /// Declare a volume
    #[must_use]
    pub fn with_volume(mut self, volume: Volume) -> Self {
        self.volumes.push(volume);
        self
    }

    /// Every port mapping with its container, in declaration order
    pub fn port_mappings(&self) -> impl Iterator<Item = (&ContainerSpec, &PortMapping)> {
        self.containers
            .iter()
            .flat_map(|c| c.ports.iter().map(move |p| (c, p)))
    }
}

/// Manifest as written by users
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Manifest {
    /// Manifest schema version
    pub version: String,
    /// Group name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Containers
    #[serde(default)]
    pub containers: Vec<ContainerSpec>,
    /// Volumes
    #[serde(default)]
    pub volumes: Vec<Volume>,
}

impl Manifest {
    /// Versions this agent understands
    pub const SUPPORTED_VERSIONS: &'static [&'static str] = &["v1beta1"];

    /// Decode a YAML or JSON manifest
    ///
    /// # Errors
    /// Returns [`ValidationError::Parse`] on malformed input or unknown fields
    pub fn from_yaml(text: &str) -> Result<Self, ValidationError> {
        serde_yaml::from_str(text).map_err(|e| ValidationError::Parse {
            message: e.to_string(),
        })
    }

    /// Reject unsupported manifest versions
    ///
    /// # Errors
    /// Returns [`ValidationError::UnsupportedVersion`]
    pub fn check_version(&self) -> Result<(), ValidationError> {
        if Self::SUPPORTED_VERSIONS.contains(&self.version.as_str()) {
            Ok(())
        } else {
            Err(ValidationError::UnsupportedVersion {
                version: self.version.clone(),
            })
        }
    }

    /// Convert into the group model
    ///
    /// Only the version and group name are checked here; cross-container
    /// invariants are left to [`crate::validate_group`].
    ///
    /// # Errors
    /// Returns error on unsupported version or invalid `id`
    pub fn into_group(self) -> Result<Group, ValidationError> {
        self.check_version()?;
        let name = match self.id {
            Some(id) => GroupName::new(id)?,
            None => GroupName::default(),
        };
        Ok(Group {
            name,
            containers: self.containers,
            volumes: self.volumes,
        })
    }
}
