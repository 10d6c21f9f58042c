//! Shared volume provisioning
//!
//! A group volume is a plain host directory at `<root>/<group>/<volume>` that
//! lives exactly as long as the group. Containers receive it as a bind mount.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use convoy_core::{ContainerSpec, GroupName, ResourceError, Volume, VolumeMount};
use tokio::fs;
use tracing::{debug, warn};

/// Default directory under which group volumes are created
pub const DEFAULT_VOLUME_ROOT: &str = "/export";

/// Host directories backing one container mount
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountDescriptor {
    /// Volume name
    pub volume: String,
    /// Directory on the host
    pub host_path: PathBuf,
    /// Mount point inside the container
    pub container_path: String,
    /// Mount read-only
    pub read_only: bool,
}

impl MountDescriptor {
    /// Bind specification in `host:container:mode` form
    #[must_use]
    pub fn bind_spec(&self) -> String {
        let mode = if self.read_only { "ro" } else { "rw" };
        format!("{}:{}:{mode}", self.host_path.display(), self.container_path)
    }
}

/// Volumes provisioned for one group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeSet {
    group: GroupName,
    base: PathBuf,
    volumes: BTreeMap<String, PathBuf>,
}

impl VolumeSet {
    /// Owning group
    #[must_use]
    pub const fn group(&self) -> &GroupName {
        &self.group
    }

    /// Group directory holding every volume
    #[must_use]
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Host path of a provisioned volume
    #[must_use]
    pub fn path(&self, volume: &str) -> Option<&Path> {
        self.volumes.get(volume).map(PathBuf::as_path)
    }

    /// Number of provisioned volumes
    #[must_use]
    pub fn len(&self) -> usize {
        self.volumes.len()
    }

    /// Whether the group declared no volumes
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.volumes.is_empty()
    }

    /// Resolve one mount against the provisioned volumes
    pub fn resolve(&self, mount: &VolumeMount) -> Result<MountDescriptor, ResourceError> {
        let host_path = self
            .volumes
            .get(&mount.name)
            .ok_or_else(|| ResourceError::UnknownVolume {
                volume: mount.name.clone(),
            })?;

        Ok(MountDescriptor {
            volume: mount.name.clone(),
            host_path: host_path.clone(),
            container_path: mount.path.clone(),
            read_only: mount.read_only,
        })
    }

    /// Resolve every mount of a container, in declaration order
    pub fn resolve_all(&self, container: &ContainerSpec) -> Result<Vec<MountDescriptor>, ResourceError> {
        container
            .volume_mounts
            .iter()
            .map(|mount| self.resolve(mount))
            .collect()
    }
}

/// Creates and removes group volume directories
#[derive(Debug, Clone)]
pub struct VolumeManager {
    root: PathBuf,
}

impl Default for VolumeManager {
    fn default() -> Self {
        Self::new(DEFAULT_VOLUME_ROOT)
    }
}

impl VolumeManager {
    /// Manager rooted at `root`
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create one empty directory per volume
    ///
    /// Directories created by a failed call are removed again before the
    /// error is returned. Existing directories are reused.
    pub async fn provision(&self, group: &GroupName, volumes: &[Volume]) -> Result<VolumeSet, ResourceError> {
        let base = self.root.join(group.as_str());
        let mut set = VolumeSet {
            group: group.clone(),
            base: base.clone(),
            volumes: BTreeMap::new(),
        };

        for volume in volumes {
            let path = base.join(&volume.name);
            if let Err(source) = fs::create_dir_all(&path).await {
                warn!(
                    group = %group,
                    volume = %volume.name,
                    error = %source,
                    "Volume provisioning failed, rolling back"
                );
                if let Err(e) = self.release(set).await {
                    warn!(group = %group, error = %e, "Volume rollback incomplete");
                }
                return Err(ResourceError::VolumeIo { path, source });
            }
            debug!(group = %group, volume = %volume.name, path = %path.display(), "Volume provisioned");
            set.volumes.insert(volume.name.clone(), path);
        }

        Ok(set)
    }

    /// Delete every directory of a volume set
    ///
    /// Missing directories are not an error. The group directory is removed
    /// once it is empty.
    pub async fn release(&self, set: VolumeSet) -> Result<(), ResourceError> {
        for (name, path) in &set.volumes {
            match fs::remove_dir_all(path).await {
                Ok(()) => debug!(group = %set.group, volume = %name, "Volume removed"),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(source) => {
                    return Err(ResourceError::VolumeIo {
                        path: path.clone(),
                        source,
                    });
                }
            }
        }

        // Other entries may have been placed there by someone else; leave them
        if let Err(e) = fs::remove_dir(&set.base).await {
            if e.kind() != ErrorKind::NotFound {
                debug!(path = %set.base.display(), error = %e, "Group volume directory kept");
            }
        }

        Ok(())
    }
}
