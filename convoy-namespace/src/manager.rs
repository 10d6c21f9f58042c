//! Namespace lifecycle management

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use convoy_core::{ContainerRef, Group, GroupName, ResourceError};
use tokio::sync::Mutex;

use crate::backend::NamespaceBackend;

/// Reference to the active namespace of one group
///
/// Immutable once provisioned; supervisors receive clones of it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NamespaceHandle {
    group: GroupName,
    network: String,
}

impl NamespaceHandle {
    /// Owning group
    #[must_use]
    pub const fn group(&self) -> &GroupName {
        &self.group
    }

    /// Network reference understood by the container runtime
    #[must_use]
    pub fn network(&self) -> &str {
        &self.network
    }
}

#[derive(Debug, Default)]
struct Entry {
    // None while the backend is still creating the namespace
    network: Option<String>,
    attached: BTreeSet<String>,
}

/// Tracks one namespace per active group and the containers attached to it
pub struct NamespaceManager {
    backend: Arc<dyn NamespaceBackend>,
    active: Mutex<HashMap<GroupName, Entry>>,
}

impl NamespaceManager {
    /// Create a manager on top of a backend
    #[must_use]
    pub fn new(backend: Arc<dyn NamespaceBackend>) -> Self {
        Self {
            backend,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Create the namespace of a group
    ///
    /// A group name can own at most one active namespace; a second call fails
    /// with [`ResourceError::NamespaceExists`] until the first is released.
    pub async fn provision(&self, group: &Group) -> Result<NamespaceHandle, ResourceError> {
        {
            let mut active = self.active.lock().await;
            if active.contains_key(&group.name) {
                return Err(ResourceError::NamespaceExists {
                    group: group.name.to_string(),
                });
            }
            // reserve the name so the lock is not held across the backend call
            active.insert(group.name.clone(), Entry::default());
        }

        let network = match self.backend.create(group).await {
            Ok(network) => network,
            Err(e) => {
                self.active.lock().await.remove(&group.name);
                tracing::warn!(group = %group.name, error = %e, "Namespace creation failed");
                return Err(e);
            }
        };

        if let Some(entry) = self.active.lock().await.get_mut(&group.name) {
            entry.network = Some(network.clone());
        }

        tracing::info!(group = %group.name, network = %network, "Namespace provisioned");

        Ok(NamespaceHandle {
            group: group.name.clone(),
            network,
        })
    }

    /// Record that a container joined the namespace
    pub async fn attach(&self, handle: &NamespaceHandle, container: &ContainerRef) -> Result<(), ResourceError> {
        let mut active = self.active.lock().await;
        let entry = active
            .get_mut(&handle.group)
            .ok_or_else(|| ResourceError::UnknownNamespace {
                group: handle.group.to_string(),
            })?;

        entry.attached.insert(container.as_str().to_string());
        tracing::debug!(group = %handle.group, container = %container, "Attached to namespace");

        Ok(())
    }

    /// Record that a container left the namespace
    ///
    /// Returns whether the container was attached.
    pub async fn detach(&self, handle: &NamespaceHandle, container: &ContainerRef) -> bool {
        let mut active = self.active.lock().await;
        let removed = active
            .get_mut(&handle.group)
            .is_some_and(|entry| entry.attached.remove(container.as_str()));

        if removed {
            tracing::debug!(group = %handle.group, container = %container, "Detached from namespace");
        }
        removed
    }

    /// Destroy the namespace of a group
    ///
    /// Refuses with [`ResourceError::NamespaceBusy`] while containers are
    /// attached. The group name is freed even if the backend fails to destroy
    /// the namespace, so the error is reported once.
    pub async fn release(&self, handle: &NamespaceHandle) -> Result<(), ResourceError> {
        {
            let mut active = self.active.lock().await;
            let entry = active
                .get(&handle.group)
                .ok_or_else(|| ResourceError::UnknownNamespace {
                    group: handle.group.to_string(),
                })?;

            if !entry.attached.is_empty() {
                return Err(ResourceError::NamespaceBusy {
                    group: handle.group.to_string(),
                    attached: entry.attached.len(),
                });
            }
            active.remove(&handle.group);
        }

        self.backend.destroy(&handle.group, &handle.network).await?;
        tracing::info!(group = %handle.group, "Namespace released");

        Ok(())
    }

    /// Whether a group currently owns a namespace
    pub async fn is_active(&self, group: &GroupName) -> bool {
        self.active
            .lock()
            .await
            .get(group)
            .is_some_and(|entry| entry.network.is_some())
    }

    /// Number of containers attached to a group's namespace
    pub async fn attached_count(&self, group: &GroupName) -> Option<usize> {
        self.active.lock().await.get(group).map(|entry| entry.attached.len())
    }
}

impl std::fmt::Debug for NamespaceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamespaceManager").finish_non_exhaustive()
    }
}
