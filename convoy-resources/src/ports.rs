//! Host port allocation
//!
//! Every container of a group shares one network namespace, so a port can be
//! listened on by at most one container and published on the host at most
//! once. The allocator keeps a ledger of published `(port, protocol)` pairs
//! across every active group of the agent.

use std::collections::HashMap;

use convoy_core::{Group, GroupName, PortConflictError, PortOwner, PortSpace, Protocol};
use tokio::sync::Mutex;

/// A published port owned by one group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortBinding {
    /// Owning mapping
    pub owner: PortOwner,
    /// Port published on the host
    pub host_port: u16,
    /// Port inside the namespace
    pub container_port: u16,
    /// Transport protocol
    pub protocol: Protocol,
}

type PortKey = (u16, Protocol);

/// Allocator of host ports for all groups of one agent
///
/// # Example
/// ```
/// use convoy_core::{ContainerSpec, Group, GroupName, PortMapping};
/// use convoy_resources::PortAllocator;
///
/// # #[tokio::main]
/// # async fn main() {
/// let group = Group::new(GroupName::default())
///     .with_container(ContainerSpec::new("web", "nginx").with_port(PortMapping::new("http", 80)));
///
/// let ports = PortAllocator::new();
/// let bindings = ports.allocate(&group).await.unwrap();
/// assert_eq!(bindings[0].host_port, 80);
///
/// ports.release(&group.name).await;
/// # }
/// ```
#[derive(Debug, Default)]
pub struct PortAllocator {
    ledger: Mutex<HashMap<PortKey, PortOwner>>,
}

impl PortAllocator {
    /// Create an empty allocator
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Check a group for port collisions with itself
    ///
    /// Both the host port space and the shared container port space are
    /// checked, in declaration order. No state is touched.
    pub fn check(group: &Group) -> Result<(), PortConflictError> {
        let mut host: HashMap<PortKey, PortOwner> = HashMap::new();
        let mut inner: HashMap<PortKey, PortOwner> = HashMap::new();

        for (container, mapping) in group.port_mappings() {
            let owner = owner_of(&group.name, &container.name, &mapping.name);

            let host_key = (mapping.resolved_host_port(), mapping.protocol);
            if let Some(first) = host.get(&host_key) {
                return Err(conflict(PortSpace::Host, host_key, first, owner));
            }

            let inner_key = (mapping.container_port, mapping.protocol);
            if let Some(first) = inner.get(&inner_key) {
                return Err(conflict(PortSpace::Container, inner_key, first, owner));
            }

            host.insert(host_key, owner.clone());
            inner.insert(inner_key, owner);
        }

        Ok(())
    }

    /// Reserve every host port of a group, all or nothing
    ///
    /// Host ports default to the container port. Mappings are reserved in
    /// declaration order; on the first conflict every port reserved by this
    /// call is released again and the conflict is returned.
    pub async fn allocate(&self, group: &Group) -> Result<Vec<PortBinding>, PortConflictError> {
        let mut ledger = self.ledger.lock().await;
        let mut bindings: Vec<PortBinding> = Vec::new();

        for (container, mapping) in group.port_mappings() {
            let owner = owner_of(&group.name, &container.name, &mapping.name);
            let key = (mapping.resolved_host_port(), mapping.protocol);

            if let Some(held) = ledger.get(&key) {
                let err = conflict(PortSpace::Host, key, held, owner);
                for binding in &bindings {
                    ledger.remove(&(binding.host_port, binding.protocol));
                }
                tracing::warn!(
                    group = %group.name,
                    port = key.0,
                    protocol = %key.1,
                    rolled_back = bindings.len(),
                    "Port allocation conflict"
                );
                return Err(err);
            }
            ledger.insert(key, owner.clone());

            bindings.push(PortBinding {
                owner,
                host_port: key.0,
                container_port: mapping.container_port,
                protocol: mapping.protocol,
            });
        }

        tracing::debug!(
            group = %group.name,
            ports = bindings.len(),
            "Host ports reserved"
        );

        Ok(bindings)
    }

    /// Free every port owned by a group, returning how many were held
    pub async fn release(&self, group: &GroupName) -> usize {
        let mut ledger = self.ledger.lock().await;
        let before = ledger.len();
        ledger.retain(|_, owner| owner.group != group.as_str());
        let released = before - ledger.len();

        tracing::debug!(group = %group, released, "Host ports released");

        released
    }

    /// Whether a host port is currently reserved
    pub async fn is_reserved(&self, port: u16, protocol: Protocol) -> bool {
        self.ledger.lock().await.contains_key(&(port, protocol))
    }

    /// Number of reserved host ports across all groups
    pub async fn reserved_count(&self) -> usize {
        self.ledger.lock().await.len()
    }
}

fn owner_of(group: &GroupName, container: &str, port: &str) -> PortOwner {
    PortOwner {
        group: group.to_string(),
        container: container.to_string(),
        port: port.to_string(),
    }
}

fn conflict(space: PortSpace, key: PortKey, first: &PortOwner, second: PortOwner) -> PortConflictError {
    PortConflictError {
        space,
        port: key.0,
        protocol: key.1,
        first: first.clone(),
        second,
    }
}
