//! Group controller
//!
//! Applying a group runs in fixed order: validation, then namespace,
//! volumes and host ports, then one supervisor per container. Any failure
//! before the supervisors start undoes the earlier steps, so a rejected group
//! leaves nothing behind.

use std::sync::{Arc, PoisonError};
use std::time::Duration;

use convoy_core::{
    ContainerEvent, ContainerRuntimeState, ContainerStatus, Group, GroupName,
    GroupRuntimeState, GroupStatus, ResourceError, Result, TeardownError, TeardownFailure,
    validate_group,
};
use convoy_namespace::{NamespaceBackend, NamespaceHandle, NamespaceManager};
use convoy_resources::{MountDescriptor, PortAllocator, VolumeManager, VolumeSet};
use tokio::sync::{Mutex, RwLock, broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout_at};

use crate::config::ControllerConfig;
use crate::driver::RuntimeDriver;
use crate::supervisor::{ContainerSupervisor, CurrentContainer, SupervisorHandle};

/// Runs container groups on one node
///
/// One controller serves any number of groups; they share the driver, the
/// namespace manager and the host port ledger.
pub struct GroupController {
    driver: Arc<dyn RuntimeDriver>,
    namespaces: Arc<NamespaceManager>,
    volumes: VolumeManager,
    ports: Arc<PortAllocator>,
    config: ControllerConfig,
}

impl GroupController {
    /// Create a controller
    #[must_use]
    pub fn new(
        driver: Arc<dyn RuntimeDriver>,
        namespace_backend: Arc<dyn NamespaceBackend>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            driver,
            namespaces: Arc::new(NamespaceManager::new(namespace_backend)),
            volumes: VolumeManager::new(config.volume_root.clone()),
            ports: Arc::new(PortAllocator::new()),
            config,
        }
    }

    /// Share a host port ledger with other controllers
    #[must_use]
    pub fn with_ports(mut self, ports: Arc<PortAllocator>) -> Self {
        self.ports = ports;
        self
    }

    /// Namespace manager used by this controller
    #[must_use]
    pub const fn namespaces(&self) -> &Arc<NamespaceManager> {
        &self.namespaces
    }

    /// Host port ledger
    #[must_use]
    pub const fn ports(&self) -> &Arc<PortAllocator> {
        &self.ports
    }

    /// Controller settings
    #[must_use]
    pub const fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Validate, provision and start a group
    ///
    /// On error nothing stays provisioned and no container was created.
    pub async fn apply(&self, group: Group) -> Result<GroupHandle> {
        validate_group(&group)?;
        PortAllocator::check(&group)?;

        tracing::info!(
            group = %group.name,
            containers = group.containers.len(),
            volumes = group.volumes.len(),
            "Applying group"
        );

        let namespace = self.namespaces.provision(&group).await?;

        let volumes = match self.volumes.provision(&group.name, &group.volumes).await {
            Ok(volumes) => volumes,
            Err(e) => {
                self.rollback(&namespace, None).await;
                return Err(e.into());
            }
        };

        let mounts = group
            .containers
            .iter()
            .map(|spec| volumes.resolve_all(spec))
            .collect::<std::result::Result<Vec<Vec<MountDescriptor>>, ResourceError>>();
        let mounts = match mounts {
            Ok(mounts) => mounts,
            Err(e) => {
                self.rollback(&namespace, Some(volumes)).await;
                return Err(e.into());
            }
        };

        if let Err(e) = self.ports.allocate(&group).await {
            self.rollback(&namespace, Some(volumes)).await;
            return Err(e.into());
        }

        let Group {
            name, containers, ..
        } = group;

        let status = Arc::new(RwLock::new(StatusTable::new(
            name.clone(),
            containers.iter().map(|c| c.name.clone()),
        )));
        // both channel types panic on a zero capacity
        let capacity = self.config.event_buffer.max(1);
        let (reports, reports_rx) = mpsc::channel(capacity);
        let (events, _) = broadcast::channel(capacity);

        let supervisors: Vec<SupervisorHandle> = containers
            .into_iter()
            .zip(mounts)
            .map(|(spec, mounts)| {
                ContainerSupervisor::new(
                    Arc::new(spec),
                    Arc::clone(&self.driver),
                    Arc::clone(&self.namespaces),
                    namespace.clone(),
                    mounts,
                    self.config.restart,
                    reports.clone(),
                )
                .spawn()
            })
            .collect();
        // supervisors hold the only senders; the aggregator ends with them
        drop(reports);

        let aggregator = tokio::spawn(aggregate(
            name.clone(),
            reports_rx,
            Arc::clone(&status),
            events.clone(),
        ));

        tracing::info!(group = %name, supervisors = supervisors.len(), "Group started");

        Ok(GroupHandle {
            inner: Arc::new(GroupInner {
                name,
                status,
                events,
                running: Mutex::new(Some(Running {
                    supervisors,
                    aggregator,
                    namespace,
                    volumes,
                })),
                driver: Arc::clone(&self.driver),
                namespaces: Arc::clone(&self.namespaces),
                volumes: self.volumes.clone(),
                ports: Arc::clone(&self.ports),
                grace: self.config.grace_period,
                deadline: self.config.stop_deadline(),
            }),
        })
    }

    async fn rollback(&self, namespace: &NamespaceHandle, volumes: Option<VolumeSet>) {
        if let Some(volumes) = volumes {
            if let Err(e) = self.volumes.release(volumes).await {
                tracing::warn!(group = %namespace.group(), error = %e, "Volume rollback failed");
            }
        }
        if let Err(e) = self.namespaces.release(namespace).await {
            tracing::warn!(group = %namespace.group(), error = %e, "Namespace rollback failed");
        }
    }
}

impl std::fmt::Debug for GroupController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupController")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Handle to an applied group
///
/// Cheap to clone; every clone refers to the same group.
#[derive(Clone)]
pub struct GroupHandle {
    inner: Arc<GroupInner>,
}

struct GroupInner {
    name: GroupName,
    status: Arc<RwLock<StatusTable>>,
    events: broadcast::Sender<ContainerEvent>,
    // taken by the first teardown
    running: Mutex<Option<Running>>,
    driver: Arc<dyn RuntimeDriver>,
    namespaces: Arc<NamespaceManager>,
    volumes: VolumeManager,
    ports: Arc<PortAllocator>,
    grace: Duration,
    deadline: Duration,
}

struct Running {
    supervisors: Vec<SupervisorHandle>,
    aggregator: JoinHandle<()>,
    namespace: NamespaceHandle,
    volumes: VolumeSet,
}

impl GroupHandle {
    /// Group name
    #[must_use]
    pub fn name(&self) -> &GroupName {
        &self.inner.name
    }

    /// Point-in-time status of the group and its containers
    pub async fn status(&self) -> GroupStatus {
        self.inner.status.read().await.snapshot()
    }

    /// Subscribe to container lifecycle events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ContainerEvent> {
        self.inner.events.subscribe()
    }

    /// Stop every container and release the group's resources
    ///
    /// Supervisors get the grace period plus the kill margin to stop their
    /// containers; whatever is still alive after that, or could not be
    /// removed by its supervisor, is killed. Every
    /// failure is collected and reported together. Only the first call does
    /// anything; later calls return `Ok(())`.
    pub async fn teardown(&self) -> std::result::Result<(), TeardownError> {
        let inner = &self.inner;
        let mut running = inner.running.lock().await;
        let Some(Running {
            supervisors,
            aggregator,
            namespace,
            volumes,
        }) = running.take()
        else {
            return Ok(());
        };

        tracing::info!(group = %inner.name, "Tearing down group");
        inner.status.write().await.set_group_state(GroupRuntimeState::Terminating);

        for supervisor in &supervisors {
            supervisor.stop(inner.grace);
        }

        let mut failures = Vec::new();
        let mut leftovers = Vec::new();
        let mut stragglers = Vec::new();
        let deadline = Instant::now() + inner.deadline;

        for supervisor in supervisors {
            let (name, current, mut task) = supervisor.into_parts();
            match timeout_at(deadline, &mut task).await {
                Ok(Ok(reported)) => failures.extend(reported),
                Ok(Err(e)) => {
                    tracing::error!(group = %inner.name, container = %name, error = %e, "Supervisor failed");
                    stragglers.push(name.clone());
                }
                Err(_) => {
                    tracing::warn!(group = %inner.name, container = %name, "Supervisor did not stop in time");
                    task.abort();
                    // wait for the task to be dropped so its sender goes away
                    let _ = task.await;
                    stragglers.push(name.clone());
                }
            }
            leftovers.push((name, current));
        }

        for (name, current) in &leftovers {
            self.force_kill(name, current, &namespace, &mut failures).await;
        }

        if let Err(e) = aggregator.await {
            tracing::error!(group = %inner.name, error = %e, "Status aggregator failed");
        }

        {
            let mut status = inner.status.write().await;
            for name in &stragglers {
                let event = ContainerEvent::state_changed(name.clone(), ContainerRuntimeState::Terminated);
                event.emit_trace(inner.name.as_str());
                status.apply(&event);
                let _ = inner.events.send(event);
            }
        }

        let released = inner.ports.release(&inner.name).await;
        tracing::debug!(group = %inner.name, released, "Ports released");

        if let Err(e) = inner.volumes.release(volumes).await {
            failures.push(TeardownFailure {
                target: "volumes".to_string(),
                message: e.to_string(),
            });
        }
        if let Err(e) = inner.namespaces.release(&namespace).await {
            failures.push(TeardownFailure {
                target: "namespace".to_string(),
                message: e.to_string(),
            });
        }

        inner.status.write().await.set_group_state(GroupRuntimeState::Terminated);

        if failures.is_empty() {
            tracing::info!(group = %inner.name, "Group terminated");
            Ok(())
        } else {
            let err = TeardownError { failures };
            tracing::error!(group = %inner.name, error = %err, "Group terminated with errors");
            Err(err)
        }
    }

    async fn force_kill(
        &self,
        name: &str,
        current: &CurrentContainer,
        namespace: &NamespaceHandle,
        failures: &mut Vec<TeardownFailure>,
    ) {
        let reference = current.lock().unwrap_or_else(PoisonError::into_inner).clone();
        let Some(reference) = reference else {
            return;
        };

        tracing::warn!(group = %self.inner.name, container = name, reference = %reference, "Killing container");
        let target = format!("container {name}");

        if let Err(e) = self.inner.driver.stop(&reference, Duration::ZERO).await {
            failures.push(TeardownFailure {
                target: target.clone(),
                message: e.to_string(),
            });
        }
        match self.inner.driver.remove(&reference).await {
            Ok(()) => {
                current.lock().unwrap_or_else(PoisonError::into_inner).take();
                self.inner.namespaces.detach(namespace, &reference).await;
            }
            // still attached, so the namespace stays busy and is not released
            Err(e) => failures.push(TeardownFailure {
                target,
                message: e.to_string(),
            }),
        }
    }
}

impl std::fmt::Debug for GroupHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupHandle")
            .field("name", &self.inner.name)
            .finish_non_exhaustive()
    }
}

/// Folds supervisor reports into the status table and fans them out
async fn aggregate(
    group: GroupName,
    mut reports: mpsc::Receiver<ContainerEvent>,
    status: Arc<RwLock<StatusTable>>,
    events: broadcast::Sender<ContainerEvent>,
) {
    while let Some(event) = reports.recv().await {
        event.emit_trace(group.as_str());
        status.write().await.apply(&event);
        // nobody listening is fine
        let _ = events.send(event);
    }
    tracing::debug!(group = %group, "All supervisors finished");
}

struct Slot {
    name: String,
    state: ContainerRuntimeState,
    restarts: u32,
    settled: bool,
}

/// Live status of one group, written only by its aggregator and teardown
struct StatusTable {
    group: GroupName,
    state: GroupRuntimeState,
    containers: Vec<Slot>,
}

impl StatusTable {
    fn new(group: GroupName, names: impl Iterator<Item = String>) -> Self {
        let mut table = Self {
            group,
            state: GroupRuntimeState::Initializing,
            containers: names
                .map(|name| Slot {
                    name,
                    state: ContainerRuntimeState::Pending,
                    restarts: 0,
                    settled: false,
                })
                .collect(),
        };
        table.refresh();
        table
    }

    fn apply(&mut self, event: &ContainerEvent) {
        let Some(slot) = self.containers.iter_mut().find(|s| s.name == event.container()) else {
            return;
        };

        match event {
            ContainerEvent::StateChanged { state, .. } => {
                if state.is_running() || state.is_failed() {
                    slot.settled = true;
                }
                slot.state = state.clone();
            }
            ContainerEvent::Restarting { .. } => slot.restarts += 1,
            ContainerEvent::GaveUp { .. } | ContainerEvent::Error { .. } => {}
        }

        self.refresh();
    }

    fn refresh(&mut self) {
        let settled = self.containers.iter().all(|s| s.settled);
        let next = GroupRuntimeState::aggregate(self.containers.iter().map(|s| &s.state), settled);
        self.set_group_state(next);
    }

    fn set_group_state(&mut self, next: GroupRuntimeState) {
        if next == self.state || !self.state.can_transition_to(next) {
            return;
        }
        tracing::info!(group = %self.group, from = %self.state, to = %next, "Group state changed");
        self.state = next;
    }

    fn snapshot(&self) -> GroupStatus {
        GroupStatus {
            group: self.group.clone(),
            state: self.state,
            containers: self
                .containers
                .iter()
                .map(|s| ContainerStatus {
                    name: s.name.clone(),
                    state: s.state.clone(),
                    restarts: s.restarts,
                })
                .collect(),
        }
    }
}
