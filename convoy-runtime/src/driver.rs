//! Container runtime driver abstraction
//!
//! This trait allows different container runtimes:
//! - [`DockerDriver`](crate::DockerDriver) - Local Docker daemon via its CLI
//! - [`MockDriver`] - In-memory, scriptable, for tests
//!
//! # Thread Safety
//! All implementations must be `Send + Sync`; one driver is shared by every
//! supervisor of every group.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use convoy_core::{ContainerRef, ContainerSpec, RuntimeError};
use convoy_namespace::NamespaceHandle;
use convoy_resources::MountDescriptor;
use nix::sys::signal::Signal;
use tokio::sync::{Mutex, watch};

/// How a container process ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitStatus {
    /// Exit code, if the runtime reported one
    pub code: Option<i32>,
    /// Human readable cause
    pub reason: String,
}

impl ExitStatus {
    /// Status for a process that exited with `code`
    ///
    /// Codes above 128 are reported as the signal that killed the process.
    #[must_use]
    pub fn from_code(code: i32) -> Self {
        Self {
            code: Some(code),
            reason: describe_exit(code),
        }
    }

    /// Whether the process exited with code zero
    #[must_use]
    pub const fn success(&self) -> bool {
        matches!(self.code, Some(0))
    }
}

fn describe_exit(code: i32) -> String {
    if code > 128 {
        if let Ok(signal) = Signal::try_from(code - 128) {
            return format!("killed by {}", signal.as_str());
        }
    }
    if code == 0 {
        "exited".to_string()
    } else {
        format!("exited with code {code}")
    }
}

/// Operations the supervisor needs from a container runtime
#[async_trait]
pub trait RuntimeDriver: Send + Sync {
    /// Create (but do not start) a container joined to `namespace`
    async fn create_container(
        &self,
        spec: &ContainerSpec,
        namespace: &NamespaceHandle,
        mounts: &[MountDescriptor],
    ) -> Result<ContainerRef, RuntimeError>;

    /// Start a created container
    async fn start(&self, container: &ContainerRef) -> Result<(), RuntimeError>;

    /// Wait until the container process exits
    ///
    /// Dropping the future cancels the wait; the container is unaffected.
    async fn wait_for_exit(&self, container: &ContainerRef) -> Result<ExitStatus, RuntimeError>;

    /// Ask the container to stop, killing it after `grace`
    ///
    /// A zero grace period kills immediately.
    async fn stop(&self, container: &ContainerRef, grace: Duration) -> Result<(), RuntimeError>;

    /// Remove a stopped container
    async fn remove(&self, container: &ContainerRef) -> Result<(), RuntimeError>;
}

/// One call observed by the [`MockDriver`], keyed by container name
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    /// `create_container`
    Create(String),
    /// `start`
    Start(String),
    /// `stop`
    Stop {
        /// Container name
        container: String,
        /// Requested grace period
        grace: Duration,
    },
    /// `remove`
    Remove(String),
}

/// What the mock was asked to create
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedContainer {
    /// Reference handed back to the caller
    pub reference: ContainerRef,
    /// Network the container joined
    pub network: String,
    /// Bind mounts
    pub mounts: Vec<MountDescriptor>,
    /// Resolved environment
    pub env: Vec<(String, String)>,
}

struct MockContainer {
    name: String,
    running: bool,
    exit: watch::Sender<Option<ExitStatus>>,
}

#[derive(Default)]
struct MockState {
    next_id: u64,
    containers: HashMap<ContainerRef, MockContainer>,
    created: HashMap<String, CreatedContainer>,
    journal: Vec<MockCall>,
    fail_create: HashMap<String, u32>,
    fail_start: HashMap<String, u32>,
    fail_stop: HashMap<String, u32>,
    fail_remove: HashMap<String, u32>,
    crash_on_start: HashMap<String, i32>,
    ignore_graceful_stop: HashSet<String>,
}

impl MockState {
    fn container(&mut self, reference: &ContainerRef) -> Result<&mut MockContainer, RuntimeError> {
        self.containers
            .get_mut(reference)
            .ok_or_else(|| RuntimeError::UnknownContainer {
                container: reference.to_string(),
            })
    }
}

fn take_failure(budget: &mut HashMap<String, u32>, name: &str) -> bool {
    match budget.get_mut(name) {
        Some(left) if *left > 0 => {
            *left -= 1;
            true
        }
        _ => false,
    }
}

/// In-memory runtime driver for tests
///
/// Containers run until they are told to exit with [`MockDriver::exit`] or
/// are stopped. Failures are scripted per container name.
///
/// # Example
/// ```
/// use convoy_runtime::MockDriver;
///
/// # #[tokio::main]
/// # async fn main() {
/// let driver = MockDriver::new();
/// driver.fail_start("web", 2).await;
/// driver.crash_on_start("worker", 1).await;
///
/// assert!(driver.journal().await.is_empty());
/// assert!(!driver.exit("web", 0).await);
/// # }
/// ```
#[derive(Clone, Default)]
pub struct MockDriver {
    state: Arc<Mutex<MockState>>,
}

impl MockDriver {
    /// Create a new mock driver
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` creates of a container
    pub async fn fail_create(&self, name: &str, times: u32) {
        self.state.lock().await.fail_create.insert(name.to_string(), times);
    }

    /// Fail the next `times` starts of a container
    pub async fn fail_start(&self, name: &str, times: u32) {
        self.state.lock().await.fail_start.insert(name.to_string(), times);
    }

    /// Fail the next `times` stops of a container; the container keeps running
    pub async fn fail_stop(&self, name: &str, times: u32) {
        self.state.lock().await.fail_stop.insert(name.to_string(), times);
    }

    /// Fail the next `times` removes of a container
    pub async fn fail_remove(&self, name: &str, times: u32) {
        self.state.lock().await.fail_remove.insert(name.to_string(), times);
    }

    /// Make every start of a container exit immediately with `code`
    pub async fn crash_on_start(&self, name: &str, code: i32) {
        self.state.lock().await.crash_on_start.insert(name.to_string(), code);
    }

    /// Let a container start normally again
    pub async fn clear_crash(&self, name: &str) {
        self.state.lock().await.crash_on_start.remove(name);
    }

    /// Make a container ignore stops with a grace period
    ///
    /// Such a stop never returns; only a zero grace stop kills it.
    pub async fn ignore_graceful_stop(&self, name: &str) {
        self.state.lock().await.ignore_graceful_stop.insert(name.to_string());
    }

    /// Make the running instance of a container exit with `code`
    ///
    /// Returns false if no instance is running.
    pub async fn exit(&self, name: &str, code: i32) -> bool {
        let mut state = self.state.lock().await;
        let Some(container) = state
            .containers
            .values_mut()
            .find(|c| c.name == name && c.running)
        else {
            return false;
        };

        container.running = false;
        container.exit.send_replace(Some(ExitStatus::from_code(code)));
        tracing::debug!(container = name, code, "Mock: Container exited");
        true
    }

    /// Every call received so far, in order
    pub async fn journal(&self) -> Vec<MockCall> {
        self.state.lock().await.journal.clone()
    }

    /// Number of creates of a container
    pub async fn create_count(&self, name: &str) -> usize {
        self.state
            .lock()
            .await
            .journal
            .iter()
            .filter(|call| matches!(call, MockCall::Create(n) if n == name))
            .count()
    }

    /// Most recent create of a container
    pub async fn created(&self, name: &str) -> Option<CreatedContainer> {
        self.state.lock().await.created.get(name).cloned()
    }

    /// Whether an instance of a container is running
    pub async fn is_running(&self, name: &str) -> bool {
        self.state
            .lock()
            .await
            .containers
            .values()
            .any(|c| c.name == name && c.running)
    }

    /// Number of containers created and not yet removed
    pub async fn live_count(&self) -> usize {
        self.state.lock().await.containers.len()
    }
}

impl std::fmt::Debug for MockDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockDriver").finish_non_exhaustive()
    }
}

#[async_trait]
impl RuntimeDriver for MockDriver {
    async fn create_container(
        &self,
        spec: &ContainerSpec,
        namespace: &NamespaceHandle,
        mounts: &[MountDescriptor],
    ) -> Result<ContainerRef, RuntimeError> {
        let mut state = self.state.lock().await;
        state.journal.push(MockCall::Create(spec.name.clone()));

        if take_failure(&mut state.fail_create, &spec.name) {
            return Err(RuntimeError::Create {
                container: spec.name.clone(),
                message: "mock create failure".to_string(),
            });
        }

        state.next_id += 1;
        let reference = ContainerRef::new(format!("mock-{}", state.next_id));
        let (exit, _) = watch::channel(None);

        state.containers.insert(
            reference.clone(),
            MockContainer {
                name: spec.name.clone(),
                running: false,
                exit,
            },
        );
        state.created.insert(
            spec.name.clone(),
            CreatedContainer {
                reference: reference.clone(),
                network: namespace.network().to_string(),
                mounts: mounts.to_vec(),
                env: spec.resolved_env(),
            },
        );

        tracing::debug!(container = %spec.name, reference = %reference, "Mock: Created container");

        Ok(reference)
    }

    async fn start(&self, container: &ContainerRef) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().await;
        let name = state.container(container)?.name.clone();
        state.journal.push(MockCall::Start(name.clone()));

        if take_failure(&mut state.fail_start, &name) {
            return Err(RuntimeError::Start {
                container: name,
                message: "mock start failure".to_string(),
            });
        }

        let crash = state.crash_on_start.get(&name).copied();
        let entry = state.container(container)?;
        match crash {
            Some(code) => {
                entry.exit.send_replace(Some(ExitStatus::from_code(code)));
            }
            None => entry.running = true,
        }

        Ok(())
    }

    async fn wait_for_exit(&self, container: &ContainerRef) -> Result<ExitStatus, RuntimeError> {
        let mut exit = self.state.lock().await.container(container)?.exit.subscribe();

        let status = exit
            .wait_for(Option::is_some)
            .await
            .map_err(|_| RuntimeError::Wait {
                container: container.to_string(),
                message: "container was removed".to_string(),
            })?
            .clone();

        status.ok_or_else(|| RuntimeError::Wait {
            container: container.to_string(),
            message: "no exit status".to_string(),
        })
    }

    async fn stop(&self, container: &ContainerRef, grace: Duration) -> Result<(), RuntimeError> {
        let hang = {
            let mut state = self.state.lock().await;
            let name = state.container(container)?.name.clone();
            state.journal.push(MockCall::Stop {
                container: name.clone(),
                grace,
            });

            if take_failure(&mut state.fail_stop, &name) {
                return Err(RuntimeError::Stop {
                    container: name,
                    message: "mock stop failure".to_string(),
                });
            }

            let hang = !grace.is_zero() && state.ignore_graceful_stop.contains(&name);
            if !hang {
                let entry = state.container(container)?;
                if entry.running {
                    entry.running = false;
                    let code = if grace.is_zero() { 137 } else { 143 };
                    entry.exit.send_replace(Some(ExitStatus::from_code(code)));
                }
            }
            hang
        };

        if hang {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn remove(&self, container: &ContainerRef) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().await;
        let name = state.container(container)?.name.clone();

        if take_failure(&mut state.fail_remove, &name) {
            return Err(RuntimeError::Remove {
                container: name,
                message: "mock remove failure".to_string(),
            });
        }

        state.containers.remove(container);
        state.journal.push(MockCall::Remove(name));
        Ok(())
    }
}
