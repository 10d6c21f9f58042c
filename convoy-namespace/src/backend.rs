//! Namespace backend abstraction
//!
//! Backends create and destroy the namespace itself. The manager above them
//! does the bookkeeping, so a backend never sees attach or detach calls.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use convoy_core::{Group, GroupName, ResourceError};
use tokio::sync::Mutex;

/// Creates and destroys group network namespaces
///
/// # Thread Safety
/// All implementations must be `Send + Sync` for use across async tasks.
#[async_trait]
pub trait NamespaceBackend: Send + Sync {
    /// Create the namespace of a group
    ///
    /// Returns the network reference containers pass to the runtime to join
    /// the namespace.
    async fn create(&self, group: &Group) -> Result<String, ResourceError>;

    /// Destroy a namespace previously returned by [`create`](Self::create)
    async fn destroy(&self, group: &GroupName, network: &str) -> Result<(), ResourceError>;
}

/// In-memory backend for tests
///
/// # Example
/// ```
/// use convoy_core::{Group, GroupName};
/// use convoy_namespace::{MockNamespaceBackend, NamespaceBackend};
///
/// # #[tokio::main]
/// # async fn main() {
/// let backend = MockNamespaceBackend::new();
/// let group = Group::new(GroupName::default());
///
/// let network = backend.create(&group).await.unwrap();
/// assert!(backend.is_live(&network).await);
///
/// backend.destroy(&group.name, &network).await.unwrap();
/// assert_eq!(backend.live_count().await, 0);
/// # }
/// ```
#[derive(Clone, Default)]
pub struct MockNamespaceBackend {
    state: Arc<Mutex<MockState>>,
}

#[derive(Default)]
struct MockState {
    live: BTreeSet<String>,
    created: usize,
    destroyed: usize,
    fail_create: bool,
    fail_destroy: bool,
}

impl MockNamespaceBackend {
    /// Create a new mock backend
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following `create` fail
    pub async fn fail_create(&self, fail: bool) {
        self.state.lock().await.fail_create = fail;
    }

    /// Make every following `destroy` fail
    pub async fn fail_destroy(&self, fail: bool) {
        self.state.lock().await.fail_destroy = fail;
    }

    /// Whether a network reference is currently live
    pub async fn is_live(&self, network: &str) -> bool {
        self.state.lock().await.live.contains(network)
    }

    /// Number of live namespaces
    pub async fn live_count(&self) -> usize {
        self.state.lock().await.live.len()
    }

    /// Number of successful creates
    pub async fn created_count(&self) -> usize {
        self.state.lock().await.created
    }

    /// Number of successful destroys
    pub async fn destroyed_count(&self) -> usize {
        self.state.lock().await.destroyed
    }
}

impl std::fmt::Debug for MockNamespaceBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockNamespaceBackend").finish_non_exhaustive()
    }
}

#[async_trait]
impl NamespaceBackend for MockNamespaceBackend {
    async fn create(&self, group: &Group) -> Result<String, ResourceError> {
        let mut state = self.state.lock().await;
        if state.fail_create {
            return Err(ResourceError::Namespace {
                group: group.name.to_string(),
                message: "mock create failure".to_string(),
            });
        }

        let network = format!("mock:{}", group.name);
        state.live.insert(network.clone());
        state.created += 1;

        tracing::debug!(group = %group.name, network = %network, "Mock: Created namespace");

        Ok(network)
    }

    async fn destroy(&self, group: &GroupName, network: &str) -> Result<(), ResourceError> {
        let mut state = self.state.lock().await;
        if state.fail_destroy {
            return Err(ResourceError::Namespace {
                group: group.to_string(),
                message: "mock destroy failure".to_string(),
            });
        }

        if state.live.remove(network) {
            state.destroyed += 1;
        }

        tracing::debug!(group = %group, network, "Mock: Destroyed namespace");

        Ok(())
    }
}
