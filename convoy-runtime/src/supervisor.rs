//! Per-container supervision
//!
//! A [`ContainerSupervisor`] owns the lifecycle of one container: it creates
//! and starts it, waits for it to exit, restarts it with backoff and finally
//! stops and removes it. Every transition is reported to the group's
//! aggregator as a [`ContainerEvent`]. Containers the supervisor could not
//! stop or remove are handed back to the controller when its task ends.
//!
//! ```text
//! Pending ──► Provisioning ──► Running ──► Failed ──(backoff)──► Provisioning
//!                                 │          │
//!                                 ▼          ▼ (budget exhausted)
//!                            Terminating   Failed [permanent]
//!                                 │
//!                                 ▼
//!                             Terminated
//! ```

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime};

use convoy_core::{
    ContainerEvent, ContainerRef, ContainerRuntimeState, ContainerSpec, RuntimeError,
    SupervisionError, TeardownFailure,
};
use convoy_namespace::{NamespaceHandle, NamespaceManager};
use convoy_resources::MountDescriptor;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::driver::{ExitStatus, RuntimeDriver};
use crate::restart::RestartPolicy;

/// Container currently owned by a supervisor, shared with the controller so
/// it can force-kill it if the supervisor does not stop in time or could not
/// remove it
pub(crate) type CurrentContainer = Arc<Mutex<Option<ContainerRef>>>;

/// Stop request: `None` until a stop with the given grace period is requested
type StopSignal = watch::Receiver<Option<Duration>>;

/// Why the monitor stopped waiting
enum Outcome {
    Stopped(Duration),
    Exited(Result<ExitStatus, RuntimeError>),
}

/// Supervises one container of a group
pub struct ContainerSupervisor {
    spec: Arc<ContainerSpec>,
    driver: Arc<dyn RuntimeDriver>,
    namespaces: Arc<NamespaceManager>,
    namespace: NamespaceHandle,
    mounts: Vec<MountDescriptor>,
    policy: RestartPolicy,
    events: mpsc::Sender<ContainerEvent>,
    current: CurrentContainer,
    restarts: u32,
}

/// Controls a running supervisor task
#[derive(Debug)]
pub struct SupervisorHandle {
    name: String,
    stop: watch::Sender<Option<Duration>>,
    current: CurrentContainer,
    task: JoinHandle<Vec<TeardownFailure>>,
}

impl SupervisorHandle {
    /// Container name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ask the supervisor to stop its container
    ///
    /// Only the first request counts; later calls are ignored.
    pub fn stop(&self, grace: Duration) {
        let first = self.stop.send_if_modified(|requested| {
            if requested.is_some() {
                return false;
            }
            *requested = Some(grace);
            true
        });
        if first {
            tracing::debug!(container = %self.name, grace_ms = grace.as_millis(), "Stop requested");
        }
    }

    /// Whether the supervisor task has ended
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Container the supervisor currently owns, if any
    #[must_use]
    pub fn current(&self) -> Option<ContainerRef> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn into_parts(self) -> (String, CurrentContainer, JoinHandle<Vec<TeardownFailure>>) {
        (self.name, self.current, self.task)
    }
}

impl ContainerSupervisor {
    /// Create a supervisor; nothing happens until [`spawn`](Self::spawn)
    #[must_use]
    pub fn new(
        spec: Arc<ContainerSpec>,
        driver: Arc<dyn RuntimeDriver>,
        namespaces: Arc<NamespaceManager>,
        namespace: NamespaceHandle,
        mounts: Vec<MountDescriptor>,
        policy: RestartPolicy,
        events: mpsc::Sender<ContainerEvent>,
    ) -> Self {
        Self {
            spec,
            driver,
            namespaces,
            namespace,
            mounts,
            policy,
            events,
            current: Arc::new(Mutex::new(None)),
            restarts: 0,
        }
    }

    /// Run the supervisor on its own task
    #[must_use]
    pub fn spawn(self) -> SupervisorHandle {
        let (stop, stop_rx) = watch::channel(None);
        let name = self.spec.name.clone();
        let current = Arc::clone(&self.current);
        let task = tokio::spawn(self.run(stop_rx));

        SupervisorHandle {
            name,
            stop,
            current,
            task,
        }
    }

    /// Supervision loop; returns once the container is terminated
    ///
    /// The returned failures are the stop and remove errors the supervisor
    /// could not recover from. If the last container could not be removed it
    /// is left in [`SupervisorHandle::current`].
    pub async fn run(mut self, mut stop: watch::Receiver<Option<Duration>>) -> Vec<TeardownFailure> {
        let mut attempt = 0u32;
        let mut failures = Vec::new();

        let grace = loop {
            if let Some(grace) = requested(&stop) {
                break grace;
            }
            self.reap(&mut failures).await;

            self.report(ContainerRuntimeState::Provisioning).await;

            let (exit_code, reason) = match self.start().await {
                Ok(container) => {
                    self.report(ContainerRuntimeState::Running).await;
                    let started = Instant::now();

                    match self.monitor(&container, &mut stop).await {
                        Outcome::Stopped(grace) => {
                            self.terminate(&container, grace, &mut failures).await;
                            self.report(ContainerRuntimeState::Terminated).await;
                            return failures;
                        }
                        Outcome::Exited(exit) => {
                            // retried by reap before the next attempt
                            if let Err(e) = self.cleanup(&container).await {
                                tracing::warn!(container = %self.spec.name, error = %e, "Remove failed");
                            }
                            if started.elapsed() >= self.policy.reset_after {
                                attempt = 0;
                            }
                            match exit {
                                Ok(status) => (status.code, status.reason),
                                Err(e) => (None, e.to_string()),
                            }
                        }
                    }
                }
                Err(e) => {
                    self.send(ContainerEvent::Error {
                        container: self.spec.name.clone(),
                        message: e.to_string(),
                        timestamp: SystemTime::now(),
                    })
                    .await;
                    (None, e.to_string())
                }
            };

            attempt += 1;
            let Some(delay) = self.policy.delay_for(attempt) else {
                self.give_up(exit_code, reason).await;
                break wait_for_stop(&mut stop).await;
            };

            self.report(ContainerRuntimeState::Failed {
                exit_code,
                reason,
                permanent: false,
            })
            .await;
            self.send(ContainerEvent::Restarting {
                container: self.spec.name.clone(),
                attempt,
                delay,
                timestamp: SystemTime::now(),
            })
            .await;
            self.restarts += 1;

            tokio::select! {
                biased;
                grace = wait_for_stop(&mut stop) => break grace,
                () = tokio::time::sleep(delay) => {}
            }
        };

        tracing::debug!(container = %self.spec.name, grace_ms = grace.as_millis(), "Stopped while not running");
        self.report(ContainerRuntimeState::Terminating).await;
        self.reap(&mut failures).await;
        self.report(ContainerRuntimeState::Terminated).await;
        failures
    }

    /// Create, attach and start a fresh container
    ///
    /// On failure the container created by this call is removed again; if
    /// that fails too it stays current until the next attempt retries it.
    pub async fn start(&self) -> Result<ContainerRef, RuntimeError> {
        let container = self
            .driver
            .create_container(&self.spec, &self.namespace, &self.mounts)
            .await?;
        self.set_current(Some(container.clone()));

        if let Err(e) = self.namespaces.attach(&self.namespace, &container).await {
            if let Err(e) = self.cleanup(&container).await {
                tracing::warn!(container = %self.spec.name, error = %e, "Remove failed");
            }
            return Err(RuntimeError::Attach {
                container: self.spec.name.clone(),
                message: e.to_string(),
            });
        }

        if let Err(e) = self.driver.start(&container).await {
            if let Err(e) = self.cleanup(&container).await {
                tracing::warn!(container = %self.spec.name, error = %e, "Remove failed");
            }
            return Err(e);
        }

        tracing::debug!(
            group = %self.namespace.group(),
            container = %self.spec.name,
            reference = %container,
            "Container started"
        );

        Ok(container)
    }

    async fn monitor(&self, container: &ContainerRef, stop: &mut StopSignal) -> Outcome {
        tokio::select! {
            biased;
            grace = wait_for_stop(stop) => Outcome::Stopped(grace),
            exit = self.driver.wait_for_exit(container) => Outcome::Exited(exit),
        }
    }

    async fn terminate(&self, container: &ContainerRef, grace: Duration, failures: &mut Vec<TeardownFailure>) {
        self.report(ContainerRuntimeState::Terminating).await;

        if let Err(e) = self.driver.stop(container, grace).await {
            tracing::warn!(container = %self.spec.name, error = %e, "Stop failed");
            failures.push(self.failure(&e));
        }
        if let Err(e) = self.cleanup(container).await {
            tracing::warn!(container = %self.spec.name, error = %e, "Remove failed");
            failures.push(self.failure(&e));
        }
    }

    /// Remove a container and detach it from the namespace
    ///
    /// A container that could not be removed stays current and attached.
    async fn cleanup(&self, container: &ContainerRef) -> Result<(), RuntimeError> {
        self.driver.remove(container).await?;
        self.set_current(None);
        self.namespaces.detach(&self.namespace, container).await;
        Ok(())
    }

    /// Retry removing a container left over from an earlier attempt
    async fn reap(&self, failures: &mut Vec<TeardownFailure>) {
        let leftover = self.current.lock().unwrap_or_else(PoisonError::into_inner).clone();
        let Some(container) = leftover else {
            return;
        };

        if let Err(e) = self.cleanup(&container).await {
            tracing::error!(container = %self.spec.name, reference = %container, error = %e, "Container left behind");
            failures.push(self.failure(&e));
        }
    }

    fn failure(&self, err: &RuntimeError) -> TeardownFailure {
        TeardownFailure {
            target: format!("container {}", self.spec.name),
            message: err.to_string(),
        }
    }

    async fn give_up(&self, exit_code: Option<i32>, reason: String) {
        let err = SupervisionError::RestartBudgetExhausted {
            container: self.spec.name.clone(),
            restarts: self.restarts,
        };
        tracing::error!(group = %self.namespace.group(), error = %err, "Giving up on container");

        self.report(ContainerRuntimeState::Failed {
            exit_code,
            reason,
            permanent: true,
        })
        .await;
        self.send(ContainerEvent::GaveUp {
            container: self.spec.name.clone(),
            restarts: self.restarts,
            timestamp: SystemTime::now(),
        })
        .await;
    }

    fn set_current(&self, container: Option<ContainerRef>) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = container;
    }

    async fn report(&self, state: ContainerRuntimeState) {
        self.send(ContainerEvent::state_changed(self.spec.name.clone(), state))
            .await;
    }

    async fn send(&self, event: ContainerEvent) {
        if self.events.send(event).await.is_err() {
            tracing::trace!(container = %self.spec.name, "Event receiver gone");
        }
    }
}

fn requested(stop: &StopSignal) -> Option<Duration> {
    *stop.borrow()
}

/// Resolves once a stop is requested; a dropped handle counts as a kill
async fn wait_for_stop(stop: &mut StopSignal) -> Duration {
    match stop.wait_for(Option::is_some).await {
        Ok(grace) => grace.unwrap_or_default(),
        Err(_) => Duration::ZERO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{MockCall, MockDriver};
    use convoy_core::{Group, GroupName};
    use convoy_namespace::MockNamespaceBackend;

    struct Harness {
        driver: MockDriver,
        namespaces: Arc<NamespaceManager>,
        namespace: NamespaceHandle,
        events: mpsc::Receiver<ContainerEvent>,
        handle: SupervisorHandle,
    }

    async fn harness(name: &str, policy: RestartPolicy, driver: MockDriver) -> Harness {
        let namespaces = Arc::new(NamespaceManager::new(Arc::new(MockNamespaceBackend::new())));
        let namespace = namespaces
            .provision(&Group::new(GroupName::default()))
            .await
            .unwrap();
        let (tx, events) = mpsc::channel(64);

        let handle = ContainerSupervisor::new(
            Arc::new(ContainerSpec::new(name, "img")),
            Arc::new(driver.clone()),
            Arc::clone(&namespaces),
            namespace.clone(),
            Vec::new(),
            policy,
            tx,
        )
        .spawn();

        Harness {
            driver,
            namespaces,
            namespace,
            events,
            handle,
        }
    }

    async fn next_state(events: &mut mpsc::Receiver<ContainerEvent>) -> ContainerRuntimeState {
        loop {
            match events.recv().await {
                Some(ContainerEvent::StateChanged { state, .. }) => return state,
                Some(_) => {}
                None => panic!("supervisor ended"),
            }
        }
    }

    fn fast() -> RestartPolicy {
        RestartPolicy::default()
            .with_base_delay(Duration::from_millis(10))
            .with_max_delay(Duration::from_millis(40))
            .with_max_restarts(3)
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_then_stop() {
        let mut h = harness("web", fast(), MockDriver::new()).await;

        assert_eq!(next_state(&mut h.events).await, ContainerRuntimeState::Provisioning);
        assert_eq!(next_state(&mut h.events).await, ContainerRuntimeState::Running);
        assert_eq!(h.namespaces.attached_count(h.namespace.group()).await, Some(1));
        assert!(h.handle.current().is_some());

        h.handle.stop(Duration::from_secs(1));
        h.handle.stop(Duration::from_secs(9));
        assert_eq!(next_state(&mut h.events).await, ContainerRuntimeState::Terminating);
        assert_eq!(next_state(&mut h.events).await, ContainerRuntimeState::Terminated);

        let (_, current, task) = h.handle.into_parts();
        task.await.unwrap();
        assert!(current.lock().unwrap().is_none());
        assert_eq!(h.driver.live_count().await, 0);
        assert_eq!(h.namespaces.attached_count(h.namespace.group()).await, Some(0));
        assert!(h.driver.journal().await.contains(&MockCall::Stop {
            container: "web".to_string(),
            grace: Duration::from_secs(1),
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_remove_on_stop_is_reported() {
        let mut h = harness("web", fast(), MockDriver::new()).await;
        next_state(&mut h.events).await;
        next_state(&mut h.events).await;

        h.driver.fail_remove("web", 1).await;
        h.handle.stop(Duration::from_secs(1));
        assert_eq!(next_state(&mut h.events).await, ContainerRuntimeState::Terminating);
        assert_eq!(next_state(&mut h.events).await, ContainerRuntimeState::Terminated);

        let (_, current, task) = h.handle.into_parts();
        let failures = task.await.unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].target, "container web");

        // left for the controller to kill
        assert!(current.lock().unwrap().is_some());
        assert_eq!(h.driver.live_count().await, 1);
        assert_eq!(h.namespaces.attached_count(h.namespace.group()).await, Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_remove_after_exit_is_retried() {
        let mut h = harness("web", fast(), MockDriver::new()).await;
        next_state(&mut h.events).await;
        next_state(&mut h.events).await;
        let first = h.handle.current().unwrap();

        h.driver.fail_remove("web", 1).await;
        assert!(h.driver.exit("web", 1).await);

        assert!(next_state(&mut h.events).await.is_failed());
        assert_eq!(next_state(&mut h.events).await, ContainerRuntimeState::Provisioning);
        assert_eq!(next_state(&mut h.events).await, ContainerRuntimeState::Running);

        assert_ne!(h.handle.current().unwrap(), first);
        assert_eq!(h.driver.live_count().await, 1);
        assert_eq!(h.namespaces.attached_count(h.namespace.group()).await, Some(1));

        h.handle.stop(Duration::from_secs(1));
        let (_, _, task) = h.handle.into_parts();
        assert!(task.await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unexpected_exit_restarts_fresh_container() {
        let mut h = harness("web", fast(), MockDriver::new()).await;
        next_state(&mut h.events).await;
        next_state(&mut h.events).await;
        let first = h.handle.current().unwrap();

        assert!(h.driver.exit("web", 0).await);

        match next_state(&mut h.events).await {
            ContainerRuntimeState::Failed { exit_code, permanent, .. } => {
                assert_eq!(exit_code, Some(0));
                assert!(!permanent);
            }
            other => panic!("unexpected state {other}"),
        }
        assert_eq!(next_state(&mut h.events).await, ContainerRuntimeState::Provisioning);
        assert_eq!(next_state(&mut h.events).await, ContainerRuntimeState::Running);

        assert_ne!(h.handle.current().unwrap(), first);
        assert_eq!(h.driver.create_count("web").await, 2);
        assert_eq!(h.driver.live_count().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_grows_then_gives_up() {
        let driver = MockDriver::new();
        driver.crash_on_start("web", 1).await;
        let mut h = harness("web", fast(), driver).await;

        let mut delays = Vec::new();
        let restarts = loop {
            match h.events.recv().await.unwrap() {
                ContainerEvent::Restarting { delay, .. } => delays.push(delay),
                ContainerEvent::GaveUp { restarts, .. } => break restarts,
                _ => {}
            }
        };

        assert_eq!(restarts, 3);
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(10),
                Duration::from_millis(20),
                Duration::from_millis(40),
            ]
        );
        assert_eq!(h.driver.create_count("web").await, 4);
        assert_eq!(h.driver.live_count().await, 0);

        // a permanently failed container still ends up terminated
        h.handle.stop(Duration::from_secs(1));
        assert_eq!(next_state(&mut h.events).await, ContainerRuntimeState::Terminating);
        assert_eq!(next_state(&mut h.events).await, ContainerRuntimeState::Terminated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_failure_counts_as_attempt() {
        let driver = MockDriver::new();
        driver.fail_start("web", 1).await;
        let mut h = harness("web", fast(), driver).await;

        assert_eq!(next_state(&mut h.events).await, ContainerRuntimeState::Provisioning);
        match next_state(&mut h.events).await {
            ContainerRuntimeState::Failed { exit_code, .. } => assert_eq!(exit_code, None),
            other => panic!("unexpected state {other}"),
        }
        assert_eq!(next_state(&mut h.events).await, ContainerRuntimeState::Provisioning);
        assert_eq!(next_state(&mut h.events).await, ContainerRuntimeState::Running);

        // the container whose start failed was removed and detached
        assert_eq!(h.driver.live_count().await, 1);
        assert_eq!(h.namespaces.attached_count(h.namespace.group()).await, Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_backoff() {
        let driver = MockDriver::new();
        driver.crash_on_start("web", 2).await;
        let policy = fast().with_base_delay(Duration::from_secs(60)).with_max_delay(Duration::from_secs(60));
        let mut h = harness("web", policy, driver).await;

        loop {
            if let ContainerEvent::Restarting { .. } = h.events.recv().await.unwrap() {
                break;
            }
        }
        h.handle.stop(Duration::from_secs(1));

        assert_eq!(next_state(&mut h.events).await, ContainerRuntimeState::Terminating);
        assert_eq!(next_state(&mut h.events).await, ContainerRuntimeState::Terminated);
        assert_eq!(h.driver.create_count("web").await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_uptime_resets_budget() {
        let policy = fast().with_max_restarts(1).with_reset_after(Duration::from_secs(5));
        let mut h = harness("web", policy, MockDriver::new()).await;

        for _ in 0..3 {
            // Provisioning, Running
            next_state(&mut h.events).await;
            next_state(&mut h.events).await;
            tokio::time::sleep(Duration::from_secs(6)).await;
            assert!(h.driver.exit("web", 1).await);

            match next_state(&mut h.events).await {
                ContainerRuntimeState::Failed { permanent, .. } => assert!(!permanent),
                other => panic!("unexpected state {other}"),
            }
        }
    }
}
