//! Docker CLI driver
//!
//! Containers are managed by shelling out to the `docker` binary. A group's
//! network namespace belongs to a small infra container named `<group>.net`;
//! every container of the group joins it with `--net container:<group>.net`
//! and all host ports are published on it. Joined containers share the infra
//! container's hostname; docker refuses `--hostname` together with a
//! container network mode.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use convoy_core::{ContainerRef, ContainerSpec, Group, GroupName, ResourceError, RuntimeError};
use convoy_namespace::{NamespaceBackend, NamespaceHandle};
use convoy_resources::MountDescriptor;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::driver::{ExitStatus, RuntimeDriver};

/// Binary used when none is configured
pub const DEFAULT_DOCKER: &str = "docker";

/// Image of the infra container
pub const INFRA_IMAGE: &str = "busybox";

/// Keeps the infra container alive without consuming CPU
const INFRA_COMMAND: [&str; 3] = ["sh", "-c", "rm -f nap && mkfifo nap && exec cat nap"];

async fn docker(binary: &Path, args: &[String]) -> Result<String, String> {
    debug!(command = %args.join(" "), "Running docker");

    let output = Command::new(binary)
        .args(args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| format!("failed to run {}: {e}", binary.display()))?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Err(if stderr.is_empty() {
            format!("docker exited with {}", output.status)
        } else {
            stderr
        })
    }
}

fn args<const N: usize>(fixed: [&str; N]) -> Vec<String> {
    fixed.iter().map(ToString::to_string).collect()
}

/// `docker stop -t` takes whole seconds; never round a grace period down to
/// an immediate kill
fn stop_timeout(grace: Duration) -> u128 {
    grace.as_millis().div_ceil(1000)
}

/// Removes a named container when dropped while armed
///
/// Guards `create_container` against being cancelled after docker has
/// already created the container but before its id was handed back.
struct RemoveOnDrop {
    binary: PathBuf,
    name: String,
    armed: bool,
}

impl RemoveOnDrop {
    fn new(binary: &Path, name: &str) -> Self {
        Self {
            binary: binary.to_path_buf(),
            name: name.to_string(),
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for RemoveOnDrop {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(container = %self.name, "No runtime to remove abandoned container");
            return;
        };

        let binary = std::mem::take(&mut self.binary);
        let name = std::mem::take(&mut self.name);
        runtime.spawn(async move {
            if let Err(e) = docker(&binary, &args(["rm", "-f", name.as_str()])).await {
                debug!(container = %name, error = %e, "Abandoned container not removed");
            }
        });
    }
}

/// Runtime driver backed by the docker CLI
#[derive(Debug, Clone)]
pub struct DockerDriver {
    binary: PathBuf,
    pull_attempts: u32,
    pull_interval: Duration,
}

impl Default for DockerDriver {
    fn default() -> Self {
        Self::new(DEFAULT_DOCKER)
    }
}

impl DockerDriver {
    /// Driver using the given docker binary
    #[must_use]
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            pull_attempts: 10,
            pull_interval: Duration::from_secs(3),
        }
    }

    /// Set how often and how far apart image pulls are attempted
    #[must_use]
    pub fn with_pull_retries(mut self, attempts: u32, interval: Duration) -> Self {
        self.pull_attempts = attempts.max(1);
        self.pull_interval = interval;
        self
    }

    async fn pull(&self, spec: &ContainerSpec) -> Result<(), RuntimeError> {
        let mut last = String::new();
        for attempt in 1..=self.pull_attempts {
            match docker(&self.binary, &args(["pull", spec.image.as_str()])).await {
                Ok(_) => return Ok(()),
                Err(e) => {
                    let left = self.pull_attempts - attempt;
                    warn!(image = %spec.image, error = %e, left, "Image pull failed");
                    last = e;
                    if left > 0 {
                        tokio::time::sleep(self.pull_interval).await;
                    }
                }
            }
        }

        Err(RuntimeError::Create {
            container: spec.name.clone(),
            message: format!("failed to pull {}: {last}", spec.image),
        })
    }

    fn create_args(spec: &ContainerSpec, name: &str, namespace: &NamespaceHandle, mounts: &[MountDescriptor]) -> Vec<String> {
        let mut args = args(["create", "--name", name]);
        args.push("--net".to_string());
        args.push(namespace.network().to_string());

        if let Some(dir) = &spec.working_dir {
            args.push("--workdir".to_string());
            args.push(dir.clone());
        }
        for mount in mounts {
            args.push("-v".to_string());
            args.push(mount.bind_spec());
        }
        for (key, value) in spec.resolved_env() {
            args.push("-e".to_string());
            args.push(format!("{key}={value}"));
        }

        args.push(spec.image.clone());
        args.extend(spec.command.iter().cloned());
        args
    }
}

#[async_trait]
impl RuntimeDriver for DockerDriver {
    async fn create_container(
        &self,
        spec: &ContainerSpec,
        namespace: &NamespaceHandle,
        mounts: &[MountDescriptor],
    ) -> Result<ContainerRef, RuntimeError> {
        let name = format!("{}.{}", namespace.group(), spec.name);
        let guard = RemoveOnDrop::new(&self.binary, &name);

        self.pull(spec).await?;

        // a stale container from an earlier run would block the name
        if docker(&self.binary, &args(["rm", "-f", name.as_str()])).await.is_ok() {
            debug!(container = %name, "Removed stale container");
        }

        let id = docker(&self.binary, &Self::create_args(spec, &name, namespace, mounts))
            .await
            .map_err(|message| RuntimeError::Create {
                container: spec.name.clone(),
                message,
            })?;

        guard.disarm();
        info!(container = %name, id = %id, image = %spec.image, "Container created");
        Ok(ContainerRef::new(id))
    }

    async fn start(&self, container: &ContainerRef) -> Result<(), RuntimeError> {
        docker(&self.binary, &args(["start", container.as_str()]))
            .await
            .map(drop)
            .map_err(|message| RuntimeError::Start {
                container: container.to_string(),
                message,
            })
    }

    async fn wait_for_exit(&self, container: &ContainerRef) -> Result<ExitStatus, RuntimeError> {
        let out = docker(&self.binary, &args(["wait", container.as_str()]))
            .await
            .map_err(|message| RuntimeError::Wait {
                container: container.to_string(),
                message,
            })?;

        out.parse::<i32>()
            .map(ExitStatus::from_code)
            .map_err(|e| RuntimeError::Wait {
                container: container.to_string(),
                message: format!("unexpected exit code {out:?}: {e}"),
            })
    }

    async fn stop(&self, container: &ContainerRef, grace: Duration) -> Result<(), RuntimeError> {
        let secs = stop_timeout(grace).to_string();
        docker(&self.binary, &args(["stop", "-t", secs.as_str(), container.as_str()]))
            .await
            .map(drop)
            .map_err(|message| RuntimeError::Stop {
                container: container.to_string(),
                message,
            })
    }

    async fn remove(&self, container: &ContainerRef) -> Result<(), RuntimeError> {
        docker(&self.binary, &args(["rm", "-f", container.as_str()]))
            .await
            .map(drop)
            .map_err(|message| RuntimeError::Remove {
                container: container.to_string(),
                message,
            })
    }
}

/// Namespace backend that parks each group namespace in an infra container
#[derive(Debug, Clone)]
pub struct DockerNetworkBackend {
    binary: PathBuf,
    image: String,
}

impl Default for DockerNetworkBackend {
    fn default() -> Self {
        Self::new(DEFAULT_DOCKER)
    }
}

impl DockerNetworkBackend {
    /// Backend using the given docker binary
    #[must_use]
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            image: INFRA_IMAGE.to_string(),
        }
    }

    /// Use another image for infra containers
    #[must_use]
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    /// Name of the infra container of a group
    #[must_use]
    pub fn infra_name(group: &GroupName) -> String {
        format!("{group}.net")
    }

    fn run_args(&self, group: &Group) -> Vec<String> {
        let name = Self::infra_name(&group.name);
        let mut args = args(["run", "-d", "--name", name.as_str(), "--hostname", group.name.as_str()]);

        for (_, port) in group.port_mappings() {
            args.push("-p".to_string());
            args.push(format!(
                "{}:{}/{}",
                port.resolved_host_port(),
                port.container_port,
                port.protocol.to_string().to_lowercase()
            ));
        }

        args.push(self.image.clone());
        args.extend(INFRA_COMMAND.iter().map(ToString::to_string));
        args
    }
}

#[async_trait]
impl NamespaceBackend for DockerNetworkBackend {
    async fn create(&self, group: &Group) -> Result<String, ResourceError> {
        let name = Self::infra_name(&group.name);
        let fail = |message: String| ResourceError::Namespace {
            group: group.name.to_string(),
            message,
        };

        let _ = docker(&self.binary, &args(["rm", "-f", name.as_str()])).await;
        docker(&self.binary, &self.run_args(group)).await.map_err(fail)?;

        info!(group = %group.name, container = %name, "Infra container running");
        Ok(format!("container:{name}"))
    }

    async fn destroy(&self, group: &GroupName, _network: &str) -> Result<(), ResourceError> {
        let name = Self::infra_name(group);
        docker(&self.binary, &args(["rm", "-f", name.as_str()]))
            .await
            .map(drop)
            .map_err(|message| ResourceError::Namespace {
                group: group.to_string(),
                message,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use convoy_core::{PortMapping, Protocol};
    use convoy_namespace::{MockNamespaceBackend, NamespaceManager};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_create_args() {
        let spec = ContainerSpec::new("web", "nginx:1.25")
            .with_working_dir("/srv")
            .with_env("MODE", "a")
            .with_env("MODE", "b")
            .with_command(["nginx", "-g", "daemon off;"]);
        let mounts = vec![MountDescriptor {
            volume: "data".to_string(),
            host_path: PathBuf::from("/export/shop/data"),
            container_path: "/srv".to_string(),
            read_only: true,
        }];

        let namespace = NamespaceManager::new(Arc::new(MockNamespaceBackend::new()))
            .provision(&Group::new(GroupName::new("shop").unwrap()))
            .await
            .unwrap();

        let args = DockerDriver::create_args(&spec, "shop.web", &namespace, &mounts);
        assert_eq!(
            args,
            vec![
                "create", "--name", "shop.web", "--net", "mock:shop",
                "--workdir", "/srv", "-v", "/export/shop/data:/srv:ro", "-e", "MODE=b",
                "nginx:1.25", "nginx", "-g", "daemon off;",
            ]
        );
    }

    #[test]
    fn test_infra_publishes_group_ports() {
        let group = Group::new(GroupName::new("shop").unwrap())
            .with_container(ContainerSpec::new("web", "nginx").with_port(PortMapping::new("http", 80).with_host_port(8080)))
            .with_container(
                ContainerSpec::new("dns", "coredns")
                    .with_port(PortMapping::new("dns", 53).with_protocol(Protocol::Udp)),
            );

        let args = DockerNetworkBackend::default().run_args(&group);
        assert_eq!(&args[..6], &["run", "-d", "--name", "shop.net", "--hostname", "shop"]);
        assert!(args.windows(2).any(|w| w == ["-p", "8080:80/tcp"]));
        assert!(args.windows(2).any(|w| w == ["-p", "53:53/udp"]));
        assert_eq!(args[args.len() - 4], INFRA_IMAGE);
    }

    #[test]
    fn test_stop_timeout_rounds_up() {
        assert_eq!(stop_timeout(Duration::ZERO), 0);
        assert_eq!(stop_timeout(Duration::from_millis(100)), 1);
        assert_eq!(stop_timeout(Duration::from_secs(10)), 10);
        assert_eq!(stop_timeout(Duration::from_millis(10_001)), 11);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancelled_create_removes_container() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("calls.log");
        let binary = dir.path().join("docker");
        std::fs::write(
            &binary,
            format!("#!/bin/sh\necho \"$@\" >> {}\n[ \"$1\" = pull ] && sleep 10\nexit 0\n", log.display()),
        )
        .unwrap();
        std::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o755)).unwrap();

        let namespace = NamespaceManager::new(Arc::new(MockNamespaceBackend::new()))
            .provision(&Group::new(GroupName::new("shop").unwrap()))
            .await
            .unwrap();
        let driver = DockerDriver::new(&binary);

        let create = tokio::spawn(async move {
            driver
                .create_container(&ContainerSpec::new("web", "nginx"), &namespace, &[])
                .await
        });
        tokio::time::sleep(Duration::from_millis(300)).await;
        create.abort();
        assert!(create.await.unwrap_err().is_cancelled());

        let removed = async {
            loop {
                let calls = std::fs::read_to_string(&log).unwrap_or_default();
                if calls.lines().any(|l| l == "rm -f shop.web") {
                    return calls;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        };
        let calls = tokio::time::timeout(Duration::from_secs(5), removed).await.unwrap();
        assert!(calls.starts_with("pull nginx"));
        assert!(!calls.contains("create"));
    }

    #[tokio::test]
    async fn test_missing_binary_is_reported() {
        let driver = DockerDriver::new("/nonexistent/docker").with_pull_retries(1, Duration::ZERO);
        let err = driver.start(&ContainerRef::new("abc")).await.unwrap_err();
        assert!(matches!(err, RuntimeError::Start { .. }));
    }
}
