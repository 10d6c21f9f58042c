//! Group orchestration and container supervision
//!
//! The [`GroupController`] turns a validated [`Group`](convoy_core::Group)
//! into running containers:
//!
//! 1. cross-container invariants are checked before anything is touched
//! 2. the shared namespace, the volumes and the host ports are provisioned
//! 3. one [`ContainerSupervisor`] per container runs on its own task,
//!    restarting it according to its [`RestartPolicy`]
//!
//! Containers are driven through a [`RuntimeDriver`]. [`DockerDriver`] talks
//! to a local Docker daemon; [`MockDriver`] keeps everything in memory.

#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod config;
pub mod controller;
pub mod docker;
pub mod driver;
pub mod restart;
pub mod supervisor;

pub use config::ControllerConfig;
pub use controller::{GroupController, GroupHandle};
pub use docker::{DockerDriver, DockerNetworkBackend};
pub use driver::{CreatedContainer, ExitStatus, MockCall, MockDriver, RuntimeDriver};
pub use restart::RestartPolicy;
pub use supervisor::{ContainerSupervisor, SupervisorHandle};
