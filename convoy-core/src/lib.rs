//! Convoy Core - manifest model, validation, and runtime state
//!
//! This crate provides the data types shared by every other Convoy crate:
//! the immutable group model, the invariant checks run before anything is
//! provisioned, the runtime state machines, and the error taxonomy.

#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod events;
pub mod manifest;
pub mod state;
pub mod types;
pub mod validate;

pub use error::{
    Error, PortConflictError, PortOwner, PortSpace, ResourceError, Result, RuntimeError,
    SupervisionError, TeardownError, TeardownFailure, ValidationError,
};
pub use events::ContainerEvent;
pub use manifest::{ContainerSpec, EnvVar, Group, Manifest, PortMapping, Protocol, Volume, VolumeMount};
pub use state::{ContainerRuntimeState, ContainerStatus, GroupRuntimeState, GroupStatus};
pub use types::{ContainerRef, GroupName};
pub use validate::validate_group;
