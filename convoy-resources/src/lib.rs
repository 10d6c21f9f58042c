//! Shared group resources: host ports and volumes
//!
//! Both managers are owned by the group controller and shared across all
//! groups of one agent, so their bookkeeping sits behind async mutexes.

#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod ports;
pub mod volume;

pub use ports::{PortAllocator, PortBinding};
pub use volume::{DEFAULT_VOLUME_ROOT, MountDescriptor, VolumeManager, VolumeSet};
