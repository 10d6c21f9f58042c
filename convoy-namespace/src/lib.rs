//! Shared network namespaces for container groups
//!
//! Every container of a group joins one network namespace, so they reach each
//! other on `localhost` and share one listening port space. The
//! [`NamespaceManager`] owns the lifecycle of those namespaces and tracks which
//! containers are attached; a [`NamespaceBackend`] does the actual work.

#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]

pub mod backend;
pub mod manager;

pub use backend::{MockNamespaceBackend, NamespaceBackend};
pub use manager::{NamespaceHandle, NamespaceManager};
