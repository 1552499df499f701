//! Burrow Core - Foundation types, events, and utilities
//!
//! This crate provides the abstractions shared by the namespace and
//! network crates: the error taxonomy, validated identifiers, child
//! status reporting and lifecycle events.

#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod events;
pub mod privilege;
pub mod types;

pub use error::{Error, Result, SetupStep};
pub use events::LifecycleEvent;
pub use types::{
    ChildStatus, ExitClass, ExitReason, InterfaceName, NamespaceHandle, NamespaceIdentity,
    NamespaceKind, NetNamespaceName, ProcessId,
};
