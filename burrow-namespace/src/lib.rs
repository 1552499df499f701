//! Namespace management for process isolation
//!
//! This crate provides the process side of burrow:
//! - Namespace allocation (`clone` with a dedicated stack, `unshare`)
//! - Launching a program as PID 1 of a fresh PID namespace
//! - The double-fork path for acquiring PID 1 after `unshare`
//! - Reaping children and classifying their termination
//! - Inspecting which namespaces a process belongs to

#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]

pub mod allocator;
pub mod config;
pub mod inspect;
pub mod launcher;
pub mod reaper;
pub mod supervisor;

pub use allocator::{ClonedChild, spawn_in_new_namespace, unshare_current};
pub use config::{NamespaceConfig, NamespaceFlags};
pub use inspect::NamespaceInfo;
pub use launcher::{Launcher, launch_pid1};
pub use reaper::wait_for;
pub use supervisor::{DoubleFork, Phase, Role, Transition};
