//! Network links between the host and isolated network namespaces
//!
//! This crate provides a trait-based abstraction over the host's network
//! configuration tools, with a production backend driving `ip`/`iptables`
//! and an in-memory mock, plus the ordered link provisioning protocol and
//! its idempotent teardown.

#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod addr;
pub mod backend;
pub mod config;
pub mod ip;
pub mod provisioner;
pub mod teardown;

pub use addr::Ipv4Cidr;
pub use backend::{LinkState, MockBackend, NetworkBackend, Operation};
pub use config::{NatConfig, NetworkConfig};
pub use ip::IpCommandBackend;
pub use provisioner::{Provisioner, VethPair};
pub use teardown::TeardownCoordinator;

// Re-export commonly used types
pub use burrow_core::{InterfaceName, NetNamespaceName, SetupStep};
