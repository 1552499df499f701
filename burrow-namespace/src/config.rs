//! Namespace configuration

use burrow_core::{NamespaceHandle, ProcessId};
use nix::sched::CloneFlags;
use serde::{Deserialize, Serialize};

/// Smallest stack handed to a cloned child (1 MiB)
pub const MIN_STACK_SIZE: usize = 1024 * 1024;

/// Namespace configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamespaceConfig {
    /// Enable PID namespace
    pub pid: bool,

    /// Enable network namespace
    pub network: bool,

    /// Stack size for cloned children, in bytes
    pub stack_size: usize,
}

impl Default for NamespaceConfig {
    fn default() -> Self {
        Self {
            pid: true,
            network: false,
            stack_size: MIN_STACK_SIZE,
        }
    }
}

impl NamespaceConfig {
    /// Create a new namespace configuration (PID namespace only)
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// PID and network namespaces
    #[must_use]
    pub fn isolated() -> Self {
        Self {
            pid: true,
            network: true,
            stack_size: MIN_STACK_SIZE,
        }
    }

    /// Enable PID namespace
    #[must_use]
    pub const fn with_pid(mut self, enable: bool) -> Self {
        self.pid = enable;
        self
    }

    /// Enable network namespace
    #[must_use]
    pub const fn with_network(mut self, enable: bool) -> Self {
        self.network = enable;
        self
    }

    /// Set the child stack size; values below 1 MiB are raised to 1 MiB
    #[must_use]
    pub fn with_stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = bytes.max(MIN_STACK_SIZE);
        self
    }

    /// Namespace flags for this configuration
    #[must_use]
    pub fn flags(&self) -> NamespaceFlags {
        let mut flags = NamespaceFlags::NONE;

        if self.pid {
            flags = flags | NamespaceFlags::PID;
        }
        if self.network {
            flags = flags | NamespaceFlags::NET;
        }

        flags
    }

    /// Check if any namespaces are enabled
    #[must_use]
    pub const fn has_any(&self) -> bool {
        self.pid || self.network
    }

    /// Get list of enabled namespace names
    #[must_use]
    pub fn enabled_namespaces(&self) -> Vec<&'static str> {
        self.flags().names()
    }
}

/// Namespace flags for bitwise operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NamespaceFlags(u32);

impl NamespaceFlags {
    /// PID namespace flag
    pub const PID: Self = Self(0b0000_0001);
    /// Network namespace flag
    pub const NET: Self = Self(0b0000_0010);

    /// All namespaces
    pub const ALL: Self = Self(0b0000_0011);
    /// No namespaces
    pub const NONE: Self = Self(0);

    /// Create from raw value, dropping unknown bits
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits & Self::ALL.0)
    }

    /// Get raw value
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Check if flag is set
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    /// Check if no flag is set
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Convert to kernel clone flags for clone(2) and unshare(2)
    #[must_use]
    pub fn to_clone_flags(self) -> CloneFlags {
        let mut flags = CloneFlags::empty();

        if self.contains(Self::PID) {
            flags |= CloneFlags::CLONE_NEWPID;
        }
        if self.contains(Self::NET) {
            flags |= CloneFlags::CLONE_NEWNET;
        }

        flags
    }

    /// Short names of the set namespaces, as under `/proc/<pid>/ns`
    #[must_use]
    pub fn names(self) -> Vec<&'static str> {
        let mut names = Vec::new();

        if self.contains(Self::PID) {
            names.push("pid");
        }
        if self.contains(Self::NET) {
            names.push("net");
        }

        names
    }

    /// Handles for the namespaces a child with these flags was created in
    #[must_use]
    pub fn handles_for(self, pid: ProcessId) -> Vec<NamespaceHandle> {
        let mut handles = Vec::new();

        if self.contains(Self::PID) {
            handles.push(NamespaceHandle::pid(pid));
        }
        if self.contains(Self::NET) {
            handles.push(NamespaceHandle::network_of(pid));
        }

        handles
    }
}

impl std::ops::BitOr for NamespaceFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitAnd for NamespaceFlags {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}
