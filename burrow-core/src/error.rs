//! Error types for Burrow

use nix::errno::Errno;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::types::{ExitReason, ProcessId};

/// Steps of the ordered network setup protocol.
///
/// Every provisioning failure is tagged with the step it happened at so the
/// caller can tell which cleanup was needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetupStep {
    /// Validate addresses before touching the host
    Validate,
    /// Create the named network namespace
    CreateNamespace,
    /// Create the veth pair in the host namespace
    CreateVethPair,
    /// Move the namespace-side end into the namespace
    MoveToNamespace,
    /// Address and bring up the host-side end
    ConfigureHost,
    /// Address and bring up the namespace-side end and loopback
    ConfigureNamespace,
    /// Enable forwarding, route the namespace through the host and
    /// install the masquerade rule
    EnableNat,
}

impl SetupStep {
    /// All steps in protocol order
    pub const ALL: [Self; 7] = [
        Self::Validate,
        Self::CreateNamespace,
        Self::CreateVethPair,
        Self::MoveToNamespace,
        Self::ConfigureHost,
        Self::ConfigureNamespace,
        Self::EnableNat,
    ];

    /// Position in the protocol, `0` being validation
    #[must_use]
    pub const fn ordinal(self) -> usize {
        self as usize
    }
}

impl fmt::Display for SetupStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Validate => "validate configuration",
            Self::CreateNamespace => "create namespace",
            Self::CreateVethPair => "create veth pair",
            Self::MoveToNamespace => "move interface into namespace",
            Self::ConfigureHost => "configure host interface",
            Self::ConfigureNamespace => "configure namespace interfaces",
            Self::EnableNat => "enable outbound NAT",
        };
        write!(f, "step {} ({name})", self.ordinal())
    }
}

/// Burrow error types
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The caller lacks the capability to create namespaces
    #[error("Insufficient privilege: {operation} requires root or CAP_SYS_ADMIN")]
    InsufficientPrivilege {
        /// Operation that was refused
        operation: String,
    },

    /// Stack or other memory could not be reserved
    #[error("Allocation of {size} bytes failed: {reason}")]
    AllocationFailed {
        /// Requested size in bytes
        size: usize,
        /// Allocator message
        reason: String,
    },

    /// The kernel refused to create a namespace
    #[error("Namespace creation failed: {errno}")]
    NamespaceCreateFailed {
        /// Underlying error code
        errno: Errno,
    },

    /// A network namespace with this name already exists
    #[error("Network namespace '{name}' already exists")]
    NamespaceExists {
        /// Namespace name
        name: String,
    },

    /// A network interface with this name already exists
    #[error("Interface '{name}' already exists")]
    InterfaceExists {
        /// Interface name
        name: String,
    },

    /// A network namespace being removed is already gone
    #[error("Network namespace '{name}' not found")]
    NamespaceNotFound {
        /// Namespace name
        name: String,
    },

    /// A link being removed or configured is already gone
    #[error("Interface '{name}' not found")]
    LinkNotFound {
        /// Interface name
        name: String,
    },

    /// Moving an interface into a namespace failed
    #[error("Moving '{interface}' into namespace '{namespace}' failed: {reason}")]
    MoveFailed {
        /// Interface being moved
        interface: String,
        /// Target namespace
        namespace: String,
        /// Failure detail
        reason: String,
    },

    /// Address assignment or link state change failed
    #[error("Configuration failed: {operation}: {reason}")]
    ConfigurationFailed {
        /// Operation that failed
        operation: String,
        /// Failure detail
        reason: String,
    },

    /// Waiting on a child failed or returned something unusable
    #[error("Waiting for child {pid} failed: {message}")]
    ChildWaitFailed {
        /// Child being waited on
        pid: ProcessId,
        /// Failure detail
        message: String,
    },

    /// A child terminated with a non-zero code or a signal
    #[error("Child exited abnormally: {code_or_signal}")]
    AbnormalExit {
        /// Exit code or terminating signal
        code_or_signal: ExitReason,
    },

    /// An external configuration tool returned a failure
    #[error("Command '{program}' failed ({status}): {stderr}")]
    CommandFailed {
        /// Program and arguments
        program: String,
        /// Exit status description
        status: String,
        /// Captured stderr
        stderr: String,
    },

    /// An external configuration tool is not installed
    #[error("Program '{program}' not found")]
    ToolMissing {
        /// Program name or path
        program: String,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {message}")]
    InvalidConfig {
        /// Error message
        message: String,
    },

    /// A network setup step failed; `source` is the original error
    #[error("Network setup failed at {step}: {source}")]
    Setup {
        /// Step that failed
        step: SetupStep,
        /// Original error
        source: Box<Error>,
    },

    /// System error from nix
    #[error("System error: {0}")]
    System(#[from] nix::Error),

    /// Task join error
    #[error("Task join error: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

impl Error {
    /// Shorthand for [`Error::InvalidConfig`]
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Wrap an error with the setup step it occurred at
    #[must_use]
    pub fn at_step(self, step: SetupStep) -> Self {
        Self::Setup {
            step,
            source: Box::new(self),
        }
    }

    /// Protocol step this error was raised at, if any
    #[must_use]
    pub const fn step(&self) -> Option<SetupStep> {
        match self {
            Self::Setup { step, .. } => Some(*step),
            _ => None,
        }
    }

    /// Innermost error, looking through step wrappers
    #[must_use]
    pub fn root(&self) -> &Self {
        match self {
            Self::Setup { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether the object this error names no longer exists
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self.root(),
            Self::NamespaceNotFound { .. } | Self::LinkNotFound { .. }
        )
    }

    /// Kernel error code attached to this error, if any
    #[must_use]
    pub fn errno(&self) -> Option<Errno> {
        match self.root() {
            Self::NamespaceCreateFailed { errno } => Some(*errno),
            Self::System(errno) => Some(*errno),
            Self::Io(e) => e.raw_os_error().map(Errno::from_raw),
            _ => None,
        }
    }

    /// Process exit code for this failure class
    ///
    /// Codes follow `sysexits.h`: privilege 77, allocation 71, kernel call
    /// 70, external tool 69, configuration 64. Abnormal child exits
    /// propagate the child's own shell-style code.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self.root() {
            Self::InsufficientPrivilege { .. } => 77,
            Self::AllocationFailed { .. } => 71,
            Self::NamespaceCreateFailed { .. }
            | Self::ChildWaitFailed { .. }
            | Self::System(_)
            | Self::TaskJoin(_) => 70,
            Self::NamespaceExists { .. }
            | Self::InterfaceExists { .. }
            | Self::NamespaceNotFound { .. }
            | Self::LinkNotFound { .. }
            | Self::ToolMissing { .. }
            | Self::MoveFailed { .. }
            | Self::ConfigurationFailed { .. }
            | Self::CommandFailed { .. } => 69,
            Self::InvalidConfig { .. } => 64,
            Self::AbnormalExit { code_or_signal } => code_or_signal.shell_code(),
            Self::Io(_) | Self::Setup { .. } => 1,
        }
    }
}

/// Result type alias for Burrow operations
pub type Result<T> = std::result::Result<T, Error>;
