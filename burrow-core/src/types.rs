//! Core type definitions with strong typing and validation

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Name of a persistent network namespace, as used under `/run/netns`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(try_from = "String", into = "String")]
pub struct NetNamespaceName(String);

impl NetNamespaceName {
    /// Maximum length for namespace names
    pub const MAX_LENGTH: usize = 64;

    /// Create a new `NetNamespaceName` with validation
    ///
    /// # Errors
    /// Returns error if the name is empty, too long, a path component like
    /// `.` or `..`, or contains characters other than alphanumerics, `-`,
    /// `_` and `.`
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        Self::validate(&name)?;
        Ok(Self(name))
    }

    fn validate(name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(Error::invalid_config("Namespace name cannot be empty"));
        }

        if name.len() > Self::MAX_LENGTH {
            return Err(Error::invalid_config(format!(
                "Namespace name too long (max {} chars)",
                Self::MAX_LENGTH
            )));
        }

        if name == "." || name == ".." {
            return Err(Error::invalid_config(format!(
                "Namespace name '{name}' is reserved"
            )));
        }

        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        {
            return Err(Error::invalid_config(
                "Namespace name can only contain alphanumeric, dash, underscore, and dot",
            ));
        }

        Ok(())
    }

    /// Compile-time check for an ASCII literal, matching [`Self::new`]
    #[must_use]
    pub const fn is_valid_static(name: &str) -> bool {
        let bytes = name.as_bytes();
        if bytes.is_empty() || bytes.len() > Self::MAX_LENGTH {
            return false;
        }
        if matches!(bytes, [b'.'] | [b'.', b'.']) {
            return false;
        }

        let mut i = 0;
        while i < bytes.len() {
            let c = bytes[i];
            if !(c.is_ascii_alphanumeric() || c == b'-' || c == b'_' || c == b'.') {
                return false;
            }
            i += 1;
        }
        true
    }

    /// Wrap a literal already checked with [`Self::is_valid_static`] in a
    /// `const` assertion
    #[must_use]
    pub fn from_static(name: &'static str) -> Self {
        debug_assert!(Self::is_valid_static(name), "invalid namespace literal");
        Self(name.to_string())
    }

    /// Get the namespace name as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NetNamespaceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NetNamespaceName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for NetNamespaceName {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::new(s)
    }
}

impl From<NetNamespaceName> for String {
    fn from(name: NetNamespaceName) -> Self {
        name.0
    }
}

/// Network interface name, limited by the kernel's `IFNAMSIZ`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(try_from = "String", into = "String")]
pub struct InterfaceName(String);

impl InterfaceName {
    /// Maximum length (`IFNAMSIZ` minus the trailing NUL)
    pub const MAX_LENGTH: usize = 15;

    /// Create a new `InterfaceName` with validation
    ///
    /// # Errors
    /// Returns error if the name is empty, longer than 15 bytes, or
    /// contains `/`, `:`, or whitespace
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();

        if name.is_empty() {
            return Err(Error::invalid_config("Interface name cannot be empty"));
        }

        if name.len() > Self::MAX_LENGTH {
            return Err(Error::invalid_config(format!(
                "Interface name '{name}' too long (max {} bytes)",
                Self::MAX_LENGTH
            )));
        }

        if name == "." || name == ".." {
            return Err(Error::invalid_config(format!(
                "Interface name '{name}' is reserved"
            )));
        }

        if name
            .chars()
            .any(|c| c == '/' || c == ':' || c.is_whitespace() || c.is_control())
        {
            return Err(Error::invalid_config(format!(
                "Interface name '{name}' contains invalid characters"
            )));
        }

        Ok(Self(name))
    }

    /// The loopback interface present in every network namespace
    #[must_use]
    pub fn loopback() -> Self {
        Self::from_static("lo")
    }

    /// Compile-time check for an ASCII literal; non-ASCII is rejected
    #[must_use]
    pub const fn is_valid_static(name: &str) -> bool {
        let bytes = name.as_bytes();
        if bytes.is_empty() || bytes.len() > Self::MAX_LENGTH {
            return false;
        }
        if matches!(bytes, [b'.'] | [b'.', b'.']) {
            return false;
        }

        let mut i = 0;
        while i < bytes.len() {
            let c = bytes[i];
            if !c.is_ascii_graphic() || c == b'/' || c == b':' {
                return false;
            }
            i += 1;
        }
        true
    }

    /// Wrap a literal already checked with [`Self::is_valid_static`] in a
    /// `const` assertion
    #[must_use]
    pub fn from_static(name: &'static str) -> Self {
        debug_assert!(Self::is_valid_static(name), "invalid interface literal");
        Self(name.to_string())
    }

    /// Get the interface name as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InterfaceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for InterfaceName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for InterfaceName {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::new(s)
    }
}

impl From<InterfaceName> for String {
    fn from(name: InterfaceName) -> Self {
        name.0
    }
}

/// Process identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct ProcessId(i32);

impl ProcessId {
    /// Create from raw PID
    #[must_use]
    pub const fn from_raw(pid: i32) -> Self {
        Self(pid)
    }

    /// Get the current process ID
    #[must_use]
    pub fn current() -> Self {
        #[allow(clippy::cast_possible_wrap)]
        Self(std::process::id() as i32)
    }

    /// Convert to `nix::unistd::Pid`
    #[must_use]
    pub const fn as_nix_pid(self) -> nix::unistd::Pid {
        nix::unistd::Pid::from_raw(self.0)
    }

    /// Get raw PID value
    #[must_use]
    pub const fn as_raw(self) -> i32 {
        self.0
    }

    /// Whether this is the init process of its namespace
    #[must_use]
    pub const fn is_init(self) -> bool {
        self.0 == 1
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<nix::unistd::Pid> for ProcessId {
    fn from(pid: nix::unistd::Pid) -> Self {
        Self(pid.as_raw())
    }
}

impl From<ProcessId> for nix::unistd::Pid {
    fn from(pid: ProcessId) -> Self {
        Self::from_raw(pid.0)
    }
}

/// Kind of kernel namespace managed by burrow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamespaceKind {
    /// Process-ID namespace
    Pid,
    /// Network namespace
    Network,
}

impl NamespaceKind {
    /// Name of the entry under `/proc/<pid>/ns`
    #[must_use]
    pub const fn proc_entry(self) -> &'static str {
        match self {
            Self::Pid => "pid",
            Self::Network => "net",
        }
    }
}

/// How a namespace instance is identified
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamespaceIdentity {
    /// Anchored to the process that created it
    Process(ProcessId),
    /// Persistent, named network namespace
    Named(NetNamespaceName),
}

/// Identifies a kernel namespace instance
///
/// A PID namespace handle has no deletion operation: the namespace lives
/// exactly as long as one of its member processes does.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NamespaceHandle {
    /// Namespace kind
    pub kind: NamespaceKind,
    /// Identity of the instance
    pub identity: NamespaceIdentity,
}

impl NamespaceHandle {
    /// Handle for a PID namespace entered by `pid`
    #[must_use]
    pub const fn pid(pid: ProcessId) -> Self {
        Self {
            kind: NamespaceKind::Pid,
            identity: NamespaceIdentity::Process(pid),
        }
    }

    /// Handle for a named network namespace
    #[must_use]
    pub const fn network(name: NetNamespaceName) -> Self {
        Self {
            kind: NamespaceKind::Network,
            identity: NamespaceIdentity::Named(name),
        }
    }

    /// Handle for the network namespace of a process
    #[must_use]
    pub const fn network_of(pid: ProcessId) -> Self {
        Self {
            kind: NamespaceKind::Network,
            identity: NamespaceIdentity::Process(pid),
        }
    }

    /// Path to the kernel object backing this namespace
    #[must_use]
    pub fn path(&self) -> String {
        match &self.identity {
            NamespaceIdentity::Process(pid) => {
                format!("/proc/{pid}/ns/{}", self.kind.proc_entry())
            }
            NamespaceIdentity::Named(name) => format!("/run/netns/{name}"),
        }
    }
}

impl fmt::Display for NamespaceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.identity {
            NamespaceIdentity::Process(pid) => {
                write!(f, "{}@pid:{pid}", self.kind.proc_entry())
            }
            NamespaceIdentity::Named(name) => write!(f, "{}:{name}", self.kind.proc_entry()),
        }
    }
}

/// Exit code or terminating signal of a child
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    /// Exited with this code
    Code(i32),
    /// Terminated by this signal number
    Signal(i32),
}

impl ExitReason {
    /// Shell-style exit code: the code itself, or 128 + signal
    #[must_use]
    pub const fn shell_code(self) -> i32 {
        match self {
            Self::Code(code) => code,
            Self::Signal(signal) => 128 + signal,
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Code(code) => write!(f, "exit code {code}"),
            Self::Signal(signal) => write!(f, "signal {signal}"),
        }
    }
}

/// Classification of a child's termination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitClass {
    /// Exited with code 0
    NormalExit,
    /// Killed by a signal
    Signaled,
    /// Exited with a non-zero code
    Abnormal,
}

/// Termination status of a reaped child
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildStatus {
    /// Child PID as seen by the reaping process
    pub pid: ProcessId,
    /// Exit code or signal
    pub reason: ExitReason,
}

impl ChildStatus {
    /// Status for a child that exited with `code`
    #[must_use]
    pub const fn exited(pid: ProcessId, code: i32) -> Self {
        Self {
            pid,
            reason: ExitReason::Code(code),
        }
    }

    /// Status for a child killed by signal number `signal`
    #[must_use]
    pub const fn signaled(pid: ProcessId, signal: i32) -> Self {
        Self {
            pid,
            reason: ExitReason::Signal(signal),
        }
    }

    /// Classify the termination
    #[must_use]
    pub const fn classification(&self) -> ExitClass {
        match self.reason {
            ExitReason::Code(0) => ExitClass::NormalExit,
            ExitReason::Code(_) => ExitClass::Abnormal,
            ExitReason::Signal(_) => ExitClass::Signaled,
        }
    }

    /// Whether the child exited with code 0
    #[must_use]
    pub const fn success(&self) -> bool {
        matches!(self.classification(), ExitClass::NormalExit)
    }

    /// Shell-style exit code for propagating to our own exit status
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        self.reason.shell_code()
    }

    /// Escalate a non-normal status into [`Error::AbnormalExit`]
    ///
    /// # Errors
    /// Returns `AbnormalExit` unless the child exited with code 0
    pub fn into_result(self) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(Error::AbnormalExit {
                code_or_signal: self.reason,
            })
        }
    }
}

impl fmt::Display for ChildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "child {} terminated with {}", self.pid, self.reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_name_validation() {
        assert!(NetNamespaceName::new("blue").is_ok());
        assert!(NetNamespaceName::new("inet-test").is_ok());
        assert!(NetNamespaceName::new("ns_1.a").is_ok());
        assert!(NetNamespaceName::new("").is_err());
        assert!(NetNamespaceName::new("..").is_err());
        assert!(NetNamespaceName::new("a/b").is_err());
        assert!(NetNamespaceName::new("a".repeat(65)).is_err());
    }

    #[test]
    fn test_interface_name_validation() {
        assert!(InterfaceName::new("veth-host").is_ok());
        assert!(InterfaceName::new("veth-host-inet").is_ok());
        assert!(InterfaceName::new("a".repeat(15)).is_ok());
        assert!(InterfaceName::new("a".repeat(16)).is_err());
        assert!(InterfaceName::new("eth0:1").is_err());
        assert!(InterfaceName::new("my if").is_err());
        assert!(InterfaceName::new("").is_err());
        assert_eq!(InterfaceName::loopback().as_str(), "lo");
    }

    #[test]
    fn test_static_checks_agree_with_new() {
        for name in ["blue", "inet-test", "a.b_c", "", ".", "..", "bad/name", "my ns"] {
            assert_eq!(
                NetNamespaceName::is_valid_static(name),
                NetNamespaceName::new(name).is_ok(),
                "{name:?}"
            );
        }
        for name in ["veth-host", "lo", "eth0:1", "my if", "", "a/b", "veth-host-inet0"] {
            assert_eq!(
                InterfaceName::is_valid_static(name),
                InterfaceName::new(name).is_ok(),
                "{name:?}"
            );
        }

        assert_eq!(
            NetNamespaceName::from_static("blue"),
            NetNamespaceName::new("blue").unwrap()
        );
    }

    #[test]
    fn test_names_serde() {
        let name = NetNamespaceName::new("blue").unwrap();
        let json = serde_json::to_string(&name).unwrap();
        assert_eq!(json, "\"blue\"");
        let back: NetNamespaceName = serde_json::from_str(&json).unwrap();
        assert_eq!(name, back);

        assert!(serde_json::from_str::<InterfaceName>("\"bad name\"").is_err());
    }

    #[test]
    fn test_process_id() {
        let pid = ProcessId::from_raw(123);
        assert_eq!(pid.as_raw(), 123);
        assert_eq!(pid.as_nix_pid().as_raw(), 123);
        assert!(!pid.is_init());
        assert!(ProcessId::from_raw(1).is_init());
    }

    #[test]
    fn test_namespace_handle_paths() {
        let handle = NamespaceHandle::pid(ProcessId::from_raw(42));
        assert_eq!(handle.path(), "/proc/42/ns/pid");

        let name = NetNamespaceName::new("blue").unwrap();
        let handle = NamespaceHandle::network(name);
        assert_eq!(handle.path(), "/run/netns/blue");
        assert_eq!(handle.to_string(), "net:blue");
    }

    #[test]
    fn test_child_status_classification() {
        let pid = ProcessId::from_raw(10);

        let ok = ChildStatus::exited(pid, 0);
        assert_eq!(ok.classification(), ExitClass::NormalExit);
        assert!(ok.into_result().is_ok());

        let failed = ChildStatus::exited(pid, 2);
        assert_eq!(failed.classification(), ExitClass::Abnormal);
        assert_eq!(failed.exit_code(), 2);
        assert!(matches!(
            failed.into_result(),
            Err(Error::AbnormalExit {
                code_or_signal: ExitReason::Code(2)
            })
        ));

        let killed = ChildStatus::signaled(pid, 15);
        assert_eq!(killed.classification(), ExitClass::Signaled);
        assert_eq!(killed.exit_code(), 143);
    }
}
