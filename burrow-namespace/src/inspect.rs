//! Namespace membership of processes, read from `/proc/<pid>/ns`

use serde::{Deserialize, Serialize};
use std::fs;

use burrow_core::{Error, NamespaceKind, ProcessId, Result};

/// Namespace identities of a process
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceInfo {
    /// Process the identities belong to
    pub pid: Option<ProcessId>,
    /// PID namespace ID, e.g. `pid:[4026531836]`
    pub pid_ns: Option<String>,
    /// Network namespace ID
    pub net_ns: Option<String>,
}

impl NamespaceInfo {
    /// Namespaces of the current process
    pub fn current() -> Result<Self> {
        Self::for_pid(ProcessId::current())
    }

    /// Namespaces of `pid`
    ///
    /// # Errors
    /// Returns error if neither namespace link can be read (no such
    /// process, or `/proc` not mounted)
    pub fn for_pid(pid: ProcessId) -> Result<Self> {
        let (pid_ns, net_ns) = match (
            read_ns(pid, NamespaceKind::Pid),
            read_ns(pid, NamespaceKind::Network),
        ) {
            (Err(e), Err(_)) => return Err(e),
            (pid_ns, net_ns) => (pid_ns.ok(), net_ns.ok()),
        };

        let info = Self {
            pid: Some(pid),
            pid_ns,
            net_ns,
        };

        Ok(info)
    }

    /// Identity of one namespace kind
    #[must_use]
    pub fn get(&self, kind: NamespaceKind) -> Option<&str> {
        match kind {
            NamespaceKind::Pid => self.pid_ns.as_deref(),
            NamespaceKind::Network => self.net_ns.as_deref(),
        }
    }

    /// Check if in a different namespace than the host's init (PID 1)
    ///
    /// # Errors
    /// Returns error if cannot read namespaces
    pub fn is_isolated(&self) -> Result<bool> {
        let init_ns = Self::for_pid(ProcessId::from_raw(1))?;

        Ok(self.pid_ns != init_ns.pid_ns || self.net_ns != init_ns.net_ns)
    }

    /// Whether `other` shares this process's namespace of `kind`
    #[must_use]
    pub fn shares(&self, other: &Self, kind: NamespaceKind) -> bool {
        match (self.get(kind), other.get(kind)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}

fn read_ns(pid: ProcessId, kind: NamespaceKind) -> Result<String> {
    let path = format!("/proc/{pid}/ns/{}", kind.proc_entry());
    fs::read_link(&path)
        .map(|p| p.to_string_lossy().into_owned())
        .map_err(Error::from)
}

impl std::fmt::Display for NamespaceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Namespace Info:")?;
        if let Some(ref pid_ns) = self.pid_ns {
            writeln!(f, "  PID:    {pid_ns}")?;
        }
        if let Some(ref net_ns) = self.net_ns {
            writeln!(f, "  NET:    {net_ns}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_namespaces() {
        let info = NamespaceInfo::current().unwrap();
        assert!(info.pid_ns.as_deref().is_some_and(|ns| ns.starts_with("pid:[")));
        assert!(info.net_ns.as_deref().is_some_and(|ns| ns.starts_with("net:[")));
    }

    #[test]
    fn test_missing_process() {
        assert!(NamespaceInfo::for_pid(ProcessId::from_raw(-5)).is_err());
    }

    #[test]
    fn test_shares_with_self() {
        let info = NamespaceInfo::current().unwrap();
        assert!(info.shares(&info, NamespaceKind::Pid));
        assert!(info.shares(&info, NamespaceKind::Network));
        assert!(!info.shares(&NamespaceInfo::default(), NamespaceKind::Pid));
    }

    #[test]
    fn test_namespace_info_display() {
        let info = NamespaceInfo {
            pid: None,
            pid_ns: Some("pid:[4026531836]".to_string()),
            net_ns: Some("net:[4026531905]".to_string()),
        };

        let display = format!("{info}");
        assert!(display.contains("PID:"));
        assert!(display.contains("NET:"));
    }
}
