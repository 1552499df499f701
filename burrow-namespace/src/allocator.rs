//! Namespace allocation: `clone` into new namespaces, or `unshare` in place
//!
//! `clone(2)` needs a caller-provided stack for the child. [`ClonedChild`]
//! owns that memory for as long as the child may be running on it and
//! never hands it out.

#![allow(unsafe_code)]

use nix::errno::Errno;
use nix::sched::{clone, unshare};
use nix::sys::signal::Signal;
use std::fmt;
use tracing::{debug, error, warn};

use burrow_core::{ChildStatus, Error, LifecycleEvent, NamespaceHandle, ProcessId, Result};

use crate::config::{MIN_STACK_SIZE, NamespaceFlags};
use crate::reaper;

/// Execution stack of a cloned child
struct Stack {
    region: Box<[u8]>,
}

impl Stack {
    fn reserve(size: usize) -> Result<Self> {
        let size = size.max(MIN_STACK_SIZE);

        let mut region = Vec::new();
        region
            .try_reserve_exact(size)
            .map_err(|e| Error::AllocationFailed {
                size,
                reason: e.to_string(),
            })?;
        region.resize(size, 0);

        Ok(Self {
            region: region.into_boxed_slice(),
        })
    }

    const fn len(&self) -> usize {
        self.region.len()
    }
}

/// Handle to a process created in new namespaces by [`spawn_in_new_namespace`]
///
/// The handle exclusively owns the child's stack. The stack is released
/// only after [`ClonedChild::wait`] has collected the child; dropping an
/// unreaped handle leaks the stack rather than freeing memory the child
/// may still execute on.
pub struct ClonedChild {
    pid: ProcessId,
    flags: NamespaceFlags,
    stack: Option<Stack>,
    status: Option<ChildStatus>,
}

impl ClonedChild {
    /// PID of the child as seen from the parent's namespace
    #[must_use]
    pub const fn pid(&self) -> ProcessId {
        self.pid
    }

    /// Namespaces the child was created in
    #[must_use]
    pub const fn flags(&self) -> NamespaceFlags {
        self.flags
    }

    /// Handles for the namespaces this child anchors
    #[must_use]
    pub fn namespaces(&self) -> Vec<NamespaceHandle> {
        self.flags.handles_for(self.pid)
    }

    /// Status collected by an earlier [`wait`](Self::wait)
    #[must_use]
    pub const fn status(&self) -> Option<ChildStatus> {
        self.status
    }

    /// Block until the child exits and reap it
    ///
    /// Repeated calls return the status collected the first time; the
    /// kernel is only waited on once.
    pub fn wait(&mut self) -> Result<ChildStatus> {
        if let Some(status) = self.status {
            return Ok(status);
        }

        let status = reaper::wait_for(self.pid)?;
        self.status = Some(status);

        // Child is gone; its stack can be released.
        self.stack = None;

        Ok(status)
    }

    /// Deliver `signal` to the child
    ///
    /// Refused with `ESRCH` once the child has been reaped, since its PID
    /// may already belong to another process.
    pub fn signal(&self, signal: Signal) -> Result<()> {
        if self.status.is_some() {
            return Err(Error::System(Errno::ESRCH));
        }

        reaper::signal(self.pid, signal)
    }
}

impl fmt::Debug for ClonedChild {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClonedChild")
            .field("pid", &self.pid)
            .field("flags", &self.flags)
            .field("stack_size", &self.stack.as_ref().map(Stack::len))
            .field("status", &self.status)
            .finish()
    }
}

impl Drop for ClonedChild {
    fn drop(&mut self) {
        if self.status.is_some() {
            return;
        }

        if let Some(stack) = self.stack.take() {
            warn!(
                pid = self.pid.as_raw(),
                stack_size = stack.len(),
                "Child dropped without being reaped, leaking its stack"
            );
            std::mem::forget(stack);
        }
    }
}

/// Spawn `entry` as the first process of new namespaces
///
/// Reserves a dedicated stack of at least 1 MiB and calls `clone(2)` with
/// `flags` and `SIGCHLD` as the termination signal. The returned handle
/// must be waited on exactly once.
///
/// `entry` runs in the child. Its return value becomes the child's exit
/// status; it must not unwind.
///
/// # Errors
/// - `AllocationFailed` if the stack cannot be reserved
/// - `NamespaceCreateFailed` if the kernel refuses the clone; no child
///   exists in that case and nothing needs reaping
pub fn spawn_in_new_namespace<F>(
    entry: F,
    flags: NamespaceFlags,
    stack_size: usize,
) -> Result<ClonedChild>
where
    F: FnMut() -> isize,
{
    let mut stack = Stack::reserve(stack_size)?;

    debug!(
        namespaces = ?flags.names(),
        stack_size = stack.len(),
        "Cloning child into new namespaces"
    );

    // SAFETY: the child gets its own copy of the address space (no
    // CLONE_VM) and runs `entry` on `stack`, which stays owned by the
    // returned handle until the child is reaped.
    let pid = unsafe {
        clone(
            Box::new(entry),
            &mut stack.region,
            flags.to_clone_flags(),
            Some(Signal::SIGCHLD as i32),
        )
    }
    .map_err(|errno| {
        error!(
            error = %errno,
            namespaces = ?flags.names(),
            "clone failed"
        );
        Error::NamespaceCreateFailed { errno }
    })?;

    let pid = ProcessId::from(pid);
    LifecycleEvent::child_spawned(pid, flags.handles_for(pid)).emit_trace();

    Ok(ClonedChild {
        pid,
        flags,
        stack: Some(stack),
        status: None,
    })
}

/// Move the calling process into new namespaces
///
/// Network namespaces take effect immediately. A new PID namespace only
/// applies to children forked afterwards; the first of them becomes its
/// PID 1.
///
/// # Errors
/// - `InsufficientPrivilege` on `EPERM`
/// - `NamespaceCreateFailed` for any other kernel error
pub fn unshare_current(flags: NamespaceFlags) -> Result<()> {
    if flags.is_empty() {
        warn!("No namespaces requested, nothing to unshare");
        return Ok(());
    }

    let names = flags.names();
    debug!(namespaces = ?names, "Unsharing namespaces");

    unshare(flags.to_clone_flags()).map_err(|errno| {
        error!(error = %errno, namespaces = ?names, "unshare failed");
        match errno {
            Errno::EPERM => Error::InsufficientPrivilege {
                operation: format!("unshare({})", names.join("|")),
            },
            errno => Error::NamespaceCreateFailed { errno },
        }
    })?;

    if flags.contains(NamespaceFlags::PID) {
        debug!("PID namespace will apply to the next forked child");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stack_reserve_has_floor() {
        let stack = Stack::reserve(16).unwrap();
        assert_eq!(stack.len(), MIN_STACK_SIZE);

        let stack = Stack::reserve(2 * MIN_STACK_SIZE).unwrap();
        assert_eq!(stack.len(), 2 * MIN_STACK_SIZE);
    }

    #[test]
    fn test_stack_reserve_failure() {
        let result = Stack::reserve(usize::MAX);
        assert!(matches!(result, Err(Error::AllocationFailed { .. })));
    }

    #[test]
    fn test_unshare_nothing_is_noop() {
        assert!(unshare_current(NamespaceFlags::NONE).is_ok());
    }

    #[test]
    fn test_spawn_without_namespaces_runs_entry() {
        // No namespace flags: plain clone, works unprivileged.
        let mut child = spawn_in_new_namespace(|| 7, NamespaceFlags::NONE, 0).unwrap();

        let status = child.wait().unwrap();
        assert_eq!(status.pid, child.pid());
        assert_eq!(status.exit_code(), 7);

        // Second wait returns the cached status.
        assert_eq!(child.wait().unwrap(), status);
        assert!(child.signal(Signal::SIGTERM).is_err());
    }
}
