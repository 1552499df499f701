//! Double-fork acquisition of PID 1 after `unshare(CLONE_NEWPID)`
//!
//! The caller unshares its PID namespace and forks a *steward*; the steward
//! forks the *init* process, waits for it and exits with its status. The
//! protocol is modelled as explicit roles and a transition table so each
//! step can be checked on its own.
//!
//! The kernel makes the first process forked after `unshare` the PID 1 of
//! the new namespace, so the steward holds PID 1 and init runs as PID 2.
//! The namespace disappears once the steward exits.
//!
//! A process can only run this once: after the namespace's PID 1 exits,
//! further forks from the caller fail.

#![allow(unsafe_code)]

use nix::unistd::{ForkResult, Pid, fork, getpid};
use std::panic::{AssertUnwindSafe, catch_unwind};
use tracing::{debug, error, info};

use burrow_core::{ChildStatus, Error, ProcessId, Result};

use crate::allocator::unshare_current;
use crate::config::NamespaceFlags;
use crate::reaper::wait_for;

/// Exit status of the steward when it cannot fork or reap init
pub const STEWARD_FAILED_STATUS: i32 = 70;

/// Exit status of init when its work panics
///
/// Only seen in builds that unwind. Under `panic = "abort"`, the release
/// profile of this workspace, init dies from `SIGABRT` instead and the
/// steward exits with 134.
pub const INIT_PANICKED_STATUS: i32 = 101;

/// Processes taking part in the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Process that unshared and forked the steward
    Caller,
    /// First child; waits for init
    Steward,
    /// Second child; does the namespace's work
    Init,
}

/// Protocol state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Caller has unshared its PID namespace
    Unshared,
    /// Steward exists
    ForkedSteward,
    /// Init exists
    ForkedInit,
    /// Init has exited and been reaped by the steward
    InitExited,
    /// Steward has exited; the namespace is gone
    StewardExited,
}

/// Events moving the protocol forward
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Caller forks the steward
    ForkSteward,
    /// Steward forks init
    ForkInit,
    /// Init exits
    InitExit,
    /// Steward exits
    StewardExit,
}

impl Transition {
    /// Role that performs this transition
    #[must_use]
    pub const fn actor(self) -> Role {
        match self {
            Self::ForkSteward => Role::Caller,
            Self::ForkInit | Self::StewardExit => Role::Steward,
            Self::InitExit => Role::Init,
        }
    }
}

impl Phase {
    /// Transition table
    ///
    /// # Errors
    /// `InvalidConfig` for a transition not allowed from this phase
    pub fn advance(self, transition: Transition) -> Result<Self> {
        match (self, transition) {
            (Self::Unshared, Transition::ForkSteward) => Ok(Self::ForkedSteward),
            (Self::ForkedSteward, Transition::ForkInit) => Ok(Self::ForkedInit),
            (Self::ForkedInit, Transition::InitExit) => Ok(Self::InitExited),
            (Self::InitExited, Transition::StewardExit) => Ok(Self::StewardExited),
            (phase, transition) => Err(Error::invalid_config(format!(
                "illegal double-fork transition {transition:?} from {phase:?}"
            ))),
        }
    }

    /// Whether the protocol has finished
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::StewardExited)
    }
}

/// Runs the double-fork protocol from the caller's side
#[derive(Debug)]
pub struct DoubleFork {
    role: Role,
    phase: Option<Phase>,
}

impl Default for DoubleFork {
    fn default() -> Self {
        Self::new()
    }
}

impl DoubleFork {
    /// Create a supervisor in the caller role, before unsharing
    #[must_use]
    pub const fn new() -> Self {
        Self {
            role: Role::Caller,
            phase: None,
        }
    }

    /// Role of the current process
    #[must_use]
    pub const fn role(&self) -> Role {
        self.role
    }

    /// Current phase, `None` before unsharing
    #[must_use]
    pub const fn phase(&self) -> Option<Phase> {
        self.phase
    }

    fn advance(&mut self, transition: Transition) -> Result<()> {
        let phase = self
            .phase
            .ok_or_else(|| Error::invalid_config("double-fork transition before unshare"))?;
        let next = phase.advance(transition)?;

        debug!(role = ?self.role, from = ?phase, to = ?next, "Double-fork transition");
        self.phase = Some(next);
        Ok(())
    }

    /// Unshare the PID namespace, fork steward and init, and run `work` in init
    ///
    /// Returns the steward's status once it has been reaped. The steward
    /// exits with init's shell-style exit code, so the status carries the
    /// result of `work`.
    ///
    /// # Errors
    /// - `InsufficientPrivilege` / `NamespaceCreateFailed` from unshare
    /// - `System` if the caller cannot fork
    /// - `ChildWaitFailed` if the steward cannot be reaped
    pub fn run<F>(mut self, work: F) -> Result<ChildStatus>
    where
        F: FnOnce() -> i32,
    {
        unshare_current(NamespaceFlags::PID)?;
        self.phase = Some(Phase::Unshared);

        info!(caller_pid = getpid().as_raw(), "PID namespace unshared, forking steward");

        // SAFETY: the child only runs the steward protocol and leaves via
        // _exit, never returning into the caller's stack frames.
        match unsafe { fork() }? {
            ForkResult::Parent { child } => {
                self.advance(Transition::ForkSteward)?;
                debug!(steward = child.as_raw(), "Steward forked");

                let status = wait_for(ProcessId::from(child))?;

                // The steward only exits after reaping init, so its exit
                // completes the remaining transitions.
                for transition in [
                    Transition::ForkInit,
                    Transition::InitExit,
                    Transition::StewardExit,
                ] {
                    self.advance(transition)?;
                }

                info!(status = %status, "Double fork complete, PID namespace released");
                Ok(status)
            }
            ForkResult::Child => {
                self.role = Role::Steward;
                self.phase = Some(Phase::ForkedSteward);
                self.steward(work)
            }
        }
    }

    fn steward<F>(mut self, work: F) -> !
    where
        F: FnOnce() -> i32,
    {
        info!(pid_in_namespace = getpid().as_raw(), "Steward running");

        // SAFETY: as above; init leaves via _exit.
        let init = match unsafe { fork() } {
            Ok(ForkResult::Parent { child }) => child,
            Ok(ForkResult::Child) => {
                self.role = Role::Init;
                self.init(work)
            }
            Err(e) => {
                error!(error = %e, "Steward could not fork init");
                exit(STEWARD_FAILED_STATUS)
            }
        };

        let code = match self.reap_init(init) {
            Ok(code) => code,
            Err(e) => {
                error!(error = %e, "Steward could not reap init");
                STEWARD_FAILED_STATUS
            }
        };

        info!(exit_code = code, "Init exited, steward exiting");
        exit(code)
    }

    fn reap_init(&mut self, init: Pid) -> Result<i32> {
        self.advance(Transition::ForkInit)?;
        debug!(init = init.as_raw(), "Init forked, waiting for it");

        let status = wait_for(ProcessId::from(init))?;
        self.advance(Transition::InitExit)?;
        self.advance(Transition::StewardExit)?;

        Ok(status.exit_code())
    }

    fn init<F>(self, work: F) -> !
    where
        F: FnOnce() -> i32,
    {
        info!(pid_in_namespace = getpid().as_raw(), "Init running");

        let code = catch_unwind(AssertUnwindSafe(work)).unwrap_or_else(|_| {
            error!("Init work panicked");
            INIT_PANICKED_STATUS
        });

        exit(code)
    }
}

fn exit(code: i32) -> ! {
    // SAFETY: _exit only terminates the process; it skips atexit handlers
    // and stdio flushing inherited from the caller.
    unsafe { libc::_exit(code) }
}
