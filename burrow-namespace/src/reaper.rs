//! Parent-side reaping of spawned children

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::sys::wait::{WaitStatus, waitpid};
use tracing::{debug, error, warn};

use burrow_core::{ChildStatus, Error, ExitClass, LifecycleEvent, ProcessId, Result};

/// Block until `pid` exits or is killed, and collect its status
///
/// Must be called exactly once per spawned child. Stop and continue
/// notifications are skipped and `EINTR` is retried. A non-zero exit code
/// is reported as [`ExitClass::Abnormal`] in the returned status, not as
/// an error.
///
/// # Errors
/// `ChildWaitFailed` if `waitpid` fails (for example `ECHILD` when `pid`
/// is not our child or was already reaped) or returns a result that does
/// not describe a terminated child.
pub fn wait_for(pid: ProcessId) -> Result<ChildStatus> {
    debug!(pid = pid.as_raw(), "Waiting for child");

    loop {
        match waitpid(pid.as_nix_pid(), None) {
            Ok(WaitStatus::Exited(_, code)) => {
                let status = ChildStatus::exited(pid, code);
                report(status);
                return Ok(status);
            }
            Ok(WaitStatus::Signaled(_, signal, core_dumped)) => {
                if core_dumped {
                    warn!(pid = pid.as_raw(), signal = %signal, "Child dumped core");
                }
                let status = ChildStatus::signaled(pid, signal as i32);
                report(status);
                return Ok(status);
            }
            Ok(WaitStatus::Stopped(_, signal)) => {
                debug!(pid = pid.as_raw(), signal = %signal, "Child stopped, still waiting");
            }
            Ok(WaitStatus::Continued(_)) => {
                debug!(pid = pid.as_raw(), "Child continued, still waiting");
            }
            Ok(other) => {
                error!(pid = pid.as_raw(), status = ?other, "Unexpected wait status");
                return Err(Error::ChildWaitFailed {
                    pid,
                    message: format!("unexpected wait status {other:?}"),
                });
            }
            Err(Errno::EINTR) => {
                debug!("Wait interrupted by signal, continuing...");
            }
            Err(errno) => {
                error!(pid = pid.as_raw(), error = %errno, "Wait failed");
                return Err(Error::ChildWaitFailed {
                    pid,
                    message: errno.to_string(),
                });
            }
        }
    }
}

/// Deliver `signal` to `pid`
///
/// This is the only way to cancel a pending [`wait_for`].
///
/// # Errors
/// `System` with the kernel's error code if `kill(2)` fails
pub fn signal(pid: ProcessId, signal: Signal) -> Result<()> {
    debug!(pid = pid.as_raw(), signal = %signal, "Signalling child");
    kill(pid.as_nix_pid(), signal).map_err(Error::from)
}

fn report(status: ChildStatus) {
    LifecycleEvent::child_reaped(status).emit_trace();

    if status.classification() != ExitClass::NormalExit {
        warn!(pid = status.pid.as_raw(), reason = %status.reason, "Child exited abnormally");
    }
}
