//! Launch command implementation

use anyhow::{Context, Result};
use nix::errno::Errno;
use nix::sys::signal::Signal;
use std::time::Duration;
use tracing::{info, warn};

use burrow_core::privilege::ensure_privileged;
use burrow_core::{Error, ProcessId};
use burrow_namespace::{Launcher, NamespaceConfig, reaper};

use crate::cli::LaunchArgs;

pub async fn execute(args: LaunchArgs) -> Result<i32> {
    ensure_privileged("launch")?;

    let config = NamespaceConfig::new()
        .with_network(args.net)
        .with_stack_size(args.stack_size);

    let (program, rest) = args
        .command
        .split_first()
        .context("No program given")?;

    let mut child = Launcher::new(config)
        .launch(program, rest)
        .with_context(|| format!("Failed to launch {program}"))?;
    let pid = child.pid();

    info!(pid = pid.as_raw(), "Child running, press Ctrl+C to stop");

    // waitpid blocks; run it off the runtime thread so Ctrl+C stays live.
    let mut waiter = tokio::task::spawn_blocking(move || child.wait());

    let status = tokio::select! {
        joined = &mut waiter => joined??,
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl+C")?;
            warn!(pid = pid.as_raw(), "Interrupted, forwarding SIGTERM");
            send(pid, Signal::SIGTERM)?;

            // As PID 1 the child drops signals it installed no handler for.
            let grace = Duration::from_secs(args.stop_timeout);
            tokio::select! {
                joined = &mut waiter => joined??,
                () = tokio::time::sleep(grace) => {
                    warn!(pid = pid.as_raw(), "Still running after {}s, killing", grace.as_secs());
                    send(pid, Signal::SIGKILL)?;
                    waiter.await??
                }
                again = tokio::signal::ctrl_c() => {
                    again.context("Failed to listen for Ctrl+C")?;
                    warn!(pid = pid.as_raw(), "Interrupted again, killing");
                    send(pid, Signal::SIGKILL)?;
                    waiter.await??
                }
            }
        }
    };

    if status.success() {
        info!(pid = pid.as_raw(), "Child exited successfully");
    }

    Ok(status.exit_code())
}

/// Signal the child; one that already exited but is not yet reaped is fine
fn send(pid: ProcessId, signal: Signal) -> Result<()> {
    match reaper::signal(pid, signal) {
        Err(Error::System(Errno::ESRCH)) | Ok(()) => Ok(()),
        Err(e) => Err(e).context("Failed to signal child"),
    }
}
