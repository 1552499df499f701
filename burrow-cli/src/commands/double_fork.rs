//! Double-fork command implementation

use anyhow::{Context, Result};
use std::time::Duration;
use tracing::info;

use burrow_core::privilege::ensure_privileged;
use burrow_namespace::DoubleFork;

/// Run the double-fork protocol; init reports its PID and optionally sleeps
///
/// Runs on the calling thread: `unshare(CLONE_NEWPID)` only affects children
/// forked by the thread that called it.
pub fn execute(sleep: u64) -> Result<i32> {
    ensure_privileged("double-fork")?;

    let status = DoubleFork::new()
        .run(|| {
            println!("init: pid {} in new PID namespace", std::process::id());
            if sleep > 0 {
                std::thread::sleep(Duration::from_secs(sleep));
            }
            0
        })
        .context("Double fork failed")?;

    info!(status = %status, "Steward reaped");
    Ok(status.exit_code())
}
