//! Launching a program as PID 1 of a new PID namespace

use nix::unistd::execvp;
use std::ffi::CString;
use tracing::{debug, info};

use burrow_core::{Error, Result};

use crate::allocator::{ClonedChild, spawn_in_new_namespace};
use crate::config::NamespaceConfig;

/// Exit status of the child when replacing its image fails
pub const EXEC_FAILED_STATUS: i32 = 127;

/// Launches programs as the init process of fresh namespaces
#[derive(Debug, Clone, Default)]
pub struct Launcher {
    config: NamespaceConfig,
}

impl Launcher {
    /// Create a launcher for the given namespaces
    #[must_use]
    pub const fn new(config: NamespaceConfig) -> Self {
        Self { config }
    }

    /// Get the configuration
    #[must_use]
    pub const fn config(&self) -> &NamespaceConfig {
        &self.config
    }

    /// Start `program` as PID 1 of new namespaces
    ///
    /// The child `execvp`s `program` with `args`, inheriting stdout and
    /// stderr. If the exec fails the child terminates with
    /// [`EXEC_FAILED_STATUS`] instead of returning into the clone frame.
    ///
    /// The returned handle carries the PID as seen from this namespace;
    /// inside its own namespace the child is PID 1.
    pub fn launch(&self, program: &str, args: &[String]) -> Result<ClonedChild> {
        let (program_c, argv) = build_argv(program, args)?;

        // Everything the child needs is prepared here; the child only
        // calls exec and _exit.
        let exec_failed = format!("burrow: failed to execute {program}\n");

        info!(program, ?args, namespaces = ?self.config.enabled_namespaces(), "Launching PID 1");

        let child = spawn_in_new_namespace(
            move || {
                let _ = execvp(&program_c, &argv);
                let _ = nix::unistd::write(std::io::stderr(), exec_failed.as_bytes());
                // SAFETY: _exit only terminates the process.
                unsafe { libc::_exit(EXEC_FAILED_STATUS) }
            },
            self.config.flags(),
            self.config.stack_size,
        )?;

        debug!(pid = child.pid().as_raw(), "PID 1 launched");
        Ok(child)
    }
}

/// Start `program` as PID 1 of a new PID namespace
///
/// Shorthand for [`Launcher::launch`] with the default configuration.
pub fn launch_pid1(program: &str, args: &[String]) -> Result<ClonedChild> {
    Launcher::default().launch(program, args)
}

/// Build the `execvp` program and argument vector (`argv[0]` = program)
fn build_argv(program: &str, args: &[String]) -> Result<(CString, Vec<CString>)> {
    if program.is_empty() {
        return Err(Error::invalid_config("Program cannot be empty"));
    }

    let to_cstring = |s: &str| {
        CString::new(s).map_err(|e| Error::invalid_config(format!("Invalid argument {s:?}: {e}")))
    };

    let program_c = to_cstring(program)?;
    let mut argv = Vec::with_capacity(args.len() + 1);
    argv.push(program_c.clone());
    for arg in args {
        argv.push(to_cstring(arg)?);
    }

    Ok((program_c, argv))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_argv() {
        let (prog, argv) = build_argv("/bin/sh", &["-c".to_string(), "echo hi".to_string()]).unwrap();
        assert_eq!(prog.to_str().unwrap(), "/bin/sh");
        assert_eq!(argv.len(), 3);
        assert_eq!(argv[0], prog);
        assert_eq!(argv[2].to_str().unwrap(), "echo hi");
    }

    #[test]
    fn test_build_argv_rejects_nul() {
        let err = build_argv("/bin/echo", &["a\0b".to_string()]).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig { .. }));
    }

    #[test]
    fn test_empty_program_rejected() {
        assert!(matches!(
            launch_pid1("", &[]),
            Err(Error::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_exec_failure_status() {
        // Without namespaces this runs unprivileged and exercises the
        // exec-failure path of the entry routine.
        let launcher = Launcher::new(NamespaceConfig::new().with_pid(false));
        let mut child = launcher.launch("/nonexistent/burrow-test", &[]).unwrap();

        let status = child.wait().unwrap();
        assert_eq!(status.exit_code(), EXEC_FAILED_STATUS);
    }
}
