use burrow_core::{Error, ExitClass, NamespaceKind, ProcessId, privilege};
use burrow_namespace::*;
use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::unistd::{ForkResult, fork, getpid, pipe};
use std::fs::File;
use std::io::{Read, Write};

/// Show library logs when a test fails
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

fn sh(script: &str) -> Vec<String> {
    vec!["-c".to_string(), script.to_string()]
}

#[test]
fn test_namespace_config_defaults() {
    let config = NamespaceConfig::new();
    assert!(config.pid);
    assert!(!config.network);

    let launcher = Launcher::new(NamespaceConfig::isolated());
    assert_eq!(launcher.config().enabled_namespaces(), vec!["pid", "net"]);
}

#[test]
fn test_namespace_info_json() {
    let info = NamespaceInfo::current().unwrap();
    let json = serde_json::to_value(&info).unwrap();

    assert_eq!(json["pid"], serde_json::json!(ProcessId::current().as_raw()));
    assert!(json["net_ns"].as_str().unwrap().starts_with("net:["));
}

#[test]
fn test_spawn_without_privilege_fails_cleanly() {
    if privilege::is_privileged() {
        return;
    }

    let result = spawn_in_new_namespace(|| 0, NamespaceFlags::PID, 0);
    match result {
        Err(Error::NamespaceCreateFailed { errno }) => assert_eq!(errno, Errno::EPERM),
        other => panic!("expected NamespaceCreateFailed, got {other:?}"),
    }
}

#[test]
fn test_unshare_without_privilege() {
    if privilege::is_privileged() {
        return;
    }

    let err = unshare_current(NamespaceFlags::NET).unwrap_err();
    assert!(matches!(err, Error::InsufficientPrivilege { .. }));
    assert_eq!(err.exit_code(), 77);
}

#[test]
#[ignore] // Requires root
fn test_launch_pid1_sees_itself_as_init() {
    init_tracing();
    let mut child = launch_pid1("/bin/sh", &sh("test $$ -eq 1")).unwrap();

    assert_ne!(child.pid().as_raw(), 1);
    let status = child.wait().unwrap();
    assert_eq!(status.classification(), ExitClass::NormalExit);
}

#[test]
#[ignore] // Requires root
fn test_launch_into_new_pid_and_net_namespaces() {
    init_tracing();
    let launcher = Launcher::new(NamespaceConfig::isolated());
    let mut child = launcher.launch("/bin/sleep", &["30".to_string()]).unwrap();

    let ours = NamespaceInfo::current().unwrap();
    let theirs = NamespaceInfo::for_pid(child.pid()).unwrap();
    assert!(!ours.shares(&theirs, NamespaceKind::Pid));
    assert!(!ours.shares(&theirs, NamespaceKind::Network));

    child.signal(Signal::SIGKILL).unwrap();
    let status = child.wait().unwrap();
    assert_eq!(status.classification(), ExitClass::Signaled);
}

#[test]
#[ignore] // Requires root
fn test_launch_propagates_exit_code() {
    init_tracing();
    let mut child = launch_pid1("/bin/sh", &sh("exit 42")).unwrap();
    let status = child.wait().unwrap();

    assert_eq!(status.classification(), ExitClass::Abnormal);
    assert_eq!(status.exit_code(), 42);
}

/// Run `body` in a forked process and return its exit code, so the test
/// runner keeps its own PID namespace
fn in_throwaway_process(body: impl FnOnce() -> i32) -> i32 {
    match unsafe { fork() }.unwrap() {
        ForkResult::Child => {
            let code = body();
            unsafe { libc::_exit(code) }
        }
        ForkResult::Parent { child } => wait_for(ProcessId::from(child)).unwrap().exit_code(),
    }
}

/// Live processes whose PID namespace link reads `ns`, e.g. `pid:[4026532281]`
fn processes_in_pid_namespace(ns: &str) -> usize {
    std::fs::read_dir("/proc")
        .into_iter()
        .flatten()
        .filter_map(std::result::Result::ok)
        .filter(|entry| entry.file_name().to_string_lossy().parse::<u32>().is_ok())
        .filter_map(|entry| std::fs::read_link(entry.path().join("ns/pid")).ok())
        .filter(|link| link.to_string_lossy() == ns)
        .count()
}

#[test]
#[ignore] // Requires root
fn test_double_fork_steward_exits_after_init() {
    init_tracing();
    let code = in_throwaway_process(|| {
        let result = DoubleFork::new().run(|| {
            // The steward took PID 1, so init is PID 2.
            if getpid().as_raw() == 2 { 0 } else { 1 }
        });
        match result {
            Ok(status) => status.exit_code(),
            Err(_) => 99,
        }
    });
    assert_eq!(code, 0);
}

#[test]
#[ignore] // Requires root
fn test_double_fork_namespace_gone_after_run() {
    init_tracing();
    // Init reports its namespace through a pipe; once run returns, no
    // process may be left in it.
    let code = in_throwaway_process(|| {
        let Ok((read_end, write_end)) = pipe() else {
            return 90;
        };

        let result = DoubleFork::new().run(move || {
            let Ok(ns) = std::fs::read_link("/proc/self/ns/pid") else {
                return 1;
            };
            let mut out = File::from(write_end);
            i32::from(out.write_all(ns.to_string_lossy().as_bytes()).is_err())
        });
        if !matches!(result, Ok(ref status) if status.success()) {
            return 91;
        }

        let mut ns = String::new();
        if File::from(read_end).read_to_string(&mut ns).is_err() || ns.is_empty() {
            return 92;
        }
        i32::try_from(processes_in_pid_namespace(&ns)).unwrap_or(93)
    });
    assert_eq!(code, 0, "processes left in the namespace, or setup code");
}

#[test]
#[ignore] // Requires root
fn test_double_fork_init_panic() {
    init_tracing();
    // Test builds unwind, so the panic becomes init's exit status.
    let code = in_throwaway_process(|| {
        match DoubleFork::new().run(|| panic!("init work failed")) {
            Ok(status) => status.exit_code(),
            Err(_) => 99,
        }
    });
    assert_eq!(code, supervisor::INIT_PANICKED_STATUS);
}

#[test]
#[ignore] // Requires root
fn test_pid1_survives_sigterm() {
    init_tracing();
    let mut child = launch_pid1("/bin/sleep", &["30".to_string()]).unwrap();

    // No handler installed, so the kernel drops SIGTERM for a PID 1.
    child.signal(Signal::SIGTERM).unwrap();
    std::thread::sleep(std::time::Duration::from_millis(300));
    let stat = std::fs::read_to_string(format!("/proc/{}/stat", child.pid().as_raw())).unwrap();
    let state = stat.rsplit(") ").next().and_then(|rest| rest.chars().next());

    child.signal(Signal::SIGKILL).unwrap();
    let status = child.wait().unwrap();

    assert_eq!(state, Some('S'));
    assert_eq!(status.classification(), ExitClass::Signaled);
    assert_eq!(status.exit_code(), 137);
}
