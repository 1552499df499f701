//! Early detection of the privilege needed to create namespaces

use crate::{Error, Result};

/// Bit index of `CAP_SYS_ADMIN` in the capability sets
pub const CAP_SYS_ADMIN: u32 = 21;

/// Parse the effective capability mask out of `/proc/<pid>/status` text
#[must_use]
pub fn parse_effective_caps(status: &str) -> Option<u64> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("CapEff:"))
        .and_then(|hex| u64::from_str_radix(hex.trim(), 16).ok())
}

/// Whether the calling process may create namespaces
///
/// True for euid 0, or when the effective capability set holds
/// `CAP_SYS_ADMIN`.
#[must_use]
pub fn is_privileged() -> bool {
    if nix::unistd::geteuid().is_root() {
        return true;
    }

    std::fs::read_to_string("/proc/self/status")
        .ok()
        .as_deref()
        .and_then(parse_effective_caps)
        .is_some_and(|caps| caps & (1 << CAP_SYS_ADMIN) != 0)
}

/// Fail fast with [`Error::InsufficientPrivilege`] before any setup starts
///
/// # Errors
/// Returns `InsufficientPrivilege` naming `operation` when the caller is
/// neither root nor holds `CAP_SYS_ADMIN`
pub fn ensure_privileged(operation: &str) -> Result<()> {
    if is_privileged() {
        tracing::debug!(operation, "Privilege check passed");
        return Ok(());
    }

    tracing::error!(operation, "Missing privilege to create namespaces");
    Err(Error::InsufficientPrivilege {
        operation: operation.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATUS: &str = "Name:\tbash\nUmask:\t0022\nCapInh:\t0000000000000000\n\
                          CapPrm:\t000001ffffffffff\nCapEff:\t000001ffffffffff\n";

    #[test]
    fn test_parse_effective_caps() {
        assert_eq!(parse_effective_caps(STATUS), Some(0x0000_01ff_ffff_ffff));
        assert_eq!(parse_effective_caps("Name:\tbash\n"), None);
        assert_eq!(parse_effective_caps("CapEff:\tzz\n"), None);
    }

    #[test]
    fn test_sys_admin_bit() {
        let caps = parse_effective_caps("CapEff:\t0000000000200000\n").unwrap();
        assert_ne!(caps & (1 << CAP_SYS_ADMIN), 0);

        let caps = parse_effective_caps("CapEff:\t0000000000000000\n").unwrap();
        assert_eq!(caps & (1 << CAP_SYS_ADMIN), 0);
    }

    #[test]
    fn test_ensure_privileged_matches_probe() {
        assert_eq!(ensure_privileged("test").is_ok(), is_privileged());
    }
}
