//! Namespaces command implementation

use anyhow::{Context, Result};

use burrow_core::privilege::ensure_privileged;
use burrow_core::{NamespaceKind, ProcessId};
use burrow_namespace::{NamespaceFlags, NamespaceInfo, unshare_current};
use burrow_net::{IpCommandBackend, NetworkBackend};

pub async fn execute(pid: Option<i32>, json: bool, unshare_net: bool) -> Result<i32> {
    if unshare_net {
        return unshare_network(json).await;
    }

    let target_pid = pid.map_or_else(ProcessId::current, ProcessId::from_raw);

    let ns_info =
        NamespaceInfo::for_pid(target_pid).context("Failed to get namespace information")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&ns_info)?);
        return Ok(0);
    }

    println!("Namespace Information for PID {target_pid}");
    println!("{:-<60}", "");
    print!("{ns_info}");

    match ns_info.is_isolated() {
        Ok(true) => println!("\nProcess is in isolated namespaces"),
        Ok(false) => println!("\nProcess is in host namespaces"),
        Err(e) => println!("\nFailed to check isolation: {e}"),
    }

    Ok(0)
}

/// Move this process into a fresh network namespace and show what it holds
///
/// The runtime is single-threaded, so the unshared thread is the one that
/// reads `/proc/self` and spawns `ip`.
async fn unshare_network(json: bool) -> Result<i32> {
    ensure_privileged("namespaces --unshare-net")?;

    let before = NamespaceInfo::current().context("Failed to get namespace information")?;
    unshare_current(NamespaceFlags::NET).context("Failed to unshare network namespace")?;
    let after = NamespaceInfo::current().context("Failed to get namespace information")?;

    let links = IpCommandBackend::new()
        .list_links(None)
        .await
        .context("Failed to list links in the new namespace")?;

    if json {
        let report = serde_json::json!({
            "before": before,
            "after": after,
            "links": links,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(0);
    }

    let before_net = before.get(NamespaceKind::Network).unwrap_or("unknown");
    let after_net = after.get(NamespaceKind::Network).unwrap_or("unknown");
    println!("Network namespace before unshare: {before_net}");
    println!("Network namespace after unshare:  {after_net}");
    println!("Links in the new network namespace:");
    for link in &links {
        println!("  {link}");
    }

    Ok(0)
}
