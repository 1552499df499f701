//! Network namespace commands

use anyhow::{Context, Result};
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::info;

use burrow_core::privilege::ensure_privileged;
use burrow_core::{InterfaceName, NetNamespaceName};
use burrow_net::{
    IpCommandBackend, Ipv4Cidr, NatConfig, NetworkBackend, NetworkConfig, Provisioner,
    TeardownCoordinator,
};

use crate::cli::LinkArgs;

fn backend() -> Arc<IpCommandBackend> {
    Arc::new(IpCommandBackend::new())
}

pub async fn setup(
    link: LinkArgs,
    nat: bool,
    subnet: Option<Ipv4Cidr>,
    outbound: Option<InterfaceName>,
) -> Result<i32> {
    ensure_privileged("net setup")?;

    let mut config = NetworkConfig::new()
        .with_namespace(link.name)
        .with_interfaces(link.host_if, link.ns_if)
        .with_addresses(link.host_addr, link.ns_addr);

    if nat {
        config = match subnet {
            Some(subnet) => config.with_nat_subnet(subnet, outbound),
            None => config.with_nat(outbound),
        };
    }

    let pair = Provisioner::new(backend())
        .setup(&config)
        .await
        .with_context(|| format!("Failed to set up namespace {}", config.namespace))?;

    println!(
        "Namespace {}: {} ({}) <-> {} ({})",
        pair.namespace, pair.host_if, config.host_addr, pair.ns_if, config.ns_addr
    );
    if let Some(nat) = &config.nat {
        println!(
            "Masquerading {} for outbound traffic, default route via {}",
            nat.subnet,
            config.host_addr.addr()
        );
    }

    Ok(0)
}

pub async fn teardown(
    name: NetNamespaceName,
    host_if: InterfaceName,
    subnet: Option<Ipv4Cidr>,
    outbound: Option<InterfaceName>,
) -> Result<i32> {
    ensure_privileged("net teardown")?;

    let mut config = NetworkConfig::new().with_namespace(name);
    config.host_if = host_if;
    config.nat = subnet.map(|subnet| NatConfig {
        subnet: subnet.network(),
        outbound,
    });

    let removed = TeardownCoordinator::new(backend())
        .teardown(&config)
        .await
        .with_context(|| format!("Failed to tear down namespace {}", config.namespace))?;

    if removed == 0 {
        println!("Nothing to remove for {}", config.namespace);
    } else {
        println!("Removed {removed} object(s) for {}", config.namespace);
    }

    Ok(0)
}

/// Exit code is 0 when the target answered, 1 otherwise
pub async fn probe(target: Ipv4Addr, name: Option<NetNamespaceName>) -> Result<i32> {
    if name.is_some() {
        ensure_privileged("net probe")?;
    }

    let reachable = backend()
        .ping(name.as_ref(), target)
        .await
        .context("Probe failed")?;

    let from = name.as_ref().map_or("host", NetNamespaceName::as_str);
    info!(from, %target, reachable, "Probe finished");

    if reachable {
        println!("{target} reachable from {from}");
        Ok(0)
    } else {
        println!("{target} unreachable from {from}");
        Ok(1)
    }
}

pub async fn show(name: Option<NetNamespaceName>) -> Result<i32> {
    let backend = backend();

    let namespaces = match name {
        Some(name) => vec![name],
        None => backend.list_namespaces().await?,
    };

    if namespaces.is_empty() {
        println!("No network namespaces");
        return Ok(0);
    }

    for ns in &namespaces {
        println!("{ns}");
        match backend.list_links(Some(ns)).await {
            Ok(links) => {
                for link in links {
                    println!("  {link}");
                }
            }
            Err(e) => println!("  (links unavailable: {e})"),
        }
    }

    Ok(0)
}
