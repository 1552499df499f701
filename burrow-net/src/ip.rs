//! Production backend driving the host's `ip`, `iptables` and `ping` tools

use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::process::Output;
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, warn};

use burrow_core::{Error, InterfaceName, NetNamespaceName, Result};

use crate::addr::Ipv4Cidr;
use crate::backend::{LinkState, NetworkBackend};
use crate::config::NatConfig;

/// Directory holding the bind mounts of named network namespaces
pub const NETNS_RUN_DIR: &str = "/run/netns";

/// Host-global IPv4 forwarding switch
pub const IP_FORWARD_PATH: &str = "/proc/sys/net/ipv4/ip_forward";

/// Backend that shells out to the standard Linux networking tools
#[derive(Debug, Clone)]
pub struct IpCommandBackend {
    ip: String,
    iptables: String,
    ping: String,
    ping_count: u32,
    netns_dir: PathBuf,
}

impl Default for IpCommandBackend {
    fn default() -> Self {
        Self {
            ip: "ip".to_string(),
            iptables: "iptables".to_string(),
            ping: "ping".to_string(),
            ping_count: 1,
            netns_dir: PathBuf::from(NETNS_RUN_DIR),
        }
    }
}

/// Captured result of one tool invocation
struct Run {
    cmdline: String,
    output: Output,
}

impl Run {
    fn success(&self) -> bool {
        self.output.status.success()
    }

    fn stderr(&self) -> String {
        String::from_utf8_lossy(&self.output.stderr).trim().to_string()
    }

    fn stdout(&self) -> String {
        String::from_utf8_lossy(&self.output.stdout).into_owned()
    }

    fn already_exists(&self) -> bool {
        self.stderr().contains("File exists")
    }

    /// `ip netns delete` on a name whose bind mount is gone
    fn no_such_namespace(&self) -> bool {
        self.stderr().contains("No such file")
    }

    /// `ip link delete` on a link the kernel already removed
    fn no_such_device(&self) -> bool {
        let stderr = self.stderr();
        stderr.contains("Cannot find device") || stderr.contains("No such device")
    }

    fn into_error(self) -> Error {
        let stderr = self.stderr();
        Error::CommandFailed {
            program: self.cmdline,
            status: self.output.status.to_string(),
            stderr,
        }
    }

    /// Turn a failed run into a `CommandFailed` error
    fn check(self) -> Result<()> {
        if self.success() {
            Ok(())
        } else {
            Err(self.into_error())
        }
    }
}

impl IpCommandBackend {
    /// Backend using the tools found on `PATH`
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the program paths
    #[must_use]
    pub fn with_programs(
        mut self,
        ip: impl Into<String>,
        iptables: impl Into<String>,
        ping: impl Into<String>,
    ) -> Self {
        self.ip = ip.into();
        self.iptables = iptables.into();
        self.ping = ping.into();
        self
    }

    /// Number of echo requests per probe
    #[must_use]
    pub fn with_ping_count(mut self, count: u32) -> Self {
        self.ping_count = count.max(1);
        self
    }

    async fn run(&self, program: &str, args: &[String]) -> Result<Run> {
        let cmdline = std::iter::once(program)
            .chain(args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");

        debug!(command = %cmdline, "Running");

        let output = Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => Error::ToolMissing {
                    program: program.to_string(),
                },
                _ => Error::CommandFailed {
                    program: cmdline.clone(),
                    status: "not started".to_string(),
                    stderr: e.to_string(),
                },
            })?;

        Ok(Run { cmdline, output })
    }

    async fn ip(&self, args: Vec<String>) -> Result<Run> {
        self.run(&self.ip, &args).await
    }

    fn netns_path(&self, name: &NetNamespaceName) -> PathBuf {
        self.netns_dir.join(name.as_str())
    }
}

/// `ip` arguments, prefixed with `-n NAME` when targeting a namespace
fn ip_args(namespace: Option<&NetNamespaceName>, rest: &[&str]) -> Vec<String> {
    let mut args = Vec::with_capacity(rest.len() + 2);
    if let Some(ns) = namespace {
        args.push("-n".to_string());
        args.push(ns.to_string());
    }
    args.extend(rest.iter().map(ToString::to_string));
    args
}

/// `iptables` arguments for the masquerade rule; `action` is `-A`, `-D` or `-C`
fn masquerade_args(action: &str, nat: &NatConfig) -> Vec<String> {
    let subnet = nat.subnet.to_string();
    let mut args: Vec<String> = ["-t", "nat", action, "POSTROUTING", "-s", subnet.as_str()]
        .iter()
        .map(ToString::to_string)
        .collect();

    if let Some(out) = &nat.outbound {
        args.push("-o".to_string());
        args.push(out.to_string());
    }

    args.push("-j".to_string());
    args.push("MASQUERADE".to_string());
    args
}

/// Interface names from `ip -o link show` output
///
/// Lines look like `2: veth-host@if3: <BROADCAST,...> mtu 1500 ...`.
fn parse_link_names(stdout: &str) -> Vec<InterfaceName> {
    stdout
        .lines()
        .filter_map(|line| line.split(": ").nth(1))
        .map(|name| name.split('@').next().unwrap_or(name))
        .filter_map(|name| InterfaceName::new(name).ok())
        .collect()
}

#[async_trait]
impl NetworkBackend for IpCommandBackend {
    async fn create_namespace(&self, name: &NetNamespaceName) -> Result<()> {
        let run = self.ip(ip_args(None, &["netns", "add", name.as_str()])).await?;

        if run.already_exists() {
            return Err(Error::NamespaceExists {
                name: name.to_string(),
            });
        }
        run.check()
    }

    async fn delete_namespace(&self, name: &NetNamespaceName) -> Result<()> {
        let run = self.ip(ip_args(None, &["netns", "delete", name.as_str()])).await?;

        if !run.success() && run.no_such_namespace() {
            return Err(Error::NamespaceNotFound {
                name: name.to_string(),
            });
        }
        run.check()
    }

    async fn namespace_exists(&self, name: &NetNamespaceName) -> Result<bool> {
        Ok(fs::try_exists(self.netns_path(name)).await?)
    }

    async fn list_namespaces(&self) -> Result<Vec<NetNamespaceName>> {
        let mut entries = match fs::read_dir(&self.netns_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            match NetNamespaceName::new(file_name.to_string_lossy()) {
                Ok(name) => names.push(name),
                Err(e) => warn!(entry = ?file_name, error = %e, "Skipping unnamed netns entry"),
            }
        }

        names.sort();
        Ok(names)
    }

    async fn create_veth_pair(&self, host_if: &InterfaceName, peer: &InterfaceName) -> Result<()> {
        let run = self
            .ip(ip_args(
                None,
                &[
                    "link",
                    "add",
                    host_if.as_str(),
                    "type",
                    "veth",
                    "peer",
                    "name",
                    peer.as_str(),
                ],
            ))
            .await?;

        if run.already_exists() {
            let taken = if self.link_exists(host_if, None).await? {
                host_if
            } else {
                peer
            };
            return Err(Error::InterfaceExists {
                name: taken.to_string(),
            });
        }
        run.check()
    }

    async fn delete_link(
        &self,
        link: &InterfaceName,
        namespace: Option<&NetNamespaceName>,
    ) -> Result<()> {
        let run = self
            .ip(ip_args(namespace, &["link", "delete", link.as_str()]))
            .await?;

        if !run.success() && run.no_such_device() {
            return Err(Error::LinkNotFound {
                name: link.to_string(),
            });
        }
        run.check()
    }

    async fn link_exists(
        &self,
        link: &InterfaceName,
        namespace: Option<&NetNamespaceName>,
    ) -> Result<bool> {
        let run = self
            .ip(ip_args(namespace, &["link", "show", "dev", link.as_str()]))
            .await?;
        Ok(run.success())
    }

    async fn list_links(&self, namespace: Option<&NetNamespaceName>) -> Result<Vec<InterfaceName>> {
        let run = self.ip(ip_args(namespace, &["-o", "link", "show"])).await?;
        let stdout = run.stdout();
        run.check()?;
        Ok(parse_link_names(&stdout))
    }

    async fn move_link(&self, link: &InterfaceName, namespace: &NetNamespaceName) -> Result<()> {
        let run = self
            .ip(ip_args(
                None,
                &["link", "set", link.as_str(), "netns", namespace.as_str()],
            ))
            .await?;

        if run.success() {
            return Ok(());
        }

        Err(Error::MoveFailed {
            interface: link.to_string(),
            namespace: namespace.to_string(),
            reason: run.stderr(),
        })
    }

    async fn add_address(
        &self,
        link: &InterfaceName,
        namespace: Option<&NetNamespaceName>,
        cidr: Ipv4Cidr,
    ) -> Result<()> {
        let cidr = cidr.to_string();
        let run = self
            .ip(ip_args(namespace, &["addr", "add", cidr.as_str(), "dev", link.as_str()]))
            .await?;

        if run.success() {
            return Ok(());
        }

        Err(Error::ConfigurationFailed {
            operation: format!("add address {cidr} to {link}"),
            reason: run.stderr(),
        })
    }

    async fn set_link_state(
        &self,
        link: &InterfaceName,
        namespace: Option<&NetNamespaceName>,
        state: LinkState,
    ) -> Result<()> {
        let run = self
            .ip(ip_args(
                namespace,
                &["link", "set", "dev", link.as_str(), state.as_str()],
            ))
            .await?;

        if run.success() {
            return Ok(());
        }

        Err(Error::ConfigurationFailed {
            operation: format!("set {link} {}", state.as_str()),
            reason: run.stderr(),
        })
    }

    async fn add_default_route(
        &self,
        namespace: &NetNamespaceName,
        gateway: Ipv4Addr,
    ) -> Result<()> {
        let gateway = gateway.to_string();
        let run = self
            .ip(ip_args(
                Some(namespace),
                &["route", "add", "default", "via", gateway.as_str()],
            ))
            .await?;

        if run.success() {
            return Ok(());
        }

        Err(Error::ConfigurationFailed {
            operation: format!("add default route via {gateway} in {namespace}"),
            reason: run.stderr(),
        })
    }

    async fn enable_forwarding(&self) -> Result<()> {
        debug!(path = IP_FORWARD_PATH, "Enabling IPv4 forwarding");

        fs::write(IP_FORWARD_PATH, "1\n")
            .await
            .map_err(|e| Error::ConfigurationFailed {
                operation: "enable IPv4 forwarding".to_string(),
                reason: e.to_string(),
            })
    }

    async fn add_masquerade(&self, nat: &NatConfig) -> Result<()> {
        self.run(&self.iptables, &masquerade_args("-A", nat))
            .await?
            .check()
    }

    async fn remove_masquerade(&self, nat: &NatConfig) -> Result<()> {
        self.run(&self.iptables, &masquerade_args("-D", nat))
            .await?
            .check()
    }

    async fn masquerade_exists(&self, nat: &NatConfig) -> Result<bool> {
        let run = self.run(&self.iptables, &masquerade_args("-C", nat)).await?;

        // iptables -C exits 1 when the rule is absent, 2 on usage errors.
        match run.output.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(run.into_error()),
        }
    }

    async fn ping(&self, namespace: Option<&NetNamespaceName>, target: Ipv4Addr) -> Result<bool> {
        let count = self.ping_count.to_string();
        let target = target.to_string();
        let probe = [self.ping.as_str(), "-c", count.as_str(), "-W", "1", target.as_str()];

        let run = match namespace {
            Some(ns) => {
                let mut args = vec!["netns".to_string(), "exec".to_string(), ns.to_string()];
                args.extend(probe.iter().map(ToString::to_string));
                self.run(&self.ip, &args).await?
            }
            None => {
                let args: Vec<String> = probe[1..].iter().map(ToString::to_string).collect();
                self.run(&self.ping, &args).await?
            }
        };

        // ping exits 1 with no reply and 2 on other errors; both mean unreachable.
        match run.output.status.code() {
            Some(0) => Ok(true),
            Some(1 | 2) => Ok(false),
            _ => Err(run.into_error()),
        }
    }
}
