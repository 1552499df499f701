//! CLI argument definitions

use clap::{Args, Parser, Subcommand};
use std::net::Ipv4Addr;

use burrow_core::{InterfaceName, NetNamespaceName};
use burrow_namespace::config::MIN_STACK_SIZE;
use burrow_net::Ipv4Cidr;

#[derive(Parser)]
#[command(name = "burrow")]
#[command(about = "Minimal PID and network namespace runtime", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Launch a program as PID 1 of a new PID namespace
    Launch(LaunchArgs),

    /// Acquire PID 1 through unshare and a double fork
    DoubleFork {
        /// Seconds init stays alive before exiting
        #[arg(long, default_value_t = 0)]
        sleep: u64,
    },

    /// Manage network namespaces joined to the host by a veth pair
    #[command(subcommand)]
    Net(NetCommands),

    /// Show namespace information
    Namespaces {
        /// Process ID (default: current process)
        #[arg(short, long)]
        pid: Option<i32>,

        /// Print JSON
        #[arg(long)]
        json: bool,

        /// Unshare a new network namespace first and list its links
        #[arg(long, conflicts_with = "pid")]
        unshare_net: bool,
    },

    /// Show version information
    Version,
}

#[derive(Args, Debug)]
pub struct LaunchArgs {
    /// Also give the program its own network namespace
    #[arg(long)]
    pub net: bool,

    /// Stack size for the cloned child in bytes
    #[arg(long, default_value_t = MIN_STACK_SIZE)]
    pub stack_size: usize,

    /// Seconds to wait after SIGTERM before killing the child on Ctrl+C
    #[arg(long, default_value_t = 5)]
    pub stop_timeout: u64,

    /// Program and arguments
    #[arg(last = true, required = true)]
    pub command: Vec<String>,
}

#[derive(Subcommand)]
pub enum NetCommands {
    /// Create a namespace, a veth pair and addresses
    Setup {
        #[command(flatten)]
        link: LinkArgs,

        /// Masquerade the namespace's subnet for outbound access
        #[arg(long)]
        nat: bool,

        /// Source subnet to masquerade (default: the namespace address's network)
        #[arg(long, requires = "nat")]
        subnet: Option<Ipv4Cidr>,

        /// Outbound interface for masquerade
        #[arg(long, requires = "nat")]
        outbound: Option<InterfaceName>,
    },

    /// Remove a namespace, its veth pair and masquerade rule
    Teardown {
        /// Network namespace name
        #[arg(long, default_value = "blue")]
        name: NetNamespaceName,

        /// Host-side veth end
        #[arg(long, default_value = "veth-host")]
        host_if: InterfaceName,

        /// Masquerade subnet to remove
        #[arg(long)]
        subnet: Option<Ipv4Cidr>,

        /// Outbound interface of the masquerade rule
        #[arg(long, requires = "subnet")]
        outbound: Option<InterfaceName>,
    },

    /// Ping an address, from inside a namespace if named
    Probe {
        /// Address to reach
        #[arg(long)]
        target: Ipv4Addr,

        /// Network namespace to probe from (default: host)
        #[arg(long)]
        name: Option<NetNamespaceName>,
    },

    /// List network namespaces and their links
    Show {
        /// Only this namespace
        #[arg(long)]
        name: Option<NetNamespaceName>,
    },
}

#[derive(Args, Debug)]
pub struct LinkArgs {
    /// Network namespace name
    #[arg(long, default_value = "blue")]
    pub name: NetNamespaceName,

    /// Host-side veth end
    #[arg(long, default_value = "veth-host")]
    pub host_if: InterfaceName,

    /// Namespace-side veth end
    #[arg(long, default_value = "veth-blue")]
    pub ns_if: InterfaceName,

    /// Host-side address
    #[arg(long, default_value = "10.0.0.1/24")]
    pub host_addr: Ipv4Cidr,

    /// Namespace-side address
    #[arg(long, default_value = "10.0.0.2/24")]
    pub ns_addr: Ipv4Cidr,
}
