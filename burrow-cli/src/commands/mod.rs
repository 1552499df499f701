use crate::cli::{Commands, NetCommands};
use anyhow::Result;

pub mod double_fork;
pub mod launch;
pub mod namespaces;
pub mod net;
pub mod version;

/// Dispatch command to appropriate handler
///
/// Returns the process exit code on success.
pub async fn dispatch(command: Commands) -> Result<i32> {
    match command {
        Commands::Launch(args) => launch::execute(args).await,

        Commands::DoubleFork { sleep } => double_fork::execute(sleep),

        Commands::Net(net) => match net {
            NetCommands::Setup {
                link,
                nat,
                subnet,
                outbound,
            } => net::setup(link, nat, subnet, outbound).await,
            NetCommands::Teardown {
                name,
                host_if,
                subnet,
                outbound,
            } => net::teardown(name, host_if, subnet, outbound).await,
            NetCommands::Probe { target, name } => net::probe(target, name).await,
            NetCommands::Show { name } => net::show(name).await,
        },

        Commands::Namespaces {
            pid,
            json,
            unshare_net,
        } => namespaces::execute(pid, json, unshare_net).await,

        Commands::Version => {
            version::execute();
            Ok(0)
        }
    }
}
