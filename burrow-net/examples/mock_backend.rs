//! Mock backend example: provision, probe and tear down without root

use std::net::Ipv4Addr;
use std::sync::Arc;

use burrow_net::{MockBackend, NetworkBackend, NetworkConfig, Operation, Provisioner};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    println!("🧪 Provisioning with MockBackend (no root required)\n");

    let backend = Arc::new(MockBackend::new());
    let provisioner = Provisioner::new(Arc::clone(&backend));
    let config = NetworkConfig::internet();

    let pair = provisioner.setup(&config).await?;
    println!(
        "✅ {} <-> {} in namespace {}",
        pair.host_if, pair.ns_if, pair.namespace
    );

    let ns = Some(&config.namespace);
    let external = Ipv4Addr::new(8, 8, 8, 8);
    println!("\n🔍 Reachability from {}:", config.namespace);
    let host = config.host_addr.addr();
    println!("  host {host}: {}", backend.ping(ns, host).await?);
    println!("  external {external}: {}", backend.ping(ns, external).await?);
    println!("  default route: {:?}", backend.default_route(&config.namespace).await);

    // A failing step rolls back everything that call created
    let other = NetworkConfig::default();
    backend.fail_on(Operation::MoveLink).await;
    if let Err(e) = provisioner.setup(&other).await {
        println!("\n❌ {e}");
        println!(
            "  namespace {} left behind? {}",
            other.namespace,
            backend.namespace_exists(&other.namespace).await?
        );
    }
    backend.clear_failure(Operation::MoveLink).await;

    println!("\n📞 Total backend calls: {}", backend.call_count().await);

    let removed = provisioner.teardown().teardown(&config).await?;
    println!("\n✅ Teardown removed {removed} object(s)");
    println!(
        "🔍 Host link {} still present? {}",
        config.host_if,
        backend.link_exists(&config.host_if, None).await?
    );

    Ok(())
}
