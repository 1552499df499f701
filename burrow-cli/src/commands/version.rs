//! Version command implementation

pub fn execute() {
    println!("burrow {}", env!("CARGO_PKG_VERSION"));
    println!("Edition: Rust 2024");
    println!();
    println!("Features:");
    println!("  PID namespaces (clone, unshare + double fork)");
    println!("  Network namespaces with veth links");
    println!("  Optional masquerade for outbound access");
}
