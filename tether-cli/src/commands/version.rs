//! Version command implementation

pub fn execute() {
    println!("Tether namespace lifecycle core");
    println!("Version: {}", env!("CARGO_PKG_VERSION"));
    println!("Edition: Rust 2024");
    println!();
    println!("Components:");
    println!("  extension tables, subsystem registry, namespace directory");
    println!("  peer ids over RTM_NEWNSID / RTM_GETNSID");
    println!("  batched asynchronous teardown");
}
