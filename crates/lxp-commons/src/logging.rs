use tracing_subscriber::EnvFilter;

/// Initializes the global `tracing` subscriber. Reads `RUST_LOG`, falling
/// back to `info` for this crate family and `warn` for everything else so
/// a default-run binary isn't drowned out by dependency chatter.
///
/// Safe to call more than once in a process (e.g. from multiple `#[tokio::main]`
/// binaries under test) — failures to install are swallowed, matching the
/// `try_init` idiom the teacher uses in its own test modules.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,lxp_commons=info,lxp_kv=info,lxp_allocator=info,lxp_templates=info,lxp_driver=info,lxp_service=info,lxp_bus=info,lxp_server=info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

/// Installs a subscriber tuned for test output: writes to the test
/// harness's captured stdout instead of the process's real stdout.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}
