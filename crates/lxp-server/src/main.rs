use std::sync::Arc;
use std::time::Duration;

use lxp_allocator::PortAllocator;
use lxp_bus::{
    BusAdapter,
    InMemoryTransport,
};
use lxp_commons::config::ProvisionerConfig;
use lxp_commons::logging;
use lxp_driver::InMemoryDriver;
use lxp_kv::EtcdStore;
use lxp_service::InstanceService;
use lxp_templates::TemplateStore;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Number of independent workers pulling from the shared transport —
/// spec.md §5's "parallel workers, no shared per-request mutable state".
const WORKER_COUNT: usize = 4;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_tracing();

    let config = ProvisionerConfig::from_env()?;
    info!(
        etcd = %config.etcd_endpoint(),
        nodes = config.nodes.len(),
        range_start = config.port_range_start,
        range_end = config.port_range_end,
        "starting lxp-server"
    );

    let etcd_auth = match (&config.etcd_user, &config.etcd_password) {
        (Some(user), Some(password)) => Some((user.as_str(), password.as_str())),
        _ => None,
    };
    let kv = Arc::new(EtcdStore::connect(&[config.etcd_endpoint()], etcd_auth).await?);

    let allocator = Arc::new(PortAllocator::new(
        Arc::clone(&kv),
        config.lock_name.clone(),
        Duration::from_secs(config.lock_timeout_secs),
        (config.port_range_start, config.port_range_end),
    ));

    let templates = Arc::new(TemplateStore::load(&config.template_dir)?);

    // The container-host driver and the bus transport are external
    // collaborators spec.md §1 scopes out of this repository ("the
    // container-host driver implementation", "the message-bus transport
    // itself"). The in-memory fakes stand in as the pluggable reference
    // implementation here; a real deployment substitutes a driver backed
    // by the container host's API and a transport backed by the broker
    // client without touching `InstanceService` or `BusAdapter` — both
    // are written only against the `HostDriver`/`Transport` traits.
    let driver = Arc::new(InMemoryDriver::new(config.nodes.keys().cloned().collect()));
    let transport = Arc::new(InMemoryTransport::new());

    let service = Arc::new(InstanceService::new(allocator, driver, templates, Arc::new(config)));
    let adapter = Arc::new(BusAdapter::new(service, transport));

    let cancel = CancellationToken::new();
    let workers = BusAdapter::spawn_workers(adapter, WORKER_COUNT, cancel.clone());

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, stopping workers");
    cancel.cancel();

    for worker in workers {
        let _ = worker.await;
    }

    info!("lxp-server shutdown complete");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("received ctrl-c");
        }
        _ = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(_) => std::future::pending::<()>().await,
            }
        } => {
            info!("received sigterm");
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = signal::ctrl_c().await;
    info!("received ctrl-c");
}
