use std::net::SocketAddr;
use std::str::FromStr;

use gpbinary_relay::observer::ObserverRegistry;
use gpbinary_relay::{config, logging, shutdown, Registry};
use log::{error, info, LevelFilter};
use tokio::signal;

#[tokio::main]
async fn main() {
    let config = config::load_config();

    logging::init(LevelFilter::Info);

    let addr = match SocketAddr::from_str(&format!("{}:{}", config.bind_addr, config.port)) {
        Ok(addr) => addr,
        Err(err) => {
            error!("invalid bind address {}:{}: {err}", config.bind_addr, config.port);
            return;
        }
    };

    let drain_secs = config.shutdown_drain_secs;
    let registry = Registry::new(config, ObserverRegistry::new());

    tokio::spawn(registry.clone().run_liveness());
    tokio::spawn(registry.clone().run_cleanup());

    let accept = tokio::spawn({
        let registry = registry.clone();
        async move {
            if let Err(err) = registry.run(addr).await {
                error!("accept loop exited: {err}");
            }
        }
    });

    if let Err(err) = signal::ctrl_c().await {
        error!("failed to listen for ctrl-c: {err}");
    }
    info!("shutdown signal received, draining connections");
    accept.abort();

    shutdown::drain(registry, std::time::Duration::from_secs(drain_secs)).await;
    info!("shutdown complete");
}
