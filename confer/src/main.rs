mod server;

use anyhow::Result;
use tracing::info;

use confer_core::{bootstrap::load_config, logging};

use server::ConferServer;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load and validate configuration (fails fast on misconfiguration)
    let config = load_config()?;

    // 2. Initialize logging
    logging::init_logging(&config.logging)?;
    info!("Confer control plane starting...");
    info!(
        request_timeout_ms = config.coordinator.request_timeout_ms,
        rtc_ports = %format!("{}-{}", config.sfu.rtc_min_port, config.sfu.rtc_max_port),
        "Configuration"
    );

    // 3. Wire broker, worker, coordinator and gateway, then serve
    ConferServer::new(&config).run().await
}
