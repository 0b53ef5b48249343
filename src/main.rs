use anyhow::Result;
use std::sync::Arc;
use tracing::{error, info};
use trolley::logging::init_logging;
use trolley::persistence::PersistenceManager;
use trolley::sim::SimulatedCabinet;
use trolley::telemetry::TracingSink;
use trolley::{Config, Runtime, RuntimeExit};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
    init_logging(&config.logging).map_err(|e| anyhow::anyhow!("Failed to init logging: {}", e))?;

    info!("Trolley cabinet controller {} starting up", env!("APP_VERSION"));

    // Bench build: the simulated cabinet stands in for the board drivers
    let cabinet = SimulatedCabinet::new();
    let store = Arc::new(PersistenceManager::from_config(&config.storage));
    let sink = Arc::new(TracingSink::new());

    let mut runtime = Runtime::new(config, cabinet.hardware(), store, sink)
        .map_err(|e| anyhow::anyhow!("Failed to create runtime: {}", e))?;

    let handle = runtime.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received");
            let _ = handle.shutdown();
        }
    });

    match runtime.run().await {
        Ok(RuntimeExit::Restart) => {
            info!("Restart requested, exiting for the supervisor to relaunch");
            Ok(())
        }
        Ok(RuntimeExit::Hibernate) => {
            info!("Hibernating until woken");
            Ok(())
        }
        Ok(RuntimeExit::Shutdown) => {
            info!("Controller shutdown complete");
            Ok(())
        }
        Err(e) => {
            error!("Controller failed with error: {}", e);
            Err(anyhow::anyhow!("Controller error: {}", e))
        }
    }
}
