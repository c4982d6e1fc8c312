use std::{process, sync::OnceLock};

use sensorsim::{
    config::Config,
    core::{sensor, simulator::Simulator},
    logger::LoggerManager,
    print_error,
};
use tracing::{debug, error, info};

static CONFIG: OnceLock<Config> = OnceLock::new();

pub fn config() -> &'static Config {
    CONFIG.get_or_init(|| {
        Config::new().unwrap_or_else(|e| {
            print_error!("{}", e);
            process::exit(1);
        })
    })
}

fn log_sensor_table(sensors: &[sensor::Sensor]) {
    let type_width = sensors
        .iter()
        .map(|s| s.kind.as_str().len())
        .max()
        .unwrap_or(0)
        .max("Type".len());

    info!("{:>3} | {:<width$} | Period", "Id", "Type", width = type_width);
    info!("{}-+-{}-+-{}", "-".repeat(3), "-".repeat(type_width), "-".repeat(8));
    for s in sensors {
        info!(
            "{:>3} | {:<width$} | {}s",
            s.id,
            s.kind.as_str(),
            s.period,
            width = type_width
        );
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = config();
    let mut logger_manager = LoggerManager::new(cfg.logger.clone()).unwrap_or_else(|e| {
        print_error!("Failed to setup Log Manager: {}", e);
        process::exit(1);
    });
    logger_manager.init().unwrap_or_else(|e| {
        print_error!("Failed to init Log Manager: {}", e);
        process::exit(1);
    });

    info!("Starting sensorsim version {}...", env!("CARGO_PKG_VERSION"));
    info!("Log level: {}", cfg.logger.level);
    info!("Sink mode: {:?}", cfg.simulator.mode);
    debug!("{:#?}", cfg.transport);

    let mut simulator = match Simulator::new(&cfg.simulator.sensors, cfg.sink_config()).await {
        Ok(simulator) => simulator,
        Err(e) => {
            error!("Failed to initialize simulator: {e}");
            process::exit(1);
        }
    };
    log_sensor_table(simulator.sensors());

    simulator.start()?;
    info!("Simulation running, press Ctrl+C to stop");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {e}");
    }

    info!("Simulation stopped.");
    info!("Stopping all emitters...");
    simulator.shutdown().await;
    info!("Shutdown complete");
    Ok(())
}
