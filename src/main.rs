use anyhow::Result;
use clap::Parser;
use door_actuator::actuator::{Actuator, SimulatedActuator, SysfsActuator};
use door_actuator::command::{CommandHandler, CommandServer};
use door_actuator::config::{ActuatorSettings, Args, DeviceConfig, LinkSettings};
use door_actuator::hub::{spawn_registration, HubClient};
use door_actuator::link::{self, NetworkLink, NmcliLink, StaticLink};
use door_actuator::scheduler::UnlockScheduler;
use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let config = args.into_config()?;

    info!("Door actuator starting: {}", config.device_id);
    info!("  Command server: {}", config.bind);
    info!("  Default unlock: {}", config.default_duration);

    // The scheduler locks the door before anything can reach it
    let actuator = build_actuator(&config);
    info!("Actuator initialized ({})", actuator.name());
    let (scheduler, scheduler_task) = UnlockScheduler::spawn(actuator);

    let network = build_link(&config);
    info!("[LINK] Waiting for {} link (hostname {})", network.name(), config.hostname);
    link::connect_until_up(&*network, &config.link_timing).await;
    tokio::spawn(link::stay_connected(network.clone(), config.link_timing.clone()));

    let hub = config
        .hub
        .as_ref()
        .map(|address| Arc::new(HubClient::new(address.clone(), config.secret.clone())));

    let handler = CommandHandler::new(config.secret.clone(), config.default_duration);
    let server = match CommandServer::bind(&config.bind, handler, scheduler).await {
        Ok(server) => server
            .with_read_timeout(config.request_timeout)
            .with_max_connections(config.max_connections),
        Err(e) => {
            error!("Failed to bind {}: {}", config.bind, e);
            if let Some(hub) = &hub {
                let report = format!("command server could not bind {}: {}", config.bind, e);
                if let Err(e) = hub.report_error(&config.device_id, &report).await {
                    warn!("[HUB] Error report failed: {}", e);
                }
            }
            return Err(e);
        }
    };
    info!("Command server listening on {}", server.local_addr()?);

    // Runs alongside the accept loop
    let _registration = hub
        .as_ref()
        .map(|hub| spawn_registration(hub.clone(), config.device_id.clone()));

    server.run().await;

    // Only reached if the accept loop ever returns
    scheduler_task.abort();
    Ok(())
}

fn build_actuator(config: &DeviceConfig) -> Arc<dyn Actuator> {
    match &config.actuator {
        ActuatorSettings::Gpio {
            lock_line,
            indicator_line,
        } => Arc::new(SysfsActuator::new(lock_line.clone(), indicator_line.clone())),
        ActuatorSettings::Simulated => {
            warn!("Using simulated actuator, the door will not move");
            Arc::new(SimulatedActuator::new())
        }
    }
}

fn build_link(config: &DeviceConfig) -> Arc<dyn NetworkLink> {
    match &config.link {
        LinkSettings::Wifi {
            interface,
            ssid,
            password,
        } => Arc::new(NmcliLink::new(interface.clone(), ssid.clone(), password.expose())),
        LinkSettings::Static => Arc::new(StaticLink),
    }
}

