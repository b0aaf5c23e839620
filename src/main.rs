mod bluetooth;
mod config;
mod models;
mod mqtt;
mod pipeline;
mod replay;
mod utils;

use log::{error, info};
use std::sync::Arc;
use std::time::Duration;
use time::UtcOffset;

use config::{BridgeConfig, NotifySource};
use mqtt::{BrokerSession, RumqttTransport, SessionTiming, StateReport, Topics};
use pipeline::{NotificationSink, TelemetryPipeline};
use utils::HostProbe;

const CONNECT_TIMEOUT_SECS: u64 = 10;

async fn run_source<S: NotificationSink>(
    config: &BridgeConfig,
    sink: &mut S,
) -> Result<(), Box<dyn std::error::Error>> {
    match config.source {
        NotifySource::Stdin => {
            info!("Reading hex frames from stdin");
            let frames = replay::replay_stdin(sink).await?;
            info!("End of input after {} frames", frames);
            Ok(())
        }
        #[cfg(feature = "bluetooth")]
        NotifySource::Bluetooth => {
            bluetooth::notifier::stream_notifications(&config.bluetooth, sink).await
        }
        #[cfg(not(feature = "bluetooth"))]
        NotifySource::Bluetooth => Err("built without bluetooth support".into()),
    }
}

async fn main_loop<S: NotificationSink>(config: &BridgeConfig, sink: &mut S) {
    // Run the notification source until it ends or the user interrupts
    tokio::select! {
        result = run_source(config, sink) => {
            match result {
                Ok(_) => info!("Notification source finished"),
                Err(e) => error!("Notification source failed: {}", e),
            }
        }
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => info!("Program terminated by user. Exiting gracefully."),
                Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
            }
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .format_timestamp_secs()
        .init();

    // The local offset can only be determined while the process is single threaded
    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);

    // Load configuration
    let config = match BridgeConfig::new() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    let topics = Topics::new(&config.device_name);
    let transport = RumqttTransport::new(
        &config.mqtt,
        &topics,
        Duration::from_secs(CONNECT_TIMEOUT_SECS),
    );
    let report = StateReport::new(HostProbe::new(config.thermal_zone), offset);

    info!("Try connect to broker as {}", config.mqtt.client_id);
    let session = match BrokerSession::start(transport, topics, report, SessionTiming::default()) {
        Ok(session) => Arc::new(session),
        Err(e) => {
            error!("Failed to start broker session: {}", e);
            return Err(e.into());
        }
    };

    let mut pipeline = TelemetryPipeline::new(Arc::clone(&session));
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(main_loop(&config, &mut pipeline));
    // A pending stdin read would otherwise keep the runtime alive
    runtime.shutdown_timeout(Duration::from_secs(1));

    info!("Shutting down... (broker session {:?})", session.state());
    session.shutdown();
    Ok(())
}
