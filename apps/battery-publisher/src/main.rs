mod cli;
mod config;
mod device;
mod mqtt;
mod publisher;
mod reading;
mod retry;
mod sensors;

use crate::cli::Cli;
use crate::config::Config;
use crate::publisher::Publisher;
use crate::sensors::IioAnalogInputs;
use anyhow::Result;
use clap::Parser;
use std::sync::Arc;

fn init_tracing() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,battery_publisher=info".into());
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .try_init()
        .map_err(|err| anyhow::anyhow!(err.to_string()))?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_cli(Cli::parse())?;
    init_tracing()?;

    let device = device::identify(config.serial_override.as_deref())?;

    let inputs = IioAnalogInputs::new(config.iio_device.clone(), config.divider_ratio);
    if let Err(err) = inputs.probe() {
        // Keep going: the overlay may come up after us, and cycles retry with backoff.
        tracing::warn!(error=%err, "ADC not available yet");
    }

    tracing::info!(
        broker = %config.mqtt_host,
        port = config.mqtt_port,
        client_id = %device.client_id,
        topic = %config.mqtt_topic,
        tls = config.tls_enabled(),
        username = config.mqtt_username.as_deref().unwrap_or("-"),
        interval_secs = config.read_interval.as_secs(),
        "battery-publisher starting"
    );
    let network = if device::network_connected() {
        "connected"
    } else {
        "disconnected"
    };
    tracing::info!(serial = %device.serial, network, "device identity");

    let (client, eventloop) = mqtt::connect(&config, &device.client_id)?;
    let status = mqtt::MqttStatus::default();
    let mqtt_handle = mqtt::spawn_event_loop(
        eventloop,
        status.clone(),
        config.retry.clone(),
        config.mqtt_connect_timeout,
    );

    let publisher = Publisher::new(config, device, Arc::new(inputs), client.clone(), status);

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
            if let Err(err) = client.disconnect().await {
                tracing::debug!(error=%err, "failed to send MQTT disconnect");
            }
            Ok(())
        }
        res = mqtt_handle => {
            res??;
            Ok(())
        }
        res = publisher.run() => res,
    }
}
