use crate::config::Config;
use crate::device::DeviceIdentity;
use crate::mqtt::MqttStatus;
use crate::reading::Reading;
use crate::sensors::AnalogInputs;
use anyhow::{anyhow, Result};
use rumqttc::{AsyncClient, ClientError, QoS};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;

#[derive(Debug, Error)]
pub enum CycleError {
    #[error("sensor read failed: {0:#}")]
    Sensor(anyhow::Error),
    #[error("failed to encode reading: {0:#}")]
    Encode(anyhow::Error),
    #[error("MQTT request queue is full")]
    QueueFull,
    #[error("MQTT client is shut down")]
    Disconnected,
}

impl CycleError {
    pub fn kind(&self) -> &'static str {
        match self {
            CycleError::Sensor(_) => "sensor",
            CycleError::Encode(_) => "encode",
            CycleError::QueueFull => "queue_full",
            CycleError::Disconnected => "disconnected",
        }
    }
}

/// Where a finished reading goes. Implemented by the MQTT client in production.
pub trait ReadingSink {
    fn enqueue(&self, topic: &str, payload: Vec<u8>) -> Result<(), CycleError>;
}

impl ReadingSink for AsyncClient {
    fn enqueue(&self, topic: &str, payload: Vec<u8>) -> Result<(), CycleError> {
        // try_publish never blocks: a full queue while the broker is away is a
        // cycle failure, not a stalled loop.
        self.try_publish(topic, QoS::AtLeastOnce, false, payload)
            .map_err(|err| match err {
                ClientError::TryRequest(_) => CycleError::QueueFull,
                ClientError::Request(_) => CycleError::Disconnected,
            })
    }
}

pub struct Publisher<S> {
    config: Config,
    device: DeviceIdentity,
    inputs: Arc<dyn AnalogInputs>,
    sink: S,
    status: MqttStatus,
}

impl<S: ReadingSink> Publisher<S> {
    pub fn new(
        config: Config,
        device: DeviceIdentity,
        inputs: Arc<dyn AnalogInputs>,
        sink: S,
        status: MqttStatus,
    ) -> Self {
        Self {
            config,
            device,
            inputs,
            sink,
            status,
        }
    }

    /// Reads the channels once and hands the JSON record to the sink.
    pub async fn cycle(&self) -> Result<Reading, CycleError> {
        let inputs = self.inputs.clone();
        let serial = self.device.serial.clone();
        let reading = tokio::task::spawn_blocking(move || Reading::sample(&serial, inputs.as_ref()))
            .await
            .map_err(|err| CycleError::Sensor(anyhow!(err)))?
            .map_err(CycleError::Sensor)?;

        let payload = reading.to_json().map_err(CycleError::Encode)?;
        self.sink.enqueue(&self.config.mqtt_topic, payload)?;
        Ok(reading)
    }

    /// Polls forever. Returns an error once consecutive failures exhaust the retry budget.
    pub async fn run(&self) -> Result<()> {
        let mut backoff = self.config.retry.backoff();
        loop {
            let wait = match self.cycle().await {
                Ok(reading) => {
                    backoff.reset();
                    tracing::info!(
                        serial = %reading.serial,
                        battery1 = reading.battery1,
                        battery2 = reading.battery2,
                        battery3 = reading.battery3,
                        mqtt_connected = self.status.is_connected(),
                        "published reading"
                    );
                    self.config.read_interval
                }
                Err(err) => {
                    let kind = err.kind();
                    let Some(delay) = backoff.next_delay() else {
                        tracing::error!(error=%err, kind, attempts = backoff.failures(), "giving up after repeated failures");
                        return Err(anyhow!(err).context("poll cycle retries exhausted"));
                    };
                    tracing::warn!(
                        error=%err,
                        kind,
                        attempt = backoff.failures(),
                        retry_in_ms = delay.as_millis() as u64,
                        "poll cycle failed"
                    );
                    delay.max(Duration::from_millis(1))
                }
            };
            sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;
    use crate::retry::RetryPolicy;
    use clap::Parser;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FixedInputs(f64);

    impl AnalogInputs for FixedInputs {
        fn read(&self, channel: u8) -> Result<f64> {
            Ok(self.0 + channel as f64)
        }
    }

    struct FailingInputs(AtomicUsize);

    impl AnalogInputs for FailingInputs {
        fn read(&self, _channel: u8) -> Result<f64> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(anyhow!("adc not responding"))
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        published: Mutex<Vec<(String, Vec<u8>)>>,
    }

    impl ReadingSink for Arc<RecordingSink> {
        fn enqueue(&self, topic: &str, payload: Vec<u8>) -> Result<(), CycleError> {
            self.published
                .lock()
                .unwrap()
                .push((topic.to_string(), payload));
            Ok(())
        }
    }

    struct FullSink;

    impl ReadingSink for FullSink {
        fn enqueue(&self, _topic: &str, _payload: Vec<u8>) -> Result<(), CycleError> {
            Err(CycleError::QueueFull)
        }
    }

    fn test_config() -> Config {
        let cli = Cli::try_parse_from(["battery-publisher", "--topic", "boat/battery"]).unwrap();
        let mut config = Config::from_cli(cli).unwrap();
        config.retry = RetryPolicy {
            initial: Duration::from_millis(1),
            max: Duration::from_millis(2),
            multiplier: 2.0,
            max_attempts: Some(2),
        };
        config
    }

    #[tokio::test]
    async fn cycle_publishes_json_on_topic() {
        let sink = Arc::new(RecordingSink::default());
        let publisher = Publisher::new(
            test_config(),
            DeviceIdentity::from_serial("abc"),
            Arc::new(FixedInputs(12.0)),
            sink.clone(),
            MqttStatus::default(),
        );

        let reading = publisher.cycle().await.unwrap();
        assert_eq!(reading.battery3, 14.0);

        let published = sink.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "boat/battery");
        let decoded: Reading = serde_json::from_slice(&published[0].1).unwrap();
        assert_eq!(decoded, reading);
    }

    #[tokio::test]
    async fn queue_full_is_reported_as_kind() {
        let publisher = Publisher::new(
            test_config(),
            DeviceIdentity::from_serial("abc"),
            Arc::new(FixedInputs(12.0)),
            FullSink,
            MqttStatus::default(),
        );
        let err = publisher.cycle().await.unwrap_err();
        assert_eq!(err.kind(), "queue_full");
    }

    #[tokio::test]
    async fn run_gives_up_after_retry_budget() {
        let inputs = Arc::new(FailingInputs(AtomicUsize::new(0)));
        let publisher = Publisher::new(
            test_config(),
            DeviceIdentity::from_serial("abc"),
            inputs.clone(),
            Arc::new(RecordingSink::default()),
            MqttStatus::default(),
        );

        let err = publisher.run().await.unwrap_err();
        assert!(err.to_string().contains("retries exhausted"));
        // Two tolerated failures plus the one that exhausts the budget; each
        // cycle stops at the first channel.
        assert_eq!(inputs.0.load(Ordering::SeqCst), 3);
    }
}
