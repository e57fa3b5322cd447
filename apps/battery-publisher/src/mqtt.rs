use crate::config::{Config, TlsMode};
use crate::retry::{Backoff, RetryPolicy};
use anyhow::{anyhow, Context, Result};
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, Incoming, MqttOptions,
    Transport,
};
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

const REQUEST_CHANNEL_CAPACITY: usize = 32;

/// Shared view of whether the broker session is currently up.
#[derive(Debug, Clone, Default)]
pub struct MqttStatus {
    connected: Arc<AtomicBool>,
}

impl MqttStatus {
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
    }
}

pub fn mqtt_options(config: &Config, client_id: &str) -> Result<MqttOptions> {
    let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host.clone(), config.mqtt_port);
    mqttoptions.set_keep_alive(config.mqtt_keep_alive);
    if let Some(username) = &config.mqtt_username {
        mqttoptions.set_credentials(
            username.clone(),
            config.mqtt_password.clone().unwrap_or_default(),
        );
    }
    match &config.mqtt_tls {
        TlsMode::Disabled => {}
        TlsMode::SystemRoots => {
            mqttoptions.set_transport(Transport::tls_with_default_config());
        }
        TlsMode::CaFile(path) => {
            let ca = fs::read(path).with_context(|| format!("read {}", path.display()))?;
            mqttoptions.set_transport(Transport::tls(ca, None, None));
        }
    }
    Ok(mqttoptions)
}

pub fn connect(config: &Config, client_id: &str) -> Result<(AsyncClient, EventLoop)> {
    let options = mqtt_options(config, client_id)?;
    Ok(AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY))
}

/// Drives the rumqttc event loop in the background, reconnecting with backoff.
///
/// The task ends with an error once `retry` runs out of attempts; the request
/// channel closes with it, so later publishes fail as `disconnected`.
pub fn spawn_event_loop(
    mut eventloop: EventLoop,
    status: MqttStatus,
    retry: RetryPolicy,
    connect_timeout: Duration,
) -> JoinHandle<Result<()>> {
    tokio::spawn(async move {
        let mut backoff = retry.backoff();
        loop {
            // Only bound the poll while a connection is being established; an idle
            // session legitimately waits on the socket for a whole keep-alive period.
            let polled = if status.is_connected() {
                eventloop.poll().await
            } else {
                match timeout(connect_timeout, eventloop.poll()).await {
                    Ok(result) => result,
                    Err(_) => Err(ConnectionError::NetworkTimeout),
                }
            };

            if let Some(delay) = handle_event(polled, &status, &mut backoff)? {
                sleep(delay).await;
            }
        }
    })
}

/// Applies one poll result to `status` and `backoff`.
///
/// Returns the delay to wait before polling again after a connection error,
/// or an error once the retry budget is spent.
fn handle_event(
    polled: Result<Event, ConnectionError>,
    status: &MqttStatus,
    backoff: &mut Backoff,
) -> Result<Option<Duration>> {
    match polled {
        Ok(Event::Incoming(Incoming::ConnAck(ack))) => {
            if ack.code == ConnectReturnCode::Success {
                tracing::info!(session_present = ack.session_present, "connected OK");
                status.set_connected(true);
                backoff.reset();
            } else {
                tracing::warn!(code=?ack.code, "bad connection");
                status.set_connected(false);
            }
            Ok(None)
        }
        Ok(Event::Incoming(Incoming::PubAck(ack))) => {
            tracing::debug!(pkid = ack.pkid, "publish acknowledged");
            Ok(None)
        }
        Ok(Event::Incoming(Incoming::Disconnect)) => {
            tracing::warn!("broker sent disconnect");
            status.set_connected(false);
            Ok(None)
        }
        Ok(_) => Ok(None),
        Err(err) => {
            status.set_connected(false);
            let kind = connection_error_kind(&err);
            let Some(delay) = backoff.next_delay() else {
                tracing::error!(error=%err, kind, attempts = backoff.failures(), "giving up on MQTT broker");
                return Err(anyhow!(err)).context("MQTT connection retries exhausted");
            };
            tracing::warn!(
                error=%err,
                kind,
                attempt = backoff.failures(),
                retry_in_ms = delay.as_millis() as u64,
                "MQTT connection error"
            );
            Ok(Some(delay))
        }
    }
}

fn connection_error_kind(err: &ConnectionError) -> &'static str {
    match err {
        ConnectionError::ConnectionRefused(_) => "refused",
        ConnectionError::NetworkTimeout | ConnectionError::FlushTimeout => "timeout",
        ConnectionError::Io(_) => "io",
        ConnectionError::Tls(_) => "tls",
        ConnectionError::MqttState(_) => "protocol",
        ConnectionError::RequestsDone => "closed",
        _ => "other",
    }
}
