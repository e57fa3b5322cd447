use crate::cli::Cli;
use crate::retry::RetryPolicy;
use anyhow::{anyhow, bail, Context, Result};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, PartialEq)]
pub enum TlsMode {
    Disabled,
    SystemRoots,
    CaFile(PathBuf),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    pub mqtt_topic: String,
    pub mqtt_tls: TlsMode,
    pub mqtt_keep_alive: Duration,
    pub mqtt_connect_timeout: Duration,

    pub read_interval: Duration,
    pub serial_override: Option<String>,
    pub iio_device: PathBuf,
    pub divider_ratio: f64,

    pub retry: RetryPolicy,
}

impl Config {
    pub fn from_cli(cli: Cli) -> Result<Self> {
        let (mqtt_host, mqtt_port, url_wants_tls) = parse_broker(&cli.broker, cli.port)?;

        let mqtt_tls = match cli.ca_file {
            Some(path) => TlsMode::CaFile(path),
            None if cli.tls || url_wants_tls => TlsMode::SystemRoots,
            None => TlsMode::Disabled,
        };

        let mqtt_username = non_empty(cli.username);
        let mqtt_password = non_empty(cli.password);
        if mqtt_password.is_some() && mqtt_username.is_none() {
            bail!("--password requires --username");
        }

        let mqtt_topic = cli.topic.trim().to_string();
        if mqtt_topic.is_empty() {
            bail!("--topic must not be empty");
        }
        if mqtt_topic.contains('#') || mqtt_topic.contains('+') {
            bail!("--topic must not contain MQTT wildcards: {mqtt_topic}");
        }

        if cli.interval == 0 {
            bail!("--interval must be at least 1 second");
        }
        if cli.keep_alive < 5 {
            bail!("--keep-alive must be at least 5 seconds");
        }
        if cli.connect_timeout == 0 {
            bail!("--connect-timeout must be at least 1 second");
        }
        if !cli.divider_ratio.is_finite() || cli.divider_ratio <= 0.0 {
            bail!("--divider-ratio must be a positive number");
        }
        if cli.retry_initial_ms == 0 || cli.retry_max_ms < cli.retry_initial_ms {
            bail!("retry delays must satisfy 0 < --retry-initial-ms <= --retry-max-ms");
        }

        Ok(Self {
            mqtt_host,
            mqtt_port,
            mqtt_username,
            mqtt_password,
            mqtt_topic,
            mqtt_tls,
            mqtt_keep_alive: Duration::from_secs(cli.keep_alive),
            mqtt_connect_timeout: Duration::from_secs(cli.connect_timeout),
            read_interval: Duration::from_secs(cli.interval),
            serial_override: non_empty(cli.serial),
            iio_device: cli.iio_device,
            divider_ratio: cli.divider_ratio,
            retry: RetryPolicy {
                initial: Duration::from_millis(cli.retry_initial_ms),
                max: Duration::from_millis(cli.retry_max_ms),
                multiplier: 2.0,
                max_attempts: (cli.retry_max_attempts > 0).then_some(cli.retry_max_attempts),
            },
        })
    }

    pub fn tls_enabled(&self) -> bool {
        self.mqtt_tls != TlsMode::Disabled
    }
}

/// Accepts a bare host or an `mqtt://` / `mqtts://` URL. Returns (host, port, url requested TLS).
fn parse_broker(raw: &str, default_port: u16) -> Result<(String, u16, bool)> {
    let raw = raw.trim();
    if raw.is_empty() {
        bail!("--broker must not be empty");
    }
    if !raw.contains("://") {
        return Ok((raw.to_string(), default_port, false));
    }

    let url = Url::parse(raw).context("invalid --broker URL")?;
    let tls = match url.scheme() {
        "mqtt" | "tcp" => false,
        "mqtts" | "ssl" => true,
        other => bail!("unsupported broker scheme {other}"),
    };
    let host = url
        .host_str()
        .ok_or_else(|| anyhow!("--broker URL missing host"))?
        .to_string();
    let port = url.port().unwrap_or(default_port);
    Ok((host, port, tls))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn parse(args: &[&str]) -> Result<Config> {
        let mut argv = vec!["battery-publisher"];
        argv.extend_from_slice(args);
        Config::from_cli(Cli::try_parse_from(argv)?)
    }

    #[test]
    fn defaults_match_original_tool() {
        let config = parse(&[]).unwrap();
        assert_eq!(config.mqtt_host, "localhost");
        assert_eq!(config.mqtt_port, 1883);
        assert_eq!(config.mqtt_topic, "findmyboat");
        assert_eq!(config.read_interval, Duration::from_secs(30));
        assert_eq!(config.mqtt_tls, TlsMode::Disabled);
        assert!(config.mqtt_username.is_none());
        assert_eq!(config.retry.max_attempts, Some(20));
    }

    #[test]
    fn broker_url_sets_port_and_tls() {
        let config = parse(&["--broker", "mqtts://broker.example:8883"]).unwrap();
        assert_eq!(config.mqtt_host, "broker.example");
        assert_eq!(config.mqtt_port, 8883);
        assert_eq!(config.mqtt_tls, TlsMode::SystemRoots);
    }

    #[test]
    fn ca_file_implies_tls() {
        let config = parse(&["--ca-file", "/etc/ssl/ca.pem"]).unwrap();
        assert_eq!(config.mqtt_tls, TlsMode::CaFile(PathBuf::from("/etc/ssl/ca.pem")));
        assert!(config.tls_enabled());
    }

    #[test]
    fn password_without_username_is_rejected() {
        let err = parse(&["--password", "secret"]).unwrap_err();
        assert!(err.to_string().contains("--username"));
    }

    #[test]
    fn zero_interval_is_rejected() {
        assert!(parse(&["--interval", "0"]).is_err());
    }

    #[test]
    fn wildcard_topic_is_rejected() {
        assert!(parse(&["--topic", "boats/#"]).is_err());
    }

    #[test]
    fn zero_max_attempts_retries_forever() {
        let config = parse(&["--retry-max-attempts", "0"]).unwrap();
        assert_eq!(config.retry.max_attempts, None);
    }
}
