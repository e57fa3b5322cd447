use clap::Parser;
use std::path::PathBuf;

pub const DEFAULT_MQTT_BROKER: &str = "localhost";
pub const DEFAULT_MQTT_PORT: u16 = 1883;
pub const DEFAULT_MQTT_TOPIC: &str = "findmyboat";
pub const DEFAULT_READ_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_IIO_DEVICE: &str = "/sys/bus/iio/devices/iio:device0";
/// Automation HAT analog inputs map 0-25.85 V onto the ADC's 0-3.3 V range.
pub const DEFAULT_DIVIDER_RATIO: f64 = 25.85 / 3.3;

#[derive(Debug, Parser)]
#[command(
    name = "battery-publisher",
    version,
    about = "Publish battery voltages over MQTT"
)]
pub struct Cli {
    /// MQTT broker host, or a URL such as mqtt://host:1883 / mqtts://host:8883.
    #[arg(long, env = "BATTERY_MQTT_BROKER", default_value = DEFAULT_MQTT_BROKER)]
    pub broker: String,
    /// MQTT broker port (ignored when --broker is a URL carrying a port).
    #[arg(long, env = "BATTERY_MQTT_PORT", default_value_t = DEFAULT_MQTT_PORT)]
    pub port: u16,
    #[arg(long, env = "BATTERY_MQTT_TOPIC", default_value = DEFAULT_MQTT_TOPIC)]
    pub topic: String,
    /// The read interval in seconds.
    #[arg(long, env = "BATTERY_READ_INTERVAL", default_value_t = DEFAULT_READ_INTERVAL_SECS)]
    pub interval: u64,
    /// Enable TLS using the system trust store (or --ca-file).
    #[arg(long, env = "BATTERY_MQTT_TLS", default_value_t = false)]
    pub tls: bool,
    /// PEM CA bundle used instead of the system roots; implies --tls.
    #[arg(long, env = "BATTERY_MQTT_CA_FILE")]
    pub ca_file: Option<PathBuf>,
    #[arg(long, env = "BATTERY_MQTT_USERNAME")]
    pub username: Option<String>,
    #[arg(long, env = "BATTERY_MQTT_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
    #[arg(long, env = "BATTERY_MQTT_KEEP_ALIVE", default_value_t = 30)]
    pub keep_alive: u64,
    /// Seconds allowed for establishing a broker connection.
    #[arg(long, env = "BATTERY_MQTT_CONNECT_TIMEOUT", default_value_t = 10)]
    pub connect_timeout: u64,
    /// Override the board serial number instead of reading it from the system.
    #[arg(long, env = "BATTERY_DEVICE_SERIAL")]
    pub serial: Option<String>,
    /// IIO sysfs directory of the ADC exposing in_voltageN_raw/_scale.
    #[arg(long, env = "BATTERY_IIO_DEVICE", default_value = DEFAULT_IIO_DEVICE)]
    pub iio_device: PathBuf,
    /// Multiplier applied to the ADC pin voltage to get the input voltage.
    #[arg(long, env = "BATTERY_DIVIDER_RATIO", default_value_t = DEFAULT_DIVIDER_RATIO)]
    pub divider_ratio: f64,
    #[arg(long, env = "BATTERY_RETRY_INITIAL_MS", default_value_t = 1_000)]
    pub retry_initial_ms: u64,
    #[arg(long, env = "BATTERY_RETRY_MAX_MS", default_value_t = 60_000)]
    pub retry_max_ms: u64,
    /// Consecutive failures tolerated before exiting; 0 retries forever.
    #[arg(long, env = "BATTERY_RETRY_MAX_ATTEMPTS", default_value_t = 20)]
    pub retry_max_attempts: u32,
}
