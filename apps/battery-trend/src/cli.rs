use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "battery-trend",
    version,
    about = "Estimate days to charge or discharge from battery-voltage history"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run one estimate and exit (for cron or a systemd timer).
    Run(RunArgs),
    /// Run an estimate now and then on a fixed interval until interrupted.
    Schedule(ScheduleArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ThresholdPolicyArg {
    Clamp,
    Skip,
    Raw,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Home Assistant recorder database.
    #[arg(long, env = "BATTERY_TREND_DB", default_value = "/config/home-assistant_v2.db")]
    pub db: PathBuf,
    /// Seconds to wait on a locked recorder database.
    #[arg(long, env = "BATTERY_TREND_DB_TIMEOUT", default_value_t = 30)]
    pub db_timeout: u64,
    /// Sensor entity whose history is fitted.
    #[arg(long, env = "BATTERY_TREND_ENTITY", default_value = "sensor.battery")]
    pub entity: String,
    /// Number of most recent observations in the fit window.
    #[arg(long, env = "BATTERY_TREND_WINDOW", default_value_t = 4400)]
    pub window: usize,
    /// Percentile of the window used as the current voltage.
    #[arg(long, env = "BATTERY_TREND_PERCENTILE", default_value_t = 5.0)]
    pub percentile: f64,
    #[arg(long, env = "BATTERY_TREND_DISCHARGED_VOLTAGE", default_value_t = 12.1)]
    pub discharged_voltage: f64,
    #[arg(long, env = "BATTERY_TREND_CHARGED_VOLTAGE", default_value_t = 14.0)]
    pub charged_voltage: f64,
    /// What to write when the current voltage is already past the target threshold.
    #[arg(long, env = "BATTERY_TREND_THRESHOLD_POLICY", value_enum, default_value_t = ThresholdPolicyArg::Clamp)]
    pub threshold_policy: ThresholdPolicyArg,
    /// Home Assistant base URL.
    #[arg(long, env = "BATTERY_TREND_HA_URL", default_value = "http://localhost:8123")]
    pub ha_url: String,
    /// Long-lived access token (required unless --dry-run).
    #[arg(long, env = "BATTERY_TREND_HA_TOKEN", hide_env_values = true)]
    pub ha_token: Option<String>,
    /// input_number entity that receives the estimate in days.
    #[arg(long, env = "BATTERY_TREND_TARGET", default_value = "input_number.days_to_charge")]
    pub target: String,
    #[arg(long, env = "BATTERY_TREND_HTTP_TIMEOUT", default_value_t = 10)]
    pub http_timeout: u64,
    /// Log the estimate without writing it.
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
    /// Print the trend report as JSON on stdout.
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct ScheduleArgs {
    #[command(flatten)]
    pub run: RunArgs,
    #[arg(long, env = "BATTERY_TREND_INTERVAL_SECS", default_value_t = 3600)]
    pub interval_secs: u64,
}
