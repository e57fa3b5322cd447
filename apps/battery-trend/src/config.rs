use crate::cli::{RunArgs, ThresholdPolicyArg};
use crate::trend::Calibration;
use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

const MAX_WINDOW: usize = 1_000_000;

/// What to write when the current voltage is already past the threshold the
/// trend is heading towards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdPolicy {
    /// Write 0 days.
    Clamp,
    /// Leave the output untouched.
    Skip,
    /// Write whatever the formula produced, sign anomaly included.
    Raw,
}

impl From<ThresholdPolicyArg> for ThresholdPolicy {
    fn from(arg: ThresholdPolicyArg) -> Self {
        match arg {
            ThresholdPolicyArg::Clamp => ThresholdPolicy::Clamp,
            ThresholdPolicyArg::Skip => ThresholdPolicy::Skip,
            ThresholdPolicyArg::Raw => ThresholdPolicy::Raw,
        }
    }
}

#[derive(Debug, Clone)]
pub enum SinkConfig {
    HomeAssistant {
        base_url: Url,
        token: String,
        entity_id: String,
        timeout: Duration,
    },
    DryRun,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub db_timeout: Duration,
    pub entity_id: String,
    pub window: usize,
    pub calibration: Calibration,
    pub threshold_policy: ThresholdPolicy,
    pub sink: SinkConfig,
    pub print_json: bool,
}

impl Config {
    pub fn from_args(args: RunArgs) -> Result<Self> {
        let calibration = Calibration {
            discharged_voltage: args.discharged_voltage,
            charged_voltage: args.charged_voltage,
            percentile: args.percentile,
        };
        validate_calibration(&calibration)?;

        if args.window < 2 || args.window > MAX_WINDOW {
            bail!("--window must be between 2 and {MAX_WINDOW}, got {}", args.window);
        }

        let entity_id = args.entity.trim().to_string();
        if !entity_id.contains('.') {
            bail!("--entity must look like domain.object_id, got {entity_id:?}");
        }

        let sink = if args.dry_run {
            SinkConfig::DryRun
        } else {
            let token = args
                .ha_token
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .context("--ha-token is required unless --dry-run is set")?;
            let base_url = Url::parse(args.ha_url.trim()).context("invalid --ha-url")?;
            if args.http_timeout == 0 {
                bail!("--http-timeout must be at least 1 second");
            }
            SinkConfig::HomeAssistant {
                base_url,
                token,
                entity_id: args.target.trim().to_string(),
                timeout: Duration::from_secs(args.http_timeout),
            }
        };

        Ok(Self {
            db_path: args.db,
            db_timeout: Duration::from_secs(args.db_timeout),
            entity_id,
            window: args.window,
            calibration,
            threshold_policy: args.threshold_policy.into(),
            sink,
            print_json: args.json,
        })
    }
}

pub fn validate_calibration(calibration: &Calibration) -> Result<()> {
    let Calibration {
        discharged_voltage,
        charged_voltage,
        percentile,
    } = *calibration;
    if !discharged_voltage.is_finite() || !charged_voltage.is_finite() {
        bail!("voltage thresholds must be finite numbers");
    }
    if discharged_voltage <= 0.0 {
        bail!("--discharged-voltage must be positive");
    }
    if discharged_voltage >= charged_voltage {
        bail!(
            "--discharged-voltage ({discharged_voltage}) must be below --charged-voltage ({charged_voltage})"
        );
    }
    if !(0.0..=100.0).contains(&percentile) {
        bail!("--percentile must be within 0-100, got {percentile}");
    }
    Ok(())
}
