use crate::config::{Config, ThresholdPolicy};
use crate::sink::EstimateSink;
use crate::source::HistorySource;
use crate::trend::{self, Estimate, EstimateError, Observation, TrendReport};
use chrono::DateTime;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("failed to fetch history: {0:#}")]
    Fetch(anyhow::Error),
    #[error(transparent)]
    Estimate(#[from] EstimateError),
    #[error("failed to write estimate: {0:#}")]
    Sink(anyhow::Error),
}

impl JobError {
    /// Sink failures mean the published estimate is stale; callers treat them as fatal.
    pub fn is_fatal(&self) -> bool {
        matches!(self, JobError::Sink(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunOutcome {
    pub report: TrendReport,
    /// The value written to the sink, if any.
    pub written: Option<f64>,
}

/// Fetch the window, fit it, and write the signed day count.
pub fn run_once(
    config: &Config,
    source: &dyn HistorySource,
    sink: &dyn EstimateSink,
) -> Result<RunOutcome, JobError> {
    tracing::info!(entity_id = %config.entity_id, window = config.window, "checking battery status");

    let observations = source
        .fetch_window(&config.entity_id, config.window)
        .map_err(JobError::Fetch)?;
    log_window(&observations);

    let report = trend::estimate(&observations, &config.calibration)?;
    let latest = observations.last().map(|o| o.timestamp).unwrap_or_default();
    tracing::info!(
        slope_v_per_s = report.fit.slope,
        intercept_v = report.fit.intercept,
        fitted_now_v = report.fit.predict(latest),
        samples = report.samples,
        "fitted coefficients"
    );
    tracing::info!(
        current_voltage = report.current_voltage,
        percentile = config.calibration.percentile,
        "robust current voltage"
    );

    let value = output_value(&report.estimate, config.threshold_policy);
    match report.estimate {
        Estimate::Charging { days } => tracing::info!(days, "time to charge"),
        Estimate::Discharging { days } => tracing::info!(days, "time to discharge"),
        Estimate::Steady => tracing::info!("charge steady state"),
        Estimate::ThresholdReached { direction, raw_days } => tracing::warn!(
            ?direction,
            raw_days,
            policy = ?config.threshold_policy,
            "current voltage already past target threshold"
        ),
    }

    if let Some(value) = value {
        sink.set_value(value).map_err(JobError::Sink)?;
        tracing::info!(value, "estimate written");
    }

    Ok(RunOutcome {
        report,
        written: value,
    })
}

/// Maps an estimate to the value written out, applying the threshold policy.
pub fn output_value(estimate: &Estimate, policy: ThresholdPolicy) -> Option<f64> {
    match estimate {
        Estimate::ThresholdReached { .. } => match policy {
            ThresholdPolicy::Clamp => Some(0.0),
            ThresholdPolicy::Skip => None,
            ThresholdPolicy::Raw => estimate.signed_days(),
        },
        _ => estimate.signed_days(),
    }
}

fn log_window(observations: &[Observation]) {
    let (Some(first), Some(last)) = (observations.first(), observations.last()) else {
        tracing::warn!("history window is empty");
        return;
    };
    let as_utc = |ts: f64| {
        DateTime::from_timestamp_millis((ts * 1000.0) as i64)
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_else(|| ts.to_string())
    };
    tracing::debug!(
        samples = observations.len(),
        from = %as_utc(first.timestamp),
        to = %as_utc(last.timestamp),
        "fetched history window"
    );
}
