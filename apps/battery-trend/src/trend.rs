use serde::Serialize;
use thiserror::Error;

pub const SECONDS_PER_DAY: f64 = 60.0 * 60.0 * 24.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Observation {
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
    pub voltage: f64,
}

impl Observation {
    pub fn new(timestamp: f64, voltage: f64) -> Self {
        Self { timestamp, voltage }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EstimateError {
    #[error("need at least 2 observations to fit a trend, found {found}")]
    InsufficientData { found: usize },
    #[error("all observations share one timestamp; slope is undefined")]
    DegenerateFit,
    #[error("observation {index} has a non-finite timestamp or voltage")]
    NonFinite { index: usize },
    #[error("slope {slope:e} V/s is too small to give a finite day count")]
    Unbounded { slope: f64 },
}

/// `voltage ≈ slope * t + intercept`, slope in volts per second.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
}

impl LinearFit {
    pub fn predict(&self, timestamp: f64) -> f64 {
        self.slope * timestamp + self.intercept
    }
}

/// Which way the battery is heading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Charging,
    Discharging,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Estimate {
    /// Days until `charged_voltage` is reached.
    Charging { days: f64 },
    /// Days until `discharged_voltage` is reached.
    Discharging { days: f64 },
    /// Slope is exactly zero.
    Steady,
    /// The robust current voltage is already at or past the target threshold.
    /// `raw_days` is the value the plain formula yields (sign-inverted, or zero).
    ThresholdReached { direction: Direction, raw_days: f64 },
}

impl Estimate {
    /// Signed days as written to the output: positive to charge, negative to discharge.
    pub fn signed_days(&self) -> Option<f64> {
        match *self {
            Estimate::Charging { days } => Some(days),
            Estimate::Discharging { days } => Some(-days),
            Estimate::Steady => None,
            Estimate::ThresholdReached { direction, raw_days } => Some(match direction {
                Direction::Charging => raw_days,
                Direction::Discharging => -raw_days,
            }),
        }
    }
}

/// Voltage bounds and robust-estimate settings for one battery bank.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Calibration {
    pub discharged_voltage: f64,
    pub charged_voltage: f64,
    /// Percentile (0-100) of the window used as the current voltage.
    pub percentile: f64,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            discharged_voltage: 12.1,
            charged_voltage: 14.0,
            percentile: 5.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendReport {
    pub samples: usize,
    pub fit: LinearFit,
    pub current_voltage: f64,
    pub estimate: Estimate,
}

/// Ordinary least squares line through `(timestamp, voltage)`.
///
/// Both axes are shifted by the first observation before summing, so epoch
/// seconds squared never reach the f64 mantissa and a constant voltage series
/// has every deviation exactly zero, giving a slope of exactly zero.
pub fn fit_line(observations: &[Observation]) -> Result<LinearFit, EstimateError> {
    validate(observations)?;

    let t0 = observations[0].timestamp;
    let v0 = observations[0].voltage;
    let n = observations.len() as f64;
    let mean_dt = observations.iter().map(|o| o.timestamp - t0).sum::<f64>() / n;
    let mean_dv = observations.iter().map(|o| o.voltage - v0).sum::<f64>() / n;

    let mut sxx = 0.0;
    let mut sxy = 0.0;
    for obs in observations {
        let dt = obs.timestamp - t0 - mean_dt;
        sxx += dt * dt;
        sxy += dt * (obs.voltage - v0 - mean_dv);
    }
    if sxx == 0.0 {
        return Err(EstimateError::DegenerateFit);
    }

    let slope = sxy / sxx;
    let intercept = v0 + mean_dv - slope * (t0 + mean_dt);
    Ok(LinearFit { slope, intercept })
}

/// Days to cover `volts` at `rate` V/s. Rejects rates so small the result overflows.
fn days_to_cover(volts: f64, rate: f64) -> Result<f64, EstimateError> {
    let days = volts / rate / SECONDS_PER_DAY;
    if days.is_finite() {
        Ok(days)
    } else {
        Err(EstimateError::Unbounded { slope: rate })
    }
}

/// Percentile with linear interpolation between closest ranks (numpy's default).
pub fn percentile(values: &[f64], pct: f64) -> Option<f64> {
    if !(0.0..=100.0).contains(&pct) {
        return None;
    }
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(|a, b| a.total_cmp(b));
    if sorted.len() == 1 {
        return Some(sorted[0]);
    }
    let pos = pct / 100.0 * (sorted.len() as f64 - 1.0);
    let idx = pos.floor() as usize;
    let frac = pos - idx as f64;
    let a = sorted[idx];
    let b = sorted[(idx + 1).min(sorted.len() - 1)];
    Some(a + (b - a) * frac)
}

pub fn estimate(
    observations: &[Observation],
    calibration: &Calibration,
) -> Result<TrendReport, EstimateError> {
    let fit = fit_line(observations)?;

    let voltages: Vec<f64> = observations.iter().map(|o| o.voltage).collect();
    // validate() already guaranteed at least two finite voltages.
    let current_voltage =
        percentile(&voltages, calibration.percentile).ok_or(EstimateError::InsufficientData {
            found: observations.len(),
        })?;

    let estimate = if fit.slope < 0.0 {
        let days = days_to_cover(current_voltage - calibration.discharged_voltage, -fit.slope)?;
        if current_voltage <= calibration.discharged_voltage {
            Estimate::ThresholdReached {
                direction: Direction::Discharging,
                raw_days: days,
            }
        } else {
            Estimate::Discharging { days }
        }
    } else if fit.slope > 0.0 {
        let days = days_to_cover(calibration.charged_voltage - current_voltage, fit.slope)?;
        if current_voltage >= calibration.charged_voltage {
            Estimate::ThresholdReached {
                direction: Direction::Charging,
                raw_days: days,
            }
        } else {
            Estimate::Charging { days }
        }
    } else {
        Estimate::Steady
    };

    Ok(TrendReport {
        samples: observations.len(),
        fit,
        current_voltage,
        estimate,
    })
}

fn validate(observations: &[Observation]) -> Result<(), EstimateError> {
    if observations.len() < 2 {
        return Err(EstimateError::InsufficientData {
            found: observations.len(),
        });
    }
    if let Some(index) = observations
        .iter()
        .position(|o| !o.timestamp.is_finite() || !o.voltage.is_finite())
    {
        return Err(EstimateError::NonFinite { index });
    }
    Ok(())
}
