use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// ADC channels wired to the three battery inputs, in `battery1..battery3` order.
pub const BATTERY_CHANNELS: [u8; 3] = [0, 1, 2];

pub trait AnalogInputs: Send + Sync {
    /// Returns the input voltage on `channel`, in volts.
    fn read(&self, channel: u8) -> Result<f64>;
}

/// Reads an ADS1015-class ADC through the Linux IIO sysfs interface.
///
/// The kernel driver exposes `in_voltageN_raw` (counts) and `in_voltageN_scale`
/// (millivolts per count). The pin voltage is then multiplied by the board's
/// divider ratio to recover the voltage at the screw terminal.
#[derive(Debug, Clone)]
pub struct IioAnalogInputs {
    device_dir: PathBuf,
    divider_ratio: f64,
}

impl IioAnalogInputs {
    pub fn new(device_dir: impl Into<PathBuf>, divider_ratio: f64) -> Self {
        Self {
            device_dir: device_dir.into(),
            divider_ratio,
        }
    }

    pub fn probe(&self) -> Result<()> {
        if !self.device_dir.is_dir() {
            return Err(anyhow!(
                "IIO device {} not found (is the ADC overlay loaded?)",
                self.device_dir.display()
            ));
        }
        Ok(())
    }
}

impl AnalogInputs for IioAnalogInputs {
    fn read(&self, channel: u8) -> Result<f64> {
        let raw = read_number(&self.device_dir.join(format!("in_voltage{channel}_raw")))?;
        let scale_mv = read_number(&self.device_dir.join(format!("in_voltage{channel}_scale")))?;
        let volts = raw * scale_mv / 1000.0 * self.divider_ratio;
        if !volts.is_finite() {
            return Err(anyhow!("channel {channel} produced a non-finite voltage"));
        }
        Ok(volts)
    }
}

fn read_number(path: &Path) -> Result<f64> {
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    raw.trim()
        .parse::<f64>()
        .with_context(|| format!("parse {} ({:?})", path.display(), raw.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_channel(dir: &Path, channel: u8, raw: &str, scale: &str) {
        fs::write(dir.join(format!("in_voltage{channel}_raw")), raw).unwrap();
        fs::write(dir.join(format!("in_voltage{channel}_scale")), scale).unwrap();
    }

    #[test]
    fn reads_scaled_channel_voltage() {
        let dir = TempDir::new().unwrap();
        write_channel(dir.path(), 1, "1000\n", "2.000000000\n");
        let inputs = IioAnalogInputs::new(dir.path(), 6.0);
        // 1000 counts * 2 mV = 2.0 V at the pin, * 6 through the divider.
        let volts = inputs.read(1).unwrap();
        assert!((volts - 12.0).abs() < 1e-9);
    }

    #[test]
    fn missing_channel_is_an_error() {
        let dir = TempDir::new().unwrap();
        let inputs = IioAnalogInputs::new(dir.path(), 1.0);
        let err = inputs.read(2).unwrap_err();
        assert!(format!("{err:#}").contains("in_voltage2_raw"));
    }

    #[test]
    fn garbage_reading_is_an_error() {
        let dir = TempDir::new().unwrap();
        write_channel(dir.path(), 0, "n/a", "1.0");
        let inputs = IioAnalogInputs::new(dir.path(), 1.0);
        assert!(inputs.read(0).is_err());
    }

    #[test]
    fn probe_rejects_missing_device() {
        let dir = TempDir::new().unwrap();
        let inputs = IioAnalogInputs::new(dir.path().join("iio:device9"), 1.0);
        assert!(inputs.probe().is_err());
    }
}
