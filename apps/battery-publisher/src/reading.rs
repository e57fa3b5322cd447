use crate::sensors::{AnalogInputs, BATTERY_CHANNELS};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// One poll cycle's worth of battery voltages, as published on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub serial: String,
    pub battery1: f64,
    pub battery2: f64,
    pub battery3: f64,
}

impl Reading {
    pub fn sample(serial: &str, inputs: &dyn AnalogInputs) -> Result<Self> {
        let [c1, c2, c3] = BATTERY_CHANNELS;
        Ok(Self {
            serial: serial.to_string(),
            battery1: inputs.read(c1).context("battery1")?,
            battery2: inputs.read(c2).context("battery2")?,
            battery3: inputs.read(c3).context("battery3")?,
        })
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use serde_json::Value as JsonValue;

    struct FixedInputs([f64; 3]);

    impl AnalogInputs for FixedInputs {
        fn read(&self, channel: u8) -> Result<f64> {
            self.0
                .get(channel as usize)
                .copied()
                .ok_or_else(|| anyhow!("no channel {channel}"))
        }
    }

    struct BrokenInputs;

    impl AnalogInputs for BrokenInputs {
        fn read(&self, _channel: u8) -> Result<f64> {
            Err(anyhow!("i2c bus error"))
        }
    }

    #[test]
    fn json_round_trip_preserves_record() {
        let reading = Reading {
            serial: "00000000a1b2c3d4".to_string(),
            battery1: 12.84,
            battery2: 13.1,
            battery3: 0.0,
        };
        let encoded = reading.to_json().unwrap();
        let decoded: Reading = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(decoded, reading);
    }

    #[test]
    fn payload_uses_fixed_keys() {
        let reading = Reading::sample("abc", &FixedInputs([12.5, 12.6, 12.7])).unwrap();
        let value: JsonValue = serde_json::from_slice(&reading.to_json().unwrap()).unwrap();
        let mut keys: Vec<&str> = value
            .as_object()
            .unwrap()
            .keys()
            .map(String::as_str)
            .collect();
        keys.sort();
        assert_eq!(keys, vec!["battery1", "battery2", "battery3", "serial"]);
        assert_eq!(value["serial"], "abc");
        assert_eq!(value["battery2"], 12.6);
    }

    #[test]
    fn sensor_failure_names_the_channel() {
        let err = Reading::sample("abc", &BrokenInputs).unwrap_err();
        assert_eq!(err.to_string(), "battery1");
    }
}
