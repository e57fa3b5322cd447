use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::Path;

const CPUINFO_PATH: &str = "/proc/cpuinfo";
const DEVICE_TREE_SERIAL_PATH: &str = "/sys/firmware/devicetree/base/serial-number";
const CLIENT_ID_PREFIX: &str = "raspi-";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub serial: String,
    pub client_id: String,
}

impl DeviceIdentity {
    pub fn from_serial(serial: impl Into<String>) -> Self {
        let serial = serial.into();
        let client_id = format!("{CLIENT_ID_PREFIX}{serial}");
        Self { serial, client_id }
    }
}

/// Resolves the board serial: explicit override, then `/proc/cpuinfo`, then the device tree.
pub fn identify(serial_override: Option<&str>) -> Result<DeviceIdentity> {
    if let Some(serial) = serial_override {
        return Ok(DeviceIdentity::from_serial(serial));
    }

    let from_cpuinfo = fs::read_to_string(CPUINFO_PATH)
        .ok()
        .and_then(|raw| parse_cpuinfo_serial(&raw));
    if let Some(serial) = from_cpuinfo {
        return Ok(DeviceIdentity::from_serial(serial));
    }

    let serial = read_device_tree_serial(Path::new(DEVICE_TREE_SERIAL_PATH))
        .with_context(|| format!("no Serial line in {CPUINFO_PATH}; pass --serial"))?;
    Ok(DeviceIdentity::from_serial(serial))
}

pub fn parse_cpuinfo_serial(raw: &str) -> Option<String> {
    raw.lines()
        .filter(|line| line.starts_with("Serial"))
        .filter_map(|line| line.split_once(':'))
        .map(|(_, value)| value.trim().to_string())
        .find(|value| !value.is_empty())
}

fn read_device_tree_serial(path: &Path) -> Result<String> {
    let raw = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    // Device-tree strings are NUL-terminated.
    let serial = String::from_utf8_lossy(&raw)
        .trim_end_matches('\0')
        .trim()
        .to_string();
    if serial.is_empty() {
        return Err(anyhow!("{} is empty", path.display()));
    }
    Ok(serial)
}

/// True when any non-loopback interface has an address.
pub fn network_connected() -> bool {
    match if_addrs::get_if_addrs() {
        Ok(interfaces) => interfaces.iter().any(|iface| !iface.is_loopback()),
        Err(err) => {
            tracing::debug!(error=%err, "failed to enumerate network interfaces");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const PI_CPUINFO: &str = "processor\t: 0\n\
model name\t: ARMv7 Processor rev 4 (v7l)\n\
\n\
Hardware\t: BCM2835\n\
Revision\t: a02082\n\
Serial\t\t: 00000000a1b2c3d4\n\
Model\t\t: Raspberry Pi 3 Model B Rev 1.2\n";

    #[test]
    fn parses_serial_from_cpuinfo() {
        assert_eq!(
            parse_cpuinfo_serial(PI_CPUINFO).as_deref(),
            Some("00000000a1b2c3d4")
        );
    }

    #[test]
    fn cpuinfo_without_serial_yields_none() {
        assert_eq!(parse_cpuinfo_serial("processor\t: 0\nflags\t: fpu vme\n"), None);
    }

    #[test]
    fn client_id_is_prefixed_serial() {
        let identity = DeviceIdentity::from_serial("123456");
        assert_eq!(identity.client_id, "raspi-123456");
        assert_eq!(identity.serial, "123456");
    }

    #[test]
    fn override_skips_system_lookup() {
        let identity = identify(Some("abc")).unwrap();
        assert_eq!(identity.client_id, "raspi-abc");
    }

    #[test]
    fn device_tree_serial_strips_nul() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("serial-number");
        fs::write(&path, b"10000000cafef00d\0").unwrap();
        assert_eq!(read_device_tree_serial(&path).unwrap(), "10000000cafef00d");
    }
}
