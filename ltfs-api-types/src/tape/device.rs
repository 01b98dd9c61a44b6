use anyhow::{bail, Error};
use serde::{Deserialize, Serialize};

use proxmox_schema::api;

#[api()]
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
/// Optional Device Identification Attributes
pub struct OptionalDeviceIdentification {
    /// Vendor (autodetected)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    /// Model (autodetected)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Serial number (autodetected)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,
}

#[api()]
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
/// Kind of device
pub enum DeviceKind {
    /// Normal SCSI-generic tape device
    Tape,
}

#[api(
    properties: {
        kind: {
            type: DeviceKind,
        },
    },
)]
#[derive(Debug, Serialize, Deserialize)]
/// Tape device information, as reported by udev enumeration.
pub struct TapeDeviceInfo {
    pub kind: DeviceKind,
    /// Path to the linux device node
    pub path: String,
    /// Serial number (autodetected)
    pub serial: String,
    /// Vendor (autodetected)
    pub vendor: String,
    /// Model (autodetected)
    pub model: String,
    /// Device major number
    pub major: u32,
    /// Device minor number
    pub minor: u32,
}

/// Drive activity, reported by SCSI log page 11h (DT Device Status)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceActivity {
    NoActivity,
    Cleaning,
    Loading,
    Unloading,
    Other,
}

impl TryFrom<u8> for DeviceActivity {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        let activity = match value {
            0x00 => DeviceActivity::NoActivity,
            0x01..=0x0b => DeviceActivity::Loading,
            0x11 => DeviceActivity::Unloading,
            0x15 => DeviceActivity::Cleaning,
            _ => bail!("unknown device activity code 0x{:02x}", value),
        };
        Ok(activity)
    }
}
