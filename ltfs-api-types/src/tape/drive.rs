//! Types for tape drive configuration and status reporting.
use anyhow::{bail, Error};
use serde::{Deserialize, Serialize};

use proxmox_schema::{api, Schema, StringSchema};

pub const DRIVE_NAME_SCHEMA: Schema = StringSchema::new("Drive Identifier.")
    .min_length(3)
    .max_length(32)
    .schema();

pub const LTO_DRIVE_PATH_SCHEMA: Schema =
    StringSchema::new("The path to a SCSI-generic tape device (e.g. '/dev/sg0')").schema();

#[api(
    properties: {
        name: {
            schema: DRIVE_NAME_SCHEMA,
        }
    }
)]
#[derive(Serialize, Deserialize, Clone)]
/// File-emulated tape drive, used for tests and for development without
/// real hardware.
#[serde(rename_all = "kebab-case")]
pub struct VirtualTapeDrive {
    pub name: String,
    /// Directory holding one subdirectory of numbered block files per
    /// partition.
    pub path: String,
    /// Simulated cartridge size, in MiB, per partition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_size_mib: Option<u64>,
}

#[api(
    properties: {
        name: {
            schema: DRIVE_NAME_SCHEMA,
        },
        path: {
            schema: LTO_DRIVE_PATH_SCHEMA,
        },
    }
)]
#[derive(Serialize, Deserialize, Clone)]
#[serde(rename_all = "kebab-case")]
/// SCSI-generic LTO tape drive
pub struct LtoTapeDrive {
    pub name: String,
    pub path: String,
}

/// Drive list entry, combining static configuration with whatever could be
/// read from the drive (if currently reachable).
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DriveListEntry {
    pub name: String,
    pub path: String,
    pub kind: DriveKind,
    /// lock holder description, if the device lock is currently taken
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DriveKind {
    Virtual,
    Lto,
}

#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialOrd, PartialEq)]
pub enum TapeDensity {
    Unknown,
    LTO5,
    LTO6,
    LTO7,
    LTO7M8,
    LTO8,
    LTO9,
}

impl TryFrom<u8> for TapeDensity {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        let density = match value {
            0x00 => TapeDensity::Unknown,
            0x58 => TapeDensity::LTO5,
            0x5a => TapeDensity::LTO6,
            0x5c => TapeDensity::LTO7,
            0x5d => TapeDensity::LTO7M8,
            0x5e => TapeDensity::LTO8,
            0x60 => TapeDensity::LTO9,
            _ => bail!("unknown tape density code 0x{:02x}", value),
        };
        Ok(density)
    }
}

/// Drive/media status, assembled from inquiry data, mode pages and MAM
/// attributes. Media related fields are `None` when no cartridge is
/// loaded.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DriveAndMediaStatus {
    pub vendor: String,
    pub product: String,
    pub revision: String,
    pub blocksize: u32,
    pub compression: bool,
    pub buffer_mode: u8,
    pub density: TapeDensity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub write_protect: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert_flags: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_number: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manufactured: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes_read: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes_written: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub medium_passes: Option<u64>,
    /// Estimated tape wearout factor (assuming max. 16000 end-to-end
    /// passes)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub medium_wearout: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_mounts: Option<u64>,
}
