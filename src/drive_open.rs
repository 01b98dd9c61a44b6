//! Opens a [`DeviceWrapper`] from a `drive.cfg` entry, matching
//! `ltfs-tape/src/bin/pmt.rs`'s `get_tape_handle` lookup chain but
//! returning a `ltfs-core` device wrapper instead of a raw `SgTape`.

use std::path::Path;

use anyhow::{bail, Error};

use ltfs_api_types::{LtoTapeDrive, VirtualTapeDrive};
use ltfs_config::drive::config;
use ltfs_core::backend::{
    CartridgeHealth, DriveParameters, EodStatus, FormatKind, InquiryInfo, LocateTarget, SpaceKind,
    TapeBackend,
};
use ltfs_core::error::{BackendError, DriveFamily};
use ltfs_core::{DeviceWrapper, FileBackend, SgBackend};

/// The two backend kinds a `drive.cfg` entry can name, behind one static
/// dispatch so the CLI binaries don't need to be generic over `B`.
pub enum AnyBackend {
    Virtual(FileBackend),
    Lto(SgBackend),
}

macro_rules! dispatch {
    ($self:ident, $method:ident ($($arg:expr),*)) => {
        match $self {
            AnyBackend::Virtual(b) => b.$method($($arg),*),
            AnyBackend::Lto(b) => b.$method($($arg),*),
        }
    };
}

impl TapeBackend for AnyBackend {
    fn inquiry(&mut self) -> Result<InquiryInfo, BackendError> {
        dispatch!(self, inquiry())
    }
    fn test_unit_ready(&mut self) -> Result<(), BackendError> {
        dispatch!(self, test_unit_ready())
    }
    fn read(&mut self, buf: &mut [u8], unusual_size: bool) -> Result<usize, BackendError> {
        dispatch!(self, read(buf, unusual_size))
    }
    fn write(&mut self, buf: &[u8]) -> Result<(), BackendError> {
        dispatch!(self, write(buf))
    }
    fn write_filemark(&mut self, count: u32, immediate: bool) -> Result<(), BackendError> {
        dispatch!(self, write_filemark(count, immediate))
    }
    fn locate(&mut self, target: LocateTarget) -> Result<(), BackendError> {
        dispatch!(self, locate(target))
    }
    fn space(&mut self, count: i64, kind: SpaceKind) -> Result<(), BackendError> {
        dispatch!(self, space(count, kind))
    }
    fn read_position(&mut self) -> Result<ltfs_api_types::Position, BackendError> {
        dispatch!(self, read_position())
    }
    fn read_attribute(
        &mut self,
        partition: ltfs_api_types::PartitionId,
        id: u16,
    ) -> Result<Vec<u8>, BackendError> {
        dispatch!(self, read_attribute(partition, id))
    }
    fn write_attribute(
        &mut self,
        partition: ltfs_api_types::PartitionId,
        id: u16,
        data: &[u8],
    ) -> Result<(), BackendError> {
        dispatch!(self, write_attribute(partition, id, data))
    }
    fn drive_parameters(&mut self) -> Result<DriveParameters, BackendError> {
        dispatch!(self, drive_parameters())
    }
    fn crc32c_supported(&mut self) -> Result<bool, BackendError> {
        dispatch!(self, crc32c_supported())
    }
    fn set_lbp(&mut self, enable: bool) -> Result<(), BackendError> {
        dispatch!(self, set_lbp(enable))
    }
    fn format(&mut self, kind: FormatKind, vol_name: &str, barcode: &str) -> Result<(), BackendError> {
        dispatch!(self, format(kind, vol_name, barcode))
    }
    fn load(&mut self) -> Result<(), BackendError> {
        dispatch!(self, load())
    }
    fn unload(&mut self) -> Result<(), BackendError> {
        dispatch!(self, unload())
    }
    fn prevent_medium_removal(&mut self) -> Result<(), BackendError> {
        dispatch!(self, prevent_medium_removal())
    }
    fn allow_medium_removal(&mut self) -> Result<(), BackendError> {
        dispatch!(self, allow_medium_removal())
    }
    fn reserve_unit(&mut self) -> Result<(), BackendError> {
        dispatch!(self, reserve_unit())
    }
    fn release_unit(&mut self) -> Result<(), BackendError> {
        dispatch!(self, release_unit())
    }
    fn erase(&mut self, long: bool) -> Result<(), BackendError> {
        dispatch!(self, erase(long))
    }
    fn set_key(&mut self, alias: Option<[u8; 12]>, key: Option<[u8; 32]>) -> Result<(), BackendError> {
        dispatch!(self, set_key(alias, key))
    }
    fn get_key_alias(&mut self) -> Result<Option<[u8; 12]>, BackendError> {
        dispatch!(self, get_key_alias())
    }
    fn get_eod_status(&mut self, partition: ltfs_api_types::PartitionId) -> Result<EodStatus, BackendError> {
        dispatch!(self, get_eod_status(partition))
    }
    fn get_cartridge_health(&mut self) -> Result<CartridgeHealth, BackendError> {
        dispatch!(self, get_cartridge_health())
    }
    fn get_tape_alert(&mut self) -> Result<u64, BackendError> {
        dispatch!(self, get_tape_alert())
    }
    fn clear_tape_alert(&mut self) -> Result<(), BackendError> {
        dispatch!(self, clear_tape_alert())
    }
    fn set_compression(&mut self, on: bool) -> Result<(), BackendError> {
        dispatch!(self, set_compression(on))
    }
    fn set_default(&mut self) -> Result<(), BackendError> {
        dispatch!(self, set_default())
    }
    fn read_append_only_page(&mut self) -> Result<[u8; 22], BackendError> {
        dispatch!(self, read_append_only_page())
    }
    fn write_append_only_page(&mut self, page: &[u8; 22]) -> Result<(), BackendError> {
        dispatch!(self, write_append_only_page(page))
    }
    fn allow_overwrite(&mut self) -> Result<(), BackendError> {
        dispatch!(self, allow_overwrite())
    }
}

/// Resolve `name` (a section in `drive.cfg`) or, failing that, a bare
/// `/dev/sg*` path, to an open [`DeviceWrapper`].
pub fn open_drive(name_or_path: &str) -> Result<DeviceWrapper<AnyBackend>, Error> {
    let (cfg, _digest) = config()?;

    if let Some((section_type, _)) = cfg.sections.get(name_or_path) {
        return match section_type.as_str() {
            "virtual" => {
                let drive: VirtualTapeDrive = cfg.lookup("virtual", name_or_path)?;
                let backend = FileBackend::open(
                    Path::new(&drive.path),
                    drive.max_size_mib.unwrap_or(100_000),
                )?;
                Ok(DeviceWrapper::new(AnyBackend::Virtual(backend), None))
            }
            "lto" => {
                let drive: LtoTapeDrive = cfg.lookup("lto", name_or_path)?;
                let backend = SgBackend::open(&drive.path, DriveFamily::Lto)?;
                Ok(DeviceWrapper::new(AnyBackend::Lto(backend), None))
            }
            other => bail!("unknown drive section type '{other}'"),
        };
    }

    if name_or_path.starts_with('/') {
        let backend = SgBackend::open(name_or_path, DriveFamily::Lto)?;
        return Ok(DeviceWrapper::new(AnyBackend::Lto(backend), None));
    }

    bail!("no such drive '{name_or_path}' in drive.cfg");
}
