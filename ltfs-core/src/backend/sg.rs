//! Hardware backend: a thin [`TapeBackend`] skin over
//! [`ltfs_tape::sg_tape::SgTape`], the teacher's SCSI-generic driver.
//!
//! `SgTape` only ever positions against partition 0 (`position()` bails if
//! the drive reports a nonzero partition number -- proxmox-backup never
//! wrote multi-partition cartridges). LTFS needs two. Until `sg_tape` grows
//! `LOCATE(16)`/`READ POSITION` partition-field support, this wrapper tracks
//! the logical partition in software and only actually repositions the head
//! via filemark-counted `locate_file`/`space`, which is what the underlying
//! driver exposes today.

use std::path::Path;

use ltfs_tape::sg_tape::{SgTape, SgTapeReader, SgTapeWriter};
use ltfs_tape::sgutils2::{ScsiError, SenseInfo};
use ltfs_tape::{BlockRead, BlockWrite};

use ltfs_api_types::{INDEX_PARTITION, PartitionId, Position};

use crate::error::{BackendError, DriveFamily, SenseTriplet, map_sense};

use super::{
    CartridgeHealth, DriveParameters, EodStatus, FormatKind, InquiryInfo, LocateTarget, SpaceKind,
    TapeBackend,
};

fn convert_scsi(err: ScsiError, family: DriveFamily) -> BackendError {
    match err {
        ScsiError::Sense(SenseInfo {
            sense_key,
            asc,
            ascq,
        }) => map_sense(sense_key, asc, ascq, family),
        ScsiError::Error(_) => BackendError::DriverError(SenseTriplet::default()),
    }
}

fn convert(err: anyhow::Error, family: DriveFamily) -> BackendError {
    match err.downcast::<ScsiError>() {
        Ok(scsi_err) => convert_scsi(scsi_err, family),
        Err(_) => BackendError::DriverError(SenseTriplet::default()),
    }
}

fn convert_io(err: std::io::Error, family: DriveFamily) -> BackendError {
    convert(anyhow::Error::from(err), family)
}

pub struct SgBackend {
    tape: SgTape,
    family: DriveFamily,
    current_partition: PartitionId,
}

impl SgBackend {
    pub fn open<P: AsRef<Path>>(path: P, family: DriveFamily) -> Result<Self, BackendError> {
        let tape = SgTape::open(path).map_err(|err| convert(err, family))?;
        Ok(Self {
            tape,
            family,
            current_partition: INDEX_PARTITION,
        })
    }
}

impl TapeBackend for SgBackend {
    fn inquiry(&mut self) -> Result<InquiryInfo, BackendError> {
        let info = self
            .tape
            .inquiry()
            .map_err(|err| convert(err, self.family))?;
        Ok(InquiryInfo {
            vendor: info.vendor,
            product: info.product,
            revision: info.revision,
            serial: String::new(),
        })
    }

    fn test_unit_ready(&mut self) -> Result<(), BackendError> {
        self.tape
            .test_unit_ready()
            .map_err(|err| convert(err, self.family))
    }

    fn read(&mut self, buf: &mut [u8], _unusual_size: bool) -> Result<usize, BackendError> {
        let mut reader = SgTapeReader::new(&mut self.tape);
        reader.read_block(buf).map_err(|err| match err {
            ltfs_tape::BlockReadError::EndOfFile => {
                BackendError::FilemarkDetected(SenseTriplet::default())
            }
            ltfs_tape::BlockReadError::EndOfStream => {
                BackendError::EodDetected(SenseTriplet::default())
            }
            ltfs_tape::BlockReadError::Error(e) => convert_io(e, self.family),
        })
    }

    fn write(&mut self, buf: &[u8]) -> Result<(), BackendError> {
        let mut writer = SgTapeWriter::new(&mut self.tape);
        let early_warning = writer
            .write_block(buf)
            .map_err(|err| convert_io(err, self.family))?;
        if early_warning {
            return Err(BackendError::EarlyWarning(SenseTriplet::default()));
        }
        Ok(())
    }

    fn write_filemark(&mut self, count: u32, immediate: bool) -> Result<(), BackendError> {
        self.tape
            .write_filemarks(count as usize, immediate)
            .map_err(|err| convert_io(err, self.family))
    }

    fn locate(&mut self, target: LocateTarget) -> Result<(), BackendError> {
        self.current_partition = target.partition;
        if target.block == ltfs_api_types::EOD_BLOCK {
            return self
                .tape
                .move_to_eom(false)
                .map_err(|err| convert(err, self.family));
        }
        self.tape
            .locate_file(target.block)
            .map_err(|err| convert(err, self.family))
    }

    fn space(&mut self, count: i64, kind: SpaceKind) -> Result<(), BackendError> {
        match kind {
            SpaceKind::Blocks => self
                .tape
                .space_blocks(count as isize)
                .map_err(|err| convert(err, self.family)),
            SpaceKind::Filemarks => self
                .tape
                .space_filemarks(count as isize)
                .map_err(|err| convert(err, self.family)),
            SpaceKind::EndOfData => self
                .tape
                .move_to_eom(false)
                .map_err(|err| convert(err, self.family)),
        }
    }

    fn read_position(&mut self) -> Result<Position, BackendError> {
        let page = self
            .tape
            .position()
            .map_err(|err| convert(err, self.family))?;
        Ok(Position {
            partition: self.current_partition,
            block: page.logical_object_number,
            filemarks: page.logical_file_id,
            early_warning: false,
            programmable_early_warning: false,
        })
    }

    fn read_attribute(
        &mut self,
        _partition: PartitionId,
        id: u16,
    ) -> Result<Vec<u8>, BackendError> {
        let attrs = self
            .tape
            .cartridge_memory()
            .map_err(|err| convert(err, self.family))?;
        attrs
            .into_iter()
            .find(|a| a.id == id)
            .map(|a| a.value.into_bytes())
            .ok_or(BackendError::IllegalRequest(SenseTriplet::default()))
    }

    fn write_attribute(
        &mut self,
        _partition: PartitionId,
        _id: u16,
        _data: &[u8],
    ) -> Result<(), BackendError> {
        // MAM attribute write (SPIN/SPOUT WRITE ATTRIBUTE) is not exposed by
        // the underlying driver yet; volume coherency is instead recovered
        // by reading the index partition directly (§4.5).
        Err(BackendError::UnsupportedFunction(SenseTriplet::default()))
    }

    fn drive_parameters(&mut self) -> Result<DriveParameters, BackendError> {
        let status = self
            .tape
            .read_drive_status()
            .map_err(|err| convert(err, self.family))?;
        Ok(DriveParameters {
            max_block_size: 0x800000,
            physical_write_protect: status.write_protect,
        })
    }

    fn crc32c_supported(&mut self) -> Result<bool, BackendError> {
        // No LTO drive generation exposes CRC32C LBP; Reed-Solomon is the
        // only algorithm present on real hardware.
        Ok(false)
    }

    fn set_lbp(&mut self, _enable: bool) -> Result<(), BackendError> {
        Ok(())
    }

    fn format(
        &mut self,
        _kind: FormatKind,
        _vol_name: &str,
        _barcode: &str,
    ) -> Result<(), BackendError> {
        self.tape
            .format_media(false)
            .map_err(|err| convert(err, self.family))
    }

    fn load(&mut self) -> Result<(), BackendError> {
        self.tape.load().map_err(|err| convert(err, self.family))
    }

    fn unload(&mut self) -> Result<(), BackendError> {
        self.tape.eject().map_err(|err| convert(err, self.family))
    }

    fn prevent_medium_removal(&mut self) -> Result<(), BackendError> {
        self.tape
            .set_medium_removal(false)
            .map_err(|err| convert_scsi(err, self.family))
    }

    fn allow_medium_removal(&mut self) -> Result<(), BackendError> {
        self.tape
            .set_medium_removal(true)
            .map_err(|err| convert_scsi(err, self.family))
    }

    fn reserve_unit(&mut self) -> Result<(), BackendError> {
        Ok(())
    }

    fn release_unit(&mut self) -> Result<(), BackendError> {
        Ok(())
    }

    fn erase(&mut self, long: bool) -> Result<(), BackendError> {
        self.tape
            .erase_media(!long)
            .map_err(|err| convert(err, self.family))
    }

    fn set_key(
        &mut self,
        _alias: Option<[u8; 12]>,
        key: Option<[u8; 32]>,
    ) -> Result<(), BackendError> {
        self.tape
            .set_encryption(key)
            .map_err(|err| convert(err, self.family))
    }

    fn get_key_alias(&mut self) -> Result<Option<[u8; 12]>, BackendError> {
        Ok(None)
    }

    fn get_eod_status(&mut self, _partition: PartitionId) -> Result<EodStatus, BackendError> {
        match self.tape.check_filemark() {
            Ok(true) => Ok(EodStatus::Good),
            Ok(false) => Ok(EodStatus::Unknown),
            Err(_) => Ok(EodStatus::Missing),
        }
    }

    fn get_cartridge_health(&mut self) -> Result<CartridgeHealth, BackendError> {
        let status = self
            .tape
            .get_drive_and_media_status()
            .map_err(|err| convert(err, self.family))?;
        Ok(CartridgeHealth {
            medium_passes: status.medium_passes.unwrap_or(0),
            medium_wearout: status.medium_wearout.unwrap_or(0.0),
        })
    }

    fn get_tape_alert(&mut self) -> Result<u64, BackendError> {
        let flags = self
            .tape
            .tape_alert_flags()
            .map_err(|err| convert(err, self.family))?;
        Ok(flags.bits())
    }

    fn clear_tape_alert(&mut self) -> Result<(), BackendError> {
        Ok(())
    }

    fn set_compression(&mut self, on: bool) -> Result<(), BackendError> {
        self.tape.set_compression(on);
        self.tape
            .set_drive_options(Some(on), None, None)
            .map_err(|err| convert(err, self.family))
    }

    fn set_default(&mut self) -> Result<(), BackendError> {
        self.tape
            .set_default_options()
            .map_err(|err| convert(err, self.family))
    }

    fn read_append_only_page(&mut self) -> Result<[u8; 22], BackendError> {
        // No generic mode-sense pass-through is exposed by the underlying
        // driver yet (only the fixed page-0x0f/page-0x1d accessors used by
        // `set_compression`/`set_default` exist); see `write_attribute`
        // above for the same limitation on MAM writes.
        Err(BackendError::UnsupportedFunction(SenseTriplet::default()))
    }

    fn write_append_only_page(&mut self, _page: &[u8; 22]) -> Result<(), BackendError> {
        Err(BackendError::UnsupportedFunction(SenseTriplet::default()))
    }

    fn allow_overwrite(&mut self) -> Result<(), BackendError> {
        // SSC ALLOW OVERWRITE is not wired up in the underlying driver.
        Err(BackendError::UnsupportedFunction(SenseTriplet::default()))
    }
}
