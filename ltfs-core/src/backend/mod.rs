//! Tape Backend Trait (C1): the capability object the rest of the core talks
//! to. Two implementations share it -- [`file::FileBackend`] (file-emulated,
//! used for tests and the `virtual` drive config section) and
//! [`sg::SgBackend`] (real SCSI-generic hardware) -- with no assumptions
//! leaking across the trait boundary, per spec §9 "polymorphic backend".

pub mod file;
pub mod sg;

use ltfs_api_types::PartitionId;

use crate::error::BackendError;

pub use file::FileBackend;
pub use sg::SgBackend;

/// `space` command granularity (spec §4.1 `space(count, kind)`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpaceKind {
    Blocks,
    Filemarks,
    EndOfData,
}

/// `locate` target. `Block(u64::MAX)` on a partition means "locate to EOD";
/// use [`ltfs_api_types::Position::eod`] to build one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocateTarget {
    pub partition: PartitionId,
    pub block: u64,
}

/// `format` partition layout request (spec §4.4 `format`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatKind {
    /// Single partition, the whole cartridge is the data partition.
    SinglePartition,
    /// Two partitions; index partition is partition 0 if `index_is_first`.
    TwoPartition { index_is_first: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EodStatus {
    Good,
    Missing,
    Unknown,
}

/// Static device identification, returned by `inquiry`.
#[derive(Debug, Clone, Default)]
pub struct InquiryInfo {
    pub vendor: String,
    pub product: String,
    pub revision: String,
    pub serial: String,
}

/// Drive-reported parameters relevant to the device wrapper: maximum block
/// size and whether the medium is physically write-protected.
#[derive(Debug, Clone, Copy, Default)]
pub struct DriveParameters {
    pub max_block_size: u32,
    pub physical_write_protect: bool,
}

/// Cartridge health telemetry (spec §4.1 `get_cartridge_health`).
#[derive(Debug, Clone, Copy, Default)]
pub struct CartridgeHealth {
    pub medium_passes: u64,
    pub medium_wearout: f64,
}

/// The backend is a capability object. Every operation takes `&mut self`
/// (SCSI commands, or their file-emulated stand-ins, are inherently
/// sequential) and returns `Result<T, BackendError>`.
pub trait TapeBackend {
    fn inquiry(&mut self) -> Result<InquiryInfo, BackendError>;
    fn test_unit_ready(&mut self) -> Result<(), BackendError>;

    /// Read up to `buf.len()` bytes. `unusual_size` permits a short read
    /// without treating it as an error (variable block mode).
    fn read(&mut self, buf: &mut [u8], unusual_size: bool) -> Result<usize, BackendError>;
    fn write(&mut self, buf: &[u8]) -> Result<(), BackendError>;
    fn write_filemark(&mut self, count: u32, immediate: bool) -> Result<(), BackendError>;

    fn locate(&mut self, target: LocateTarget) -> Result<(), BackendError>;
    fn space(&mut self, count: i64, kind: SpaceKind) -> Result<(), BackendError>;
    fn read_position(&mut self) -> Result<ltfs_api_types::Position, BackendError>;

    fn read_attribute(
        &mut self,
        partition: PartitionId,
        id: u16,
    ) -> Result<Vec<u8>, BackendError>;
    fn write_attribute(
        &mut self,
        partition: PartitionId,
        id: u16,
        data: &[u8],
    ) -> Result<(), BackendError>;

    fn drive_parameters(&mut self) -> Result<DriveParameters, BackendError>;
    fn crc32c_supported(&mut self) -> Result<bool, BackendError>;
    fn set_lbp(&mut self, enable: bool) -> Result<(), BackendError>;

    fn format(
        &mut self,
        kind: FormatKind,
        vol_name: &str,
        barcode: &str,
    ) -> Result<(), BackendError>;

    fn load(&mut self) -> Result<(), BackendError>;
    fn unload(&mut self) -> Result<(), BackendError>;
    fn prevent_medium_removal(&mut self) -> Result<(), BackendError>;
    fn allow_medium_removal(&mut self) -> Result<(), BackendError>;

    fn reserve_unit(&mut self) -> Result<(), BackendError>;
    fn release_unit(&mut self) -> Result<(), BackendError>;

    fn erase(&mut self, long: bool) -> Result<(), BackendError>;

    fn set_key(&mut self, alias: Option<[u8; 12]>, key: Option<[u8; 32]>) -> Result<(), BackendError>;
    fn get_key_alias(&mut self) -> Result<Option<[u8; 12]>, BackendError>;

    fn get_eod_status(&mut self, partition: PartitionId) -> Result<EodStatus, BackendError>;
    fn get_cartridge_health(&mut self) -> Result<CartridgeHealth, BackendError>;
    fn get_tape_alert(&mut self) -> Result<u64, BackendError>;
    fn clear_tape_alert(&mut self) -> Result<(), BackendError>;

    fn set_compression(&mut self, on: bool) -> Result<(), BackendError>;
    fn set_default(&mut self) -> Result<(), BackendError>;

    /// Read the device-configuration-extension mode page (0x10, subpage
    /// 0x01); byte 21's low nibble carries the append-only setting (spec
    /// §4.4).
    fn read_append_only_page(&mut self) -> Result<[u8; 22], BackendError>;
    fn write_append_only_page(&mut self, page: &[u8; 22]) -> Result<(), BackendError>;

    /// SSC ALLOW OVERWRITE: permit one write at the current position on a
    /// cartridge configured for append-only access (spec §4.4, §4.6).
    fn allow_overwrite(&mut self) -> Result<(), BackendError>;
}
