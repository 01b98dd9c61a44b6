//! Sense-to-error mapping and the public error taxonomy (C8).
//!
//! [`BackendError`] is what a [`crate::backend::TapeBackend`] returns; it is a
//! closed enum carrying the raw 3-byte sense triplet for logging. The device
//! wrapper maps every `BackendError` to exactly one [`CoreError`], the
//! taxonomy actually surfaced to `LtfsOps` callers.

use ltfs_tape::sgutils2::{
    SENSE_KEY_ABORTED_COMMAND, SENSE_KEY_BLANK_CHECK, SENSE_KEY_DATA_PROTECT,
    SENSE_KEY_HARDWARE_ERROR, SENSE_KEY_ILLEGAL_REQUEST, SENSE_KEY_MEDIUM_ERROR,
    SENSE_KEY_NOT_READY, SENSE_KEY_NO_SENSE, SENSE_KEY_RECOVERED_ERROR, SENSE_KEY_UNIT_ATTENTION,
};

/// Raw SCSI sense triplet, kept on every [`BackendError`] for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SenseTriplet {
    pub sense_key: u8,
    pub asc: u8,
    pub ascq: u8,
}

impl SenseTriplet {
    pub const fn new(sense_key: u8, asc: u8, ascq: u8) -> Self {
        Self {
            sense_key,
            asc,
            ascq,
        }
    }
}

impl std::fmt::Display for SenseTriplet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "sense {:02x}/{:02x}/{:02x}",
            self.sense_key, self.asc, self.ascq
        )
    }
}

/// Closed error enum returned by every [`crate::backend::TapeBackend`]
/// operation. Every variant carries the raw sense triplet that produced it
/// (zeroed for conditions synthesized locally, e.g. timeouts).
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendError {
    #[error("no sense ({0})")]
    NoSense(SenseTriplet),
    #[error("filemark detected ({0})")]
    FilemarkDetected(SenseTriplet),
    #[error("early warning ({0})")]
    EarlyWarning(SenseTriplet),
    #[error("programmable early warning ({0})")]
    ProgEarlyWarning(SenseTriplet),
    #[error("end of data detected ({0})")]
    EodDetected(SenseTriplet),
    #[error("end of data not found ({0})")]
    EodNotFound(SenseTriplet),
    #[error("overrun ({0})")]
    Overrun(SenseTriplet),
    #[error("read/write permission error ({0})")]
    RwPerm(SenseTriplet),
    #[error("logical block protection read error ({0})")]
    LbpReadError(SenseTriplet),
    #[error("logical block protection write error ({0})")]
    LbpWriteError(SenseTriplet),
    #[error("no medium ({0})")]
    NoMedium(SenseTriplet),
    #[error("drive becoming ready ({0})")]
    BecomingReady(SenseTriplet),
    #[error("drive needs initialize command ({0})")]
    NeedInitialize(SenseTriplet),
    #[error("medium may have changed ({0})")]
    MediumMayChanged(SenseTriplet),
    #[error("power-on or bus reset occurred ({0})")]
    PORorBusReset(SenseTriplet),
    #[error("mode parameters changed ({0})")]
    ConfigureChanged(SenseTriplet),
    #[error("drive not ready ({0})")]
    NotReady(SenseTriplet),
    #[error("write protected ({0})")]
    WriteProtect(SenseTriplet),
    #[error("logical write protected ({0})")]
    LogicalWriteProtect(SenseTriplet),
    #[error("no space remains on medium ({0})")]
    NoSpace(SenseTriplet),
    #[error("less space remains on medium ({0})")]
    LessSpace(SenseTriplet),
    #[error("medium error ({0})")]
    MediumError(SenseTriplet),
    #[error("medium format error ({0})")]
    MediumFormatError(SenseTriplet),
    #[error("medium format corrupted ({0})")]
    MediumFormatCorrupted(SenseTriplet),
    #[error("encryption error ({0})")]
    Crypto(SenseTriplet),
    #[error("encryption key required ({0})")]
    KeyRequired(SenseTriplet),
    #[error("encryption key change detected ({0})")]
    KeyChangeDetected(SenseTriplet),
    #[error("key service timeout ({0})")]
    KeyServiceTimeout(SenseTriplet),
    #[error("illegal request ({0})")]
    IllegalRequest(SenseTriplet),
    #[error("invalid field in cdb ({0})")]
    InvalidFieldCdb(SenseTriplet),
    #[error("hardware error ({0})")]
    Hardware(SenseTriplet),
    #[error("aborted command ({0})")]
    AbortedCommand(SenseTriplet),
    #[error("device busy ({0})")]
    DeviceBusy(SenseTriplet),
    #[error("timeout ({0})")]
    Timeout(SenseTriplet),
    #[error("driver error ({0})")]
    DriverError(SenseTriplet),
    #[error("unsupported function ({0})")]
    UnsupportedFunction(SenseTriplet),
    /// Synthesized locally (not drive-reported): the backend's
    /// `backend_mutex` fenced off new acquisitions during revalidation.
    #[error("device fenced")]
    DeviceFenced,
}

impl BackendError {
    pub fn sense(&self) -> Option<SenseTriplet> {
        match *self {
            Self::DeviceFenced => None,
            Self::NoSense(s)
            | Self::FilemarkDetected(s)
            | Self::EarlyWarning(s)
            | Self::ProgEarlyWarning(s)
            | Self::EodDetected(s)
            | Self::EodNotFound(s)
            | Self::Overrun(s)
            | Self::RwPerm(s)
            | Self::LbpReadError(s)
            | Self::LbpWriteError(s)
            | Self::NoMedium(s)
            | Self::BecomingReady(s)
            | Self::NeedInitialize(s)
            | Self::MediumMayChanged(s)
            | Self::PORorBusReset(s)
            | Self::ConfigureChanged(s)
            | Self::NotReady(s)
            | Self::WriteProtect(s)
            | Self::LogicalWriteProtect(s)
            | Self::NoSpace(s)
            | Self::LessSpace(s)
            | Self::MediumError(s)
            | Self::MediumFormatError(s)
            | Self::MediumFormatCorrupted(s)
            | Self::Crypto(s)
            | Self::KeyRequired(s)
            | Self::KeyChangeDetected(s)
            | Self::KeyServiceTimeout(s)
            | Self::IllegalRequest(s)
            | Self::InvalidFieldCdb(s)
            | Self::Hardware(s)
            | Self::AbortedCommand(s)
            | Self::DeviceBusy(s)
            | Self::Timeout(s)
            | Self::DriverError(s)
            | Self::UnsupportedFunction(s) => Some(s),
        }
    }

    /// Classify according to §4.8 and dump-on-error criteria: does this
    /// error warrant pulling a drive dump?
    pub fn triggers_dump(&self) -> bool {
        matches!(
            self,
            Self::Hardware(_)
                | Self::MediumError(_)
                | Self::MediumFormatError(_)
                | Self::MediumFormatCorrupted(_)
                | Self::AbortedCommand(_)
        )
    }
}

/// Map a raw SCSI sense triplet to exactly one [`BackendError`] variant.
///
/// Applies the three post-processing rules of spec §4.8 before falling back
/// to the vendor-unique table:
/// 1. sense 04/40xx collapses to `Hardware`; 04/80xx collapses to the
///    vendor-unique table; 0B/41xx collapses to `AbortedCommand`.
/// 2. sense key >= 8, or asc/ascq >= 0x80 with no standard match, falls back
///    to the vendor-unique table for the given drive family.
/// 3. a "recovered error" sense (key 1) maps to `NoSense` (success) and must
///    never propagate as a failure.
pub fn map_sense(sense_key: u8, asc: u8, ascq: u8, family: DriveFamily) -> BackendError {
    let t = SenseTriplet::new(sense_key, asc, ascq);

    if sense_key == SENSE_KEY_RECOVERED_ERROR {
        return BackendError::NoSense(t);
    }

    if sense_key == SENSE_KEY_HARDWARE_ERROR && (0x40..0x50).contains(&asc) {
        return BackendError::Hardware(t);
    }
    if sense_key == SENSE_KEY_HARDWARE_ERROR && (0x80..).contains(&asc) {
        return vendor_unique(t, family);
    }
    if sense_key == SENSE_KEY_ABORTED_COMMAND && asc == 0x41 {
        return BackendError::AbortedCommand(t);
    }

    if let Some(err) = standard_table(t) {
        return err;
    }

    if sense_key >= 8 || asc >= 0x80 || ascq >= 0x80 {
        return vendor_unique(t, family);
    }

    BackendError::IllegalRequest(t)
}

/// Drive family selector for the vendor-unique fallback table (§4.8 rule 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveFamily {
    Lto,
    Enterprise,
}

fn standard_table(t: SenseTriplet) -> Option<BackendError> {
    use BackendError::*;
    let SenseTriplet {
        sense_key,
        asc,
        ascq,
    } = t;

    Some(match (sense_key, asc, ascq) {
        (SENSE_KEY_NO_SENSE, 0x00, 0x01) => FilemarkDetected(t),
        (SENSE_KEY_NO_SENSE, 0x00, 0x02) => EarlyWarning(t),
        (SENSE_KEY_NO_SENSE, 0x00, 0x07) => ProgEarlyWarning(t),
        (SENSE_KEY_BLANK_CHECK, 0x00, 0x05) => EodDetected(t),
        (SENSE_KEY_MEDIUM_ERROR, 0x14, 0x03) => EodNotFound(t),
        (SENSE_KEY_NOT_READY, 0x3a, _) => NoMedium(t),
        (SENSE_KEY_NOT_READY, 0x04, 0x01) => BecomingReady(t),
        (SENSE_KEY_NOT_READY, 0x04, 0x00) => NeedInitialize(t),
        (SENSE_KEY_UNIT_ATTENTION, 0x28, _) => MediumMayChanged(t),
        (SENSE_KEY_UNIT_ATTENTION, 0x29, _) => PORorBusReset(t),
        (SENSE_KEY_UNIT_ATTENTION, 0x2a, _) => ConfigureChanged(t),
        (SENSE_KEY_NOT_READY, _, _) => NotReady(t),
        (SENSE_KEY_DATA_PROTECT, 0x27, 0x02) => LogicalWriteProtect(t),
        (SENSE_KEY_DATA_PROTECT, 0x27, _) => WriteProtect(t),
        (SENSE_KEY_MEDIUM_ERROR, 0x00, 0x02) => NoSpace(t),
        (SENSE_KEY_MEDIUM_ERROR, 0x00, 0x07) => LessSpace(t),
        (SENSE_KEY_MEDIUM_ERROR, 0x30, 0x00) => MediumFormatError(t),
        (SENSE_KEY_MEDIUM_ERROR, 0x31, _) => MediumFormatCorrupted(t),
        (SENSE_KEY_MEDIUM_ERROR, _, _) => MediumError(t),
        (SENSE_KEY_ILLEGAL_REQUEST, 0x20, 0x00) => InvalidFieldCdb(t),
        (SENSE_KEY_ILLEGAL_REQUEST, 0x74, 0x01) => KeyRequired(t),
        (SENSE_KEY_ILLEGAL_REQUEST, 0x74, 0x06) => KeyChangeDetected(t),
        (SENSE_KEY_ILLEGAL_REQUEST, 0x74, 0x09) => KeyServiceTimeout(t),
        (SENSE_KEY_ILLEGAL_REQUEST, 0x74, _) => Crypto(t),
        (SENSE_KEY_ILLEGAL_REQUEST, _, _) => IllegalRequest(t),
        (SENSE_KEY_ABORTED_COMMAND, _, _) => AbortedCommand(t),
        (SENSE_KEY_HARDWARE_ERROR, _, _) => Hardware(t),
        _ => return None,
    })
}

fn vendor_unique(t: SenseTriplet, family: DriveFamily) -> BackendError {
    match family {
        // IBM/enterprise drives report library-vendor-unique conditions in
        // the 0x80.. ASC range for things that are really just hardware
        // faults; HP/LTO consumer drives use the same range for overruns.
        DriveFamily::Enterprise => BackendError::Hardware(t),
        DriveFamily::Lto => BackendError::Overrun(t),
    }
}

/// Public error taxonomy returned by the device wrapper (C4) and `LtfsOps`
/// (§7). Every variant here is reachable either by mapping a [`BackendError`]
/// once at the device-wrapper boundary, or by a core-internal condition
/// (label mismatch, index corruption, lock contention, interruption).
#[derive(thiserror::Error, Debug)]
pub enum CoreError {
    #[error("no medium loaded")]
    NoMedium,
    #[error("device busy")]
    DeviceBusy,
    #[error("device could not be opened: {0}")]
    DeviceUnopenable(String),
    #[error("medium is not a valid LTFS volume: {0}")]
    UnsupportedMedium(String),
    #[error("write protected")]
    WriteProtect,
    #[error("write error (latched)")]
    WriteError,
    #[error("no space remains on medium")]
    NoSpace,
    #[error("less space remains on medium")]
    LessSpace,
    #[error("label mismatch: {0}")]
    LabelMismatch(String),
    #[error("locate landed on the wrong partition")]
    BadLocate,
    #[error("parse error: {0}")]
    ParseError(String),
    #[error("index corrupted, run ltfsck")]
    IndexCorrupted,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("not a directory: {0}")]
    NotADirectory(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),
    #[error("encryption key required for alias {0:?}")]
    KeyRequired([u8; 12]),
    #[error("operation interrupted")]
    Interrupted,
    #[error("hardware error: {0}")]
    Hardware(#[from] BackendError),
    #[error("internal error: {0}")]
    Internal(String),
    #[error("lock error: {0}")]
    Lock(#[from] crate::lock::TapeLockError),
}

impl CoreError {
    /// Map a raw backend error to its public-facing class (device-wrapper
    /// boundary mapping, §7 propagation policy -- performed exactly once).
    pub fn from_backend(err: BackendError) -> Self {
        match err {
            BackendError::NoMedium(_) => CoreError::NoMedium,
            BackendError::DeviceBusy(_) => CoreError::DeviceBusy,
            BackendError::WriteProtect(_) | BackendError::LogicalWriteProtect(_) => {
                CoreError::WriteProtect
            }
            BackendError::NoSpace(_) => CoreError::NoSpace,
            BackendError::LessSpace(_) => CoreError::LessSpace,
            BackendError::KeyRequired(_) => CoreError::KeyRequired([0u8; 12]),
            other => CoreError::Hardware(other),
        }
    }
}
