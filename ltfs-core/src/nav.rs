//! Filemark navigation helpers (C6): the four index-locate primitives built
//! out of `seek`/`seek_eod`/`space`, per spec §4.6.

use ltfs_api_types::{PartitionId, Position};

use crate::backend::{LocateTarget, SpaceKind, TapeBackend};
use crate::device::DeviceWrapper;
use crate::error::CoreError;

/// `seek_eod(p); space(-2, FM); space(+1, FM)` -- lands just after the
/// second-to-last filemark, i.e. at the start of the last committed index.
pub fn locate_last_index<B: TapeBackend>(
    dw: &DeviceWrapper<B>,
    part: PartitionId,
) -> Result<Position, CoreError> {
    dw.seek_eod(part)?;
    dw.space(part, -2, SpaceKind::Filemarks)?;
    dw.space(part, 1, SpaceKind::Filemarks)?;
    Ok(dw.position())
}

/// `seek({p, 4}); space(+1, FM)` -- the fixed block 4 is where the first
/// (post-label) index always starts.
pub fn locate_first_index<B: TapeBackend>(
    dw: &DeviceWrapper<B>,
    part: PartitionId,
) -> Result<Position, CoreError> {
    dw.seek(LocateTarget { partition: part, block: 4 })?;
    dw.space(part, 1, SpaceKind::Filemarks)?;
    Ok(dw.position())
}

pub fn locate_next_index<B: TapeBackend>(
    dw: &DeviceWrapper<B>,
    part: PartitionId,
) -> Result<Position, CoreError> {
    dw.space(part, 1, SpaceKind::Filemarks)?;
    Ok(dw.position())
}

/// `space(-4, FM); space(+1, FM)` -- skip back over this index's leading
/// filemark, the previous index's trailing data, and its own leading
/// filemark, then forward one to land just after it.
pub fn locate_previous_index<B: TapeBackend>(
    dw: &DeviceWrapper<B>,
    part: PartitionId,
) -> Result<Position, CoreError> {
    dw.space(part, -4, SpaceKind::Filemarks)?;
    dw.space(part, 1, SpaceKind::Filemarks)?;
    Ok(dw.position())
}
