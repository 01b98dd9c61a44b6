//! Label & coherency device operations (C5): the device-wrapper-level I/O
//! that reads/writes the `Label`/`Coherency` records [`ltfs_api_types`]
//! already models. This module is where those types meet a live backend.

use ltfs_api_types::{Coherency, INDEX_PARTITION, Label, PartitionId, label_compare};

use crate::backend::TapeBackend;
use crate::device::DeviceWrapper;
use crate::error::CoreError;

/// MAM attribute id for the 76-byte Coherency page (§6).
const MAM_COHERENCY_ID: u16 = 0x080C;

/// Read the coherency record for `part` out of its MAM page.
pub fn read_coherency<B: TapeBackend>(
    dw: &DeviceWrapper<B>,
    part: PartitionId,
) -> Result<Coherency, CoreError> {
    let data = dw.read_attribute(part, MAM_COHERENCY_ID)?;
    Coherency::decode(&data).map_err(|err| {
        CoreError::UnsupportedMedium(format!("partition {part}: malformed coherency record: {err}"))
    })
}

pub fn write_coherency<B: TapeBackend>(
    dw: &DeviceWrapper<B>,
    part: PartitionId,
    coherency: &Coherency,
) -> Result<(), CoreError> {
    dw.write_attribute(part, MAM_COHERENCY_ID, &coherency.encode())
}

/// Pick the authoritative partition between the two coherency records read
/// at load time: same UUID required, higher `count` wins (§4.5).
pub fn resolve_authoritative(
    index: &Coherency,
    data: &Coherency,
) -> Result<PartitionId, CoreError> {
    if index.uuid != data.uuid {
        return Err(CoreError::LabelMismatch(
            "coherency UUID mismatch between partitions".to_string(),
        ));
    }
    Ok(if index.count >= data.count {
        INDEX_PARTITION
    } else {
        ltfs_api_types::DATA_PARTITION
    })
}

/// Verify the two partition labels agree, per `label_compare`'s full rule
/// set (barcode, vol_uuid, format_time, blocksize, compression, the
/// partition-id cross-assignment, and `this_partition` differing).
pub fn verify_labels(index_label: &Label, data_label: &Label) -> Result<(), CoreError> {
    label_compare(index_label, data_label)
        .map_err(|err| CoreError::LabelMismatch(err.to_string()))
}
