use anyhow::{bail, Error};
use proxmox_uuid::Uuid;
use serde::{Deserialize, Serialize};

use crate::PartitionId;

/// LTFS volume label, written once on `format` to both partitions and
/// thereafter read-only until `unformat`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Label {
    pub version: u32,
    pub creator: String,
    /// 6 characters, each in `[0-9A-Z]` or all-spaces.
    pub barcode: [u8; 6],
    pub vol_uuid: Uuid,
    /// Seconds since the epoch.
    pub format_time: i64,
    pub blocksize: u32,
    pub enable_compression: bool,
    /// Partition letter holding the data partition, `'a'` or `'b'`.
    pub partid_dp: char,
    /// Partition letter holding the index partition, `'a'` or `'b'`.
    pub partid_ip: char,
    /// Which of `partid_dp`/`partid_ip` this physical copy of the label
    /// was written to.
    pub this_partition: char,
}

impl Label {
    fn barcode_is_valid(barcode: &[u8; 6]) -> bool {
        barcode
            .iter()
            .all(|&b| b == b' ' || b.is_ascii_digit() || b.is_ascii_uppercase())
    }

    pub fn validate(&self) -> Result<(), Error> {
        if !Self::barcode_is_valid(&self.barcode) {
            bail!("label barcode contains invalid characters");
        }
        if self.partid_dp == self.partid_ip {
            bail!("label partid_dp must differ from partid_ip");
        }
        for c in [self.partid_dp, self.partid_ip] {
            if c != 'a' && c != 'b' {
                bail!("label partition id must be 'a' or 'b', got '{}'", c);
            }
        }
        Ok(())
    }
}

/// Compare the two partitions' physically-present labels for mount
/// consistency. Any mismatch is reported as a `LabelMismatch`-class error
/// by the caller; this function only establishes whether they agree.
pub fn label_compare(a: &Label, b: &Label) -> Result<(), Error> {
    a.validate()?;
    b.validate()?;

    if a.barcode != b.barcode {
        bail!("label mismatch: barcode differs between partitions");
    }
    if a.vol_uuid != b.vol_uuid {
        bail!("label mismatch: volume uuid differs between partitions");
    }
    if a.format_time != b.format_time {
        bail!("label mismatch: format_time differs between partitions");
    }
    if a.blocksize != b.blocksize {
        bail!("label mismatch: blocksize differs between partitions");
    }
    if a.enable_compression != b.enable_compression {
        bail!("label mismatch: compression flag differs between partitions");
    }
    if a.partid_dp != b.partid_dp || a.partid_ip != b.partid_ip {
        bail!("label mismatch: partition id assignment differs between partitions");
    }
    if a.this_partition == b.this_partition {
        bail!("label mismatch: both labels claim the same physical partition");
    }
    if a.version != b.version {
        bail!("label mismatch: version differs between partitions");
    }

    Ok(())
}

/// The `"LTFS"` signature required at bytes 32..36 of a coherency record.
const COHERENCY_SIGNATURE: &[u8; 4] = b"LTFS";

/// Total encoded size of a coherency record (§4.5/§6: the MAM 0x080C
/// payload is always 76 bytes, signature at offset 32).
const COHERENCY_RECORD_SIZE: usize = 76;

/// Offset of the application-client specific information length byte.
const INFO_LEN_OFFSET: usize = 24;
/// Offset of the `"LTFS"` signature.
const SIGNATURE_OFFSET: usize = 32;
/// Offset of the uuid field, immediately following the signature.
const UUID_OFFSET: usize = SIGNATURE_OFFSET + 4;
/// Offset of the trailing version byte.
const VERSION_OFFSET: usize = UUID_OFFSET + 37;

/// Coherency record, stored as MAM attribute id 0x080C on each partition.
/// The partition whose record carries the higher `count` (with matching
/// `uuid`) holds the freshest index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coherency {
    pub volume_change_ref: u64,
    pub count: u64,
    pub set_id: u64,
    pub uuid: [u8; 37],
    pub version: u8,
}

impl Coherency {
    /// Encode to the 76-byte MAM payload, `"LTFS"` signature at offset 32.
    /// Always writes application-client specific information length 43;
    /// see [`Self::decode`] for the historical 42-vs-43 acceptance quirk.
    /// Bytes between the length byte and the signature, and the two
    /// trailing bytes after `version`, are reserved and written as zero.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; COHERENCY_RECORD_SIZE];
        buf[0..8].copy_from_slice(&self.volume_change_ref.to_be_bytes());
        buf[8..16].copy_from_slice(&self.count.to_be_bytes());
        buf[16..24].copy_from_slice(&self.set_id.to_be_bytes());
        buf[INFO_LEN_OFFSET] = 43; // application client specific information length
        buf[SIGNATURE_OFFSET..SIGNATURE_OFFSET + 4].copy_from_slice(COHERENCY_SIGNATURE);
        buf[UUID_OFFSET..UUID_OFFSET + 37].copy_from_slice(&self.uuid);
        buf[VERSION_OFFSET] = self.version;
        buf
    }

    /// Decode a coherency record. Accepts an application-client specific
    /// information length of either 42 (a historical off-by-one bug in the
    /// original implementation, preserved here for cartridges written by
    /// it) or 43 (what [`Self::encode`] writes).
    pub fn decode(data: &[u8]) -> Result<Self, Error> {
        if data.len() < VERSION_OFFSET + 1 {
            bail!("coherency record too short ({} bytes)", data.len());
        }
        let volume_change_ref = u64::from_be_bytes(data[0..8].try_into()?);
        let count = u64::from_be_bytes(data[8..16].try_into()?);
        let set_id = u64::from_be_bytes(data[16..24].try_into()?);
        let info_len = data[INFO_LEN_OFFSET];
        if info_len != 42 && info_len != 43 {
            bail!(
                "coherency record has unexpected application client specific \
                 information length {info_len} (expected 42 or 43)"
            );
        }
        if &data[SIGNATURE_OFFSET..SIGNATURE_OFFSET + 4] != COHERENCY_SIGNATURE {
            bail!("coherency record missing 'LTFS' signature");
        }
        let mut uuid = [0u8; 37];
        uuid.copy_from_slice(&data[UUID_OFFSET..UUID_OFFSET + 37]);
        let version = data[VERSION_OFFSET];

        Ok(Self {
            volume_change_ref,
            count,
            set_id,
            uuid,
            version,
        })
    }

    /// Build the next record for a successful index commit: `count`
    /// strictly increases, everything else is carried forward.
    pub fn next(&self, partition_written: PartitionId) -> Self {
        let _ = partition_written;
        Self {
            count: self.count + 1,
            ..*self
        }
    }
}
