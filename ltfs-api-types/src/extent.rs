use serde::{Deserialize, Serialize};

use crate::PartitionId;

/// One contiguous run of file bytes stored on tape. Extents of a single
/// file are ordered by `fileoffset` and never overlap; reading byte range
/// `[a, a+n)` is serviced by locating each covering extent in order and
/// reading forward from its `start_block`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extent {
    pub partition: PartitionId,
    pub start_block: u64,
    pub byte_offset: u32,
    pub byte_count: u64,
    pub fileoffset: u64,
}

impl Extent {
    pub fn end_fileoffset(&self) -> u64 {
        self.fileoffset + self.byte_count
    }

    pub fn contains(&self, offset: u64) -> bool {
        offset >= self.fileoffset && offset < self.end_fileoffset()
    }
}

/// Validate that a list of extents for one file is sorted by `fileoffset`
/// and non-overlapping.
pub fn validate_extent_list(extents: &[Extent]) -> bool {
    extents
        .windows(2)
        .all(|w| w[0].end_fileoffset() <= w[1].fileoffset)
}
