use serde::{Deserialize, Serialize};

/// A cartridge partition index. LTFS cartridges always have exactly two:
/// 0 (the index partition) and 1 (the data partition).
pub type PartitionId = u8;

pub const INDEX_PARTITION: PartitionId = 0;
pub const DATA_PARTITION: PartitionId = 1;

/// Sentinel block value meaning "locate to end-of-data".
pub const EOD_BLOCK: u64 = u64::MAX;

/// Current drive head position, as returned by `read_position`.
///
/// `early_warning` latches until the cartridge is unloaded; it is set once
/// the drive crosses the physical early-warning mark on a partition and
/// stays set even if the head later moves away from that mark.
/// `programmable_early_warning` is a one-shot edge notification: it is true
/// only on the write call that first observed the condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub partition: PartitionId,
    pub block: u64,
    pub filemarks: u64,
    pub early_warning: bool,
    pub programmable_early_warning: bool,
}

impl Position {
    pub const fn new(partition: PartitionId, block: u64) -> Self {
        Self {
            partition,
            block,
            filemarks: 0,
            early_warning: false,
            programmable_early_warning: false,
        }
    }

    /// The sentinel position used to request a locate-to-end-of-data.
    pub const fn eod(partition: PartitionId) -> Self {
        Self::new(partition, EOD_BLOCK)
    }

    pub const fn is_eod_request(&self) -> bool {
        self.block == EOD_BLOCK
    }
}

/// Writability state of one partition, observed on every write completion.
///
/// ```text
/// Writable ──EW──> NoSpace
/// Writable ──PEW──> LessSpace
/// LessSpace ──EW──> NoSpace
/// NoSpace ───────── (terminal until unload)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpaceState {
    Writable,
    LessSpace,
    NoSpace,
}

impl SpaceState {
    /// Apply an early-warning observation; `LessSpace` and `Writable` both
    /// collapse to `NoSpace`, `NoSpace` itself is terminal.
    pub fn on_early_warning(self) -> Self {
        SpaceState::NoSpace
    }

    /// Apply a programmable-early-warning observation; only `Writable`
    /// advances, `LessSpace`/`NoSpace` are left alone (PEW is a weaker
    /// signal than one already seen).
    pub fn on_programmable_early_warning(self) -> Self {
        match self {
            SpaceState::Writable => SpaceState::LessSpace,
            other => other,
        }
    }
}

/// Per-partition capacity/EOD bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Partition {
    pub max_mib: u64,
    pub remaining_mib: u64,
    pub space_state: SpaceState,
    /// `None` while EOD recovery is pending.
    pub eod: Option<u64>,
}

impl Partition {
    pub fn new(max_mib: u64) -> Self {
        Self {
            max_mib,
            remaining_mib: max_mib,
            space_state: SpaceState::Writable,
            eod: Some(0),
        }
    }

    /// Recompute `space_state` from `remaining_mib` against a
    /// programmable-early-warning threshold, as done by `load_tape`.
    pub fn recompute_space_state(&mut self, pews_mib: u64) {
        self.space_state = if self.remaining_mib == 0 {
            SpaceState::NoSpace
        } else if self.remaining_mib <= pews_mib {
            SpaceState::LessSpace
        } else {
            SpaceState::Writable
        };
    }
}
