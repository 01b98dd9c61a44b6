//! SCSI-generic LTO tape backend
//!
//! This crate talks directly to tape hardware (or a file-emulated
//! stand-in) using the Linux SCSI generic (`sg`) interface. It defines
//! the low level block framing used to store an otherwise unstructured
//! byte stream on a tape that can only append fixed-size blocks and
//! filemarks.

use bitflags::bitflags;

pub mod linux_list_drives;
pub mod sg_tape;
pub mod sgutils2;

mod blocked_reader;
pub use blocked_reader::BlockedReader;

mod blocked_writer;
pub use blocked_writer::BlockedWriter;

mod emulate_tape_reader;
pub use emulate_tape_reader::EmulateTapeReader;

mod emulate_tape_writer;
pub use emulate_tape_writer::EmulateTapeWriter;

mod tape_read;
pub use tape_read::*;

mod tape_write;
pub use tape_write::*;

/// Fixed block size used for all tape I/O.
///
/// Every block written to (or read from) tape has exactly this many
/// bytes, including the [`BlockHeader`] prefix. The header's `size`
/// field records how many payload bytes are meaningful -- the last
/// block of a file is usually only partially filled.
pub const PROXMOX_TAPE_BLOCK_SIZE: usize = 256 * 1024;

bitflags! {
    #[derive(Default)]
    pub struct BlockHeaderFlags: u8 {
        /// This is the last block of the stream, and the stream was
        /// not completely written (e.g. multi-volume continuation).
        const INCOMPLETE = 1;
        /// This is the last block of the stream.
        const END_OF_STREAM = 2;
    }
}

const BLOCK_HEADER_MAGIC: [u8; 4] = *b"PLB1";

/// On-tape framing for one fixed-size block.
///
/// Stored with `#[repr(C)]` layout so it can be read/written as a flat
/// byte buffer of exactly [`PROXMOX_TAPE_BLOCK_SIZE`] bytes.
#[repr(C)]
pub struct BlockHeader {
    magic: [u8; 4],
    pub flags: BlockHeaderFlags,
    reserved: [u8; 3],
    seq_nr: u32,
    size: u32,
    pub payload: [u8; BlockHeader::PAYLOAD_SIZE],
}

impl BlockHeader {
    pub const SIZE: usize = PROXMOX_TAPE_BLOCK_SIZE;
    pub const PAYLOAD_SIZE: usize = PROXMOX_TAPE_BLOCK_SIZE - 16;

    pub fn new() -> Box<Self> {
        Box::new(Self {
            magic: BLOCK_HEADER_MAGIC,
            flags: BlockHeaderFlags::empty(),
            reserved: [0; 3],
            seq_nr: 0,
            size: 0,
            payload: [0u8; Self::PAYLOAD_SIZE],
        })
    }

    pub fn set_size(&mut self, size: usize) {
        self.size = size as u32;
    }

    pub fn size(&self) -> usize {
        self.size as usize
    }

    pub fn set_seq_nr(&mut self, seq_nr: u32) {
        self.seq_nr = seq_nr;
    }

    pub fn seq_nr(&self) -> u32 {
        self.seq_nr
    }

    pub fn check_magic(&self) -> bool {
        self.magic == BLOCK_HEADER_MAGIC
    }
}
