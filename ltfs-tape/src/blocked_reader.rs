use std::io::Read;

use crate::{BlockHeader, BlockHeaderFlags, BlockRead, BlockReadError, TapeRead};

/// Reads a stream of fixed-size blocks (see [`BlockHeader`]) and
/// presents it as a normal byte stream, stopping at the
/// `END_OF_STREAM` marker.
pub struct BlockedReader<R: BlockRead> {
    reader: R,
    buffer: Box<BlockHeader>,
    buffer_pos: usize,
    buffer_len: usize,
    got_eod: bool,
    end_of_stream: bool,
    incomplete: bool,
    seq_nr: u32,
}

impl<R: BlockRead> BlockedReader<R> {
    /// Opens the reader, reading and validating the very first block.
    pub fn open(mut reader: R) -> Result<Self, BlockReadError> {
        let mut buffer = BlockHeader::new();

        let data = unsafe {
            std::slice::from_raw_parts_mut(
                (&mut *buffer as *mut BlockHeader) as *mut u8,
                BlockHeader::SIZE,
            )
        };

        reader.read_block(data)?;

        if !buffer.check_magic() {
            return Err(BlockReadError::Error(proxmox_lang::io_format_err!(
                "BlockedReader: wrong block header magic"
            )));
        }

        let buffer_len = buffer.size();
        let end_of_stream = buffer.flags.contains(BlockHeaderFlags::END_OF_STREAM);
        let incomplete = buffer.flags.contains(BlockHeaderFlags::INCOMPLETE);
        let seq_nr = buffer.seq_nr();

        Ok(Self {
            reader,
            buffer,
            buffer_pos: 0,
            buffer_len,
            got_eod: end_of_stream,
            end_of_stream,
            incomplete,
            seq_nr,
        })
    }

    fn read_next_block(&mut self) -> Result<(), std::io::Error> {
        let data = unsafe {
            std::slice::from_raw_parts_mut(
                (&mut *self.buffer as *mut BlockHeader) as *mut u8,
                BlockHeader::SIZE,
            )
        };

        match self.reader.read_block(data) {
            Ok(_) => {}
            Err(BlockReadError::EndOfFile) | Err(BlockReadError::EndOfStream) => {
                proxmox_lang::io_bail!("BlockedReader: unexpected end of data");
            }
            Err(BlockReadError::Error(err)) => return Err(err),
        }

        if !self.buffer.check_magic() {
            proxmox_lang::io_bail!("BlockedReader: wrong block header magic");
        }

        let expect_seq_nr = self.seq_nr + 1;
        if self.buffer.seq_nr() != expect_seq_nr {
            proxmox_lang::io_bail!("BlockedReader: unexpected sequence number");
        }
        self.seq_nr = expect_seq_nr;

        self.buffer_pos = 0;
        self.buffer_len = self.buffer.size();
        self.end_of_stream = self.buffer.flags.contains(BlockHeaderFlags::END_OF_STREAM);
        self.incomplete = self.buffer.flags.contains(BlockHeaderFlags::INCOMPLETE);
        self.got_eod = self.end_of_stream;

        Ok(())
    }
}

impl<R: BlockRead> Read for BlockedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, std::io::Error> {
        if buf.is_empty() {
            return Ok(0);
        }

        loop {
            let rest = self.buffer_len - self.buffer_pos;
            if rest > 0 {
                let n = std::cmp::min(rest, buf.len());
                buf[..n]
                    .copy_from_slice(&self.buffer.payload[self.buffer_pos..(self.buffer_pos + n)]);
                self.buffer_pos += n;
                return Ok(n);
            }

            if self.end_of_stream {
                return Ok(0);
            }

            self.read_next_block()?;
        }
    }
}

impl<R: BlockRead> TapeRead for BlockedReader<R> {
    fn is_incomplete(&self) -> Result<bool, std::io::Error> {
        if !self.end_of_stream {
            proxmox_lang::io_bail!("is_incomplete failed: not at EOF");
        }
        Ok(self.incomplete)
    }

    fn has_end_marker(&self) -> Result<bool, std::io::Error> {
        Ok(self.got_eod)
    }

    fn skip_data(&mut self) -> Result<usize, std::io::Error> {
        let mut bytes = 0;
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = self.read(&mut buf)?;
            if n == 0 {
                break;
            }
            bytes += n;
        }
        Ok(bytes)
    }
}
