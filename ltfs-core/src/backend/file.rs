//! File-emulated backend (the `virtual` drive kind): two partitions, each a
//! flat file of length-prefixed records, standing in for a real cartridge.
//!
//! Grounded on [`ltfs_tape::emulate_tape_reader::EmulateTapeReader`] and
//! [`ltfs_tape::emulate_tape_writer::EmulateTapeWriter`]'s "fake the SCSI
//! semantics on top of a plain file" approach, generalized here to also
//! emulate `locate`/`space`/filemarks/MAM attributes, since the core needs a
//! full [`TapeBackend`], not just a `BlockRead`/`BlockWrite` stream.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use ltfs_api_types::{EOD_BLOCK, INDEX_PARTITION, PartitionId, Position};

use crate::error::{BackendError, SenseTriplet};

use super::{
    CartridgeHealth, DriveParameters, EodStatus, FormatKind, InquiryInfo, LocateTarget, SpaceKind,
    TapeBackend,
};

const RECORD_DATA: u8 = 0;
const RECORD_FILEMARK: u8 = 1;

#[derive(Debug, Clone, Copy)]
enum Record {
    Data { offset: u64, len: u32 },
    Filemark,
}

struct PartitionFile {
    path: PathBuf,
    records: Vec<Record>,
    /// Index into `records` of the current head position.
    cursor: usize,
    filemarks_passed: u64,
}

impl PartitionFile {
    fn open(path: PathBuf) -> std::io::Result<Self> {
        let mut records = Vec::new();
        if path.exists() {
            let mut f = File::open(&path)?;
            loop {
                let mut tag = [0u8; 1];
                if f.read(&mut tag)? == 0 {
                    break;
                }
                match tag[0] {
                    RECORD_FILEMARK => records.push(Record::Filemark),
                    RECORD_DATA => {
                        let mut len_buf = [0u8; 4];
                        f.read_exact(&mut len_buf)?;
                        let len = u32::from_be_bytes(len_buf);
                        let offset = f.stream_position()?;
                        f.seek(SeekFrom::Current(len as i64))?;
                        records.push(Record::Data { offset, len });
                    }
                    other => {
                        return Err(std::io::Error::new(
                            std::io::ErrorKind::InvalidData,
                            format!("unknown record tag {other}"),
                        ));
                    }
                }
            }
        }
        Ok(Self {
            path,
            records,
            cursor: 0,
            filemarks_passed: 0,
        })
    }

    fn truncate(&mut self) -> std::io::Result<()> {
        File::create(&self.path)?;
        self.records.clear();
        self.cursor = 0;
        self.filemarks_passed = 0;
        Ok(())
    }

    /// Block number at the current cursor (count of `Data` records before it).
    fn block_number(&self) -> u64 {
        self.records[..self.cursor]
            .iter()
            .filter(|r| matches!(r, Record::Data { .. }))
            .count() as u64
    }

    fn append_data(&mut self, buf: &[u8]) -> std::io::Result<()> {
        // Writing truncates anything beyond the cursor, as on real tape.
        self.records.truncate(self.cursor);
        let mut f = OpenOptions::new().append(true).open(&self.path)?;
        if self.cursor == 0 {
            f.set_len(0)?;
        } else {
            // best-effort: a mid-cartridge overwrite on a file-emulated
            // backend just appends; real hardware physically can't rewind
            // and overwrite either without reformatting from that point.
        }
        f.write_all(&[RECORD_DATA])?;
        f.write_all(&(buf.len() as u32).to_be_bytes())?;
        f.write_all(buf)?;
        let offset = f.stream_position()? - buf.len() as u64;
        self.records.push(Record::Data {
            offset,
            len: buf.len() as u32,
        });
        self.cursor = self.records.len();
        Ok(())
    }

    fn append_filemark(&mut self) -> std::io::Result<()> {
        self.records.truncate(self.cursor);
        let mut f = OpenOptions::new().append(true).open(&self.path)?;
        f.write_all(&[RECORD_FILEMARK])?;
        self.records.push(Record::Filemark);
        self.cursor = self.records.len();
        Ok(())
    }

    fn read_current(&mut self, buf: &mut [u8]) -> Result<usize, BackendError> {
        match self.records.get(self.cursor) {
            None => Err(BackendError::EodDetected(SenseTriplet::default())),
            Some(Record::Filemark) => {
                self.cursor += 1;
                self.filemarks_passed += 1;
                Err(BackendError::FilemarkDetected(SenseTriplet::default()))
            }
            Some(Record::Data { offset, len }) => {
                let mut f = File::open(&self.path).map_err(io_err)?;
                f.seek(SeekFrom::Start(*offset)).map_err(io_err)?;
                let len = *len as usize;
                if buf.len() < len {
                    return Err(BackendError::IllegalRequest(SenseTriplet::default()));
                }
                f.read_exact(&mut buf[..len]).map_err(io_err)?;
                self.cursor += 1;
                Ok(len)
            }
        }
    }
}

fn io_err(_: std::io::Error) -> BackendError {
    BackendError::Hardware(SenseTriplet::default())
}

pub struct FileBackend {
    partitions: HashMap<PartitionId, PartitionFile>,
    attributes: HashMap<(PartitionId, u16), Vec<u8>>,
    attr_path: PathBuf,
    loaded: bool,
    medium_removal_prevented: bool,
    encryption_alias: Option<[u8; 12]>,
    encryption_key: Option<[u8; 32]>,
    lbp_enabled: bool,
    compression: bool,
    tape_alert: u64,
    max_mib: u64,
    current_partition: PartitionId,
    append_only_page: [u8; 22],
}

impl FileBackend {
    /// Open (creating if absent) a file-emulated cartridge rooted at
    /// `base_dir`: `p0.tape`/`p1.tape` hold the two partitions, `mam.json`
    /// the MAM attribute sidecar.
    pub fn open(base_dir: &Path, max_mib: u64) -> std::io::Result<Self> {
        fs::create_dir_all(base_dir)?;
        let mut partitions = HashMap::new();
        for p in [0u8, 1u8] {
            let path = base_dir.join(format!("p{p}.tape"));
            partitions.insert(p, PartitionFile::open(path)?);
        }
        let attr_path = base_dir.join("mam.json");
        let attributes = if attr_path.exists() {
            let data = fs::read(&attr_path)?;
            let flat: HashMap<String, Vec<u8>> =
                serde_json::from_slice(&data).unwrap_or_default();
            flat.into_iter()
                .filter_map(|(k, v)| {
                    let (p, id) = k.split_once(':')?;
                    Some(((p.parse().ok()?, u16::from_str_radix(id, 16).ok()?), v))
                })
                .collect()
        } else {
            HashMap::new()
        };
        Ok(Self {
            partitions,
            attributes,
            attr_path,
            loaded: true,
            medium_removal_prevented: false,
            encryption_alias: None,
            encryption_key: None,
            lbp_enabled: false,
            compression: true,
            tape_alert: 0,
            max_mib,
            current_partition: INDEX_PARTITION,
            append_only_page: [0u8; 22],
        })
    }

    fn save_attributes(&self) -> std::io::Result<()> {
        let flat: HashMap<String, &Vec<u8>> = self
            .attributes
            .iter()
            .map(|((p, id), v)| (format!("{p}:{id:04x}"), v))
            .collect();
        fs::write(&self.attr_path, serde_json::to_vec(&flat)?)
    }

    fn partition_mut(&mut self, id: PartitionId) -> Result<&mut PartitionFile, BackendError> {
        self.partitions
            .get_mut(&id)
            .ok_or(BackendError::IllegalRequest(SenseTriplet::default()))
    }

    fn current_partition(&self) -> PartitionId {
        self.current_partition
    }
}

impl TapeBackend for FileBackend {
    fn inquiry(&mut self) -> Result<InquiryInfo, BackendError> {
        Ok(InquiryInfo {
            vendor: "LTFS-EMU".to_string(),
            product: "VIRTUAL-DRIVE".to_string(),
            revision: "1.0".to_string(),
            serial: "virtual-0".to_string(),
        })
    }

    fn test_unit_ready(&mut self) -> Result<(), BackendError> {
        if !self.loaded {
            return Err(BackendError::NoMedium(SenseTriplet::default()));
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], _unusual_size: bool) -> Result<usize, BackendError> {
        let partition = self.current_partition();
        self.partition_mut(partition)?.read_current(buf)
    }

    fn write(&mut self, buf: &[u8]) -> Result<(), BackendError> {
        let partition = self.current_partition();
        self.partition_mut(partition)?
            .append_data(buf)
            .map_err(io_err)
    }

    fn write_filemark(&mut self, count: u32, _immediate: bool) -> Result<(), BackendError> {
        let partition = self.current_partition();
        let p = self.partition_mut(partition)?;
        for _ in 0..count {
            p.append_filemark().map_err(io_err)?;
        }
        Ok(())
    }

    fn locate(&mut self, target: LocateTarget) -> Result<(), BackendError> {
        self.current_partition = target.partition;
        let p = self.partition_mut(target.partition)?;
        if target.block == EOD_BLOCK {
            p.cursor = p.records.len();
            return Ok(());
        }
        let mut seen = 0u64;
        for (i, r) in p.records.iter().enumerate() {
            if let Record::Data { .. } = r {
                if seen == target.block {
                    p.cursor = i;
                    return Ok(());
                }
                seen += 1;
            }
        }
        if seen == target.block {
            p.cursor = p.records.len();
            return Ok(());
        }
        Err(BackendError::EodNotFound(SenseTriplet::default()))
    }

    fn space(&mut self, count: i64, kind: SpaceKind) -> Result<(), BackendError> {
        let partition = self.current_partition();
        let p = self.partition_mut(partition)?;
        match kind {
            SpaceKind::EndOfData => {
                p.cursor = p.records.len();
                Ok(())
            }
            SpaceKind::Blocks => {
                let mut remaining = count;
                while remaining > 0 {
                    if p.cursor >= p.records.len() {
                        return Err(BackendError::EodDetected(SenseTriplet::default()));
                    }
                    if matches!(p.records[p.cursor], Record::Filemark) {
                        return Err(BackendError::FilemarkDetected(SenseTriplet::default()));
                    }
                    p.cursor += 1;
                    remaining -= 1;
                }
                while remaining < 0 {
                    if p.cursor == 0 {
                        return Err(BackendError::IllegalRequest(SenseTriplet::default()));
                    }
                    p.cursor -= 1;
                    remaining += 1;
                }
                Ok(())
            }
            SpaceKind::Filemarks => {
                let mut remaining = count;
                while remaining > 0 {
                    loop {
                        if p.cursor >= p.records.len() {
                            return Err(BackendError::EodDetected(SenseTriplet::default()));
                        }
                        let hit_mark = matches!(p.records[p.cursor], Record::Filemark);
                        p.cursor += 1;
                        if hit_mark {
                            break;
                        }
                    }
                    remaining -= 1;
                }
                while remaining < 0 {
                    loop {
                        if p.cursor == 0 {
                            return Err(BackendError::IllegalRequest(SenseTriplet::default()));
                        }
                        p.cursor -= 1;
                        if matches!(p.records[p.cursor], Record::Filemark) {
                            break;
                        }
                    }
                    remaining += 1;
                }
                Ok(())
            }
        }
    }

    fn read_position(&mut self) -> Result<Position, BackendError> {
        let partition = self.current_partition();
        let p = self.partition_mut(partition)?;
        Ok(Position {
            partition,
            block: p.block_number(),
            filemarks: p.filemarks_passed,
            early_warning: false,
            programmable_early_warning: false,
        })
    }

    fn read_attribute(
        &mut self,
        partition: PartitionId,
        id: u16,
    ) -> Result<Vec<u8>, BackendError> {
        self.attributes
            .get(&(partition, id))
            .cloned()
            .ok_or(BackendError::IllegalRequest(SenseTriplet::default()))
    }

    fn write_attribute(
        &mut self,
        partition: PartitionId,
        id: u16,
        data: &[u8],
    ) -> Result<(), BackendError> {
        self.attributes.insert((partition, id), data.to_vec());
        self.save_attributes().map_err(io_err)
    }

    fn drive_parameters(&mut self) -> Result<DriveParameters, BackendError> {
        Ok(DriveParameters {
            max_block_size: 1024 * 1024,
            physical_write_protect: false,
        })
    }

    fn crc32c_supported(&mut self) -> Result<bool, BackendError> {
        Ok(true)
    }

    fn set_lbp(&mut self, enable: bool) -> Result<(), BackendError> {
        self.lbp_enabled = enable;
        Ok(())
    }

    fn format(
        &mut self,
        kind: FormatKind,
        _vol_name: &str,
        _barcode: &str,
    ) -> Result<(), BackendError> {
        match kind {
            FormatKind::SinglePartition => {
                self.partition_mut(1)?.truncate().map_err(io_err)?;
            }
            FormatKind::TwoPartition { .. } => {
                self.partition_mut(0)?.truncate().map_err(io_err)?;
                self.partition_mut(1)?.truncate().map_err(io_err)?;
            }
        }
        self.attributes.clear();
        self.save_attributes().map_err(io_err)
    }

    fn load(&mut self) -> Result<(), BackendError> {
        self.loaded = true;
        Ok(())
    }

    fn unload(&mut self) -> Result<(), BackendError> {
        if self.medium_removal_prevented {
            return Err(BackendError::IllegalRequest(SenseTriplet::default()));
        }
        self.loaded = false;
        Ok(())
    }

    fn prevent_medium_removal(&mut self) -> Result<(), BackendError> {
        self.medium_removal_prevented = true;
        Ok(())
    }

    fn allow_medium_removal(&mut self) -> Result<(), BackendError> {
        self.medium_removal_prevented = false;
        Ok(())
    }

    fn reserve_unit(&mut self) -> Result<(), BackendError> {
        Ok(())
    }

    fn release_unit(&mut self) -> Result<(), BackendError> {
        Ok(())
    }

    fn erase(&mut self, long: bool) -> Result<(), BackendError> {
        self.partition_mut(1)?.truncate().map_err(io_err)?;
        if long {
            self.partition_mut(0)?.truncate().map_err(io_err)?;
        }
        Ok(())
    }

    fn set_key(
        &mut self,
        alias: Option<[u8; 12]>,
        key: Option<[u8; 32]>,
    ) -> Result<(), BackendError> {
        self.encryption_alias = alias;
        self.encryption_key = key;
        Ok(())
    }

    fn get_key_alias(&mut self) -> Result<Option<[u8; 12]>, BackendError> {
        Ok(self.encryption_alias)
    }

    fn get_eod_status(&mut self, partition: PartitionId) -> Result<EodStatus, BackendError> {
        self.partition_mut(partition)?;
        Ok(EodStatus::Good)
    }

    fn get_cartridge_health(&mut self) -> Result<CartridgeHealth, BackendError> {
        Ok(CartridgeHealth {
            medium_passes: 1,
            medium_wearout: 0.0,
        })
    }

    fn get_tape_alert(&mut self) -> Result<u64, BackendError> {
        Ok(self.tape_alert)
    }

    fn clear_tape_alert(&mut self) -> Result<(), BackendError> {
        self.tape_alert = 0;
        Ok(())
    }

    fn set_compression(&mut self, on: bool) -> Result<(), BackendError> {
        self.compression = on;
        Ok(())
    }

    fn set_default(&mut self) -> Result<(), BackendError> {
        self.compression = true;
        self.lbp_enabled = true;
        Ok(())
    }

    fn read_append_only_page(&mut self) -> Result<[u8; 22], BackendError> {
        Ok(self.append_only_page)
    }

    fn write_append_only_page(&mut self, page: &[u8; 22]) -> Result<(), BackendError> {
        self.append_only_page = *page;
        Ok(())
    }

    fn allow_overwrite(&mut self) -> Result<(), BackendError> {
        // Already permissive: see the comment on `append_data` above.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_read_roundtrip() {
        let dir = tempdir();
        let mut be = FileBackend::open(dir.path(), 100).unwrap();
        be.format(FormatKind::TwoPartition { index_is_first: true }, "VOL", "")
            .unwrap();
        be.locate(LocateTarget {
            partition: 1,
            block: 0,
        })
        .unwrap();
        be.write(b"hello world").unwrap();
        be.write_filemark(1, false).unwrap();
        be.locate(LocateTarget {
            partition: 1,
            block: 0,
        })
        .unwrap();
        let mut buf = [0u8; 64];
        let n = be.read(&mut buf, true).unwrap();
        assert_eq!(&buf[..n], b"hello world");
    }

    #[test]
    fn locate_eod_and_space_filemarks() {
        let dir = tempdir();
        let mut be = FileBackend::open(dir.path(), 100).unwrap();
        be.format(FormatKind::TwoPartition { index_is_first: true }, "VOL", "")
            .unwrap();
        be.locate(LocateTarget {
            partition: 1,
            block: 0,
        })
        .unwrap();
        be.write(b"a").unwrap();
        be.write_filemark(1, false).unwrap();
        be.write(b"b").unwrap();
        be.write_filemark(1, false).unwrap();

        be.locate(LocateTarget {
            partition: 1,
            block: EOD_BLOCK,
        })
        .unwrap();
        let pos = be.read_position().unwrap();
        assert_eq!(pos.block, 2);

        be.locate(LocateTarget {
            partition: 1,
            block: 0,
        })
        .unwrap();
        be.space(1, SpaceKind::Filemarks).unwrap();
        let pos = be.read_position().unwrap();
        assert_eq!(pos.filemarks, 1);
    }

    struct TempDir(PathBuf);
    impl TempDir {
        fn path(&self) -> &Path {
            &self.0
        }
    }
    impl Drop for TempDir {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.0);
        }
    }
    fn tempdir() -> TempDir {
        let mut p = std::env::temp_dir();
        p.push(format!("ltfs-core-test-{}", std::process::id()));
        p.push(format!("{:p}", &p as *const _));
        TempDir(p)
    }
}
