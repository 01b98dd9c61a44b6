//! Device wrapper (C4): the serialization point for one tape drive.
//!
//! Every backend call goes through `backend_mutex` (one SCSI command in
//! flight at a time, matching the teacher's pattern of routing every
//! `sg_tape` call through a single open `File`); append position and
//! per-partition writability state get their own fine-grained mutexes, held
//! only ever *after* `backend_mutex` is released, never nested inside it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use ltfs_api_types::{INDEX_PARTITION, PartitionId, Partition, Position, SpaceState};

use crate::backend::{FormatKind, LocateTarget, SpaceKind, TapeBackend};
use crate::encryption::KeyManager;
use crate::error::{BackendError, CoreError};

/// Guard a 10 MiB margin below the programmable-early-warning mark so the
/// index writer always has room to flush a trailing index after PEW fires.
const PEWS_GUARD_MIB: u64 = 10;

struct PartitionState {
    info: Partition,
    append_pos: u64,
}

pub struct DeviceWrapper<B: TapeBackend> {
    backend: Mutex<B>,
    partitions: Mutex<[PartitionState; 2]>,
    position: Mutex<Position>,
    write_protect: AtomicBool,
    write_error: AtomicBool,
    fenced: AtomicBool,
    is_data_key_set: AtomicBool,
    append_only_mode: AtomicBool,
    key_manager: Option<Box<dyn KeyManager + Send + Sync>>,
}

impl<B: TapeBackend> DeviceWrapper<B> {
    pub fn new(backend: B, key_manager: Option<Box<dyn KeyManager + Send + Sync>>) -> Self {
        Self {
            backend: Mutex::new(backend),
            partitions: Mutex::new([
                PartitionState {
                    info: Partition::new(0),
                    append_pos: 0,
                },
                PartitionState {
                    info: Partition::new(0),
                    append_pos: 0,
                },
            ]),
            position: Mutex::new(Position::new(INDEX_PARTITION, 0)),
            write_protect: AtomicBool::new(false),
            write_error: AtomicBool::new(false),
            fenced: AtomicBool::new(false),
            is_data_key_set: AtomicBool::new(false),
            append_only_mode: AtomicBool::new(false),
            key_manager,
        }
    }

    /// Quiesce the device: every new `backend_mutex` acquisition fails with
    /// `DeviceFenced` until `release_fence` is called.
    pub fn start_fence(&self) {
        self.fenced.store(true, Ordering::SeqCst);
    }

    pub fn release_fence(&self) {
        self.fenced.store(false, Ordering::SeqCst);
    }

    fn lock_backend(&self) -> Result<std::sync::MutexGuard<'_, B>, CoreError> {
        if self.fenced.load(Ordering::SeqCst) {
            return Err(CoreError::Hardware(BackendError::DeviceFenced));
        }
        Ok(self.backend.lock().unwrap())
    }

    fn part_index(p: PartitionId) -> usize {
        if p == INDEX_PARTITION { 0 } else { 1 }
    }

    /// Bring a freshly-loaded cartridge to a known state: position (0, 0),
    /// per-partition writability derived from remaining capacity, no data
    /// key cached.
    pub fn load_tape(&self, capacity_mib: [u64; 2]) -> Result<(), CoreError> {
        let mut backend = self.lock_backend()?;
        backend.test_unit_ready().map_err(CoreError::from_backend)?;
        backend
            .locate(LocateTarget {
                partition: INDEX_PARTITION,
                block: 0,
            })
            .map_err(CoreError::from_backend)?;
        let params = backend.drive_parameters().map_err(CoreError::from_backend)?;
        drop(backend);

        if params.physical_write_protect {
            self.write_protect.store(true, Ordering::SeqCst);
        }

        let mut parts = self.partitions.lock().unwrap();
        for (i, mib) in capacity_mib.into_iter().enumerate() {
            let mut info = Partition::new(mib);
            info.recompute_space_state(PEWS_GUARD_MIB);
            parts[i] = PartitionState {
                info,
                append_pos: 0,
            };
        }
        drop(parts);

        *self.position.lock().unwrap() = Position::new(INDEX_PARTITION, 0);
        self.is_data_key_set.store(false, Ordering::SeqCst);
        self.write_error.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Position at the cached append point for `part`, locating to EOD the
    /// first time (`append_pos == 0`). `unlock_write` must be set by a
    /// caller about to write at the reached position; if the cartridge is
    /// in append-only mode, this issues `allow_overwrite` there first
    /// (§4.4, §4.6) -- without it, append-only drives refuse the write.
    pub fn seek_append(&self, part: PartitionId, unlock_write: bool) -> Result<(), CoreError> {
        let cached = {
            let parts = self.partitions.lock().unwrap();
            parts[Self::part_index(part)].append_pos
        };

        let mut backend = self.lock_backend()?;
        let pos = if cached == 0 {
            backend
                .locate(LocateTarget {
                    partition: part,
                    block: ltfs_api_types::EOD_BLOCK,
                })
                .map_err(CoreError::from_backend)?;
            backend.read_position().map_err(CoreError::from_backend)?
        } else {
            backend
                .locate(LocateTarget {
                    partition: part,
                    block: cached,
                })
                .map_err(CoreError::from_backend)?;
            backend.read_position().map_err(CoreError::from_backend)?
        };

        if self.append_only_mode.load(Ordering::SeqCst) && unlock_write {
            backend.allow_overwrite().map_err(CoreError::from_backend)?;
        }
        drop(backend);

        if cached == 0 {
            let mut parts = self.partitions.lock().unwrap();
            parts[Self::part_index(part)].append_pos = pos.block;
        }
        *self.position.lock().unwrap() = pos;
        Ok(())
    }

    fn check_writable(&self) -> Result<(), CoreError> {
        if self.write_protect.load(Ordering::SeqCst) {
            return Err(CoreError::WriteProtect);
        }
        if self.write_error.load(Ordering::SeqCst) {
            return Err(CoreError::WriteError);
        }
        Ok(())
    }

    fn space_state_gate(
        &self,
        part: PartitionId,
        ignore_less: bool,
        ignore_nospc: bool,
    ) -> Result<(), CoreError> {
        let parts = self.partitions.lock().unwrap();
        match parts[Self::part_index(part)].info.space_state {
            SpaceState::NoSpace if !ignore_nospc => Err(CoreError::NoSpace),
            SpaceState::LessSpace if !ignore_less && !ignore_nospc => Err(CoreError::LessSpace),
            _ => Ok(()),
        }
    }

    fn on_write_completion(&self, part: PartitionId, pos: Position) {
        let mut parts = self.partitions.lock().unwrap();
        let state = &mut parts[Self::part_index(part)].info.space_state;
        if pos.early_warning {
            *state = state.on_early_warning();
        } else if pos.programmable_early_warning {
            *state = state.on_programmable_early_warning();
        }
    }

    /// Write `buf` at the current append position of `part`.
    pub fn write(
        &self,
        part: PartitionId,
        buf: &[u8],
        ignore_less: bool,
        ignore_nospc: bool,
    ) -> Result<usize, CoreError> {
        self.check_writable()?;
        self.space_state_gate(part, ignore_less, ignore_nospc)?;

        let max_block_size = {
            let mut backend = self.lock_backend()?;
            backend.drive_parameters().map_err(CoreError::from_backend)?.max_block_size
        };
        if buf.len() as u32 > max_block_size && max_block_size != 0 {
            return Err(CoreError::Internal("write exceeds max block size".to_string()));
        }

        let mut backend = self.lock_backend()?;
        let result = backend.write(buf);
        match result {
            Ok(()) => {
                let pos = backend.read_position().map_err(CoreError::from_backend)?;
                drop(backend);
                self.on_write_completion(part, pos);
                let mut parts = self.partitions.lock().unwrap();
                parts[Self::part_index(part)].append_pos = pos.block;
                *self.position.lock().unwrap() = pos;
                Ok(buf.len())
            }
            Err(BackendError::EarlyWarning(_)) => {
                drop(backend);
                let mut parts = self.partitions.lock().unwrap();
                let state = &mut parts[Self::part_index(part)].info.space_state;
                *state = state.on_early_warning();
                if ignore_nospc {
                    Ok(buf.len())
                } else {
                    Err(CoreError::NoSpace)
                }
            }
            Err(BackendError::ProgEarlyWarning(_)) => {
                drop(backend);
                let mut parts = self.partitions.lock().unwrap();
                let state = &mut parts[Self::part_index(part)].info.space_state;
                *state = state.on_programmable_early_warning();
                Ok(buf.len())
            }
            Err(BackendError::WriteProtect(_)) | Err(BackendError::LogicalWriteProtect(_)) => {
                self.write_protect.store(true, Ordering::SeqCst);
                Err(CoreError::WriteProtect)
            }
            Err(other) => {
                self.write_error.store(true, Ordering::SeqCst);
                Err(CoreError::from_backend(other))
            }
        }
    }

    pub fn write_filemark(
        &self,
        part: PartitionId,
        count: u32,
        ignore_less: bool,
        ignore_nospc: bool,
        immediate: bool,
    ) -> Result<(), CoreError> {
        if count == 0 {
            let mut backend = self.lock_backend()?;
            return backend.write_filemark(0, immediate).map_err(CoreError::from_backend);
        }
        self.check_writable()?;
        self.space_state_gate(part, ignore_less, ignore_nospc)?;

        let mut backend = self.lock_backend()?;
        backend
            .write_filemark(count, immediate)
            .map_err(CoreError::from_backend)?;
        let pos = backend.read_position().map_err(CoreError::from_backend)?;
        drop(backend);
        self.on_write_completion(part, pos);
        let mut parts = self.partitions.lock().unwrap();
        parts[Self::part_index(part)].append_pos = pos.block;
        *self.position.lock().unwrap() = pos;
        Ok(())
    }

    /// Read up to `buf.len()` bytes, transparently fetching and caching the
    /// data key from the key manager if the block is encrypted and no key
    /// is loaded yet.
    pub fn read(&self, buf: &mut [u8], unusual_size: bool) -> Result<usize, CoreError> {
        let mut backend = self.lock_backend()?;
        match backend.read(buf, unusual_size) {
            Ok(n) => Ok(n),
            Err(BackendError::KeyRequired(_)) => {
                drop(backend);
                let alias = {
                    let mut backend = self.lock_backend()?;
                    backend.get_key_alias().map_err(CoreError::from_backend)?
                };
                let alias = alias.ok_or(CoreError::KeyRequired([0u8; 12]))?;
                let manager = self
                    .key_manager
                    .as_ref()
                    .ok_or(CoreError::KeyRequired(alias))?;
                let key = manager.get_key(&alias)?;
                let mut backend = self.lock_backend()?;
                backend
                    .set_key(Some(alias), Some(key))
                    .map_err(CoreError::from_backend)?;
                self.is_data_key_set.store(true, Ordering::SeqCst);
                backend.read(buf, unusual_size).map_err(|err| {
                    if matches!(err, BackendError::KeyRequired(_)) {
                        CoreError::KeyRequired(alias)
                    } else {
                        CoreError::from_backend(err)
                    }
                })
            }
            Err(other) => Err(CoreError::from_backend(other)),
        }
    }

    /// Locate to `target`; updates the cached writability state on an
    /// early-warning/PEW observation and rejects a cross-partition surprise.
    pub fn seek(&self, target: LocateTarget) -> Result<(), CoreError> {
        {
            let pos = *self.position.lock().unwrap();
            if pos.partition == target.partition && pos.block == target.block {
                return Ok(());
            }
        }

        let mut backend = self.lock_backend()?;
        backend.locate(target).map_err(CoreError::from_backend)?;
        let pos = backend.read_position().map_err(CoreError::from_backend)?;
        drop(backend);

        if pos.partition != target.partition {
            return Err(CoreError::BadLocate);
        }

        if pos.early_warning || pos.programmable_early_warning {
            self.on_write_completion(target.partition, pos);
        }
        *self.position.lock().unwrap() = pos;
        Ok(())
    }

    /// Space by `count` blocks or filemarks on `part`, updating the cached
    /// position afterwards. Used by the filemark-navigation helpers (C6).
    pub fn space(&self, part: PartitionId, count: i64, kind: SpaceKind) -> Result<Position, CoreError> {
        let mut backend = self.lock_backend()?;
        backend.space(count, kind).map_err(CoreError::from_backend)?;
        let pos = backend.read_position().map_err(CoreError::from_backend)?;
        drop(backend);

        if pos.partition != part {
            return Err(CoreError::BadLocate);
        }
        *self.position.lock().unwrap() = pos;
        Ok(pos)
    }

    /// Locate to end-of-data on `part`, recording the reached block as the
    /// new append position.
    pub fn seek_eod(&self, part: PartitionId) -> Result<Position, CoreError> {
        let mut backend = self.lock_backend()?;
        backend
            .locate(LocateTarget {
                partition: part,
                block: ltfs_api_types::EOD_BLOCK,
            })
            .map_err(CoreError::from_backend)?;
        let pos = backend.read_position().map_err(CoreError::from_backend)?;
        drop(backend);

        if pos.partition != part {
            return Err(CoreError::BadLocate);
        }

        let mut parts = self.partitions.lock().unwrap();
        parts[Self::part_index(part)].append_pos = pos.block;
        drop(parts);
        *self.position.lock().unwrap() = pos;
        Ok(pos)
    }

    /// Recover a missing EOD marker by reading forward until the drive
    /// reports either a good EOD or a read-permanent error (the last
    /// readable block), then re-stamping EOD one block before the failure.
    /// `cancelled` is polled between I/O calls.
    pub fn recover_eod_status(
        &self,
        part: PartitionId,
        cancelled: &dyn Fn() -> bool,
    ) -> Result<(), CoreError> {
        self.seek(LocateTarget {
            partition: part,
            block: 0,
        })?;

        let mut scratch = vec![0u8; 1024 * 1024];
        let mut last_good_block = 0u64;
        loop {
            if cancelled() {
                return Err(CoreError::Interrupted);
            }
            let mut backend = self.lock_backend()?;
            match backend.read(&mut scratch, true) {
                Ok(_) => {
                    drop(backend);
                    let pos = self.position.lock().unwrap().block;
                    last_good_block = pos;
                }
                Err(BackendError::EodDetected(_)) => return Ok(()),
                Err(BackendError::FilemarkDetected(_)) => continue,
                Err(_) => {
                    drop(backend);
                    break;
                }
            }
        }

        if cancelled() {
            return Err(CoreError::Interrupted);
        }

        let mut backend = self.lock_backend()?;
        backend.unload().map_err(CoreError::from_backend)?;
        backend.load().map_err(CoreError::from_backend)?;
        backend
            .locate(LocateTarget {
                partition: part,
                block: last_good_block,
            })
            .map_err(CoreError::from_backend)?;
        backend.erase(false).map_err(CoreError::from_backend)?;
        Ok(())
    }

    /// Write fresh ANSI+LTFS labels at the start of each partition (format).
    pub fn format(&self, index_part: PartitionId, vol_name: &str, barcode: &str) -> Result<(), CoreError> {
        let kind = if index_part == INDEX_PARTITION {
            FormatKind::TwoPartition { index_is_first: true }
        } else {
            FormatKind::TwoPartition { index_is_first: false }
        };

        let mut backend = self.lock_backend()?;
        backend.load().map_err(CoreError::from_backend)?;
        backend
            .format(kind, vol_name, barcode)
            .map_err(CoreError::from_backend)?;
        drop(backend);

        let mut parts = self.partitions.lock().unwrap();
        for p in parts.iter_mut() {
            p.info.space_state = SpaceState::Writable;
            p.append_pos = 0;
        }
        drop(parts);
        Ok(())
    }

    /// Enable or disable append-only mode (§4.4): read the
    /// device-configuration-extension mode page, force beginning-of-
    /// partition-0 via an unload/reload if not already there, set byte 21's
    /// low nibble, mode-select the page back, and reload once more if this
    /// call had to unload to reach BOP0.
    pub fn enable_append_only_mode(&self, on: bool) -> Result<(), CoreError> {
        let mut backend = self.lock_backend()?;

        let pos = backend.read_position().map_err(CoreError::from_backend)?;
        let mut unloaded = false;
        if pos.block != 0 {
            backend.unload().map_err(CoreError::from_backend)?;
            backend.load().map_err(CoreError::from_backend)?;
            unloaded = true;
        }

        let mut page = backend.read_append_only_page().map_err(CoreError::from_backend)?;
        page[21] = (page[21] & 0xF0) | if on { 0x10 } else { 0x00 };
        backend.write_append_only_page(&page).map_err(CoreError::from_backend)?;

        if unloaded {
            backend.unload().map_err(CoreError::from_backend)?;
            backend.load().map_err(CoreError::from_backend)?;
        }
        drop(backend);

        self.append_only_mode.store(on, Ordering::SeqCst);
        Ok(())
    }

    /// Set the drive's data encryption key (§4.7 steps 1-4): read the
    /// current position, issue SPOUT, and if the pre-SPOUT position was not
    /// block 0, force the cartridge read-only -- data written under a
    /// different key earlier on the partition can no longer be read back
    /// correctly once the key changes mid-tape.
    pub fn set_data_key(&self, alias: [u8; 12], key: [u8; 32]) -> Result<(), CoreError> {
        let pos = self.update_position()?;

        let mut backend = self.lock_backend()?;
        backend
            .set_key(Some(alias), Some(key))
            .map_err(CoreError::from_backend)?;
        drop(backend);

        self.is_data_key_set.store(true, Ordering::SeqCst);
        if pos.block != 0 {
            self.force_read_only();
        }
        Ok(())
    }

    /// Clear the drive's data encryption key (§4.7), issuing the backend
    /// call only when a key is actually set.
    pub fn clear_key(&self) -> Result<(), CoreError> {
        if !self.is_data_key_set.load(Ordering::SeqCst) {
            return Ok(());
        }
        let mut backend = self.lock_backend()?;
        backend.set_key(None, None).map_err(CoreError::from_backend)?;
        drop(backend);
        self.is_data_key_set.store(false, Ordering::SeqCst);
        Ok(())
    }

    pub fn force_read_only(&self) {
        self.write_protect.store(true, Ordering::SeqCst);
    }

    pub fn update_position(&self) -> Result<Position, CoreError> {
        let mut backend = self.lock_backend()?;
        let pos = backend.read_position().map_err(CoreError::from_backend)?;
        drop(backend);
        *self.position.lock().unwrap() = pos;
        Ok(pos)
    }

    pub fn position(&self) -> Position {
        *self.position.lock().unwrap()
    }

    pub fn is_data_key_set(&self) -> bool {
        self.is_data_key_set.load(Ordering::SeqCst)
    }

    pub fn is_write_protected(&self) -> bool {
        self.write_protect.load(Ordering::SeqCst)
    }

    pub fn partition_info(&self, part: PartitionId) -> Partition {
        self.partitions.lock().unwrap()[Self::part_index(part)].info.clone()
    }

    pub fn read_attribute(&self, part: PartitionId, id: u16) -> Result<Vec<u8>, CoreError> {
        let mut backend = self.lock_backend()?;
        backend.read_attribute(part, id).map_err(CoreError::from_backend)
    }

    pub fn write_attribute(&self, part: PartitionId, id: u16, data: &[u8]) -> Result<(), CoreError> {
        let mut backend = self.lock_backend()?;
        backend
            .write_attribute(part, id, data)
            .map_err(CoreError::from_backend)
    }

    pub fn set_lbp(&self, enable: bool) -> Result<(), CoreError> {
        let mut backend = self.lock_backend()?;
        backend.set_lbp(enable).map_err(CoreError::from_backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::FileBackend;
    use ltfs_api_types::DATA_PARTITION;

    fn wrapper(dir: &std::path::Path) -> DeviceWrapper<FileBackend> {
        let backend = FileBackend::open(dir, 100).unwrap();
        DeviceWrapper::new(backend, None)
    }

    #[test]
    fn load_tape_resets_position_and_space_state() {
        let dir = tempdir();
        let dw = wrapper(dir.path());
        dw.load_tape([1, 100]).unwrap();
        let pos = dw.position();
        assert_eq!(pos.partition, INDEX_PARTITION);
        assert_eq!(pos.block, 0);
        assert!(!dw.is_data_key_set());
    }

    #[test]
    fn write_protect_latches_until_reload() {
        let dir = tempdir();
        let dw = wrapper(dir.path());
        dw.load_tape([1, 100]).unwrap();
        dw.force_read_only();
        assert!(matches!(dw.write(DATA_PARTITION, b"x", false, false), Err(CoreError::WriteProtect)));
    }

    #[test]
    fn set_data_key_mid_tape_forces_read_only() {
        let dir = tempdir();
        let dw = wrapper(dir.path());
        dw.load_tape([1, 100]).unwrap();
        for _ in 0..10 {
            dw.write(DATA_PARTITION, b"plaintext", false, false).unwrap();
        }

        dw.set_data_key([0u8; 12], [0u8; 32]).unwrap();

        assert!(dw.is_write_protected());
        assert!(matches!(dw.write(DATA_PARTITION, b"x", false, false), Err(CoreError::WriteProtect)));
    }

    #[test]
    fn set_data_key_at_block_zero_does_not_force_read_only() {
        let dir = tempdir();
        let dw = wrapper(dir.path());
        dw.load_tape([1, 100]).unwrap();

        dw.set_data_key([0u8; 12], [0u8; 32]).unwrap();

        assert!(!dw.is_write_protected());
        assert!(dw.is_data_key_set());
    }

    #[test]
    fn clear_key_is_noop_when_no_key_set() {
        let dir = tempdir();
        let dw = wrapper(dir.path());
        dw.load_tape([1, 100]).unwrap();
        dw.clear_key().unwrap();
        assert!(!dw.is_data_key_set());
    }

    #[test]
    fn enable_append_only_mode_round_trips() {
        let dir = tempdir();
        let dw = wrapper(dir.path());
        dw.load_tape([1, 100]).unwrap();

        dw.enable_append_only_mode(true).unwrap();
        dw.enable_append_only_mode(false).unwrap();
    }

    struct TempDir(std::path::PathBuf);
    impl TempDir {
        fn path(&self) -> &std::path::Path {
            &self.0
        }
    }
    impl Drop for TempDir {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.0);
        }
    }
    fn tempdir() -> TempDir {
        let mut p = std::env::temp_dir();
        p.push(format!("ltfs-core-device-test-{}", std::process::id()));
        p.push(format!("{:p}", &p as *const _));
        TempDir(p)
    }
}
