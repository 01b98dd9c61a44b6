//! Filesystem entry-point surface (§6): `LtfsOps`, the plain trait a FUSE
//! collaborator (out of scope here) would call into. No event loop, no
//! `fuser`/`proxmox-fuse` dependency -- just `Arc<DeviceWrapper<B>>` plus
//! the in-memory index.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use ltfs_api_types::{DATA_PARTITION, Extent};

use crate::backend::{LocateTarget, TapeBackend};
use crate::device::DeviceWrapper;
use crate::error::CoreError;
use crate::index::{Entry, EntryKind, Index, Uid};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Directory,
    Regular,
    Symlink,
}

#[derive(Debug, Clone)]
pub struct Attr {
    pub uid: Uid,
    pub kind: FileType,
    pub mode: u32,
    pub size: u64,
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
    pub read_only: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct StatfsInfo {
    pub block_size: u32,
    pub total_mib: u64,
    pub free_mib: u64,
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn to_attr(entry: &Entry) -> Attr {
    Attr {
        uid: entry.uid,
        kind: match entry.kind {
            EntryKind::Directory => FileType::Directory,
            EntryKind::Regular => FileType::Regular,
            EntryKind::Symlink => FileType::Symlink,
        },
        mode: entry.mode,
        size: entry.size,
        atime: entry.atime,
        mtime: entry.mtime,
        ctime: entry.ctime,
        read_only: entry.read_only,
    }
}

/// Write-bit-only permission mask `chmod` is allowed to change (§6: `chmod`
/// maps only the write bit to the read-only flag).
const WRITE_BITS: u32 = 0o222;

pub trait LtfsOps {
    fn mount(&self) -> Result<(), CoreError>;
    fn umount(&self) -> Result<(), CoreError>;
    fn getattr(&self, path: &str) -> Result<Attr, CoreError>;
    fn fgetattr(&self, fh: u64) -> Result<Attr, CoreError>;
    fn statfs(&self) -> Result<StatfsInfo, CoreError>;
    fn open(&self, path: &str) -> Result<u64, CoreError>;
    fn release(&self, fh: u64, dirty: bool) -> Result<(), CoreError>;
    fn opendir(&self, path: &str) -> Result<u64, CoreError>;
    fn releasedir(&self, fh: u64) -> Result<(), CoreError>;
    fn fsync(&self, fh: u64) -> Result<(), CoreError>;
    fn flush(&self, fh: u64) -> Result<(), CoreError>;
    fn utimens(&self, path: &str, atime: i64, mtime: i64) -> Result<(), CoreError>;
    fn chmod(&self, path: &str, mode: u32) -> Result<(), CoreError>;
    fn chown(&self, path: &str) -> Result<(), CoreError>;
    fn create(&self, path: &str, mode: u32) -> Result<u64, CoreError>;
    fn truncate(&self, path: &str, len: u64) -> Result<(), CoreError>;
    fn ftruncate(&self, fh: u64, len: u64) -> Result<(), CoreError>;
    fn unlink(&self, path: &str) -> Result<(), CoreError>;
    fn rmdir(&self, path: &str) -> Result<(), CoreError>;
    fn rename(&self, from: &str, to: &str) -> Result<(), CoreError>;
    fn mkdir(&self, path: &str, mode: u32) -> Result<(), CoreError>;
    fn readdir(&self, fh: u64) -> Result<Vec<(String, u64)>, CoreError>;
    fn write(&self, fh: u64, buf: &[u8], off: u64) -> Result<usize, CoreError>;
    fn read(&self, fh: u64, buf: &mut [u8], off: u64) -> Result<usize, CoreError>;
    fn setxattr(&self, path: &str, name: &str, value: &[u8]) -> Result<(), CoreError>;
    fn getxattr(&self, path: &str, name: &str) -> Result<Vec<u8>, CoreError>;
    fn listxattr(&self, path: &str) -> Result<Vec<String>, CoreError>;
    fn removexattr(&self, path: &str, name: &str) -> Result<(), CoreError>;
    fn symlink(&self, target: &str, path: &str) -> Result<(), CoreError>;
    fn readlink(&self, path: &str) -> Result<String, CoreError>;
}

/// One mounted volume: a device wrapper plus the directory tree built from
/// (or written to) its index partition.
pub struct LtfsVolume<B: TapeBackend> {
    device: Arc<DeviceWrapper<B>>,
    index: Index,
    mounted: AtomicBool,
}

impl<B: TapeBackend> LtfsVolume<B> {
    pub fn new(device: Arc<DeviceWrapper<B>>) -> Self {
        Self {
            device,
            index: Index::new(now()),
            mounted: AtomicBool::new(false),
        }
    }

    fn require_mounted(&self) -> Result<(), CoreError> {
        if !self.mounted.load(Ordering::SeqCst) {
            return Err(CoreError::Internal("volume not mounted".to_string()));
        }
        Ok(())
    }

    fn entry_for_fh(&self, fh: u64) -> Result<Entry, CoreError> {
        self.index
            .get(fh)
            .ok_or_else(|| CoreError::NotFound(fh.to_string()))
    }
}

impl<B: TapeBackend> LtfsOps for LtfsVolume<B> {
    fn mount(&self) -> Result<(), CoreError> {
        self.device.load_tape([0, 0])?;
        self.mounted.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn umount(&self) -> Result<(), CoreError> {
        self.mounted.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn getattr(&self, path: &str) -> Result<Attr, CoreError> {
        self.require_mounted()?;
        let uid = self.index.resolve(path)?;
        Ok(to_attr(&self.entry_for_fh(uid)?))
    }

    fn fgetattr(&self, fh: u64) -> Result<Attr, CoreError> {
        self.require_mounted()?;
        Ok(to_attr(&self.entry_for_fh(fh)?))
    }

    fn statfs(&self) -> Result<StatfsInfo, CoreError> {
        self.require_mounted()?;
        let part = self.device.partition_info(DATA_PARTITION);
        Ok(StatfsInfo {
            block_size: 65536,
            total_mib: part.max_mib,
            free_mib: part.remaining_mib,
        })
    }

    fn open(&self, path: &str) -> Result<u64, CoreError> {
        self.require_mounted()?;
        self.index.resolve(path)
    }

    fn release(&self, _fh: u64, _dirty: bool) -> Result<(), CoreError> {
        Ok(())
    }

    fn opendir(&self, path: &str) -> Result<u64, CoreError> {
        self.require_mounted()?;
        let uid = self.index.resolve(path)?;
        let entry = self.entry_for_fh(uid)?;
        if !entry.is_dir() {
            return Err(CoreError::NotADirectory(path.to_string()));
        }
        Ok(uid)
    }

    fn releasedir(&self, _fh: u64) -> Result<(), CoreError> {
        Ok(())
    }

    fn fsync(&self, fh: u64) -> Result<(), CoreError> {
        self.flush(fh)
    }

    fn flush(&self, _fh: u64) -> Result<(), CoreError> {
        self.device.write_filemark(DATA_PARTITION, 0, false, false, true)
    }

    fn utimens(&self, path: &str, atime: i64, mtime: i64) -> Result<(), CoreError> {
        self.require_mounted()?;
        let uid = self.index.resolve(path)?;
        self.index.mutate(uid, |e| {
            e.atime = atime;
            e.mtime = mtime;
        })
    }

    fn chmod(&self, path: &str, mode: u32) -> Result<(), CoreError> {
        self.require_mounted()?;
        let uid = self.index.resolve(path)?;
        self.index.mutate(uid, |e| {
            e.mode = mode;
            e.read_only = mode & WRITE_BITS == 0;
        })
    }

    fn chown(&self, _path: &str) -> Result<(), CoreError> {
        Ok(())
    }

    fn create(&self, path: &str, mode: u32) -> Result<u64, CoreError> {
        self.require_mounted()?;
        let (parent, name) = self.index.parent_of(path)?;
        self.index.create(parent, &name, EntryKind::Regular, mode, now())
    }

    fn truncate(&self, path: &str, len: u64) -> Result<(), CoreError> {
        self.require_mounted()?;
        let uid = self.index.resolve(path)?;
        self.ftruncate(uid, len)
    }

    fn ftruncate(&self, fh: u64, len: u64) -> Result<(), CoreError> {
        self.require_mounted()?;
        self.index.mutate(fh, |e| {
            e.extents.retain(|ext| ext.fileoffset < len);
            for ext in e.extents.iter_mut() {
                if ext.end_fileoffset() > len {
                    ext.byte_count = len - ext.fileoffset;
                }
            }
            e.size = len;
            e.mtime = now();
        })
    }

    fn unlink(&self, path: &str) -> Result<(), CoreError> {
        self.require_mounted()?;
        let (parent, name) = self.index.parent_of(path)?;
        self.index.remove(parent, &name).map(|_| ())
    }

    fn rmdir(&self, path: &str) -> Result<(), CoreError> {
        self.unlink(path)
    }

    fn rename(&self, from: &str, to: &str) -> Result<(), CoreError> {
        self.require_mounted()?;
        let (old_parent, old_name) = self.index.parent_of(from)?;
        let (new_parent, new_name) = self.index.parent_of(to)?;
        self.index.rename(old_parent, &old_name, new_parent, &new_name)
    }

    fn mkdir(&self, path: &str, mode: u32) -> Result<(), CoreError> {
        self.require_mounted()?;
        let (parent, name) = self.index.parent_of(path)?;
        self.index
            .create(parent, &name, EntryKind::Directory, mode, now())
            .map(|_| ())
    }

    fn readdir(&self, fh: u64) -> Result<Vec<(String, u64)>, CoreError> {
        self.require_mounted()?;
        self.index.readdir(fh)
    }

    fn write(&self, fh: u64, buf: &[u8], off: u64) -> Result<usize, CoreError> {
        self.require_mounted()?;
        let entry = self.entry_for_fh(fh)?;
        if entry.kind != EntryKind::Regular {
            return Err(CoreError::Internal(format!("{fh} is not a regular file")));
        }
        if off != entry.size {
            return Err(CoreError::Internal(
                "tape storage only supports sequential append writes".to_string(),
            ));
        }

        self.device.seek_append(DATA_PARTITION, true)?;
        let start_block = self.device.position().block;
        let written = self.device.write(DATA_PARTITION, buf, false, false)?;

        let extent = Extent {
            partition: DATA_PARTITION,
            start_block,
            byte_offset: 0,
            byte_count: written as u64,
            fileoffset: off,
        };
        self.index.mutate(fh, |e| {
            e.extents.push(extent);
            e.size += written as u64;
            e.mtime = now();
        })?;
        Ok(written)
    }

    fn read(&self, fh: u64, buf: &mut [u8], off: u64) -> Result<usize, CoreError> {
        self.require_mounted()?;
        let entry = self.entry_for_fh(fh)?;
        let want = buf.len() as u64;
        let mut total = 0usize;

        for extent in &entry.extents {
            let extent_end = extent.end_fileoffset();
            if extent_end <= off || extent.fileoffset >= off + want {
                continue;
            }

            self.device.seek(LocateTarget {
                partition: extent.partition,
                block: extent.start_block,
            })?;
            let mut scratch = vec![0u8; extent.byte_count as usize];
            let n = self.device.read(&mut scratch, false)?;
            let scratch = &scratch[..n.min(scratch.len())];

            let read_start = off.max(extent.fileoffset);
            let read_end = (off + want).min(extent_end);
            if read_end <= read_start {
                continue;
            }
            let src_off = (read_start - extent.fileoffset) as usize;
            let src_len = (read_end - read_start) as usize;
            if src_off + src_len > scratch.len() {
                continue;
            }
            let dst_off = (read_start - off) as usize;
            buf[dst_off..dst_off + src_len].copy_from_slice(&scratch[src_off..src_off + src_len]);
            total += src_len;
        }
        Ok(total)
    }

    fn setxattr(&self, path: &str, name: &str, value: &[u8]) -> Result<(), CoreError> {
        self.require_mounted()?;
        let uid = self.index.resolve(path)?;
        self.index.mutate(uid, |e| {
            e.xattrs.insert(name.to_string(), value.to_vec());
        })
    }

    fn getxattr(&self, path: &str, name: &str) -> Result<Vec<u8>, CoreError> {
        self.require_mounted()?;
        let uid = self.index.resolve(path)?;
        let entry = self.entry_for_fh(uid)?;
        entry
            .xattrs
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(name.to_string()))
    }

    fn listxattr(&self, path: &str) -> Result<Vec<String>, CoreError> {
        self.require_mounted()?;
        let uid = self.index.resolve(path)?;
        let entry = self.entry_for_fh(uid)?;
        Ok(entry.xattrs.keys().cloned().collect())
    }

    fn removexattr(&self, path: &str, name: &str) -> Result<(), CoreError> {
        self.require_mounted()?;
        let uid = self.index.resolve(path)?;
        self.index.mutate(uid, |e| {
            e.xattrs.remove(name);
        })
    }

    fn symlink(&self, target: &str, path: &str) -> Result<(), CoreError> {
        self.require_mounted()?;
        let (parent, name) = self.index.parent_of(path)?;
        let uid = self.index.create(parent, &name, EntryKind::Symlink, 0o777, now())?;
        self.index.mutate(uid, |e| {
            e.symlink_target = Some(target.to_string());
        })
    }

    fn readlink(&self, path: &str) -> Result<String, CoreError> {
        self.require_mounted()?;
        let uid = self.index.resolve(path)?;
        let entry = self.entry_for_fh(uid)?;
        entry
            .symlink_target
            .clone()
            .ok_or_else(|| CoreError::Internal(format!("{path} is not a symlink")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::FileBackend;

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
        p.push(format!("ltfs-core-fs-test-{}", std::process::id()));
        p.push(format!("{:p}", &p as *const _));
        TempDir(p)
    }

    fn volume(dir: &std::path::Path) -> LtfsVolume<FileBackend> {
        let backend = FileBackend::open(dir, 100).unwrap();
        let dw = Arc::new(DeviceWrapper::new(backend, None));
        dw.format(ltfs_api_types::INDEX_PARTITION, "TESTVOL", "TST001L6").unwrap();
        dw.load_tape([1, 100]).unwrap();
        LtfsVolume::new(dw)
    }

    #[test]
    fn mkdir_create_write_read_round_trip() {
        let dir = tempdir();
        let vol = volume(dir.path());
        vol.mount().unwrap();
        vol.mkdir("/d", 0o755).unwrap();
        let fh = vol.create("/d/f.txt", 0o644).unwrap();
        let n = vol.write(fh, b"hello tape", 0).unwrap();
        assert_eq!(n, 10);

        let mut buf = [0u8; 10];
        let read = vol.read(fh, &mut buf, 0).unwrap();
        assert_eq!(read, 10);
        assert_eq!(&buf, b"hello tape");

        let attr = vol.getattr("/d/f.txt").unwrap();
        assert_eq!(attr.size, 10);
        assert_eq!(attr.kind, FileType::Regular);
    }

    #[test]
    fn unlink_removes_entry() {
        let dir = tempdir();
        let vol = volume(dir.path());
        vol.mount().unwrap();
        vol.create("/f", 0o644).unwrap();
        vol.unlink("/f").unwrap();
        assert!(vol.getattr("/f").is_err());
    }

    #[test]
    fn non_sequential_write_is_rejected() {
        let dir = tempdir();
        let vol = volume(dir.path());
        vol.mount().unwrap();
        let fh = vol.create("/f", 0o644).unwrap();
        assert!(vol.write(fh, b"late", 5).is_err());
    }
}
