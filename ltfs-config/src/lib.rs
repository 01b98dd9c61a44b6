pub mod drive;

use anyhow::Error;

pub struct LtfsLockGuard(Option<std::fs::File>);

#[doc(hidden)]
/// Note: do not use for production code, this is only intended for tests
pub unsafe fn create_mocked_lock() -> LtfsLockGuard {
    LtfsLockGuard(None)
}

/// Open or create a lock file and lock it.
///
/// Default timeout is 10 seconds.
pub fn open_ltfs_lockfile<P: AsRef<std::path::Path>>(
    path: P,
    timeout: Option<std::time::Duration>,
    exclusive: bool,
) -> Result<LtfsLockGuard, Error> {
    let options = proxmox_sys::fs::CreateOptions::new();
    let timeout = timeout.unwrap_or(std::time::Duration::new(10, 0));

    let file = proxmox_sys::fs::open_file_locked(&path, timeout, exclusive, options)?;
    Ok(LtfsLockGuard(Some(file)))
}

/// Atomically write data to the configuration file.
pub fn replace_ltfs_config<P: AsRef<std::path::Path>>(path: P, data: &[u8]) -> Result<(), Error> {
    let mode = nix::sys::stat::Mode::from_bits_truncate(0o0644);
    let options = proxmox_sys::fs::CreateOptions::new().perm(mode);

    proxmox_sys::fs::replace_file(path, data, options, true)?;

    Ok(())
}
