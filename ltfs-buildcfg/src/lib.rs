//! Exports configuration data from the build system

pub const LTFS_PKG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION_MAJOR"),
    ".",
    env!("CARGO_PKG_VERSION_MINOR"),
);
pub const LTFS_PKG_RELEASE: &str = env!("CARGO_PKG_VERSION_PATCH");
pub const LTFS_PKG_REPOID: &str = env!("REPOID");

/// The configured configuration directory
pub const CONFIGDIR: &str = "/etc/ltfs";

#[macro_export]
macro_rules! LTFS_RUN_DIR_M {
    () => {
        "/run/ltfs"
    };
}

#[macro_export]
macro_rules! LTFS_STATE_DIR_M {
    () => {
        "/var/lib/ltfs"
    };
}

#[macro_export]
macro_rules! LTFS_LOG_DIR_M {
    () => {
        "/var/log/ltfs"
    };
}

#[macro_export]
macro_rules! LTFS_DUMP_DIR_M {
    () => {
        "/var/lib/ltfs/dumps"
    };
}

/// namespaced directory for in-memory (tmpfs) run state, e.g. device lock files
pub const LTFS_RUN_DIR: &str = LTFS_RUN_DIR_M!();

/// namespaced directory for persistent state (inventory, media catalogs)
pub const LTFS_STATE_DIR: &str = LTFS_STATE_DIR_M!();

/// namespaced directory for persistent logging
pub const LTFS_LOG_DIR: &str = LTFS_LOG_DIR_M!();

/// default directory for drive dump-on-error captures; overridable by `LTFS_DUMP_DIR`
pub const LTFS_DUMP_DIR: &str = LTFS_DUMP_DIR_M!();

/// Prepend configuration directory to a file name
///
/// #### Example:
/// ```
/// use ltfs_buildcfg::configdir;
/// let path = configdir!("/drive.conf");
/// ```
#[macro_export]
macro_rules! configdir {
    ($subdir:expr) => {
        concat!("/etc/ltfs", $subdir)
    };
}

/// Prepend the run directory to a file name.
#[macro_export]
macro_rules! rundir {
    ($subdir:expr) => {
        concat!($crate::LTFS_RUN_DIR_M!(), $subdir)
    };
}
