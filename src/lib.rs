//! Linear Tape File System -- device abstraction layer.
//!
//! The abstraction itself (backend trait, device wrapper, locking,
//! label/coherency, filemark navigation, encryption, error taxonomy,
//! diagnostics, logging) lives in [`ltfs_core`]; this crate only adds the
//! `drive.cfg`-driven backend dispatch the `mkltfs`/`ltfsck`/`ltfs`
//! binaries share.

pub mod drive_open;

pub use ltfs_core::*;
