//! Tape device abstraction layer and concurrent-access discipline for LTFS
//! drives: the polymorphic backend (C1), the thread-level MRSW lock (C2),
//! logical-block-protection CRC (C3), the per-device serialization point
//! (C4), label/coherency bookkeeping (C5), filemark navigation (C6),
//! drive-side encryption lifecycle (C7), the sense-to-error taxonomy (C8),
//! diagnostics (C9), and keyed-message logging (C10). `fs`/`index` are the
//! ambient filesystem entry-point surface built on top of all of the above.

pub mod backend;
pub mod device;
pub mod diag;
pub mod encryption;
pub mod error;
pub mod fs;
pub mod index;
pub mod lbp;
pub mod lock;
pub mod logging;
pub mod nav;
pub mod label;

pub use backend::{FileBackend, SgBackend, TapeBackend};
pub use device::DeviceWrapper;
pub use encryption::{FlatFileKeyManager, KeyManager};
pub use error::{BackendError, CoreError, DriveFamily};
pub use fs::{LtfsOps, LtfsVolume};
pub use index::{EntryKind, Index};
pub use lock::{IndexLock, TapeLockError};
