mod drive;
pub use drive::*;

mod mam;
pub use mam::*;

mod device;
pub use device::*;

mod volume_statistics;
pub use volume_statistics::*;
