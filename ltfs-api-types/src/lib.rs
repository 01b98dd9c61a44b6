//! Data types shared between `ltfs-core`, `ltfs-tape`, `ltfs-config` and the
//! CLI binaries.

mod position;
pub use position::*;

mod label;
pub use label::*;

mod extent;
pub use extent::*;

mod tape;
pub use tape::*;
