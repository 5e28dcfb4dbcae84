//! LVM backend primitives.

mod pool;
mod volume;

pub use pool::PoolGuard;
pub use volume::VolumeOps;
