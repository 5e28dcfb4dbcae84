//! Logical volume sizes.
//!
//! LVM tools are always given sizes in bytes (`<n>b`) so they never round
//! to extents differently from what was asked for. Display uses the
//! largest binary unit that divides the size evenly.

use std::fmt;

const KIB: u64 = 1024;
const MIB: u64 = KIB * 1024;
const GIB: u64 = MIB * 1024;
const TIB: u64 = GIB * 1024;

/// Size of a logical volume in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct VolumeSize(u64);

impl VolumeSize {
    /// Create a size from gibibytes (GiB).
    #[must_use]
    pub const fn gibibytes(gib: u64) -> Self {
        Self(gib * GIB)
    }

    /// Size argument for LVM tools, in bytes (`<n>b`).
    #[must_use]
    pub fn to_lvm_arg(&self) -> String {
        format!("{}b", self.0)
    }
}

impl Default for VolumeSize {
    /// Default virtual size of a freshly allocated thin volume.
    fn default() -> Self {
        Self::gibibytes(10)
    }
}

impl fmt::Display for VolumeSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.0;
        if bytes >= TIB && bytes % TIB == 0 {
            write!(f, "{}TiB", bytes / TIB)
        } else if bytes >= GIB && bytes % GIB == 0 {
            write!(f, "{}GiB", bytes / GIB)
        } else if bytes >= MIB && bytes % MIB == 0 {
            write!(f, "{}MiB", bytes / MIB)
        } else if bytes >= KIB && bytes % KIB == 0 {
            write!(f, "{}KiB", bytes / KIB)
        } else {
            write!(f, "{bytes}")
        }
    }
}
