//! UID/GID mapping for unprivileged containers.
//!
//! Images are unpacked with container-side ownership. Before an
//! unprivileged container can use its rootfs, every file must be chowned
//! to the host range its user namespace maps to.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::os::unix::fs::{MetadataExt, lchown};
use std::path::Path;

use lvthin_common::{ThinError, ThinResult};
use walkdir::WalkDir;

/// UID/GID mapping entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdMap {
    /// Container ID (start).
    pub container_id: u32,
    /// Host ID (start).
    pub host_id: u32,
    /// Range size.
    pub size: u32,
}

impl IdMap {
    /// Create a new ID mapping.
    #[must_use]
    pub const fn new(container_id: u32, host_id: u32, size: u32) -> Self {
        Self {
            container_id,
            host_id,
            size,
        }
    }

    /// Host id for `id`, if this range covers it.
    #[must_use]
    pub fn to_host(&self, id: u32) -> Option<u32> {
        let offset = id.checked_sub(self.container_id)?;
        if offset < self.size {
            self.host_id.checked_add(offset)
        } else {
            None
        }
    }
}

/// UID and GID mappings of a user namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdMapSet {
    /// UID mappings.
    pub uid_mappings: Vec<IdMap>,
    /// GID mappings.
    pub gid_mappings: Vec<IdMap>,
}

impl IdMapSet {
    /// The same range for both uids and gids.
    #[must_use]
    pub fn uniform(container_id: u32, host_id: u32, size: u32) -> Self {
        let map = IdMap::new(container_id, host_id, size);
        Self {
            uid_mappings: vec![map],
            gid_mappings: vec![map],
        }
    }

    /// Host uid for a container uid.
    #[must_use]
    pub fn shift_uid(&self, uid: u32) -> Option<u32> {
        self.uid_mappings.iter().find_map(|m| m.to_host(uid))
    }

    /// Host gid for a container gid.
    #[must_use]
    pub fn shift_gid(&self, gid: u32) -> Option<u32> {
        self.gid_mappings.iter().find_map(|m| m.to_host(gid))
    }
}

/// Rewrites ownership of a tree into a user namespace's host range.
pub trait IdShifter: Send + Sync {
    /// Shift every entry under `root` using `map`.
    ///
    /// # Errors
    ///
    /// Returns an error if the tree cannot be walked or an entry cannot be
    /// chowned.
    fn shift(&self, root: &Path, map: &IdMapSet) -> ThinResult<()>;
}

/// Shifts ownership with lchown, one entry at a time.
///
/// Ids outside every mapped range are left untouched. Symlinks are never
/// followed, hard-linked files are shifted once and permission bits
/// cleared by chown are restored.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChownShifter;

impl IdShifter for ChownShifter {
    fn shift(&self, root: &Path, map: &IdMapSet) -> ThinResult<()> {
        shift_tree(root, map, |path, uid, gid| lchown(path, uid, gid))
    }
}

fn shift_tree(
    root: &Path,
    map: &IdMapSet,
    mut chown: impl FnMut(&Path, Option<u32>, Option<u32>) -> io::Result<()>,
) -> ThinResult<()> {
    tracing::debug!(root = %root.display(), ?map, "Shifting rootfs ownership");

    // (dev, ino) of multiply linked files already shifted.
    let mut linked = HashSet::new();
    let mut shifted = 0usize;
    for entry in WalkDir::new(root) {
        let entry = entry.map_err(|e| ThinError::Internal {
            message: format!("Failed to walk {}: {e}", root.display()),
        })?;
        let path = entry.path();
        let meta = entry.metadata().map_err(|e| ThinError::Internal {
            message: format!("Failed to stat {}: {e}", path.display()),
        })?;

        if !meta.is_dir() && meta.nlink() > 1 && !linked.insert((meta.dev(), meta.ino())) {
            continue;
        }

        let uid = map.shift_uid(meta.uid());
        let gid = map.shift_gid(meta.gid());
        if uid.is_none() && gid.is_none() {
            continue;
        }

        chown(path, uid, gid)
            .map_err(|e| ThinError::filesystem("Failed to shift ownership of", path, e))?;

        if !entry.path_is_symlink() {
            fs::set_permissions(path, meta.permissions())
                .map_err(|e| ThinError::filesystem("Failed to restore mode of", path, e))?;
        }
        shifted += 1;
    }

    tracing::debug!(root = %root.display(), shifted, "Shifted rootfs ownership");
    Ok(())
}
