//! Standard filesystem paths for lvthin.

use std::fmt;
use std::path::PathBuf;

use once_cell::sync::Lazy;

/// Default root directory for daemon data.
pub static LVTHIN_ROOT: Lazy<PathBuf> = Lazy::new(|| {
    std::env::var("LVTHIN_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/var/lib/lvthin"))
});

/// Suffix of the symlink recording that an entity lives on a thin volume.
pub const LINK_SUFFIX: &str = ".lv";

/// Top-level namespaces an entity can live in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Namespace {
    /// Regular containers.
    Containers,
    /// Container snapshots (`<container>/<snapshot>`).
    Snapshots,
    /// Base images, keyed by fingerprint.
    Images,
}

impl Namespace {
    /// Directory name of the namespace under the root.
    #[must_use]
    pub const fn dir_name(self) -> &'static str {
        match self {
            Self::Containers => "containers",
            Self::Snapshots => "snapshots",
            Self::Images => "images",
        }
    }

    /// Namespace of a container or snapshot name.
    #[must_use]
    pub const fn for_container(is_snapshot: bool) -> Self {
        if is_snapshot {
            Self::Snapshots
        } else {
            Self::Containers
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// On-disk layout used by the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThinPaths {
    /// Root data directory (default: /var/lib/lvthin).
    pub root: PathBuf,
}

impl ThinPaths {
    /// Create paths with default locations.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create paths with a custom root directory.
    #[must_use]
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory of a namespace.
    #[must_use]
    pub fn namespace(&self, namespace: Namespace) -> PathBuf {
        self.root.join(namespace.dir_name())
    }

    /// Directory for container data.
    #[must_use]
    pub fn containers(&self) -> PathBuf {
        self.namespace(Namespace::Containers)
    }

    /// Directory for snapshot data.
    #[must_use]
    pub fn snapshots(&self) -> PathBuf {
        self.namespace(Namespace::Snapshots)
    }

    /// Directory for images.
    #[must_use]
    pub fn images(&self) -> PathBuf {
        self.namespace(Namespace::Images)
    }

    /// Path of a container or snapshot directory.
    #[must_use]
    pub fn container(&self, name: &str, is_snapshot: bool) -> PathBuf {
        self.namespace(Namespace::for_container(is_snapshot)).join(name)
    }

    /// Image package file for a fingerprint.
    #[must_use]
    pub fn image_package(&self, fingerprint: &str) -> PathBuf {
        self.images().join(fingerprint)
    }

    /// Split image root filesystem tarball for a fingerprint.
    #[must_use]
    pub fn image_rootfs_package(&self, fingerprint: &str) -> PathBuf {
        self.images().join(format!("{fingerprint}.rootfs"))
    }

    /// Symlink path recording that `name` is backed by a thin volume.
    #[must_use]
    pub fn link(&self, namespace: Namespace, name: &str) -> PathBuf {
        self.namespace(namespace).join(format!("{name}{LINK_SUFFIX}"))
    }

    /// Create all namespace directories.
    ///
    /// # Errors
    ///
    /// Returns an error if directory creation fails.
    pub fn create_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(self.containers())?;
        std::fs::create_dir_all(self.snapshots())?;
        std::fs::create_dir_all(self.images())?;
        tracing::debug!(root = %self.root.display(), "Created namespace directories");
        Ok(())
    }
}

impl Default for ThinPaths {
    fn default() -> Self {
        Self {
            root: LVTHIN_ROOT.clone(),
        }
    }
}
