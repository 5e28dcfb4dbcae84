//! Link records marking which entities are backed by thin volumes.
//!
//! A link is a symlink `<namespace>/<name>.lv` pointing at the volume's
//! device node. Its existence alone decides whether an entity belongs to
//! this driver, and the set of links is the set of pool consumers.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use lvthin_common::paths::LINK_SUFFIX;
use lvthin_common::{Namespace, ThinError, ThinPaths, ThinResult};
use parking_lot::RwLock;

/// Storage for link records.
pub trait LinkStore: Send + Sync {
    /// Whether `name` has a link in `namespace`.
    fn exists(&self, namespace: Namespace, name: &str) -> bool;

    /// Record that `name` is backed by the device at `target`.
    ///
    /// # Errors
    ///
    /// Returns an error if the link already exists or cannot be written.
    fn create(&self, namespace: Namespace, name: &str, target: &Path) -> ThinResult<()>;

    /// Remove the link for `name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the link does not exist or cannot be removed.
    fn remove(&self, namespace: Namespace, name: &str) -> ThinResult<()>;

    /// Move the link for `old` to `new`, creating its parent if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the link does not exist or cannot be moved.
    fn rename(&self, namespace: Namespace, old: &str, new: &str) -> ThinResult<()>;
}

/// Links stored as symlinks under the driver root.
#[derive(Debug, Clone)]
pub struct SymlinkStore {
    paths: ThinPaths,
}

impl SymlinkStore {
    /// Create a store rooted at `paths`.
    #[must_use]
    pub const fn new(paths: ThinPaths) -> Self {
        Self { paths }
    }

    /// Filesystem location of a link.
    #[must_use]
    pub fn link_path(&self, namespace: Namespace, name: &str) -> PathBuf {
        self.paths.link(namespace, name)
    }
}

impl LinkStore for SymlinkStore {
    fn exists(&self, namespace: Namespace, name: &str) -> bool {
        // The device node may be inactive, so a dangling link still counts.
        fs::symlink_metadata(self.link_path(namespace, name)).is_ok()
    }

    fn create(&self, namespace: Namespace, name: &str, target: &Path) -> ThinResult<()> {
        let link = self.link_path(namespace, name);
        if let Some(parent) = link.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| ThinError::filesystem("Failed to create link directory", parent, e))?;
        }

        std::os::unix::fs::symlink(target, &link)
            .map_err(|e| ThinError::filesystem("Failed to create volume link", &link, e))?;

        tracing::debug!(link = %link.display(), target = %target.display(), "Created volume link");
        Ok(())
    }

    fn remove(&self, namespace: Namespace, name: &str) -> ThinResult<()> {
        let link = self.link_path(namespace, name);
        fs::remove_file(&link)
            .map_err(|e| ThinError::filesystem("Failed to remove volume link", &link, e))?;

        tracing::debug!(link = %link.display(), "Removed volume link");
        Ok(())
    }

    fn rename(&self, namespace: Namespace, old: &str, new: &str) -> ThinResult<()> {
        let from = self.link_path(namespace, old);
        let to = self.link_path(namespace, new);
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| ThinError::filesystem("Failed to create link directory", parent, e))?;
        }
        fs::rename(&from, &to)
            .map_err(|e| ThinError::filesystem("Failed to rename volume link", &from, e))?;

        tracing::debug!(from = %from.display(), to = %to.display(), "Renamed volume link");
        Ok(())
    }
}

/// Links kept in memory.
#[derive(Debug, Default)]
pub struct MemoryLinkStore {
    links: RwLock<BTreeMap<(Namespace, String), PathBuf>>,
}

impl MemoryLinkStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn missing(namespace: Namespace, name: &str) -> ThinError {
    ThinError::filesystem(
        "No volume link",
        PathBuf::from(namespace.dir_name()).join(format!("{name}{LINK_SUFFIX}")),
        std::io::ErrorKind::NotFound.into(),
    )
}

impl LinkStore for MemoryLinkStore {
    fn exists(&self, namespace: Namespace, name: &str) -> bool {
        self.links
            .read()
            .contains_key(&(namespace, name.to_string()))
    }

    fn create(&self, namespace: Namespace, name: &str, target: &Path) -> ThinResult<()> {
        let mut links = self.links.write();
        let key = (namespace, name.to_string());
        if links.contains_key(&key) {
            return Err(ThinError::filesystem(
                "Failed to create volume link",
                PathBuf::from(namespace.dir_name()).join(format!("{name}{LINK_SUFFIX}")),
                std::io::ErrorKind::AlreadyExists.into(),
            ));
        }
        links.insert(key, target.to_path_buf());
        Ok(())
    }

    fn remove(&self, namespace: Namespace, name: &str) -> ThinResult<()> {
        self.links
            .write()
            .remove(&(namespace, name.to_string()))
            .map(|_| ())
            .ok_or_else(|| missing(namespace, name))
    }

    fn rename(&self, namespace: Namespace, old: &str, new: &str) -> ThinResult<()> {
        let mut links = self.links.write();
        let target = links
            .remove(&(namespace, old.to_string()))
            .ok_or_else(|| missing(namespace, old))?;
        links.insert((namespace, new.to_string()), target);
        Ok(())
    }
}
