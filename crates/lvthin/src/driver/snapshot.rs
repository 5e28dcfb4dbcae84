//! Snapshot lifecycle, including running a snapshot on a writable overlay.

use std::fs;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

use lvthin_common::{ThinError, ThinResult};

use super::{LvmDriver, create_dir, namespace_of};
use crate::entity::Entity;
use crate::names;
use crate::rollback::Rollback;

impl LvmDriver {
    /// Take a read-only snapshot of `source`.
    ///
    /// # Errors
    ///
    /// Returns an error if the clone, directory or link fails.
    pub fn container_snapshot_create(&self, snapshot: &dyn Entity, source: &dyn Entity) -> ThinResult<()> {
        let _span = self.span.enter();
        self.create_snapshot_container(snapshot, source, true)
    }

    /// Clone `source` into `dest` and record the clone with a link.
    pub(super) fn create_snapshot_container(
        &self,
        dest: &dyn Entity,
        source: &dyn Entity,
        readonly: bool,
    ) -> ThinResult<()> {
        let source_volume = names::to_volume_name(source.name());
        let volume = names::to_volume_name(dest.name());
        tracing::debug!(%source_volume, %volume, readonly, "Creating snapshot");

        let device = self
            .volumes
            .create_snapshot(&volume, &source_volume, readonly)?;
        create_dir(&dest.path())?;
        self.host
            .links
            .create(namespace_of(dest), dest.name(), &device)?;

        tracing::info!(name = dest.name(), source = source.name(), readonly, "Created snapshot volume");
        Ok(())
    }

    /// Create an empty snapshot volume.
    ///
    /// # Errors
    ///
    /// Returns an error if allocation, the directory or the link fails.
    pub fn container_snapshot_create_empty(&self, snapshot: &dyn Entity) -> ThinResult<()> {
        self.container_create(snapshot)
    }

    /// Delete a snapshot, removing its parent directory once empty.
    ///
    /// # Errors
    ///
    /// Returns an error if deleting the snapshot fails.
    pub fn container_snapshot_delete(&self, snapshot: &dyn Entity) -> ThinResult<()> {
        let _span = self.span.enter();
        self.container_delete(snapshot)?;

        if let Some(parent) = snapshot.path().parent() {
            remove_if_empty(parent);
        }
        Ok(())
    }

    /// Rename a snapshot, moving it under a new parent if the name says so.
    ///
    /// A new parent directory is created with mode 0700 and an emptied
    /// old one is removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the volume or link rename fails.
    pub fn container_snapshot_rename(&self, snapshot: &dyn Entity, new_name: &str) -> ThinResult<()> {
        let _span = self.span.enter();
        self.rename_volume_and_link(snapshot, new_name)?;

        if names::is_snapshot_name(snapshot.name()) {
            if let Some(parent) = snapshot.path().parent() {
                remove_if_empty(parent);
            }
        }
        Ok(())
    }

    /// Create the 0700 directory holding snapshot `name` if it is missing,
    /// returning it when it was created here.
    pub(super) fn create_snapshot_parent(&self, name: &str) -> ThinResult<Option<PathBuf>> {
        let path = self.config.paths.container(name, true);
        let Some(parent) = path.parent().filter(|p| !p.exists()) else {
            return Ok(None);
        };

        fs::DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(parent)
            .map_err(|e| ThinError::filesystem("Failed to create snapshot directory", parent, e))?;
        Ok(Some(parent.to_path_buf()))
    }

    /// Run a snapshot: clone a writable overlay from it and mount the
    /// overlay on the snapshot's directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the overlay cannot be created or mounted. A
    /// mount failure removes the overlay again.
    pub fn container_snapshot_start(&self, snapshot: &dyn Entity) -> ThinResult<()> {
        let _span = self.span.enter();
        let source_volume = names::to_volume_name(snapshot.name());
        let overlay = names::to_volume_name(&names::overlay_name(snapshot.name()));
        tracing::debug!(%source_volume, %overlay, "Creating overlay volume");

        let device = self
            .volumes
            .create_snapshot(&overlay, &source_volume, false)?;

        let mut rollback = Rollback::new("snapshot start");
        rollback.push("remove overlay", || self.volumes.remove(&overlay));

        let path = snapshot.path();
        let mounted = create_dir(&path).and_then(|()| {
            self.host
                .mounter
                .mount(&device, &path, &self.config.mount_options)
        });
        if let Err(err) = mounted {
            return Err(rollback.unwind(err));
        }
        rollback.commit();

        tracing::info!(name = snapshot.name(), %overlay, "Started snapshot");
        Ok(())
    }

    /// Stop a running snapshot: unmount and discard its overlay.
    ///
    /// # Errors
    ///
    /// Returns an error if the unmount fails or no overlay exists.
    pub fn container_snapshot_stop(&self, snapshot: &dyn Entity) -> ThinResult<()> {
        let _span = self.span.enter();
        self.container_stop(snapshot)?;

        let overlay = names::to_volume_name(&names::overlay_name(snapshot.name()));
        self.volumes.remove(&overlay)?;

        tracing::info!(name = snapshot.name(), %overlay, "Stopped snapshot");
        Ok(())
    }
}

/// Remove `dir` if it exists and has no entries. Failures are ignored.
pub(super) fn remove_if_empty(dir: &Path) {
    let empty = fs::read_dir(dir).is_ok_and(|mut entries| entries.next().is_none());
    if empty && fs::remove_dir(dir).is_ok() {
        tracing::debug!(dir = %dir.display(), "Removed empty snapshot directory");
    }
}
