//! Container lifecycle.

use std::io::ErrorKind;

use lvthin_common::{Namespace, ThinError, ThinResult};

use super::snapshot::remove_if_empty;
use super::{LvmDriver, create_dir, namespace_of};
use crate::entity::{Entity, TemplateTrigger};
use crate::names;
use crate::rollback::Rollback;

impl LvmDriver {
    /// Create an empty container volume.
    ///
    /// Nothing is rolled back: a failure after allocation leaves the
    /// volume in place.
    ///
    /// # Errors
    ///
    /// Returns an error if allocation, the directory or the link fails.
    pub fn container_create(&self, container: &dyn Entity) -> ThinResult<()> {
        let _span = self.span.enter();
        let volume = names::to_volume_name(container.name());

        let device = self.allocate_thin_volume(&volume)?;
        create_dir(&container.path())?;
        self.host
            .links
            .create(namespace_of(container), container.name(), &device)?;

        tracing::info!(name = container.name(), %volume, "Created container volume");
        Ok(())
    }

    /// Create a container from image `fingerprint`, materializing the
    /// image volume first if needed.
    ///
    /// Template failures are logged and do not fail the call.
    ///
    /// # Errors
    ///
    /// Returns an error if cloning, mounting, shifting or the final
    /// unmount fails. Mount and shift failures delete the new container.
    pub fn container_create_from_image(
        &self,
        container: &dyn Entity,
        fingerprint: &str,
    ) -> ThinResult<()> {
        let _span = self.span.enter();

        if !self.host.links.exists(Namespace::Images, fingerprint) {
            self.image_create(fingerprint)?;
        }

        let volume = names::to_volume_name(container.name());
        let device = self.volumes.create_snapshot(&volume, fingerprint, false)?;

        let path = container.path();
        create_dir(&path)?;
        self.host
            .links
            .create(namespace_of(container), container.name(), &device)?;

        let mut rollback = Rollback::new("create from image");
        rollback.push("delete container", || self.container_delete(container));

        if let Err(err) = self
            .host
            .mounter
            .mount(&device, &path, &self.config.mount_options)
        {
            return Err(rollback.unwind(err));
        }

        if !container.is_privileged() {
            rollback.push("unmount", || self.host.mounter.unmount(&path));
            if let Err(err) = self.shift_rootfs(container) {
                return Err(rollback.unwind(err));
            }
        }
        rollback.commit();

        if let Err(err) = container.template_apply(TemplateTrigger::Create) {
            tracing::error!(
                name = container.name(),
                %err,
                "Error in create template, continuing to unmount"
            );
        }

        self.host.mounter.unmount(&path)?;

        tracing::info!(name = container.name(), fingerprint, "Created container from image");
        Ok(())
    }

    fn shift_rootfs(&self, container: &dyn Entity) -> ThinResult<()> {
        let path = container.path();
        let map = container
            .id_map()
            .ok_or_else(|| ThinError::MissingIdMap { path: path.clone() })?;

        self.host.shifter.shift(&path.join("rootfs"), &map)
    }

    /// Whether `container` can be restored from `source`. Always allowed.
    ///
    /// # Errors
    ///
    /// Never fails.
    #[allow(clippy::unused_self)]
    pub fn container_can_restore(
        &self,
        _container: &dyn Entity,
        _source: &dyn Entity,
    ) -> ThinResult<()> {
        Ok(())
    }

    /// Remove the volume, its link and the container directory.
    ///
    /// # Errors
    ///
    /// Returns an error if any step fails. A directory removal failure is
    /// reported after the volume and link are already gone.
    pub fn container_delete(&self, container: &dyn Entity) -> ThinResult<()> {
        let _span = self.span.enter();
        let volume = names::to_volume_name(container.name());

        self.volumes.remove(&volume)?;
        self.host
            .links
            .remove(namespace_of(container), container.name())?;

        let path = container.path();
        match std::fs::remove_dir_all(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                tracing::error!(path = %path.display(), err = %e, "Failed to remove container path");
                return Err(ThinError::filesystem("Cleaning up", &path, e));
            }
        }

        tracing::info!(name = container.name(), %volume, "Deleted container volume");
        Ok(())
    }

    /// Copy `source` into a new container.
    ///
    /// A source on this driver is cloned copy-on-write. Any other source
    /// is copied file by file into a fresh volume.
    ///
    /// # Errors
    ///
    /// Returns an error if cloning or copying fails, or if the copy
    /// template fails.
    pub fn container_copy(&self, container: &dyn Entity, source: &dyn Entity) -> ThinResult<()> {
        let _span = self.span.enter();

        if self.is_mine(source) {
            self.create_snapshot_container(container, source, false)
                .inspect_err(|err| tracing::error!(%err, "Error creating snapshot volume for copy"))?;
        } else {
            tracing::info!(
                name = container.name(),
                source = source.name(),
                "Copy from non-LVM container"
            );
            self.copy_from_foreign(container, source)?;
        }

        container.template_apply(TemplateTrigger::Copy)
    }

    fn copy_from_foreign(&self, container: &dyn Entity, source: &dyn Entity) -> ThinResult<()> {
        self.container_create(container)
            .inspect_err(|err| tracing::error!(%err, "Error creating empty container"))?;

        let mut rollback = Rollback::new("copy");
        rollback.push("delete container", || self.container_delete(container));

        if let Err(err) = self.container_start(container) {
            tracing::error!(name = container.name(), %err, "Error mounting container");
            return Err(rollback.unwind(err));
        }
        rollback.push("unmount", || self.container_stop(container));

        if let Err(err) = self.host.sync.copy(&source.path(), &container.path()) {
            tracing::error!(name = container.name(), %err, "Copying container contents failed");
            return Err(rollback.unwind(err));
        }
        rollback.commit();

        self.container_stop(container)
    }

    /// Mount the container's volume on its directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the mount fails.
    pub fn container_start(&self, container: &dyn Entity) -> ThinResult<()> {
        let _span = self.span.enter();
        let device = self
            .volumes
            .device_path(&names::to_volume_name(container.name()));

        self.host
            .mounter
            .mount(&device, &container.path(), &self.config.mount_options)
    }

    /// Unmount the container's directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the unmount fails.
    pub fn container_stop(&self, container: &dyn Entity) -> ThinResult<()> {
        let _span = self.span.enter();
        self.host.mounter.unmount(&container.path())
    }

    /// Rename a container and, unless it is a snapshot, all its snapshots.
    ///
    /// A failure part way through leaves already renamed snapshots
    /// renamed.
    ///
    /// # Errors
    ///
    /// Returns an error if any volume or link rename fails.
    pub fn container_rename(&self, container: &dyn Entity, new_name: &str) -> ThinResult<()> {
        let _span = self.span.enter();
        self.rename_volume_and_link(container, new_name)?;

        if !container.is_snapshot() {
            for snapshot in container.snapshots()? {
                let new_snapshot = names::rebase_snapshot(new_name, snapshot.name());
                self.container_rename(snapshot.as_ref(), &new_snapshot)?;
            }
        }
        Ok(())
    }

    pub(super) fn rename_volume_and_link(&self, entity: &dyn Entity, new_name: &str) -> ThinResult<()> {
        let old_volume = names::to_volume_name(entity.name());
        let new_volume = names::to_volume_name(new_name);

        let created_parent = if entity.is_snapshot() {
            self.create_snapshot_parent(new_name)?
        } else {
            None
        };

        let renamed = self
            .volumes
            .rename(&old_volume, &new_volume)
            .inspect_err(|err| {
                tracing::error!(%old_volume, %new_volume, %err, "Failed to rename volume");
            })
            .and_then(|_| {
                self.host
                    .links
                    .rename(namespace_of(entity), entity.name(), new_name)
                    .inspect_err(|err| tracing::error!(%err, "Rename of the volume link failed"))
            });
        if let Err(err) = renamed {
            if let Some(parent) = created_parent {
                remove_if_empty(&parent);
            }
            return Err(err);
        }

        tracing::info!(old = entity.name(), new = new_name, "Renamed volume");
        Ok(())
    }

    /// Replace the container's volume with a clone of `source`.
    ///
    /// The old volume is removed first. If the clone then fails the
    /// container has no volume.
    ///
    /// # Errors
    ///
    /// Returns an error if removal or cloning fails.
    pub fn container_restore(&self, container: &dyn Entity, source: &dyn Entity) -> ThinResult<()> {
        let _span = self.span.enter();
        let source_volume = names::to_volume_name(source.name());
        let volume = names::to_volume_name(container.name());

        self.volumes.remove(&volume)?;
        self.volumes.create_snapshot(&volume, &source_volume, false)?;

        tracing::info!(name = container.name(), source = source.name(), "Restored container");
        Ok(())
    }
}
