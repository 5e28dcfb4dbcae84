//! Primitive operations on single logical volumes.

use std::path::PathBuf;
use std::sync::Arc;

use lvthin_common::{ThinResult, VolumeSize};

use crate::command::{CommandRunner, path_arg};
use crate::config::DriverConfig;

/// Volume-level LVM commands bound to one volume group.
///
/// Every call blocks on the external tool. Failures carry the tool's
/// combined output. No call here rolls anything back.
pub struct VolumeOps {
    runner: Arc<dyn CommandRunner>,
    vg: String,
    config: DriverConfig,
}

impl VolumeOps {
    /// Bind to volume group `vg`.
    pub fn new(runner: Arc<dyn CommandRunner>, vg: impl Into<String>, config: DriverConfig) -> Self {
        Self {
            runner,
            vg: vg.into(),
            config,
        }
    }

    /// The bound volume group.
    #[must_use]
    pub fn volume_group(&self) -> &str {
        &self.vg
    }

    /// Device node of volume `name`.
    #[must_use]
    pub fn device_path(&self, name: &str) -> PathBuf {
        PathBuf::from("/dev").join(&self.vg).join(name)
    }

    fn qualified(&self, name: &str) -> String {
        format!("{}/{}", self.vg, name)
    }

    /// Create thin pool `pool` over all free extents of the group.
    ///
    /// # Errors
    ///
    /// Returns a backend error if lvcreate fails.
    pub fn create_thin_pool(&self, pool: &str) -> ThinResult<String> {
        let metadata_size = self.config.pool_metadata_size.to_lvm_arg();
        let target = self.qualified(pool);

        self.runner
            .run(
                "lvcreate",
                &[
                    "--poolmetadatasize",
                    &metadata_size,
                    "-l",
                    "100%FREE",
                    "--thinpool",
                    &target,
                ],
            )?
            .into_stdout(format!("Creating LVM thin pool named {pool}"))?;

        tracing::info!(vg = %self.vg, pool, "Created thin pool");
        Ok(pool.to_string())
    }

    /// Allocate thin volume `name` of `size` from `pool` and put a
    /// filesystem on it.
    ///
    /// A mkfs failure leaves the allocated volume in place.
    ///
    /// # Errors
    ///
    /// Returns a backend error if allocation or formatting fails.
    pub fn create_thin_volume(&self, pool: &str, name: &str, size: VolumeSize) -> ThinResult<PathBuf> {
        let size_arg = size.to_lvm_arg();
        let pool_arg = self.qualified(pool);

        self.runner
            .run(
                "lvcreate",
                &["--thin", "-n", name, "--virtualsize", &size_arg, &pool_arg],
            )?
            .into_stdout(format!("Creating thin LV named {name}"))?;

        let device = self.device_path(name);
        let mkfs = format!("mkfs.{}", self.config.filesystem);

        self.runner
            .run(&mkfs, &["-E", &self.config.mkfs_options, path_arg(&device)?])?
            .into_stdout(format!("Making filesystem on LV {name}"))?;

        tracing::debug!(vg = %self.vg, pool, name, %size, "Created thin volume");
        Ok(device)
    }

    /// Force-remove volume `name`. Removing a missing volume is an error.
    ///
    /// # Errors
    ///
    /// Returns a backend error if lvremove fails.
    pub fn remove(&self, name: &str) -> ThinResult<()> {
        self.runner
            .run("lvremove", &["-f", &self.qualified(name)])?
            .into_stdout(format!("Removing LV named {name}"))?;

        tracing::debug!(vg = %self.vg, name, "Removed volume");
        Ok(())
    }

    /// Rename volume `old` to `new`, returning lvrename's output.
    ///
    /// # Errors
    ///
    /// Returns a backend error, carrying the output, if lvrename fails.
    pub fn rename(&self, old: &str, new: &str) -> ThinResult<String> {
        let output = self
            .runner
            .run("lvrename", &[self.vg.as_str(), old, new])?
            .into_stdout(format!("Renaming LV '{old}' to '{new}'"))?;

        tracing::debug!(vg = %self.vg, old, new, "Renamed volume");
        Ok(output)
    }

    /// Clone `source` into a new copy-on-write volume `name` and activate
    /// it, read-only if asked.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the snapshot cannot be created, and a
    /// distinct one if it was created but cannot be activated.
    pub fn create_snapshot(&self, name: &str, source: &str, readonly: bool) -> ThinResult<PathBuf> {
        let source_device = self.device_path(source);

        self.runner
            .run("lvcreate", &["-kn", "-n", name, "-s", path_arg(&source_device)?])?
            .into_stdout(format!("Creating snapshot LV named {name}"))?;

        let device = self.device_path(name);
        let mut args = vec!["-ay"];
        if readonly {
            args.push("-pr");
        }
        args.push(path_arg(&device)?);

        self.runner
            .run("lvchange", &args)?
            .into_stdout(format!("Activating new snapshot '{name}'"))?;

        tracing::debug!(vg = %self.vg, name, source, readonly, "Created snapshot volume");
        Ok(device)
    }
}
