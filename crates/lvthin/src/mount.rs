//! Mounting thin volumes onto entity directories.

use std::path::Path;
use std::sync::Arc;

use lvthin_common::{ThinError, ThinResult};

use crate::command::{CommandRunner, path_arg};

/// Mounts and unmounts block devices.
pub trait Mounter: Send + Sync {
    /// Mount `device` at `target` with comma-separated `options`.
    ///
    /// # Errors
    ///
    /// Returns an error if the mount fails.
    fn mount(&self, device: &Path, target: &Path, options: &str) -> ThinResult<()>;

    /// Unmount whatever is mounted at `target`.
    ///
    /// # Errors
    ///
    /// Returns an error if the unmount fails.
    fn unmount(&self, target: &Path) -> ThinResult<()>;
}

/// Mounts through mount(8), unmounts through umount(2).
///
/// mount(8) detects the filesystem type and reports failures on its output,
/// which ends up in the returned error.
pub struct SystemMounter {
    runner: Arc<dyn CommandRunner>,
}

impl SystemMounter {
    /// Create a mounter that runs mount(8) through `runner`.
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

impl Mounter for SystemMounter {
    fn mount(&self, device: &Path, target: &Path, options: &str) -> ThinResult<()> {
        tracing::debug!(
            device = %device.display(),
            target = %target.display(),
            options,
            "Mounting volume"
        );

        let mut args = Vec::with_capacity(4);
        if !options.is_empty() {
            args.extend(["-o", options]);
        }
        args.extend([path_arg(device)?, path_arg(target)?]);

        self.runner.run("mount", &args)?.into_stdout(format!(
            "Mounting '{}' at '{}'",
            device.display(),
            target.display()
        ))?;
        Ok(())
    }

    #[cfg(target_os = "linux")]
    fn unmount(&self, target: &Path) -> ThinResult<()> {
        use rustix::mount::{UnmountFlags, unmount};

        tracing::debug!(target = %target.display(), "Unmounting volume");

        unmount(target, UnmountFlags::empty())
            .map_err(|e| ThinError::filesystem("Failed to unmount", target, e.into()))
    }

    #[cfg(not(target_os = "linux"))]
    fn unmount(&self, _target: &Path) -> ThinResult<()> {
        Err(ThinError::Unsupported {
            feature: "unmount".to_string(),
        })
    }
}
