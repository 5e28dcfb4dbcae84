//! Volume group and thin pool validation.
//!
//! The group and pool names live in the daemon's configuration store.
//! Changing either while any container, snapshot or image still has a
//! volume in the current pool would orphan those volumes, so every change
//! is refused while [`PoolGuard::in_use_names`] is non-empty.

use std::sync::Arc;

use lvthin_common::{Namespace, ThinError, ThinResult};

use crate::command::{CommandRunner, Outcome};
use crate::config::{ConfigStore, THINPOOL_NAME_KEY, VG_NAME_KEY};
use crate::entity::Inventory;
use crate::links::LinkStore;
use crate::names;

/// Guards the pool configuration against changes under live volumes.
pub struct PoolGuard {
    runner: Arc<dyn CommandRunner>,
    config: Arc<dyn ConfigStore>,
    inventory: Arc<dyn Inventory>,
    links: Arc<dyn LinkStore>,
}

impl PoolGuard {
    /// Create a guard over the daemon's configuration and listings.
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        config: Arc<dyn ConfigStore>,
        inventory: Arc<dyn Inventory>,
        links: Arc<dyn LinkStore>,
    ) -> Self {
        Self {
            runner,
            config,
            inventory,
            links,
        }
    }

    /// Configured volume group, empty if unset.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration store cannot be read.
    pub fn volume_group_name(&self) -> ThinResult<String> {
        self.config.get(VG_NAME_KEY)
    }

    /// Configured thin pool, empty if unset.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration store cannot be read.
    pub fn thin_pool_name(&self) -> ThinResult<String> {
        self.config.get(THINPOOL_NAME_KEY)
    }

    /// Check that volume group `vg` exists. Any failure of the query
    /// counts as not found.
    ///
    /// # Errors
    ///
    /// Returns [`ThinError::VolumeGroupNotFound`] if it does not.
    pub fn check_volume_group(&self, vg: &str) -> ThinResult<()> {
        let outcome = self.runner.run("vgdisplay", &["-s", vg])?;
        if outcome.is_success() {
            return Ok(());
        }

        tracing::debug!(vg, output = outcome.output(), "vgdisplay failed to find volume group");
        Err(ThinError::VolumeGroupNotFound { vg: vg.to_string() })
    }

    /// Whether `pool` exists in `vg` as a thin pool.
    ///
    /// # Errors
    ///
    /// Returns [`ThinError::NotThinPool`] if a volume of that name exists
    /// with another type, and a backend error if the query itself fails.
    pub fn thin_pool_exists(&self, vg: &str, pool: &str) -> ThinResult<bool> {
        let target = format!("{vg}/{pool}");
        match self.runner.run("vgs", &["--noheadings", "-o", "lv_attr", &target])? {
            Outcome::Success { stdout } => {
                if stdout.trim().starts_with('t') {
                    Ok(true)
                } else {
                    Err(ThinError::NotThinPool {
                        pool: pool.to_string(),
                    })
                }
            }
            Outcome::NotFound { .. } => Ok(false),
            Outcome::Failure { output, .. } => Err(ThinError::backend(
                format!("Error checking for pool '{pool}'"),
                output,
            )),
        }
    }

    /// Every container, snapshot and image currently backed by the
    /// configured pool. Empty if either the group or the pool is unset.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration or the listings cannot be read.
    pub fn in_use_names(&self) -> ThinResult<Vec<String>> {
        if self.volume_group_name()?.is_empty() || self.thin_pool_name()?.is_empty() {
            return Ok(Vec::new());
        }

        let mut users: Vec<String> = self
            .inventory
            .container_names()?
            .into_iter()
            .filter(|name| {
                let namespace = Namespace::for_container(names::is_snapshot_name(name));
                self.links.exists(namespace, name)
            })
            .collect();

        users.extend(
            self.inventory
                .image_fingerprints()?
                .into_iter()
                .filter(|fingerprint| self.links.exists(Namespace::Images, fingerprint)),
        );

        Ok(users)
    }

    fn ensure_unused(&self) -> ThinResult<()> {
        let users = self.in_use_names()?;
        if users.is_empty() {
            Ok(())
        } else {
            tracing::warn!(?users, "Refusing to change pool configuration");
            Err(ThinError::InUse { users })
        }
    }

    /// Point the driver at thin pool `pool`. An empty name clears it.
    ///
    /// # Errors
    ///
    /// Returns [`ThinError::InUse`] while volumes exist,
    /// [`ThinError::ThinPoolRequiresVolumeGroup`] if no group is set, and
    /// [`ThinError::ThinPoolNotFound`] if the pool does not exist.
    pub fn set_thin_pool_name(&self, pool: &str) -> ThinResult<()> {
        self.ensure_unused()?;

        if !pool.is_empty() {
            let vg = self.volume_group_name()?;
            if vg.is_empty() {
                return Err(ThinError::ThinPoolRequiresVolumeGroup);
            }
            if !self.thin_pool_exists(&vg, pool)? {
                return Err(ThinError::ThinPoolNotFound {
                    pool: pool.to_string(),
                    vg,
                });
            }
        }

        self.config.set(THINPOOL_NAME_KEY, pool)?;
        tracing::info!(pool, "Thin pool configured");
        Ok(())
    }

    /// Point the driver at volume group `vg`. An empty name clears it.
    ///
    /// # Errors
    ///
    /// Returns [`ThinError::InUse`] while volumes exist and
    /// [`ThinError::VolumeGroupNotFound`] if the group does not exist.
    pub fn set_volume_group_name(&self, vg: &str) -> ThinResult<()> {
        self.ensure_unused()?;

        if !vg.is_empty() {
            self.check_volume_group(vg)?;
        }

        self.config.set(VG_NAME_KEY, vg)?;
        tracing::info!(vg, "Volume group configured");
        Ok(())
    }

    /// Resolve and validate the volume group to bind to, preferring
    /// `override_vg` over the stored setting.
    ///
    /// # Errors
    ///
    /// Returns [`ThinError::NotEnabled`] if no group is configured, or
    /// [`ThinError::VolumeGroupNotFound`] if it does not exist.
    pub fn initialize(&self, override_vg: Option<&str>) -> ThinResult<String> {
        let vg = match override_vg {
            Some(vg) => vg.to_string(),
            None => self.volume_group_name()?,
        };
        if vg.is_empty() {
            return Err(ThinError::NotEnabled);
        }

        self.check_volume_group(&vg)?;
        Ok(vg)
    }

    /// Version string of the installed LVM tools.
    ///
    /// # Errors
    ///
    /// Returns a backend error if `lvm version` fails.
    pub fn backend_version(&self) -> ThinResult<String> {
        let output = self
            .runner
            .run("lvm", &["version"])?
            .into_stdout("Getting LVM version")?;
        Ok(parse_version(&output))
    }
}

/// Join the values of every `key: value` line of `lvm version` output.
fn parse_version(output: &str) -> String {
    output
        .lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(_, value)| value.trim())
        .collect::<Vec<_>>()
        .join(" / ")
}
