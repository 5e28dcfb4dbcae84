//! The LVM thin-pool storage driver.
//!
//! [`LvmDriver`] turns container, snapshot and image lifecycle events into
//! LVM commands, mounts and link bookkeeping. None of these steps is
//! transactional, so multi-step operations register compensations with a
//! [`Rollback`](crate::rollback::Rollback) where a failure would otherwise
//! strand a volume.
//!
//! The driver takes no locks. Callers must serialize operations that
//! target the same entity name.

mod container;
mod image;
mod migration;
mod snapshot;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use lvthin_common::{Namespace, ThinError, ThinPaths, ThinResult};
use tracing::Span;

pub use image::{ImageUnpacker, TarUnpacker};
pub use migration::{
    Connection, MigrationFsType, MigrationSource, MigrationTransport, TarStreamTransport,
};

use crate::command::{CommandRunner, SystemRunner};
use crate::config::{ConfigStore, DriverConfig};
use crate::entity::{Entity, Inventory};
use crate::idmap::{ChownShifter, IdShifter};
use crate::links::{LinkStore, SymlinkStore};
use crate::lvm::{PoolGuard, VolumeOps};
use crate::mount::{Mounter, SystemMounter};
use crate::sync::{RsyncTreeSync, TreeSync};

/// Storage type name reported to the daemon.
pub const STORAGE_TYPE_NAME: &str = "lvm";

/// Host services the driver acts through.
#[derive(Clone)]
pub struct Host {
    /// Runs LVM, mkfs and friends.
    pub runner: Arc<dyn CommandRunner>,
    /// Mounts volumes.
    pub mounter: Arc<dyn Mounter>,
    /// Records which names are backed by a volume.
    pub links: Arc<dyn LinkStore>,
    /// Copies trees from entities on other backends.
    pub sync: Arc<dyn TreeSync>,
    /// Unpacks image packages.
    pub unpacker: Arc<dyn ImageUnpacker>,
    /// Shifts ownership for unprivileged containers.
    pub shifter: Arc<dyn IdShifter>,
    /// Moves entities between hosts.
    pub migration: Arc<dyn MigrationTransport>,
}

impl Host {
    /// The real host: external tools, symlinks under `paths`, rsync and tar.
    #[must_use]
    pub fn system(paths: &ThinPaths) -> Self {
        let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);
        Self {
            mounter: Arc::new(SystemMounter::new(runner.clone())),
            links: Arc::new(SymlinkStore::new(paths.clone())),
            sync: Arc::new(RsyncTreeSync::new(runner.clone())),
            unpacker: Arc::new(TarUnpacker::new(paths.clone())),
            shifter: Arc::new(ChownShifter),
            migration: Arc::new(TarStreamTransport),
            runner,
        }
    }
}

/// Daemon state the driver reads and updates.
#[derive(Clone)]
pub struct DaemonState {
    /// Persistent settings holding the group and pool names.
    pub config: Arc<dyn ConfigStore>,
    /// Known containers and images.
    pub inventory: Arc<dyn Inventory>,
}

/// Storage driver backed by an LVM thin pool.
pub struct LvmDriver {
    config: DriverConfig,
    host: Host,
    pool: PoolGuard,
    volumes: VolumeOps,
    version: String,
    span: Span,
}

impl LvmDriver {
    /// Initialize the driver, binding it to `override_vg` or to the
    /// configured volume group.
    ///
    /// # Errors
    ///
    /// Returns an error if the LVM tools are unusable, no group is
    /// configured, the group does not exist, or the namespace
    /// directories cannot be created.
    pub fn init(
        config: DriverConfig,
        host: Host,
        daemon: DaemonState,
        override_vg: Option<&str>,
    ) -> ThinResult<Self> {
        let pool = PoolGuard::new(
            host.runner.clone(),
            daemon.config,
            daemon.inventory,
            host.links.clone(),
        );

        let version = pool.backend_version()?;
        let vg = pool.initialize(override_vg)?;
        config.paths.create_dirs().map_err(|e| {
            ThinError::filesystem("Failed to create namespace directories in", &config.paths.root, e)
        })?;
        let volumes = VolumeOps::new(host.runner.clone(), vg.clone(), config.clone());
        let span = tracing::info_span!("lvm", vg = %vg);

        span.in_scope(|| tracing::info!(%version, "Initialized storage driver"));

        Ok(Self {
            config,
            host,
            pool,
            volumes,
            version,
            span,
        })
    }

    /// Storage type name.
    #[must_use]
    pub const fn storage_type_name(&self) -> &'static str {
        STORAGE_TYPE_NAME
    }

    /// Version of the LVM tools found at init.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// The volume group the driver is bound to.
    #[must_use]
    pub fn volume_group(&self) -> &str {
        self.volumes.volume_group()
    }

    /// Pool configuration guard, for changing the group or pool name.
    #[must_use]
    pub const fn pool(&self) -> &PoolGuard {
        &self.pool
    }

    /// Static options the driver was built with.
    #[must_use]
    pub const fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Whether `entity` is backed by a volume of this driver.
    #[must_use]
    pub fn is_mine(&self, entity: &dyn Entity) -> bool {
        self.host.links.exists(namespace_of(entity), entity.name())
    }

    /// Allocate and format a thin volume, creating the default pool the
    /// first time no pool is configured.
    fn allocate_thin_volume(&self, volume: &str) -> ThinResult<PathBuf> {
        let mut pool = self.pool.thin_pool_name()?;
        if pool.is_empty() {
            pool = self
                .volumes
                .create_thin_pool(&self.config.default_pool_name)?;
            self.pool.set_thin_pool_name(&pool).inspect_err(|err| {
                tracing::error!(%pool, %err, "Setting thin pool name");
            })?;
        }

        self.volumes
            .create_thin_volume(&pool, volume, self.config.thin_volume_size)
    }
}

fn namespace_of(entity: &dyn Entity) -> Namespace {
    Namespace::for_container(entity.is_snapshot())
}

fn create_dir(path: &Path) -> ThinResult<()> {
    std::fs::create_dir_all(path)
        .map_err(|e| ThinError::filesystem("Error creating container directory", path, e))
}
