//! What the driver needs to know about containers, snapshots and images.

use std::fmt;
use std::path::PathBuf;

use lvthin_common::ThinResult;

use crate::idmap::IdMapSet;
use crate::names;

/// Template triggers fired by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateTrigger {
    /// A container was created from an image.
    Create,
    /// A container was copied from another one.
    Copy,
}

impl TemplateTrigger {
    /// Trigger name as templates spell it.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Copy => "copy",
        }
    }
}

impl fmt::Display for TemplateTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A container or snapshot as seen by the storage driver.
pub trait Entity: Send + Sync {
    /// Logical name; snapshots are `<container>/<snapshot>`.
    fn name(&self) -> &str;

    /// Directory the entity's volume is mounted on.
    fn path(&self) -> PathBuf;

    /// Whether the entity runs without id remapping.
    fn is_privileged(&self) -> bool;

    /// Whether the entity is a snapshot.
    fn is_snapshot(&self) -> bool {
        names::is_snapshot_name(self.name())
    }

    /// Snapshots belonging to this entity.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot list cannot be loaded.
    fn snapshots(&self) -> ThinResult<Vec<Box<dyn Entity>>>;

    /// Apply the entity's templates for `trigger`.
    ///
    /// # Errors
    ///
    /// Returns an error if a template fails to render.
    fn template_apply(&self, trigger: TemplateTrigger) -> ThinResult<()>;

    /// Id mapping used when the entity is unprivileged.
    fn id_map(&self) -> Option<IdMapSet>;
}

impl fmt::Debug for dyn Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("name", &self.name())
            .field("path", &self.path())
            .finish_non_exhaustive()
    }
}

/// Daemon-side listings of known containers and images.
pub trait Inventory: Send + Sync {
    /// Names of every container and snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the daemon database cannot be read.
    fn container_names(&self) -> ThinResult<Vec<String>>;

    /// Fingerprints of every known image.
    ///
    /// # Errors
    ///
    /// Returns an error if the daemon database cannot be read.
    fn image_fingerprints(&self) -> ThinResult<Vec<String>>;
}
