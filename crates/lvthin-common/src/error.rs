//! Common error types for the lvthin driver.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias using [`ThinError`].
pub type ThinResult<T> = Result<T, ThinError>;

/// Errors raised while managing thin volumes.
#[derive(Error, Diagnostic, Debug)]
pub enum ThinError {
    /// The volume group does not exist on this host.
    #[error("LVM volume group '{vg}' not found")]
    #[diagnostic(
        code(lvthin::vg::not_found),
        help("Create the volume group with vgcreate or configure an existing one")
    )]
    VolumeGroupNotFound {
        /// The missing volume group.
        vg: String,
    },

    /// The thin pool does not exist in the volume group.
    #[error("Pool '{pool}' does not exist in Volume Group '{vg}'")]
    #[diagnostic(code(lvthin::pool::not_found))]
    ThinPoolNotFound {
        /// The missing pool.
        pool: String,
        /// The volume group that was searched.
        vg: String,
    },

    /// A logical volume with the pool's name exists but is not a thin pool.
    #[error("Pool named '{pool}' exists but is not a thin pool")]
    #[diagnostic(code(lvthin::pool::wrong_type))]
    NotThinPool {
        /// The offending logical volume name.
        pool: String,
    },

    /// Pool configuration cannot change while volumes are in use.
    #[error("Can not change LVM config. Images or containers are still using LVs: {users:?}")]
    #[diagnostic(
        code(lvthin::config::in_use),
        help("Delete or migrate the listed containers and images first")
    )]
    InUse {
        /// Containers, snapshots and images backed by the current pool.
        users: Vec<String>,
    },

    /// No volume group has been configured.
    #[error("LVM isn't enabled")]
    #[diagnostic(
        code(lvthin::not_enabled),
        help("Set storage.lvm_vg_name to an existing volume group")
    )]
    NotEnabled,

    /// A thin pool name was given before any volume group.
    #[error("Can not set lvm_thinpool_name without lvm_vg_name set")]
    #[diagnostic(code(lvthin::config::missing_vg))]
    ThinPoolRequiresVolumeGroup,

    /// An external tool exited unsuccessfully.
    #[error("{operation} failed\noutput: '{output}'")]
    #[diagnostic(code(lvthin::backend))]
    Backend {
        /// What was being attempted.
        operation: String,
        /// Combined stdout and stderr of the tool.
        output: String,
    },

    /// A host filesystem operation failed.
    #[error("{operation} '{}': {source}", path.display())]
    #[diagnostic(code(lvthin::filesystem))]
    Filesystem {
        /// What was being attempted.
        operation: String,
        /// The path involved.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// An operation failed and cleaning up after it failed as well.
    #[error("{original} (cleanup failed: {cleanup})")]
    #[diagnostic(code(lvthin::partial_failure))]
    PartialFailure {
        /// The error that triggered the cleanup.
        #[source]
        original: Box<ThinError>,
        /// The error raised by the cleanup itself.
        cleanup: Box<ThinError>,
    },

    /// An unprivileged entity has no id mapping to shift its rootfs with.
    #[error("IdmapSet of container '{}' is nil", path.display())]
    #[diagnostic(code(lvthin::idmap::missing))]
    MissingIdMap {
        /// The rootfs that could not be shifted.
        path: PathBuf,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    #[diagnostic(code(lvthin::io))]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    #[diagnostic(code(lvthin::serialization))]
    Serialization(String),

    /// Feature not supported on this platform.
    #[error("Feature not supported: {feature}")]
    #[diagnostic(code(lvthin::unsupported))]
    Unsupported {
        /// The unsupported feature.
        feature: String,
    },

    /// Internal error (should not happen).
    #[error("Internal error: {message}")]
    #[diagnostic(code(lvthin::internal), help("This is a bug, please report it"))]
    Internal {
        /// The error message.
        message: String,
    },
}

impl ThinError {
    /// Build a [`ThinError::Backend`] from an operation and captured output.
    pub fn backend(operation: impl Into<String>, output: impl Into<String>) -> Self {
        Self::Backend {
            operation: operation.into(),
            output: output.into(),
        }
    }

    /// Build a [`ThinError::Filesystem`] for `path`.
    pub fn filesystem(
        operation: impl Into<String>,
        path: impl Into<PathBuf>,
        source: std::io::Error,
    ) -> Self {
        Self::Filesystem {
            operation: operation.into(),
            path: path.into(),
            source,
        }
    }

    /// Pair an original error with the error of its failed cleanup.
    #[must_use]
    pub fn with_cleanup(self, cleanup: Self) -> Self {
        Self::PartialFailure {
            original: Box::new(self),
            cleanup: Box::new(cleanup),
        }
    }

    /// Whether this error is an external tool failure.
    #[must_use]
    pub const fn is_backend(&self) -> bool {
        matches!(self, Self::Backend { .. })
    }
}

impl From<serde_json::Error> for ThinError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
