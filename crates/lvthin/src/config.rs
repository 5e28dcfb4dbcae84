//! Driver configuration and the daemon's persistent settings.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use lvthin_common::{ThinError, ThinPaths, ThinResult, VolumeSize};
use parking_lot::RwLock;

/// Setting holding the configured volume group.
pub const VG_NAME_KEY: &str = "storage.lvm_vg_name";

/// Setting holding the configured thin pool.
pub const THINPOOL_NAME_KEY: &str = "storage.lvm_thinpool_name";

/// Pool created when a thin volume is needed and none is configured.
pub const DEFAULT_THIN_POOL_NAME: &str = "LVThinPool";

/// Key-value settings store owned by the daemon.
///
/// Unset keys read as the empty string.
pub trait ConfigStore: Send + Sync {
    /// Read a setting.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn get(&self, key: &str) -> ThinResult<String>;

    /// Write a setting. An empty value clears it.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    fn set(&self, key: &str, value: &str) -> ThinResult<()>;
}

/// Settings kept in memory.
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    values: RwLock<BTreeMap<String, String>>,
}

impl MemoryConfigStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with `values`.
    #[must_use]
    pub fn with_values<'a>(values: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let values = values
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self {
            values: RwLock::new(values),
        }
    }
}

impl ConfigStore for MemoryConfigStore {
    fn get(&self, key: &str) -> ThinResult<String> {
        Ok(self.values.read().get(key).cloned().unwrap_or_default())
    }

    fn set(&self, key: &str, value: &str) -> ThinResult<()> {
        let mut values = self.values.write();
        if value.is_empty() {
            values.remove(key);
        } else {
            values.insert(key.to_string(), value.to_string());
        }
        Ok(())
    }
}

/// Settings persisted as a JSON object on disk.
#[derive(Debug)]
pub struct JsonConfigStore {
    path: PathBuf,
    values: RwLock<BTreeMap<String, String>>,
}

impl JsonConfigStore {
    /// Open the store at `path`, starting empty if the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn open(path: impl Into<PathBuf>) -> ThinResult<Self> {
        let path = path.into();
        let values = if path.exists() {
            let content = fs::read_to_string(&path)
                .map_err(|e| ThinError::filesystem("Failed to read settings", &path, e))?;
            serde_json::from_str(&content)?
        } else {
            BTreeMap::new()
        };

        tracing::debug!(path = %path.display(), count = values.len(), "Loaded settings");
        Ok(Self {
            path,
            values: RwLock::new(values),
        })
    }

    /// Location of the settings file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, values: &BTreeMap<String, String>) -> ThinResult<()> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)
            .map_err(|e| ThinError::filesystem("Failed to create settings directory", dir, e))?;

        let json = serde_json::to_string_pretty(values)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(json.as_bytes())?;
        tmp.persist(&self.path)
            .map_err(|e| ThinError::filesystem("Failed to save settings", &self.path, e.error))?;
        Ok(())
    }
}

impl ConfigStore for JsonConfigStore {
    fn get(&self, key: &str) -> ThinResult<String> {
        Ok(self.values.read().get(key).cloned().unwrap_or_default())
    }

    fn set(&self, key: &str, value: &str) -> ThinResult<()> {
        let mut values = self.values.write();
        let previous = if value.is_empty() {
            values.remove(key)
        } else {
            values.insert(key.to_string(), value.to_string())
        };

        if let Err(err) = self.persist(&values) {
            match previous {
                Some(old) => values.insert(key.to_string(), old),
                None => values.remove(key),
            };
            return Err(err);
        }

        tracing::debug!(key, value, "Saved setting");
        Ok(())
    }
}

/// Static driver options.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// On-disk layout for entity directories and links.
    pub paths: ThinPaths,
    /// Virtual size of freshly allocated thin volumes.
    pub thin_volume_size: VolumeSize,
    /// Pool created on first allocation when none is configured.
    pub default_pool_name: String,
    /// Metadata reservation for a created pool.
    pub pool_metadata_size: VolumeSize,
    /// Filesystem put on fresh volumes.
    pub filesystem: String,
    /// Extended options passed to mkfs.
    pub mkfs_options: String,
    /// Options used when mounting volumes.
    pub mount_options: String,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            paths: ThinPaths::new(),
            thin_volume_size: VolumeSize::default(),
            default_pool_name: DEFAULT_THIN_POOL_NAME.to_string(),
            pool_metadata_size: VolumeSize::gibibytes(1),
            filesystem: "ext4".to_string(),
            mkfs_options: "nodiscard,lazy_itable_init=0,lazy_journal_init=0".to_string(),
            mount_options: "discard".to_string(),
        }
    }
}

impl DriverConfig {
    /// Set the root directory.
    #[must_use]
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.paths = ThinPaths::with_root(root);
        self
    }

    /// Set the virtual size of new volumes.
    #[must_use]
    pub const fn with_volume_size(mut self, size: VolumeSize) -> Self {
        self.thin_volume_size = size;
        self
    }

    /// Set the name of the pool created on demand.
    #[must_use]
    pub fn with_default_pool_name(mut self, name: impl Into<String>) -> Self {
        self.default_pool_name = name.into();
        self
    }
}
