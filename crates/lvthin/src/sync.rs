//! Copying directory trees between storage backends.

use std::path::Path;
use std::sync::Arc;

use lvthin_common::ThinResult;

use crate::command::{CommandRunner, path_arg};

/// Synchronizes the contents of one directory into another.
pub trait TreeSync: Send + Sync {
    /// Make `dest` an exact copy of `source`.
    ///
    /// # Errors
    ///
    /// Returns an error carrying the tool output if the copy fails.
    fn copy(&self, source: &Path, dest: &Path) -> ThinResult<()>;
}

/// Copies trees with rsync, preserving hard links, ACLs, xattrs and
/// device nodes, and keeping numeric ownership.
pub struct RsyncTreeSync {
    runner: Arc<dyn CommandRunner>,
}

impl RsyncTreeSync {
    /// Create a syncer that runs rsync through `runner`.
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

/// Path argument with a trailing slash so rsync copies contents, not the
/// directory itself.
fn contents_of(path: &Path) -> ThinResult<String> {
    let mut arg = path_arg(path)?.to_string();
    if !arg.ends_with('/') {
        arg.push('/');
    }
    Ok(arg)
}

impl TreeSync for RsyncTreeSync {
    fn copy(&self, source: &Path, dest: &Path) -> ThinResult<()> {
        let source_arg = contents_of(source)?;
        let dest_arg = contents_of(dest)?;

        tracing::debug!(source = %source_arg, dest = %dest_arg, "Syncing directory tree");

        self.runner
            .run(
                "rsync",
                &[
                    "-a",
                    "-HAX",
                    "--devices",
                    "--delete",
                    "--checksum",
                    "--numeric-ids",
                    &source_arg,
                    &dest_arg,
                ],
            )?
            .into_stdout("rsync")?;
        Ok(())
    }
}
