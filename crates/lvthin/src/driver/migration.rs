//! Moving entities between hosts.
//!
//! Thin volumes have no send/receive wired in, so migration moves plain
//! file content through a transport shared with other backends. Volume
//! sharing between a container and its snapshots is not preserved.

use std::io::{self, Read, Seek, Write};
use std::path::{Path, PathBuf};

use lvthin_common::{ThinError, ThinResult};

use super::LvmDriver;
use crate::entity::Entity;

/// How an entity's storage travels during migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationFsType {
    /// File content over the generic stream transport.
    Generic,
}

/// Bidirectional byte stream to the peer host.
pub trait Connection: Read + Write + Send {}

impl<T: Read + Write + Send> Connection for T {}

/// One tree to send: a snapshot or the entity itself.
pub trait MigrationSource: Send {
    /// Logical name of what is sent.
    fn name(&self) -> &str;

    /// Whether this is a snapshot.
    fn is_snapshot(&self) -> bool;

    /// Write the tree to `conn`.
    ///
    /// # Errors
    ///
    /// Returns an error if the tree cannot be read or the stream fails.
    fn send(&self, conn: &mut dyn Connection) -> ThinResult<()>;
}

/// Backend-independent migration of entity content.
pub trait MigrationTransport: Send + Sync {
    /// Sources to send for `entity`: its snapshots, oldest first, then
    /// the entity itself.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot list cannot be loaded.
    fn source(&self, entity: &dyn Entity) -> ThinResult<Vec<Box<dyn MigrationSource>>>;

    /// Receive `snapshots` and then `entity` from `conn`, in the order
    /// the sending side produced them.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream fails or a tree cannot be written.
    fn sink(
        &self,
        entity: &dyn Entity,
        snapshots: &[Box<dyn Entity>],
        conn: &mut dyn Connection,
    ) -> ThinResult<()>;
}

/// Sends each tree as a length-prefixed tar archive.
#[derive(Debug, Clone, Copy, Default)]
pub struct TarStreamTransport;

struct TreeSource {
    name: String,
    path: PathBuf,
    is_snapshot: bool,
}

impl TreeSource {
    fn of(entity: &dyn Entity) -> Box<dyn MigrationSource> {
        Box::new(Self {
            name: entity.name().to_string(),
            path: entity.path(),
            is_snapshot: entity.is_snapshot(),
        })
    }
}

impl MigrationSource for TreeSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_snapshot(&self) -> bool {
        self.is_snapshot
    }

    fn send(&self, conn: &mut dyn Connection) -> ThinResult<()> {
        let archive_err = |e: io::Error| ThinError::filesystem("Failed to archive", &self.path, e);

        // Spooled to disk: the length prefix must be known before the
        // first byte goes out, and a rootfs does not fit in memory.
        let mut builder = tar::Builder::new(tempfile::tempfile()?);
        builder.follow_symlinks(false);
        builder.append_dir_all(".", &self.path).map_err(archive_err)?;
        let mut spool = builder.into_inner().map_err(archive_err)?;

        let len = spool.stream_position()?;
        spool.rewind()?;
        conn.write_all(&len.to_be_bytes())?;
        io::copy(&mut spool, &mut *conn)?;
        conn.flush()?;

        tracing::debug!(name = %self.name, bytes = len, "Sent tree");
        Ok(())
    }
}

fn receive(conn: &mut dyn Connection, dest: &Path) -> ThinResult<()> {
    let mut len = [0u8; 8];
    conn.read_exact(&mut len)?;
    let len = u64::from_be_bytes(len);

    std::fs::create_dir_all(dest)
        .map_err(|e| ThinError::filesystem("Failed to create", dest, e))?;

    let mut limited = Read::take(&mut *conn, len);
    let mut archive = tar::Archive::new(&mut limited);
    archive.set_preserve_permissions(true);
    archive.set_preserve_ownerships(true);
    archive.set_unpack_xattrs(true);
    archive
        .unpack(dest)
        .map_err(|e| ThinError::filesystem("Failed to receive into", dest, e))?;
    drop(archive);

    // Skip the end-of-archive padding the unpacker leaves unread.
    io::copy(&mut limited, &mut io::sink())?;

    tracing::debug!(dest = %dest.display(), bytes = len, "Received tree");
    Ok(())
}

impl MigrationTransport for TarStreamTransport {
    fn source(&self, entity: &dyn Entity) -> ThinResult<Vec<Box<dyn MigrationSource>>> {
        let mut sources: Vec<Box<dyn MigrationSource>> = entity
            .snapshots()?
            .iter()
            .map(|snapshot| TreeSource::of(snapshot.as_ref()))
            .collect();
        sources.push(TreeSource::of(entity));
        Ok(sources)
    }

    fn sink(
        &self,
        entity: &dyn Entity,
        snapshots: &[Box<dyn Entity>],
        conn: &mut dyn Connection,
    ) -> ThinResult<()> {
        for snapshot in snapshots {
            receive(conn, &snapshot.path())?;
        }
        receive(conn, &entity.path())
    }
}

impl LvmDriver {
    /// Transfer type used when migrating entities of this driver.
    #[must_use]
    pub const fn migration_type(&self) -> MigrationFsType {
        MigrationFsType::Generic
    }

    /// Sources for sending `container` and its snapshots to a peer.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport cannot list the sources.
    pub fn migration_source(&self, container: &dyn Entity) -> ThinResult<Vec<Box<dyn MigrationSource>>> {
        let _span = self.span.enter();
        self.host.migration.source(container)
    }

    /// Receive `container` and `snapshots` from a peer over `conn`.
    ///
    /// # Errors
    ///
    /// Returns an error if the transfer fails.
    pub fn migration_sink(
        &self,
        container: &dyn Entity,
        snapshots: &[Box<dyn Entity>],
        conn: &mut dyn Connection,
    ) -> ThinResult<()> {
        let _span = self.span.enter();
        self.host.migration.sink(container, snapshots, conn)
    }
}
