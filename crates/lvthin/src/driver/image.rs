//! Image volumes.
//!
//! An image is materialized once per fingerprint: a thin volume is
//! allocated, linked, mounted on a scratch directory and filled from the
//! image package. Containers are then cloned from that volume.

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use lvthin_common::{Namespace, ThinError, ThinPaths, ThinResult};

use super::LvmDriver;

/// Prefix of scratch mount points under the images directory.
const MOUNT_POINT_PREFIX: &str = "tmp_lv_mnt";

const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];
const ZSTD_MAGIC: &[u8] = &[0x28, 0xb5, 0x2f, 0xfd];

/// Unpacks an image package into a directory.
pub trait ImageUnpacker: Send + Sync {
    /// Unpack the package for `fingerprint` into `dest`.
    ///
    /// # Errors
    ///
    /// Returns an error if the package is missing or cannot be unpacked.
    fn unpack(&self, fingerprint: &str, dest: &Path) -> ThinResult<()>;
}

/// Unpacks image tarballs from the images directory.
///
/// A unified image is a single tarball holding metadata and `rootfs/`. A
/// split image keeps the root filesystem in a separate `<fingerprint>.rootfs`
/// tarball, which is unpacked under `rootfs/`. Either may be gzip or zstd
/// compressed, or plain tar.
#[derive(Debug, Clone)]
pub struct TarUnpacker {
    paths: ThinPaths,
}

impl TarUnpacker {
    /// Create an unpacker reading packages under `paths`.
    #[must_use]
    pub const fn new(paths: ThinPaths) -> Self {
        Self { paths }
    }
}

impl ImageUnpacker for TarUnpacker {
    fn unpack(&self, fingerprint: &str, dest: &Path) -> ThinResult<()> {
        let package = self.paths.image_package(fingerprint);
        let rootfs = self.paths.image_rootfs_package(fingerprint);

        unpack_archive(&package, dest)?;
        if rootfs.exists() {
            let rootfs_dest = dest.join("rootfs");
            std::fs::create_dir_all(&rootfs_dest)
                .map_err(|e| ThinError::filesystem("Failed to create", &rootfs_dest, e))?;
            unpack_archive(&rootfs, &rootfs_dest)?;
        }

        tracing::debug!(fingerprint, dest = %dest.display(), split = rootfs.exists(), "Unpacked image");
        Ok(())
    }
}

fn unpack_archive(package: &Path, dest: &Path) -> ThinResult<()> {
    let file = File::open(package)
        .map_err(|e| ThinError::filesystem("Failed to open image package", package, e))?;
    let mut buffered = BufReader::new(file);
    let head = buffered
        .fill_buf()
        .map_err(|e| ThinError::filesystem("Failed to read image package", package, e))?;
    let is_gzip = head.starts_with(GZIP_MAGIC);
    let is_zstd = head.starts_with(ZSTD_MAGIC);

    // Detect compression
    let reader: Box<dyn Read> = if is_gzip {
        Box::new(flate2::read::GzDecoder::new(buffered))
    } else if is_zstd {
        Box::new(
            zstd::stream::read::Decoder::new(buffered)
                .map_err(|e| ThinError::filesystem("Failed to read image package", package, e))?,
        )
    } else {
        Box::new(buffered)
    };

    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_permissions(true);
    archive.set_preserve_ownerships(true);
    archive.set_unpack_xattrs(true);

    archive
        .unpack(dest)
        .map_err(|e| ThinError::filesystem("Failed to unpack image package", package, e))
}

impl LvmDriver {
    /// Materialize image `fingerprint` into a new linked volume.
    ///
    /// The volume and its link stay in place if unpacking fails.
    ///
    /// # Errors
    ///
    /// Returns an error if allocation, mounting, unpacking or unmounting
    /// fails. When both unpacking and unmounting fail the unpack error is
    /// returned with the unmount error attached.
    pub fn image_create(&self, fingerprint: &str) -> ThinResult<()> {
        let _span = self.span.enter();

        let device = self
            .allocate_thin_volume(fingerprint)
            .inspect_err(|err| tracing::error!(fingerprint, %err, "Error creating volume for new image"))?;
        self.host.links.create(Namespace::Images, fingerprint, &device)?;

        let images = self.config.paths.images();
        std::fs::create_dir_all(&images)
            .map_err(|e| ThinError::filesystem("Failed to create", &images, e))?;
        let mount_point = tempfile::Builder::new()
            .prefix(MOUNT_POINT_PREFIX)
            .tempdir_in(&images)
            .map_err(|e| ThinError::filesystem("Failed to create mount point in", &images, e))?
            .keep();

        let populated = self.populate_image(fingerprint, &device, &mount_point);

        // Never recursive: after a failed unmount the volume is still mounted here.
        if let Err(err) = std::fs::remove_dir(&mount_point) {
            tracing::error!(path = %mount_point.display(), %err, "Deleting temporary mount point");
        }

        if populated.is_ok() {
            tracing::info!(fingerprint, "Created image volume");
        }
        populated
    }

    fn populate_image(&self, fingerprint: &str, device: &Path, mount_point: &Path) -> ThinResult<()> {
        self.host
            .mounter
            .mount(device, mount_point, &self.config.mount_options)
            .inspect_err(|err| tracing::error!(%err, "Error mounting image volume for unpacking"))?;

        let unpacked = self.host.unpacker.unpack(fingerprint, mount_point);

        if let Err(err) = self.host.mounter.unmount(mount_point) {
            tracing::warn!(
                device = %device.display(),
                mount_point = %mount_point.display(),
                %err,
                "Could not unmount image volume"
            );
            return Err(match unpacked {
                Ok(()) => err,
                Err(unpack_err) => unpack_err.with_cleanup(err),
            });
        }
        unpacked
    }

    /// Remove the volume and link of image `fingerprint`.
    ///
    /// # Errors
    ///
    /// Returns an error if either removal fails.
    pub fn image_delete(&self, fingerprint: &str) -> ThinResult<()> {
        let _span = self.span.enter();

        self.volumes.remove(fingerprint)?;
        self.host.links.remove(Namespace::Images, fingerprint)?;

        tracing::info!(fingerprint, "Deleted image volume");
        Ok(())
    }
}
