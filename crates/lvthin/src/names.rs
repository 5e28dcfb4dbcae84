//! Mapping between logical entity names and LVM volume names.
//!
//! Snapshot names take the form `<container>/<snapshot>`. LVM refuses
//! slashes in volume names and uses hyphens as its own separator in
//! device-mapper names, so every literal hyphen is doubled before the
//! delimiter is turned into a single hyphen.
//!
//! The mapping is not injective when a delimiter sits next to a hyphen
//! (`a-/b` and `a/-b` both become `a---b`). Callers always recompute the
//! volume name from the logical name, so no reverse mapping exists.

/// Separator between a container name and a snapshot name.
pub const SNAPSHOT_DELIMITER: &str = "/";

/// Suffix of the writable overlay volume used to run a snapshot.
pub const OVERLAY_SUFFIX: &str = "rw";

/// Convert a logical container, snapshot or image name to a volume name.
#[must_use]
pub fn to_volume_name(name: &str) -> String {
    name.replace('-', "--").replace(SNAPSHOT_DELIMITER, "-")
}

/// Logical name of the writable overlay for a snapshot.
#[must_use]
pub fn overlay_name(snapshot: &str) -> String {
    format!("{snapshot}{SNAPSHOT_DELIMITER}{OVERLAY_SUFFIX}")
}

/// Whether `name` refers to a snapshot.
#[must_use]
pub fn is_snapshot_name(name: &str) -> bool {
    name.contains(SNAPSHOT_DELIMITER)
}

/// The snapshot part of `<container>/<snapshot>`, or the whole name.
#[must_use]
pub fn snapshot_suffix(name: &str) -> &str {
    name.rsplit_once(SNAPSHOT_DELIMITER)
        .map_or(name, |(_, suffix)| suffix)
}

/// Name of snapshot `snapshot` re-parented under `container`.
#[must_use]
pub fn rebase_snapshot(container: &str, snapshot: &str) -> String {
    format!(
        "{container}{SNAPSHOT_DELIMITER}{}",
        snapshot_suffix(snapshot)
    )
}
