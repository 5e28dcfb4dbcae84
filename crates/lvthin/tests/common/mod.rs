//! Fake host shared by the driver integration tests.
//!
//! `FakeLvm` keeps just enough LVM state (volume groups and volumes) to
//! answer the commands the driver issues, so tests can check the state
//! left behind rather than only the command log.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lvthin::command::{CommandRunner, Outcome};
use lvthin::config::{ConfigStore, DriverConfig, MemoryConfigStore, THINPOOL_NAME_KEY, VG_NAME_KEY};
use lvthin::driver::{DaemonState, Host, ImageUnpacker, LvmDriver, TarStreamTransport};
use lvthin::entity::{Entity, Inventory, TemplateTrigger};
use lvthin::idmap::{IdMapSet, IdShifter};
use lvthin::links::{LinkStore, SymlinkStore};
use lvthin::mount::Mounter;
use lvthin::names;
use lvthin::sync::TreeSync;
use lvthin_common::{Namespace, ThinError, ThinPaths, ThinResult};
use parking_lot::Mutex;
use tempfile::TempDir;

pub const VG: &str = "vg0";

#[derive(Debug, Clone)]
pub struct Volume {
    pub attr: &'static str,
    pub origin: Option<String>,
    pub formatted: bool,
    pub active: bool,
    pub readonly: bool,
}

impl Volume {
    fn new(attr: &'static str, origin: Option<String>) -> Self {
        Self {
            attr,
            origin,
            formatted: false,
            active: true,
            readonly: false,
        }
    }
}

#[derive(Default)]
struct LvmState {
    groups: BTreeSet<String>,
    volumes: BTreeMap<String, Volume>,
    calls: Vec<String>,
    failures: Vec<(String, String)>,
}

/// Stateful stand-in for the LVM command line tools.
#[derive(Default)]
pub struct FakeLvm {
    state: Mutex<LvmState>,
}

fn ok(stdout: &str) -> Outcome {
    Outcome::Success {
        stdout: stdout.to_string(),
    }
}

fn not_found(what: &str) -> Outcome {
    Outcome::from_parts(Some(5), "", &format!("Failed to find logical volume \"{what}\"\n"))
}

fn failed(output: &str) -> Outcome {
    Outcome::from_parts(Some(1), "", output)
}

impl FakeLvm {
    pub fn with_group(vg: &str) -> Self {
        let lvm = Self::default();
        lvm.state.lock().groups.insert(vg.to_string());
        lvm
    }

    /// Add a volume that is not a thin pool.
    pub fn add_plain_volume(&self, name: &str) {
        self.state
            .lock()
            .volumes
            .insert(name.to_string(), Volume::new("-wi-a-----", None));
    }

    /// Add an existing thin pool.
    pub fn add_pool(&self, name: &str) {
        self.state
            .lock()
            .volumes
            .insert(name.to_string(), Volume::new("twi-a-tz--", None));
    }

    /// Fail the next command line starting with `prefix`.
    pub fn fail_next(&self, prefix: &str, output: &str) {
        self.state
            .lock()
            .failures
            .push((prefix.to_string(), output.to_string()));
    }

    pub fn volume(&self, name: &str) -> Option<Volume> {
        self.state.lock().volumes.get(name).cloned()
    }

    pub fn has_volume(&self, name: &str) -> bool {
        self.state.lock().volumes.contains_key(name)
    }

    /// Names of thin volumes, pools excluded.
    pub fn thin_volumes(&self) -> Vec<String> {
        self.state
            .lock()
            .volumes
            .iter()
            .filter(|(_, v)| !v.attr.starts_with('t'))
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Volume name of a `/dev/<vg>/<name>` device path.
    fn device_name(device: &str) -> Option<&str> {
        device
            .strip_prefix("/dev/")?
            .split_once('/')
            .map(|(_, name)| name)
    }

    fn dispatch(state: &mut LvmState, program: &str, args: &[&str]) -> Outcome {
        match (program, args) {
            ("lvm", ["version"]) => ok("  LVM version:     2.03.16(2) (2022-05-18)\n  Library version: 1.02.185 (2022-05-18)\n  Driver version:  4.47.0\n"),
            ("vgdisplay", ["-s", vg]) => {
                if state.groups.contains(*vg) {
                    ok(&format!("  \"{vg}\" 100.00 GiB [0 used / 100.00 GiB free]\n"))
                } else {
                    not_found(vg)
                }
            }
            ("vgs", ["--noheadings", "-o", "lv_attr", target]) => {
                let Some((vg, name)) = target.split_once('/') else {
                    return failed("invalid target");
                };
                if !state.groups.contains(vg) {
                    return not_found(target);
                }
                match state.volumes.get(name) {
                    Some(volume) => ok(&format!("  {}\n", volume.attr)),
                    None => not_found(target),
                }
            }
            ("lvcreate", ["--poolmetadatasize", _, "-l", "100%FREE", "--thinpool", target]) => {
                let Some((_, pool)) = target.split_once('/') else {
                    return failed("invalid target");
                };
                if state.volumes.contains_key(pool) {
                    return failed(&format!("Logical Volume \"{pool}\" already exists"));
                }
                state
                    .volumes
                    .insert(pool.to_string(), Volume::new("twi-a-tz--", None));
                ok("")
            }
            ("lvcreate", ["--thin", "-n", name, "--virtualsize", _, target]) => {
                let Some((_, pool)) = target.split_once('/') else {
                    return failed("invalid target");
                };
                if !state.volumes.get(pool).is_some_and(|v| v.attr.starts_with('t')) {
                    return not_found(target);
                }
                if state.volumes.contains_key(*name) {
                    return failed(&format!("Logical Volume \"{name}\" already exists"));
                }
                state
                    .volumes
                    .insert((*name).to_string(), Volume::new("Vwi-a-tz--", Some(pool.to_string())));
                ok("")
            }
            (mkfs, ["-E", _, device]) if mkfs.starts_with("mkfs.") => {
                match Self::device_name(device).and_then(|name| state.volumes.get_mut(name)) {
                    Some(volume) => {
                        volume.formatted = true;
                        ok("")
                    }
                    None => failed(&format!("The file {device} does not exist")),
                }
            }
            ("lvremove", ["-f", target]) => {
                let name = target.split_once('/').map_or(*target, |(_, name)| name);
                if state.volumes.remove(name).is_some() {
                    ok(&format!("  Logical volume \"{name}\" successfully removed\n"))
                } else {
                    not_found(target)
                }
            }
            ("lvrename", [_, old, new]) => {
                if state.volumes.contains_key(*new) {
                    return failed(&format!("Logical Volume \"{new}\" already exists"));
                }
                match state.volumes.remove(*old) {
                    Some(volume) => {
                        state.volumes.insert((*new).to_string(), volume);
                        ok(&format!("  Renamed \"{old}\" to \"{new}\"\n"))
                    }
                    None => not_found(old),
                }
            }
            ("lvcreate", ["-kn", "-n", name, "-s", source]) => {
                let Some(origin) = Self::device_name(source).map(str::to_string) else {
                    return failed("invalid origin");
                };
                let Some(base) = state.volumes.get(&origin).cloned() else {
                    return not_found(source);
                };
                if state.volumes.contains_key(*name) {
                    return failed(&format!("Logical Volume \"{name}\" already exists"));
                }
                let mut volume = Volume::new("Vri---tz-k", Some(origin));
                volume.formatted = base.formatted;
                volume.active = false;
                state.volumes.insert((*name).to_string(), volume);
                ok("")
            }
            ("lvchange", ["-ay", rest @ ..]) => {
                let (readonly, device) = match rest {
                    ["-pr", device] => (true, *device),
                    [device] => (false, *device),
                    _ => return failed("invalid arguments"),
                };
                match Self::device_name(device).and_then(|name| state.volumes.get_mut(name)) {
                    Some(volume) => {
                        volume.active = true;
                        volume.readonly = readonly;
                        ok("")
                    }
                    None => not_found(device),
                }
            }
            _ => Outcome::from_parts(Some(127), "", &format!("{program}: command not found\n")),
        }
    }
}

impl CommandRunner for FakeLvm {
    fn run(&self, program: &str, args: &[&str]) -> ThinResult<Outcome> {
        let line = format!("{program} {}", args.join(" "));
        let mut state = self.state.lock();
        state.calls.push(line.clone());

        if let Some(index) = state
            .failures
            .iter()
            .position(|(prefix, _)| line.starts_with(prefix.as_str()))
        {
            let (_, output) = state.failures.remove(index);
            return Ok(failed(&output));
        }

        Ok(Self::dispatch(&mut state, program, args))
    }
}

/// Records mounts. Unmounting something that is not mounted succeeds.
///
/// Files written under a mount point belong to the mounted device: an
/// unmount moves them into a per-device store and the next mount of that
/// device brings them back.
pub struct FakeMounter {
    store: PathBuf,
    mounted: Mutex<BTreeMap<PathBuf, PathBuf>>,
    log: Mutex<Vec<String>>,
    fail_mount: Mutex<Option<String>>,
    fail_unmount: Mutex<Option<String>>,
}

impl FakeMounter {
    pub fn new(store: PathBuf) -> Self {
        Self {
            store,
            mounted: Mutex::default(),
            log: Mutex::default(),
            fail_mount: Mutex::default(),
            fail_unmount: Mutex::default(),
        }
    }

    pub fn fail_next_mount(&self, output: &str) {
        *self.fail_mount.lock() = Some(output.to_string());
    }

    pub fn fail_next_unmount(&self, output: &str) {
        *self.fail_unmount.lock() = Some(output.to_string());
    }

    pub fn is_mounted(&self, target: &Path) -> bool {
        self.mounted.lock().contains_key(target)
    }

    pub fn device_at(&self, target: &Path) -> Option<PathBuf> {
        self.mounted.lock().get(target).cloned()
    }

    pub fn mounted_count(&self) -> usize {
        self.mounted.lock().len()
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    /// Names of the files stored on volume `name` while it is unmounted.
    pub fn volume_files(&self, name: &str) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(self.store.join(name)) else {
            return Vec::new();
        };
        let mut files: Vec<_> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect();
        files.sort();
        files
    }

    fn device_store(&self, device: &Path) -> PathBuf {
        self.store
            .join(device.file_name().unwrap_or(device.as_os_str()))
    }
}

fn move_entries(from: &Path, to: &Path) -> std::io::Result<()> {
    let Ok(entries) = std::fs::read_dir(from) else {
        return Ok(());
    };
    std::fs::create_dir_all(to)?;
    for entry in entries {
        let entry = entry?;
        std::fs::rename(entry.path(), to.join(entry.file_name()))?;
    }
    Ok(())
}

impl Mounter for FakeMounter {
    fn mount(&self, device: &Path, target: &Path, options: &str) -> ThinResult<()> {
        self.log.lock().push(format!(
            "mount -o {options} {} {}",
            device.display(),
            target.display()
        ));
        if let Some(output) = self.fail_mount.lock().take() {
            return Err(ThinError::backend("Mounting", output));
        }
        move_entries(&self.device_store(device), target)?;
        self.mounted
            .lock()
            .insert(target.to_path_buf(), device.to_path_buf());
        Ok(())
    }

    fn unmount(&self, target: &Path) -> ThinResult<()> {
        self.log.lock().push(format!("umount {}", target.display()));
        if let Some(output) = self.fail_unmount.lock().take() {
            return Err(ThinError::filesystem(
                "Failed to unmount",
                target,
                std::io::Error::other(output),
            ));
        }
        if let Some(device) = self.mounted.lock().remove(target) {
            move_entries(target, &self.device_store(&device))?;
        }
        Ok(())
    }
}

/// Records copies instead of running rsync.
#[derive(Default)]
pub struct RecordingSync {
    copies: Mutex<Vec<(PathBuf, PathBuf)>>,
    fail: Mutex<Option<String>>,
}

impl RecordingSync {
    pub fn fail_next(&self, output: &str) {
        *self.fail.lock() = Some(output.to_string());
    }

    pub fn copies(&self) -> Vec<(PathBuf, PathBuf)> {
        self.copies.lock().clone()
    }
}

impl TreeSync for RecordingSync {
    fn copy(&self, source: &Path, dest: &Path) -> ThinResult<()> {
        self.copies
            .lock()
            .push((source.to_path_buf(), dest.to_path_buf()));
        match self.fail.lock().take() {
            Some(output) => Err(ThinError::backend("rsync", output)),
            None => Ok(()),
        }
    }
}

/// Writes a marker file instead of unpacking a real package.
#[derive(Default)]
pub struct FakeUnpacker {
    unpacked: Mutex<Vec<(String, PathBuf)>>,
    fail: Mutex<Option<String>>,
}

impl FakeUnpacker {
    pub fn fail_next(&self, message: &str) {
        *self.fail.lock() = Some(message.to_string());
    }

    pub fn unpacked(&self) -> Vec<(String, PathBuf)> {
        self.unpacked.lock().clone()
    }
}

impl ImageUnpacker for FakeUnpacker {
    fn unpack(&self, fingerprint: &str, dest: &Path) -> ThinResult<()> {
        self.unpacked
            .lock()
            .push((fingerprint.to_string(), dest.to_path_buf()));
        if let Some(message) = self.fail.lock().take() {
            return Err(ThinError::Internal { message });
        }
        std::fs::write(dest.join("metadata.yaml"), fingerprint)?;
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeShifter {
    shifted: Mutex<Vec<PathBuf>>,
    fail: Mutex<Option<String>>,
}

impl FakeShifter {
    pub fn fail_next(&self, message: &str) {
        *self.fail.lock() = Some(message.to_string());
    }

    pub fn shifted(&self) -> Vec<PathBuf> {
        self.shifted.lock().clone()
    }
}

impl IdShifter for FakeShifter {
    fn shift(&self, root: &Path, _map: &IdMapSet) -> ThinResult<()> {
        self.shifted.lock().push(root.to_path_buf());
        match self.fail.lock().take() {
            Some(message) => Err(ThinError::Internal { message }),
            None => Ok(()),
        }
    }
}

/// Container or snapshot with a recorded template log.
#[derive(Clone)]
pub struct FakeEntity {
    name: String,
    paths: ThinPaths,
    privileged: bool,
    id_map: Option<IdMapSet>,
    snapshots: Vec<String>,
    fail_template: bool,
    templates: Arc<Mutex<Vec<TemplateTrigger>>>,
}

impl FakeEntity {
    pub fn new(paths: &ThinPaths, name: &str) -> Self {
        Self {
            name: name.to_string(),
            paths: paths.clone(),
            privileged: true,
            id_map: None,
            snapshots: Vec::new(),
            fail_template: false,
            templates: Arc::default(),
        }
    }

    pub fn unprivileged(mut self, id_map: Option<IdMapSet>) -> Self {
        self.privileged = false;
        self.id_map = id_map;
        self
    }

    pub fn with_snapshots(mut self, snapshots: &[&str]) -> Self {
        self.snapshots = snapshots.iter().map(ToString::to_string).collect();
        self
    }

    pub fn failing_templates(mut self) -> Self {
        self.fail_template = true;
        self
    }

    pub fn templates(&self) -> Vec<TemplateTrigger> {
        self.templates.lock().clone()
    }
}

impl Entity for FakeEntity {
    fn name(&self) -> &str {
        &self.name
    }

    fn path(&self) -> PathBuf {
        self.paths
            .container(&self.name, names::is_snapshot_name(&self.name))
    }

    fn is_privileged(&self) -> bool {
        self.privileged
    }

    fn snapshots(&self) -> ThinResult<Vec<Box<dyn Entity>>> {
        Ok(self
            .snapshots
            .iter()
            .map(|name| Box::new(Self::new(&self.paths, name)) as Box<dyn Entity>)
            .collect())
    }

    fn template_apply(&self, trigger: TemplateTrigger) -> ThinResult<()> {
        self.templates.lock().push(trigger);
        if self.fail_template {
            return Err(ThinError::Internal {
                message: format!("template {trigger} failed"),
            });
        }
        Ok(())
    }

    fn id_map(&self) -> Option<IdMapSet> {
        self.id_map.clone()
    }
}

#[derive(Default)]
pub struct FakeInventory {
    containers: Mutex<Vec<String>>,
    images: Mutex<Vec<String>>,
}

impl FakeInventory {
    pub fn add_container(&self, name: &str) {
        self.containers.lock().push(name.to_string());
    }

    pub fn add_image(&self, fingerprint: &str) {
        self.images.lock().push(fingerprint.to_string());
    }
}

impl Inventory for FakeInventory {
    fn container_names(&self) -> ThinResult<Vec<String>> {
        Ok(self.containers.lock().clone())
    }

    fn image_fingerprints(&self) -> ThinResult<Vec<String>> {
        Ok(self.images.lock().clone())
    }
}

/// A driver bound to `vg0` over fakes, with links as real symlinks in a
/// temporary root.
pub struct Harness {
    pub temp: TempDir,
    pub paths: ThinPaths,
    pub lvm: Arc<FakeLvm>,
    pub mounter: Arc<FakeMounter>,
    pub links: Arc<SymlinkStore>,
    pub sync: Arc<RecordingSync>,
    pub unpacker: Arc<FakeUnpacker>,
    pub shifter: Arc<FakeShifter>,
    pub config: Arc<MemoryConfigStore>,
    pub inventory: Arc<FakeInventory>,
    pub driver: LvmDriver,
}

impl Harness {
    /// Volume group configured, no thin pool yet.
    pub fn new() -> Self {
        Self::with_settings(&[(VG_NAME_KEY, VG)])
    }

    /// Volume group and an existing pool both configured.
    pub fn with_pool(pool: &str) -> Self {
        let harness = Self::with_settings(&[(VG_NAME_KEY, VG), (THINPOOL_NAME_KEY, pool)]);
        harness.lvm.add_pool(pool);
        harness
    }

    pub fn with_settings(settings: &[(&str, &str)]) -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = ThinPaths::with_root(temp.path().join("lvthin"));
        paths.create_dirs().expect("create dirs");

        let lvm = Arc::new(FakeLvm::with_group(VG));
        let mounter = Arc::new(FakeMounter::new(temp.path().join("volumes")));
        let links = Arc::new(SymlinkStore::new(paths.clone()));
        let sync = Arc::new(RecordingSync::default());
        let unpacker = Arc::new(FakeUnpacker::default());
        let shifter = Arc::new(FakeShifter::default());
        let config = Arc::new(MemoryConfigStore::with_values(settings.iter().copied()));
        let inventory = Arc::new(FakeInventory::default());

        let host = Host {
            runner: lvm.clone(),
            mounter: mounter.clone(),
            links: links.clone(),
            sync: sync.clone(),
            unpacker: unpacker.clone(),
            shifter: shifter.clone(),
            migration: Arc::new(TarStreamTransport),
        };
        let daemon = DaemonState {
            config: config.clone(),
            inventory: inventory.clone(),
        };
        let driver = LvmDriver::init(
            DriverConfig::default().with_root(&paths.root),
            host,
            daemon,
            None,
        )
        .expect("driver init");
        lvm.clear_calls();

        Self {
            temp,
            paths,
            lvm,
            mounter,
            links,
            sync,
            unpacker,
            shifter,
            config,
            inventory,
            driver,
        }
    }

    pub fn entity(&self, name: &str) -> FakeEntity {
        FakeEntity::new(&self.paths, name)
    }

    pub fn pool_setting(&self) -> String {
        self.config.get(THINPOOL_NAME_KEY).expect("config")
    }

    pub fn has_link(&self, name: &str) -> bool {
        let namespace = Namespace::for_container(names::is_snapshot_name(name));
        self.links.exists(namespace, name)
    }
}
