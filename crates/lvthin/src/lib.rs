//! # lvthin
//!
//! Storage driver that keeps containers, snapshots and images on thin
//! volumes carved from an LVM thin pool.
//!
//! ## Features
//!
//! - **Copy-on-write**: containers are cloned from image volumes, snapshots
//!   from their container, without copying data
//! - **Lazy pool bootstrap**: the thin pool is created on first use
//! - **Guarded configuration**: the volume group and pool cannot change
//!   while volumes are in use
//! - **Rollback**: multi-step operations undo their partial work on failure
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use lvthin::config::{DriverConfig, JsonConfigStore};
//! use lvthin::driver::{DaemonState, Host, LvmDriver};
//! use lvthin::entity::Inventory;
//!
//! # fn example(inventory: Arc<dyn Inventory>) -> lvthin_common::ThinResult<()> {
//! let config = DriverConfig::default();
//! let host = Host::system(&config.paths);
//! let daemon = DaemonState {
//!     config: Arc::new(JsonConfigStore::open("/var/lib/lvthin/settings.json")?),
//!     inventory,
//! };
//!
//! let driver = LvmDriver::init(config, host, daemon, None)?;
//! driver.image_create("abc123")?;
//! # Ok(())
//! # }
//! ```
//!
//! Entity names map to volume names with [`names::to_volume_name`]. Every
//! volume backing a name is recorded by a link in a [`links::LinkStore`];
//! the link, not LVM, decides whether a name belongs to this driver.

#![warn(missing_docs)]

pub mod command;
pub mod config;
pub mod driver;
pub mod entity;
pub mod idmap;
pub mod links;
pub mod lvm;
pub mod mount;
pub mod names;
pub mod rollback;
pub mod sync;

pub use driver::LvmDriver;
pub use lvthin_common::{ThinError, ThinResult};
