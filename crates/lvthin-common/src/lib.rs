//! # lvthin-common
//!
//! Shared utilities and types for the lvthin storage driver.
//!
//! This crate provides:
//! - The driver error taxonomy
//! - Standard filesystem paths and link locations
//! - Volume sizes as passed to LVM

#![warn(missing_docs)]

pub mod error;
pub mod paths;
pub mod size;

pub use error::{ThinError, ThinResult};
pub use paths::{Namespace, ThinPaths};
pub use size::VolumeSize;
