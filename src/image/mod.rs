//! Image device module split into submodules:
//! - device.rs: SnapImage / ImageHandle (submit path, data path, teardown).
//! - create.rs: factory with reverse-order rollback on partial failure.
//!
//! External API surface:
//! - SnapImage
//! - ImageHandle

pub(crate) mod device;
mod create;

pub use device::{ImageHandle, SnapImage};
