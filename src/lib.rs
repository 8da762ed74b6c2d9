//! snapimage — snapshot image block device core.
//!
//! The image device presents a frozen point-in-time view of an original
//! volume while that volume keeps receiving writes. Every read/write is
//! redirected by the difference-area collaborator; this crate owns the
//! race-free dispatch around it: per-device submit queue, one completion
//! worker per device, and the process-wide minor registry.

// Base modules
pub mod consts;
pub mod config;
pub mod metrics;

// Core modules
pub mod request; // src/request.rs: status, segments, completion slot
pub mod queue; // src/queue.rs: SubmitQueue
pub mod diff_area; // src/diff_area.rs: DiffArea/CbtMap traits + mem impls
pub mod devt; // src/devt.rs: major registration + minor allocator
pub mod disk; // src/disk.rs: transport boundary (publish/freeze/registry)
pub mod image; // src/image/{mod,device,create}.rs

mod worker; // src/worker.rs: per-device submit worker

// Convenient re-exports
pub use config::ImageConfig;
pub use devt::DevId;
pub use diff_area::{CbtMap, DiffArea, MemCbtMap, MemDiffArea};
pub use image::{ImageHandle, SnapImage};
pub use metrics::{metrics_snapshot, MetricsSnapshot};
pub use request::{BlkStatus, CompletedIo, CompletionHandle, Direction, IoRequest, Segment};
