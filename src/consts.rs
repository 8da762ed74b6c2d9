//! Shared constants (sector geometry, device naming, worker tuning).

// -------- Sector geometry --------
pub const SECTOR_SHIFT: u32 = 9;
pub const SECTOR_SIZE: usize = 1 << SECTOR_SHIFT; // 512

// -------- Device naming --------
/// Default name prefix for image disks: "snapimage0", "snapimage1", ...
pub const IMAGE_NAME_PREFIX: &str = "snapimage";
/// Maximum length of a disk name accepted by the transport boundary.
pub const DISK_NAME_LEN: usize = 32;

// -------- Minor space --------
/// Size of the minor number space for image devices (1 << MINORBITS).
pub const NR_IMAGE_MINORS: u32 = 1 << 20;
/// First major handed out by the simulated dynamic registration.
/// 240..254 is the local/experimental major range.
pub const IMAGE_MAJOR_BASE: u32 = 240;

// -------- Worker tuning --------
/// Bounded wait of the submit worker between wake-ups (ms). The worker
/// re-checks the stop request at least this often even if never woken.
pub const WORKER_WAIT_MS: u64 = 5_000;
