//! Centralized configuration for image devices.
//!
//! Goals:
//! - Single place for tunables instead of scattering env lookups.
//! - ImageConfig::from_env() reads the SNAPIMG_* variables; fluent with_*
//!   setters override specific fields.
//!
//! Tunables:
//! - worker_wait_ms: bounded worker wait between wake-ups.
//! - queue_limit: soft cap on queued requests (0 = unbounded). When the cap
//!   is hit, nowait submitters get a retry-later completion.
//! - name_prefix: disk name prefix ("snapimage" -> "snapimage0", ...).
//! - disk_registry: optional path for the best-effort published-disk dump;
//!   if set, mirrors into SNAPIMG_DISK_REGISTRY so all code paths agree.

use std::fmt;

use crate::consts::{IMAGE_NAME_PREFIX, WORKER_WAIT_MS};

#[derive(Clone, Debug)]
pub struct ImageConfig {
    /// Env: SNAPIMG_WAIT_MS (default 5000)
    pub worker_wait_ms: u64,

    /// Env: SNAPIMG_QUEUE_LIMIT (default 0 = unbounded)
    pub queue_limit: usize,

    /// Env: SNAPIMG_NAME_PREFIX (default "snapimage")
    pub name_prefix: String,

    /// Env: SNAPIMG_DISK_REGISTRY (default None)
    pub disk_registry: Option<String>,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            worker_wait_ms: WORKER_WAIT_MS,
            queue_limit: 0,
            name_prefix: IMAGE_NAME_PREFIX.to_string(),
            disk_registry: None,
        }
    }
}

impl ImageConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("SNAPIMG_WAIT_MS") {
            if let Ok(n) = v.trim().parse::<u64>() {
                cfg.worker_wait_ms = n;
            }
        }

        if let Ok(v) = std::env::var("SNAPIMG_QUEUE_LIMIT") {
            if let Ok(n) = v.trim().parse::<usize>() {
                cfg.queue_limit = n;
            }
        }

        if let Ok(v) = std::env::var("SNAPIMG_NAME_PREFIX") {
            let s = v.trim();
            if !s.is_empty() {
                cfg.name_prefix = s.to_string();
            }
        }

        if let Ok(v) = std::env::var("SNAPIMG_DISK_REGISTRY") {
            let s = v.trim();
            if !s.is_empty() {
                cfg.disk_registry = Some(s.to_string());
            }
        }

        cfg
    }

    /// Fluent setters (builder-style) to override specific fields.

    pub fn with_worker_wait_ms(mut self, ms: u64) -> Self {
        self.worker_wait_ms = ms;
        self
    }

    pub fn with_queue_limit(mut self, limit: usize) -> Self {
        self.queue_limit = limit;
        self
    }

    pub fn with_name_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.name_prefix = prefix.into();
        self
    }

    /// Override the published-disk registry dump path.
    pub fn with_disk_registry<S: Into<String>>(mut self, path: Option<S>) -> Self {
        self.disk_registry = path.map(Into::into);
        self
    }
}

impl fmt::Display for ImageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ImageConfig {{ worker_wait_ms: {}, queue_limit: {}, name_prefix: {}, disk_registry: {} }}",
            self.worker_wait_ms,
            if self.queue_limit == 0 {
                "unbounded".to_string()
            } else {
                self.queue_limit.to_string()
            },
            self.name_prefix,
            self.disk_registry.as_deref().unwrap_or("none"),
        )
    }
}
