//! Prelude module for common re-exports.
//!
//! ```rust
//! use evo_common::prelude::*;
//! ```

// ─── Logging ────────────────────────────────────────────────────────
pub use crate::config::LogLevel;

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ConfigError, ConfigLoader, SharedConfig, Validate};

// ─── Shared Memory ──────────────────────────────────────────────────
pub use crate::shm::consts::{
    DEFAULT_REGISTRY_SIZE, KIND_COUNT, OBJECT_NAME_CAPACITY, OBJECT_NAME_MAX, SHM_MAX_SIZE,
    SHM_MIN_SIZE,
};
pub use crate::shm::layout::struct_version_hash;
