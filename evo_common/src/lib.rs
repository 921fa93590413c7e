//! EVO Common Library
//!
//! Shared constants and configuration loading utilities for the EVO
//! configuration registry workspace.
//!
//! # Module Structure
//!
//! - [`shm`] - Shared memory constants and layout fingerprints
//! - [`config`] - Configuration loading traits and types
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! Add to your `Cargo.toml` with alias for shorter imports:
//! ```toml
//! [dependencies]
//! evo = { package = "evo_common", path = "../evo_common" }
//! ```
//!
//! Then import:
//! ```rust
//! use evo_common::shm::consts::*;
//! use evo_common::config::{ConfigLoader, SharedConfig};
//! ```

pub mod config;
pub mod prelude;
pub mod shm;
