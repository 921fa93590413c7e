//! Shared memory subsystem.
//!
//! This module contains:
//! - `consts`: SHM size limits, registry layout constants and cache line size.
//! - `layout`: Struct layout fingerprints and alignment helpers.

pub mod consts;
pub mod layout;
