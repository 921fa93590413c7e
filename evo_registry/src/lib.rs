//! # EVO Configuration Registry
//!
//! The registry is the one shared memory segment through which a hard-realtime
//! control process and any number of configuration/UI processes agree on the
//! wiring of a control application: components, signals, pins, parameters,
//! functions, threads, rings, vtables and instances.
//!
//! ## Features
//!
//! - **Address-space independent lists**: objects link to each other with
//!   [`Offset`]s from the segment base, valid in every process whatever
//!   address it mapped the segment at
//! - **One generic traversal**: [`Registry::for_each`] walks any kind with an
//!   optional name filter and a callback steering the walk through [`Visit`]
//! - **Typed lock discipline**: reads need a [`ConfigHold`], mutation needs
//!   `&mut ConfigGuard`, so lock misuse is a compile error rather than a race
//! - **Realtime-safe reads**: traversal and resolution never block, allocate
//!   or log
//! - **Signal wiring**: [`Registry::link`] connects pins to signals with type
//!   and single-writer checks
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────── registry segment ────────────────────────┐
//! │ RegistryRoot │ realtime data ──►        free        ◄── objects   │
//! │ heads[9]     │ (Arena::allocate)               (Registry::create) │
//! │ lock word    │                                                    │
//! └──────┬───────────────────────────────────────────────────────────┘
//!        │ heads[Pin] ──► Pin "x.in" ──► Pin "y.in" ──► null
//!        │ heads[Signal] ──► Signal "estop" ──► null
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use evo_registry::{Offset, Registry, RegistryObject, Visit};
//! use evo_registry::kinds::{Component, Pin};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = Registry::anonymous(64 * 1024)?;
//! let mut guard = registry.acquire_config()?;
//!
//! let comp = registry.create_object::<Component, _>(&mut guard, "encoder", Offset::NULL, |_| {})?;
//! registry.create_object::<Pin, _>(&mut guard, "encoder.count", comp, |_| {})?;
//! registry.create_object::<Pin, _>(&mut guard, "encoder.reset", comp, |_| {})?;
//!
//! let mut names = Vec::new();
//! let visited = registry.for_each(
//!     &guard,
//!     None,
//!     Some(|pin: &Pin| {
//!         names.push(pin.name().to_string());
//!         Visit::Continue
//!     }),
//! )?;
//! assert_eq!(visited, 2);
//! assert_eq!(names, ["encoder.count", "encoder.reset"]);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod arena;
pub mod config;
pub mod discovery;
pub mod error;
pub mod iter;
pub mod kinds;
mod list;
pub mod lock;
pub mod object;
pub mod offset;
pub mod platform;
pub mod registry;
pub mod root;

pub use arena::{Arena, ArenaSafe, ArenaUsage};
pub use config::{AttachMode, RegistryConfig, RegistrySettings};
pub use discovery::{RegistryInfo, list_registries};
pub use error::{RegistryError, RegistryResult};
pub use iter::Visit;
pub use lock::{ConfigGuard, ConfigHold, ConfigView, LockClass, LockPolicy};
pub use object::{Kind, ListNode, ObjectHeader, ObjectName, RegistryObject};
pub use offset::{AtomicOffset, Offset};
pub use registry::{ArenaStats, Registry};

use evo::config::LogLevel;

/// Initialize tracing; `RUST_LOG` overrides the configured level
pub fn init_tracing(level: LogLevel) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_directive()));

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    // Repeated initialization keeps the first subscriber
    let _ = tracing::subscriber::set_global_default(subscriber);
}
