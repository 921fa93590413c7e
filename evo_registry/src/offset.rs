//! Address-space independent references into the arena
//!
//! Every process maps the registry segment at its own virtual address, so
//! links stored inside the segment are byte displacements from the arena
//! base rather than pointers. Displacement `0` is the root record itself,
//! which no object can live at, and doubles as the null reference.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

/// Byte displacement from the arena base; `0` is null
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct Offset(u32);

impl Offset {
    /// The null offset
    pub const NULL: Offset = Offset(0);

    /// Wrap a raw displacement
    #[inline]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw displacement
    #[inline]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Displacement as a `usize` for pointer arithmetic
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// True for the null offset
    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// `None` for null, `Some(self)` otherwise
    #[inline]
    pub const fn non_null(self) -> Option<Self> {
        if self.is_null() { None } else { Some(self) }
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            f.write_str("null")
        } else {
            write!(f, "{:#x}", self.0)
        }
    }
}

impl From<Offset> for u32 {
    fn from(offset: Offset) -> u32 {
        offset.0
    }
}

/// Offset slot stored inside the shared segment
///
/// Link fields are read by the realtime process while a configuration
/// process may be rewriting them, so they are atomics with acquire/release
/// ordering: a reader that observes a new link also observes the object
/// initialization that preceded its publication.
#[derive(Debug, Default)]
#[repr(transparent)]
pub struct AtomicOffset(AtomicU32);

impl AtomicOffset {
    /// Create a slot holding `offset`
    pub const fn new(offset: Offset) -> Self {
        Self(AtomicU32::new(offset.0))
    }

    /// Read the slot
    #[inline]
    pub fn load(&self) -> Offset {
        Offset(self.0.load(Ordering::Acquire))
    }

    /// Publish a new value
    #[inline]
    pub fn store(&self, offset: Offset) {
        self.0.store(offset.0, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_offset() {
        assert!(Offset::NULL.is_null());
        assert!(Offset::default().is_null());
        assert_eq!(Offset::NULL.non_null(), None);
        assert_eq!(Offset::new(64).non_null(), Some(Offset::new(64)));
    }

    #[test]
    fn test_offset_equality_is_integer_equality() {
        assert_eq!(Offset::new(0x1000), Offset::new(0x1000));
        assert_ne!(Offset::new(0x1000), Offset::new(0x1004));
        assert_eq!(u32::from(Offset::new(12)), 12);
    }

    #[test]
    fn test_offset_display() {
        assert_eq!(Offset::NULL.to_string(), "null");
        assert_eq!(Offset::new(0x40).to_string(), "0x40");
    }

    #[test]
    fn test_atomic_offset_roundtrip() {
        let slot = AtomicOffset::new(Offset::NULL);
        assert!(slot.load().is_null());
        slot.store(Offset::new(128));
        assert_eq!(slot.load(), Offset::new(128));
    }
}
