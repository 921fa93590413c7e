//! Shared arena: one mapped segment, its root record and allocator
//!
//! The arena hands out [`Offset`]s, never pointers. An offset only becomes a
//! reference through [`Arena::resolve`], which needs a live `&Arena` and so
//! can never outlive the mapping it points into.

use crate::error::{RegistryError, RegistryResult};
use crate::object::{Kind, ListNode};
use crate::offset::{AtomicOffset, Offset};
use crate::root::{ROOT_LAYOUT_HASH, ROOT_SPAN, RegistryRoot, RootState};
use evo::shm::consts::{CACHE_LINE_SIZE, SHM_MAX_SIZE, SHM_MIN_SIZE};
use evo::shm::layout::{align_down, align_up};
use memmap2::MmapMut;
use std::ptr::NonNull;
use std::sync::atomic::{
    AtomicI32, AtomicI64, AtomicU8, AtomicU16, AtomicU32, AtomicU64, Ordering,
};

/// Types that may be viewed in place inside the arena.
///
/// # Safety
///
/// Every bit pattern must be a valid value, since [`Arena::resolve`]
/// reinterprets whatever bytes the arena holds. The type must be
/// `#[repr(C)]` (or a primitive) so every process agrees on its layout, and
/// all mutation of a shared instance must go through atomics.
pub unsafe trait ArenaSafe {}

unsafe impl ArenaSafe for AtomicU8 {}
unsafe impl ArenaSafe for AtomicU16 {}
unsafe impl ArenaSafe for AtomicU32 {}
unsafe impl ArenaSafe for AtomicU64 {}
unsafe impl ArenaSafe for AtomicI32 {}
unsafe impl ArenaSafe for AtomicI64 {}
unsafe impl ArenaSafe for AtomicOffset {}
unsafe impl<T: ArenaSafe, const N: usize> ArenaSafe for [T; N] {}

/// Allocator usage snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaUsage {
    /// Arena size in bytes
    pub size: usize,
    /// Bytes taken by the upward allocator, root record included
    pub used_bottom: usize,
    /// Bytes taken by the downward allocator
    pub used_top: usize,
    /// Bytes still free between the two cursors
    pub available: usize,
}

/// One process's mapping of a registry segment
pub struct Arena {
    /// Segment name, `None` for anonymous arenas
    name: Option<String>,
    /// Base of the local mapping
    base: NonNull<u8>,
    /// Mapped length in bytes
    len: usize,
    /// Owns the mapping; `base` points into it
    _mmap: MmapMut,
}

// The mapping is shared memory by construction and every view into it is
// made of atomics.
unsafe impl Send for Arena {}
unsafe impl Sync for Arena {}

impl Arena {
    /// Wrap a mapping. The root is left as found: zeroed memory stays
    /// uninitialized until [`Arena::initialize`] runs.
    pub(crate) fn from_mmap(name: Option<String>, mut mmap: MmapMut) -> RegistryResult<Self> {
        let len = mmap.len();
        if len < SHM_MIN_SIZE || len > SHM_MAX_SIZE {
            return Err(RegistryError::InvalidSize { size: len });
        }
        let base = NonNull::new(mmap.as_mut_ptr())
            .ok_or(RegistryError::InvalidSize { size: len })?;
        validate_memory_alignment(base.as_ptr() as usize)?;

        Ok(Self {
            name,
            base,
            len,
            _mmap: mmap,
        })
    }

    /// Initialize the root of a freshly created segment
    pub(crate) fn initialize(&self, segment_id: u64) -> bool {
        self.root().initialize(self.len, segment_id)
    }

    /// Segment name (`None` for anonymous arenas)
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Mapped length in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always false; an arena spans at least one page
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Local virtual address of the mapping (differs between processes)
    pub fn base_addr(&self) -> usize {
        self.base.as_ptr() as usize
    }

    /// The root record, whatever its state
    #[inline]
    pub fn root(&self) -> &RegistryRoot {
        // Mapping is page aligned and at least one page long
        unsafe { &*(self.base.as_ptr() as *const RegistryRoot) }
    }

    /// True once the root is initialized by a compatible build
    pub fn is_ready(&self) -> bool {
        self.ensure_ready().is_ok()
    }

    /// Fail with `RegistryNotReady` unless the root is initialized
    #[inline]
    pub fn ensure_ready(&self) -> RegistryResult<()> {
        let root = self.root();
        if root.state() != RootState::Ready {
            return Err(RegistryError::RegistryNotReady);
        }
        let found = root.layout_hash();
        if found != ROOT_LAYOUT_HASH {
            return Err(RegistryError::LayoutMismatch {
                expected: ROOT_LAYOUT_HASH,
                found,
            });
        }
        Ok(())
    }

    /// Resolve an offset to a reference into the local mapping
    pub fn resolve<T: ArenaSafe>(&self, offset: Offset) -> RegistryResult<&T> {
        self.ensure_ready()?;
        self.locate::<T>(offset)
    }

    /// Resolve an offset to a list node of `kind`, rejecting destroyed
    /// objects and objects of other kinds. `T` must be `kind`'s payload type
    /// or the bare header.
    pub(crate) fn resolve_node<T: ListNode>(&self, offset: Offset, kind: Kind) -> RegistryResult<&T> {
        self.ensure_ready()?;
        self.locate_node::<T>(offset, kind)
    }

    /// Raw pointer to `len` bytes at `offset`. Writing through it is only
    /// sound for memory no other reference currently views.
    pub fn resolve_ptr(&self, offset: Offset, len: usize) -> RegistryResult<NonNull<u8>> {
        self.ensure_ready()?;
        self.check_span(offset, len, 1)?;
        Ok(unsafe { NonNull::new_unchecked(self.base.as_ptr().add(offset.as_usize())) })
    }

    /// Offset of a reference previously obtained from this arena
    pub fn offset_of<T>(&self, object: &T) -> RegistryResult<Offset> {
        let addr = object as *const T as usize;
        let base = self.base_addr();
        if addr < base + ROOT_SPAN || addr + core::mem::size_of::<T>() > base + self.len {
            return Err(RegistryError::InvalidOffset {
                offset: addr.wrapping_sub(base) as u32,
            });
        }
        Ok(Offset::new((addr - base) as u32))
    }

    /// Resolve without the readiness check (caller already did it)
    #[inline]
    pub(crate) fn locate<T: ArenaSafe>(&self, offset: Offset) -> RegistryResult<&T> {
        self.check_span(
            offset,
            core::mem::size_of::<T>(),
            core::mem::align_of::<T>(),
        )?;
        Ok(unsafe { &*(self.base.as_ptr().add(offset.as_usize()) as *const T) })
    }

    /// [`Arena::locate`] plus the kind tag check; same contract on `T` as
    /// [`Arena::resolve_node`]
    #[inline]
    pub(crate) fn locate_node<T: ListNode>(&self, offset: Offset, kind: Kind) -> RegistryResult<&T> {
        let node = self.locate::<T>(offset)?;
        if !node.header().is_live(kind) {
            return Err(RegistryError::StaleObject {
                offset: offset.get(),
                expected: kind,
            });
        }
        Ok(node)
    }

    fn check_span(&self, offset: Offset, size: usize, align: usize) -> RegistryResult<()> {
        let start = offset.as_usize();
        let invalid = offset.is_null()
            || start < ROOT_SPAN
            || start % align != 0
            || start.checked_add(size).is_none_or(|end| end > self.len);
        if invalid {
            return Err(RegistryError::InvalidOffset {
                offset: offset.get(),
            });
        }
        Ok(())
    }

    /// Allocate a zeroed block from the bottom of the arena, for data the
    /// realtime process touches. Never freed.
    pub(crate) fn allocate(&self, size: usize) -> RegistryResult<Offset> {
        self.ensure_ready()?;
        if size == 0 {
            return Err(RegistryError::InvalidSize { size });
        }
        let root = self.root();
        let align = natural_alignment(size);
        let start = align_up(root.bottom(), align);
        let top = root.top();
        if start > top || top - start < size {
            return Err(RegistryError::ArenaExhausted {
                requested: size,
                available: top.saturating_sub(root.bottom()),
            });
        }
        root.set_bottom(start + size);
        Ok(Offset::new(start as u32))
    }

    /// Allocate a zeroed block from the top of the arena, for object structs
    /// only touched during configuration
    pub(crate) fn allocate_top(&self, size: usize, align: usize) -> RegistryResult<Offset> {
        self.ensure_ready()?;
        if size == 0 {
            return Err(RegistryError::InvalidSize { size });
        }
        let root = self.root();
        let top = root.top();
        let bottom = root.bottom();
        let start = match top.checked_sub(size) {
            Some(candidate) => align_down(candidate, align),
            None => 0,
        };
        if start < bottom {
            return Err(RegistryError::ArenaExhausted {
                requested: size,
                available: top.saturating_sub(bottom),
            });
        }
        root.set_top(start);
        Ok(Offset::new(start as u32))
    }

    /// Zero `len` bytes at `offset` word by word. Readers still holding a
    /// reference into the span see zeroes, never torn values.
    pub(crate) fn zero(&self, offset: Offset, len: usize) -> RegistryResult<()> {
        if len % size_of::<AtomicU32>() != 0 {
            return Err(RegistryError::InvalidSize { size: len });
        }
        self.check_span(offset, len, align_of::<AtomicU32>())?;
        let words = unsafe {
            std::slice::from_raw_parts(
                self.base.as_ptr().add(offset.as_usize()) as *const AtomicU32,
                len / size_of::<AtomicU32>(),
            )
        };
        for word in words {
            word.store(0, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Upper bound on the number of list nodes the arena can hold
    pub(crate) fn max_nodes(&self) -> usize {
        self.len / core::mem::size_of::<crate::object::ObjectHeader>()
    }

    /// Allocator usage snapshot
    pub fn usage(&self) -> RegistryResult<ArenaUsage> {
        self.ensure_ready()?;
        let root = self.root();
        let bottom = root.bottom();
        let top = root.top();
        Ok(ArenaUsage {
            size: self.len,
            used_bottom: bottom,
            used_top: self.len - top,
            available: top.saturating_sub(bottom),
        })
    }
}

/// Alignment for an upward block of `size` bytes
fn natural_alignment(size: usize) -> usize {
    match size {
        0..=1 => 1,
        2..=3 => 2,
        4..=7 => 4,
        _ => 8,
    }
}

/// Validate segment size constraints
pub fn validate_segment_size(size: usize) -> RegistryResult<()> {
    if !(SHM_MIN_SIZE..=SHM_MAX_SIZE).contains(&size) {
        return Err(RegistryError::InvalidSize { size });
    }

    // Must be page-aligned (4KB on most systems)
    if size % SHM_MIN_SIZE != 0 {
        return Err(RegistryError::InvalidSize { size });
    }

    Ok(())
}

/// Validate memory alignment
pub fn validate_memory_alignment(address: usize) -> RegistryResult<()> {
    if address % CACHE_LINE_SIZE != 0 {
        return Err(RegistryError::InvalidOffset {
            offset: (address % CACHE_LINE_SIZE) as u32,
        });
    }
    Ok(())
}
