//! Registry root record
//!
//! The root lives at displacement 0 of every registry arena. It holds the
//! allocator cursors, the config lock word and one list head per object
//! kind. A freshly mapped segment is all zeroes, which reads as
//! [`RootState::Uninitialized`].

use crate::object::Kind;
use crate::offset::{AtomicOffset, Offset};
use evo::shm::consts::{CACHE_LINE_SIZE, KIND_COUNT, REGISTRY_MAGIC};
use evo::shm::layout::{align_up, combine_hashes, struct_version_hash};
use static_assertions::const_assert_eq;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Initialization state of the root record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum RootState {
    /// Zeroed memory, nobody has claimed the segment yet
    Uninitialized = 0,
    /// The creator is writing the root
    Initializing = 1,
    /// Root and allocator are usable
    Ready = 2,
}

impl RootState {
    const fn from_raw(raw: u32) -> Self {
        match raw {
            1 => Self::Initializing,
            2 => Self::Ready,
            _ => Self::Uninitialized,
        }
    }
}

/// Root record at the start of the arena (two cache lines)
#[repr(C, align(64))]
pub struct RegistryRoot {
    /// `REGISTRY_MAGIC` once initialized
    magic: AtomicU64,
    /// Layout fingerprint of the build that initialized the segment
    layout_hash: AtomicU32,
    /// [`RootState`] discriminant
    state: AtomicU32,
    /// Identifier of the physical segment, shared by every mapping of it
    segment_id: AtomicU64,
    /// Arena size in bytes
    size: AtomicU32,
    /// Upward allocator cursor (realtime data)
    bottom: AtomicU32,
    /// Downward allocator cursor (object structs)
    top: AtomicU32,
    /// Serial handed to the next created object
    next_id: AtomicU32,
    /// Config lock holder token, 0 when free
    pub(crate) lock_holder: AtomicU64,
    /// Active `LockClass` bits
    pub(crate) lock_level: AtomicU32,
    _reserved: AtomicU32,
    /// One list head per kind
    heads: [AtomicOffset; KIND_COUNT],
    /// One free list per kind, for struct reuse
    free: [AtomicOffset; KIND_COUNT],
}

const_assert_eq!(core::mem::size_of::<RegistryRoot>(), 128);
const_assert_eq!(core::mem::align_of::<RegistryRoot>(), CACHE_LINE_SIZE);

/// First byte available to the upward allocator
pub const ROOT_SPAN: usize = align_up(core::mem::size_of::<RegistryRoot>(), CACHE_LINE_SIZE);

/// Layout fingerprint stored in, and checked against, the root
pub const ROOT_LAYOUT_HASH: u32 = combine_hashes(
    struct_version_hash::<RegistryRoot>(),
    struct_version_hash::<crate::object::ObjectHeader>(),
);

impl RegistryRoot {
    /// Current initialization state
    #[inline]
    pub fn state(&self) -> RootState {
        RootState::from_raw(self.state.load(Ordering::Acquire))
    }

    /// Magic number as stored
    pub fn magic(&self) -> u64 {
        self.magic.load(Ordering::Acquire)
    }

    /// Layout fingerprint as stored
    pub fn layout_hash(&self) -> u32 {
        self.layout_hash.load(Ordering::Acquire)
    }

    /// Identifier of the physical segment
    pub fn segment_id(&self) -> u64 {
        self.segment_id.load(Ordering::Acquire)
    }

    /// Arena size recorded at initialization
    pub fn size(&self) -> usize {
        self.size.load(Ordering::Acquire) as usize
    }

    /// Claim and initialize a zeroed root. Returns false if another process
    /// got there first.
    pub(crate) fn initialize(&self, size: usize, segment_id: u64) -> bool {
        if self
            .state
            .compare_exchange(
                RootState::Uninitialized as u32,
                RootState::Initializing as u32,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return false;
        }

        self.segment_id.store(segment_id, Ordering::Relaxed);
        self.size.store(size as u32, Ordering::Relaxed);
        self.bottom.store(ROOT_SPAN as u32, Ordering::Relaxed);
        self.top.store(size as u32, Ordering::Relaxed);
        self.next_id.store(1, Ordering::Relaxed);
        self.lock_holder.store(0, Ordering::Relaxed);
        self.lock_level.store(0, Ordering::Relaxed);
        for slot in self.heads.iter().chain(self.free.iter()) {
            slot.store(Offset::NULL);
        }
        self.layout_hash.store(ROOT_LAYOUT_HASH, Ordering::Relaxed);
        self.magic.store(REGISTRY_MAGIC, Ordering::Relaxed);

        // Publishes every store above
        self.state
            .store(RootState::Ready as u32, Ordering::Release);
        true
    }

    /// List head slot of `kind`
    #[inline]
    pub(crate) fn head_slot(&self, kind: Kind) -> &AtomicOffset {
        &self.heads[kind.index()]
    }

    /// First object of `kind`, or null
    #[inline]
    pub fn head(&self, kind: Kind) -> Offset {
        self.heads[kind.index()].load()
    }

    /// Free-list head slot of `kind`
    #[inline]
    pub(crate) fn free_slot(&self, kind: Kind) -> &AtomicOffset {
        &self.free[kind.index()]
    }

    /// Upward allocator cursor
    pub(crate) fn bottom(&self) -> usize {
        self.bottom.load(Ordering::Acquire) as usize
    }

    /// Downward allocator cursor
    pub(crate) fn top(&self) -> usize {
        self.top.load(Ordering::Acquire) as usize
    }

    pub(crate) fn set_bottom(&self, value: usize) {
        self.bottom.store(value as u32, Ordering::Release);
    }

    pub(crate) fn set_top(&self, value: usize) {
        self.top.store(value as u32, Ordering::Release);
    }

    /// Next object serial
    pub(crate) fn take_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::AcqRel)
    }
}
