//! Object kinds and the header every registry object starts with

use crate::arena::ArenaSafe;
use crate::error::{RegistryError, RegistryResult};
use crate::offset::{AtomicOffset, Offset};
use evo::shm::consts::{KIND_COUNT, OBJECT_NAME_CAPACITY, OBJECT_NAME_MAX};
use static_assertions::const_assert_eq;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

/// Object categories held by the registry, one list each
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Kind {
    /// Loaded component (realtime module or user process)
    Component = 0,
    /// Net connecting pins
    Signal = 1,
    /// Component input/output
    Pin = 2,
    /// Tunable component value
    Parameter = 3,
    /// Realtime function exported by a component
    Function = 4,
    /// Periodic realtime thread
    Thread = 5,
    /// Shared ring buffer
    Ring = 6,
    /// Exported table of function pointers
    VTable = 7,
    /// Instance of an instantiable component
    Instance = 8,
}

const_assert_eq!(Kind::ALL.len(), KIND_COUNT);

/// Tag of a header that was destroyed and sits on a free list
const FREE_TAG: u32 = 0x4F42_4AFF;
/// Tag base of live headers; the low byte is the kind index
const LIVE_TAG_BASE: u32 = 0x4F42_4A00;

impl Kind {
    /// Every kind, in root slot order
    pub const ALL: [Kind; 9] = [
        Kind::Component,
        Kind::Signal,
        Kind::Pin,
        Kind::Parameter,
        Kind::Function,
        Kind::Thread,
        Kind::Ring,
        Kind::VTable,
        Kind::Instance,
    ];

    /// Root slot index
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Convert from raw `u8` value. Returns `None` for invalid values.
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Component),
            1 => Some(Self::Signal),
            2 => Some(Self::Pin),
            3 => Some(Self::Parameter),
            4 => Some(Self::Function),
            5 => Some(Self::Thread),
            6 => Some(Self::Ring),
            7 => Some(Self::VTable),
            8 => Some(Self::Instance),
            _ => None,
        }
    }

    /// Lowercase name
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Component => "component",
            Self::Signal => "signal",
            Self::Pin => "pin",
            Self::Parameter => "parameter",
            Self::Function => "function",
            Self::Thread => "thread",
            Self::Ring => "ring",
            Self::VTable => "vtable",
            Self::Instance => "instance",
        }
    }

    #[inline]
    const fn live_tag(self) -> u32 {
        LIVE_TAG_BASE | self as u32
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed-capacity copy of an object name, usable without heap allocation
pub type ObjectName = heapless::String<OBJECT_NAME_CAPACITY>;

/// Words holding a NUL-padded name
const NAME_WORDS: usize = OBJECT_NAME_CAPACITY / 4;

/// Header shared by all objects: link, kind tag, serial, owner and name
#[repr(C)]
pub struct ObjectHeader {
    /// Next object of the same kind
    next: AtomicOffset,
    /// Live/free tag, see [`Kind::live_tag`]
    tag: AtomicU32,
    /// Registry-unique serial
    id: AtomicU32,
    /// Owning component, or null
    owner: AtomicOffset,
    /// NUL-padded name bytes, native byte order within each word
    name: [AtomicU32; NAME_WORDS],
}

const_assert_eq!(core::mem::size_of::<ObjectHeader>(), 64);
const_assert_eq!(core::mem::align_of::<ObjectHeader>(), 4);

unsafe impl ArenaSafe for ObjectHeader {}

impl ObjectHeader {
    /// Copy of the object name
    ///
    /// The slot may be reused once the object is destroyed, so the name is
    /// never borrowed from the arena.
    pub fn name(&self) -> ObjectName {
        let raw = self.name_raw();
        let mut owned = ObjectName::new();
        // Cannot overflow: stored names are shorter than the capacity
        let _ = owned.push_str(std::str::from_utf8(name_bytes(&raw)).unwrap_or(""));
        owned
    }

    /// Exact name comparison
    #[inline]
    pub fn name_matches(&self, name: &str) -> bool {
        let raw = self.name_raw();
        name_bytes(&raw) == name.as_bytes()
    }

    /// Next object of the same kind
    #[inline]
    pub fn next_ref(&self) -> Offset {
        self.next.load()
    }

    /// Registry-unique serial
    pub fn id(&self) -> u32 {
        self.id.load(Ordering::Acquire)
    }

    /// Owning component, or null
    pub fn owner(&self) -> Offset {
        self.owner.load()
    }

    /// Kind of a live object, `None` for free or never-used memory
    pub fn kind(&self) -> Option<Kind> {
        let tag = self.tag.load(Ordering::Acquire);
        if tag & !0xFF != LIVE_TAG_BASE {
            return None;
        }
        Kind::from_u8((tag & 0xFF) as u8)
    }

    /// True if this is a live object of `kind`
    #[inline]
    pub fn is_live(&self, kind: Kind) -> bool {
        self.tag.load(Ordering::Acquire) == kind.live_tag()
    }

    /// True if this header sits on a free list
    #[inline]
    pub fn is_free(&self) -> bool {
        self.tag.load(Ordering::Acquire) == FREE_TAG
    }

    #[inline]
    fn name_raw(&self) -> [u8; OBJECT_NAME_CAPACITY] {
        let mut raw = [0u8; OBJECT_NAME_CAPACITY];
        for (chunk, word) in raw.chunks_exact_mut(4).zip(&self.name) {
            chunk.copy_from_slice(&word.load(Ordering::Relaxed).to_ne_bytes());
        }
        raw
    }

    /// Fill in a zeroed, unlinked header
    pub(crate) fn init(&self, kind: Kind, id: u32, owner: Offset, name: &str) {
        let len = name.len().min(OBJECT_NAME_MAX);
        let mut raw = [0u8; OBJECT_NAME_CAPACITY];
        raw[..len].copy_from_slice(&name.as_bytes()[..len]);
        for (word, chunk) in self.name.iter().zip(raw.chunks_exact(4)) {
            let mut bytes = [0u8; 4];
            bytes.copy_from_slice(chunk);
            word.store(u32::from_ne_bytes(bytes), Ordering::Relaxed);
        }
        self.next.store(Offset::NULL);
        self.id.store(id, Ordering::Relaxed);
        self.owner.store(owner);
        self.tag.store(kind.live_tag(), Ordering::Release);
    }

    pub(crate) fn link_slot(&self) -> &AtomicOffset {
        &self.next
    }

    pub(crate) fn set_next(&self, next: Offset) {
        self.next.store(next);
    }

    /// Retag as free; cached offsets stop resolving
    pub(crate) fn retire(&self) {
        self.tag.store(FREE_TAG, Ordering::Release);
    }
}

/// Name bytes up to the first NUL
#[inline]
fn name_bytes(raw: &[u8; OBJECT_NAME_CAPACITY]) -> &[u8] {
    let len = raw.iter().position(|&b| b == 0).unwrap_or(OBJECT_NAME_MAX);
    &raw[..len]
}

/// Validate an object name before it is written into the arena
pub fn validate_name(name: &str) -> RegistryResult<()> {
    if name.is_empty() || name.len() > OBJECT_NAME_MAX || name.contains('\0') {
        return Err(RegistryError::InvalidName {
            name: name.to_string(),
        });
    }
    Ok(())
}

/// Anything that starts with an [`ObjectHeader`] and can sit in a kind list
pub trait ListNode: ArenaSafe {
    /// The embedded header
    fn header(&self) -> &ObjectHeader;
}

impl ListNode for ObjectHeader {
    #[inline]
    fn header(&self) -> &ObjectHeader {
        self
    }
}

/// Typed registry object of one [`Kind`]
pub trait RegistryObject: ListNode {
    /// Kind list this type lives in
    const KIND: Kind;

    /// Copy of the object name
    #[inline]
    fn name(&self) -> ObjectName {
        self.header().name()
    }

    /// Next object of the same kind
    #[inline]
    fn next_ref(&self) -> Offset {
        self.header().next_ref()
    }

    /// Owning component, or null
    fn owner(&self) -> Offset {
        self.header().owner()
    }

    /// Registry-unique serial
    fn id(&self) -> u32 {
        self.header().id()
    }
}
