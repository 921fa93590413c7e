//! Payload layouts of the nine registry object kinds
//!
//! Every kind is a `#[repr(C)]` struct starting with [`ObjectHeader`].
//! Payload fields are atomics: the realtime process reads them while a
//! configuration process may be updating them, and an all-zero struct is a
//! valid freshly allocated object.

use crate::arena::ArenaSafe;
use crate::object::{Kind, ListNode, ObjectHeader, RegistryObject};
use crate::offset::{AtomicOffset, Offset};
use bitflags::bitflags;
use std::sync::atomic::{AtomicI32, AtomicU32, AtomicU64, Ordering};

/// Value carried by a pin, signal or parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ValueType {
    /// Boolean
    Bit = 1,
    /// 64-bit float
    Float = 2,
    /// Signed 32-bit
    S32 = 3,
    /// Unsigned 32-bit
    U32 = 4,
    /// Signed 64-bit
    S64 = 5,
    /// Unsigned 64-bit
    U64 = 6,
}

impl ValueType {
    /// Convert from the stored discriminant; 0 means unset
    pub const fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(Self::Bit),
            2 => Some(Self::Float),
            3 => Some(Self::S32),
            4 => Some(Self::U32),
            5 => Some(Self::S64),
            6 => Some(Self::U64),
            _ => None,
        }
    }

    /// Bytes of realtime storage a value of this type needs
    pub const fn storage_size(self) -> usize {
        match self {
            Self::Bit => 1,
            Self::S32 | Self::U32 => 4,
            Self::Float | Self::S64 | Self::U64 => 8,
        }
    }
}

/// Data flow direction of a pin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum PinDirection {
    /// Read by the owning component
    In = 16,
    /// Written by the owning component
    Out = 32,
    /// Both
    Io = 48,
}

impl PinDirection {
    /// Convert from the stored discriminant
    pub const fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            16 => Some(Self::In),
            32 => Some(Self::Out),
            48 => Some(Self::Io),
            _ => None,
        }
    }

    /// True if a linked signal counts this pin as a reader
    pub const fn reads(self) -> bool {
        self as u32 & Self::In as u32 != 0
    }

    /// True if a linked signal counts this pin as a writer
    pub const fn writes(self) -> bool {
        self as u32 & Self::Out as u32 != 0
    }
}

/// Access mode of a parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ParamMode {
    /// Read-only from the configuration side
    Ro = 64,
    /// Read-write
    Rw = 192,
}

impl ParamMode {
    /// Convert from the stored discriminant
    pub const fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            64 => Some(Self::Ro),
            192 => Some(Self::Rw),
            _ => None,
        }
    }
}

/// Execution context a component or vtable belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ContextKind {
    /// Non-realtime process
    User = 1,
    /// Hard-realtime process
    Realtime = 2,
}

impl ContextKind {
    /// Convert from the stored discriminant
    pub const fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(Self::User),
            2 => Some(Self::Realtime),
            _ => None,
        }
    }
}

bitflags! {
    /// Ring buffer mode flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct RingFlags: u32 {
        /// Record (message) mode
        const RECORD = 1 << 0;
        /// Byte stream mode
        const STREAM = 1 << 1;
        /// Multiple writers serialize on a ring mutex
        const WRITE_MUTEX = 1 << 2;
        /// Multiple readers serialize on a ring mutex
        const READ_MUTEX = 1 << 3;
    }
}

macro_rules! registry_object {
    ($ty:ident, $kind:expr) => {
        unsafe impl ArenaSafe for $ty {}

        impl ListNode for $ty {
            #[inline]
            fn header(&self) -> &ObjectHeader {
                &self.header
            }
        }

        impl RegistryObject for $ty {
            const KIND: Kind = $kind;
        }
    };
}

/// Loaded component
#[repr(C)]
pub struct Component {
    header: ObjectHeader,
    /// [`ContextKind`] discriminant
    pub context: AtomicU32,
    /// Process that loaded the component
    pub pid: AtomicU32,
    /// Non-zero once the component finished exporting its objects
    pub ready: AtomicU32,
}
registry_object!(Component, Kind::Component);

impl Component {
    /// Execution context
    pub fn context(&self) -> Option<ContextKind> {
        ContextKind::from_raw(self.context.load(Ordering::Acquire))
    }

    /// Set the execution context
    pub fn set_context(&self, context: ContextKind) {
        self.context.store(context as u32, Ordering::Release);
    }

    /// True once the component declared itself ready
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire) != 0
    }

    /// Mark the component ready
    pub fn mark_ready(&self) {
        self.ready.store(1, Ordering::Release);
    }
}

/// Net connecting pins
#[repr(C)]
pub struct Signal {
    header: ObjectHeader,
    /// [`ValueType`] discriminant
    pub value_type: AtomicU32,
    /// Number of linked input pins
    pub readers: AtomicU32,
    /// Number of linked output pins
    pub writers: AtomicU32,
    /// Realtime value storage
    pub data: AtomicOffset,
}
registry_object!(Signal, Kind::Signal);

impl Signal {
    /// Value type
    pub fn value_type(&self) -> Option<ValueType> {
        ValueType::from_raw(self.value_type.load(Ordering::Acquire))
    }
}

/// Component input/output
#[repr(C)]
pub struct Pin {
    header: ObjectHeader,
    /// [`ValueType`] discriminant
    pub value_type: AtomicU32,
    /// [`PinDirection`] discriminant
    pub direction: AtomicU32,
    /// Linked signal, or null
    pub(crate) signal: AtomicOffset,
    /// Realtime value storage
    pub data: AtomicOffset,
}
registry_object!(Pin, Kind::Pin);

impl Pin {
    /// Value type
    pub fn value_type(&self) -> Option<ValueType> {
        ValueType::from_raw(self.value_type.load(Ordering::Acquire))
    }

    /// Direction
    pub fn direction(&self) -> Option<PinDirection> {
        PinDirection::from_raw(self.direction.load(Ordering::Acquire))
    }

    /// Linked signal, if any. Set through [`crate::Registry::link`].
    pub fn signal(&self) -> Option<Offset> {
        self.signal.load().non_null()
    }
}

/// Tunable component value
#[repr(C)]
pub struct Parameter {
    header: ObjectHeader,
    /// [`ValueType`] discriminant
    pub value_type: AtomicU32,
    /// [`ParamMode`] discriminant
    pub direction: AtomicU32,
    /// Realtime value storage
    pub data: AtomicOffset,
}
registry_object!(Parameter, Kind::Parameter);

impl Parameter {
    /// Value type
    pub fn value_type(&self) -> Option<ValueType> {
        ValueType::from_raw(self.value_type.load(Ordering::Acquire))
    }

    /// Access mode
    pub fn direction(&self) -> Option<ParamMode> {
        ParamMode::from_raw(self.direction.load(Ordering::Acquire))
    }
}

/// Realtime function exported by a component
#[repr(C)]
pub struct Function {
    header: ObjectHeader,
    /// Non-zero if the function uses floating point
    pub uses_fp: AtomicU32,
    /// Non-zero if the function may be added to several threads
    pub reentrant: AtomicU32,
    /// Number of threads the function is added to
    pub users: AtomicU32,
    _pad: AtomicU32,
    /// Duration of the last invocation
    pub runtime_ns: AtomicU64,
    /// Longest invocation seen
    pub max_time_ns: AtomicU64,
}
registry_object!(Function, Kind::Function);

impl Function {
    /// Record one invocation's duration
    pub fn record_runtime(&self, nanos: u64) {
        self.runtime_ns.store(nanos, Ordering::Relaxed);
        self.max_time_ns.fetch_max(nanos, Ordering::Relaxed);
    }
}

/// Periodic realtime thread
#[repr(C)]
pub struct Thread {
    header: ObjectHeader,
    /// Period in nanoseconds
    pub period_ns: AtomicU64,
    /// Scheduler priority
    pub priority: AtomicI32,
    /// Non-zero if the thread saves floating point state
    pub uses_fp: AtomicU32,
    /// Pinned CPU, -1 for none
    pub cpu: AtomicI32,
    _pad: AtomicU32,
}
registry_object!(Thread, Kind::Thread);

/// Shared ring buffer
#[repr(C)]
pub struct Ring {
    header: ObjectHeader,
    /// Buffer size in bytes
    pub size: AtomicU32,
    /// [`RingFlags`] bits
    pub flags: AtomicU32,
    /// Buffer storage
    pub buffer: AtomicOffset,
}
registry_object!(Ring, Kind::Ring);

impl Ring {
    /// Mode flags
    pub fn flags(&self) -> RingFlags {
        RingFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    /// Replace the mode flags
    pub fn set_flags(&self, flags: RingFlags) {
        self.flags.store(flags.bits(), Ordering::Release);
    }
}

/// Exported table of function pointers
#[repr(C)]
pub struct VTable {
    header: ObjectHeader,
    /// Interface version
    pub version: AtomicU32,
    /// [`ContextKind`] discriminant; pointers are only valid there
    pub context: AtomicU32,
    /// Number of users referencing the table
    pub refcount: AtomicU32,
}
registry_object!(VTable, Kind::VTable);

impl VTable {
    /// Context the table's pointers are valid in
    pub fn context(&self) -> Option<ContextKind> {
        ContextKind::from_raw(self.context.load(Ordering::Acquire))
    }
}

/// Instance of an instantiable component
#[repr(C)]
pub struct Instance {
    header: ObjectHeader,
    /// Size of the instance data block
    pub size: AtomicU32,
    /// Instance data block
    pub data: AtomicOffset,
}
registry_object!(Instance, Kind::Instance);
