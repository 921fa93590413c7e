//! Error types for registry operations

use crate::lock::LockClass;
use crate::object::Kind;
use evo::config::ConfigError;
use thiserror::Error;

/// Errors that can occur during registry operations
#[derive(Error, Debug)]
pub enum RegistryError {
    /// The arena is not initialized in this mapping (or was never initialized)
    #[error("Registry not ready - arena is not initialized")]
    RegistryNotReady,

    /// The caller does not hold the config lock it claims to hold
    #[error("Config lock not held")]
    LockNotHeld,

    /// Not enough free space between the upward and downward allocators
    #[error("Arena exhausted: requested {requested} bytes, {available} available")]
    ArenaExhausted {
        /// Requested size in bytes
        requested: usize,
        /// Bytes still free in the arena
        available: usize,
    },

    /// A traversal callback aborted with its own (negative) code
    #[error("Callback aborted traversal with code {code}")]
    Callback {
        /// Code returned by the callback, passed through verbatim
        code: i32,
    },

    /// Segment already exists
    #[error("Registry segment already exists: {name}")]
    AlreadyExists {
        /// Segment name
        name: String,
    },

    /// Segment not found
    #[error("Registry segment not found: {name}")]
    NotFound {
        /// Segment name
        name: String,
    },

    /// Invalid segment size
    #[error("Invalid registry size: {size} bytes (must be 4KB-1GB, page-aligned)")]
    InvalidSize {
        /// Attempted size in bytes
        size: usize,
    },

    /// The segment was initialized by a build with a different root layout
    #[error("Registry layout mismatch: expected {expected:#010x}, found {found:#010x}")]
    LayoutMismatch {
        /// Layout hash of this build
        expected: u32,
        /// Layout hash stored in the segment
        found: u32,
    },

    /// Offset is null, out of bounds or misaligned for the requested type
    #[error("Invalid offset {offset:#x}")]
    InvalidOffset {
        /// Offending offset
        offset: u32,
    },

    /// Offset points at an object of another kind, or at a destroyed object
    #[error("Stale object at offset {offset:#x}: expected a live {expected}")]
    StaleObject {
        /// Offending offset
        offset: u32,
        /// Kind the caller expected
        expected: Kind,
    },

    /// An object with this name already exists in the kind's list
    #[error("Duplicate {kind} name: {name}")]
    DuplicateName {
        /// Object kind
        kind: Kind,
        /// Duplicate name
        name: String,
    },

    /// Name is empty, too long or contains NUL
    #[error("Invalid object name: {name:?}")]
    InvalidName {
        /// Rejected name
        name: String,
    },

    /// Segment name would not stay a single file under the shm directory
    #[error("Invalid registry segment name: {name:?} (must be non-empty [A-Za-z0-9_-])")]
    InvalidSegmentName {
        /// Rejected name
        name: String,
    },

    /// Pin and signal carry different value types
    #[error("Type mismatch linking pin {pin} to signal {signal}")]
    TypeMismatch {
        /// Pin name
        pin: String,
        /// Signal name
        signal: String,
    },

    /// An output pin was linked to a signal that already has a writer
    #[error("Signal {signal} already has a writer")]
    SignalHasWriter {
        /// Signal name
        signal: String,
    },

    /// The registry lock level forbids the requested mutation
    #[error("Registry locked: {class:?}")]
    Locked {
        /// Lock class that refused the operation
        class: LockClass,
    },

    /// Config lock could not be acquired in time
    #[error("Timed out after {waited_ms}ms waiting for the config lock")]
    LockTimeout {
        /// Time spent waiting
        waited_ms: u64,
    },

    /// A list walk exceeded the number of objects the arena can hold
    #[error("Corrupt {kind} list: traversal did not terminate")]
    CorruptList {
        /// Kind whose list is corrupt
        kind: Kind,
    },

    /// Configuration error
    #[error("Configuration error: {source}")]
    Config {
        /// Source configuration error
        #[from]
        source: ConfigError,
    },

    /// IO error
    #[error("IO error: {source}")]
    Io {
        /// Source IO error
        #[from]
        source: std::io::Error,
    },

    /// Nix system call error
    #[error("System call error: {source}")]
    Nix {
        /// Source nix error
        #[from]
        source: nix::Error,
    },

    /// JSON serialization/deserialization error
    #[error("JSON error: {source}")]
    Json {
        /// Source JSON error
        #[from]
        source: serde_json::Error,
    },
}

impl RegistryError {
    /// Code returned by an aborting traversal callback, if that is what this is
    pub fn callback_code(&self) -> Option<i32> {
        match self {
            Self::Callback { code } => Some(*code),
            _ => None,
        }
    }

    /// True for errors raised before any list element was visited
    pub fn is_precondition(&self) -> bool {
        matches!(self, Self::RegistryNotReady | Self::LockNotHeld)
    }
}

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callback_code_passthrough() {
        let err = RegistryError::Callback { code: -7 };
        assert_eq!(err.callback_code(), Some(-7));
        assert!(!err.is_precondition());
        assert_eq!(RegistryError::LockNotHeld.callback_code(), None);
    }

    #[test]
    fn test_precondition_classification() {
        assert!(RegistryError::RegistryNotReady.is_precondition());
        assert!(RegistryError::LockNotHeld.is_precondition());
        assert!(
            !RegistryError::ArenaExhausted {
                requested: 8,
                available: 0
            }
            .is_precondition()
        );
    }

    #[test]
    fn test_display_carries_context() {
        let err = RegistryError::DuplicateName {
            kind: Kind::Pin,
            name: "axis.0.pos".to_string(),
        };
        assert_eq!(err.to_string(), "Duplicate pin name: axis.0.pos");

        let err = RegistryError::SignalHasWriter {
            signal: "spindle-speed".to_string(),
        };
        assert_eq!(err.to_string(), "Signal spindle-speed already has a writer");
    }
}
