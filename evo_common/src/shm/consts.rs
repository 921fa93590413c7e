//! SHM (Shared Memory) constants.
//!
//! These constants define the fundamental parameters of the EVO configuration
//! registry segment. They are the single source of truth - all other crates
//! should import from here.

use static_assertions::{const_assert, const_assert_eq};

/// Minimum shared memory segment size in bytes.
///
/// Set to 4KB (one memory page) as the smallest practical segment size.
pub const SHM_MIN_SIZE: usize = 4096;

/// Maximum shared memory segment size in bytes.
///
/// Offsets are 32-bit displacements, so the limit must stay below 4GB.
pub const SHM_MAX_SIZE: usize = 1_073_741_824; // 1GB

/// CPU cache line size in bytes.
///
/// Used for memory alignment to prevent false sharing between processes.
pub const CACHE_LINE_SIZE: usize = 64;

/// Directory holding named POSIX shared memory objects.
pub const SHM_DIR: &str = "/dev/shm";

/// File name prefix of registry segments inside [`SHM_DIR`].
pub const REGISTRY_FILE_PREFIX: &str = "evo_registry_";

/// Default registry arena size (256KB).
pub const DEFAULT_REGISTRY_SIZE: usize = 256 * 1024;

/// Magic number written into the registry root once it is initialized.
pub const REGISTRY_MAGIC: u64 = u64::from_le_bytes(*b"EVO_REG\0");

/// Number of object kinds held by the registry.
pub const KIND_COUNT: usize = 9;

/// Size of the in-segment name buffer, including the terminating NUL.
pub const OBJECT_NAME_CAPACITY: usize = 48;

/// Longest object name accepted by the registry.
pub const OBJECT_NAME_MAX: usize = OBJECT_NAME_CAPACITY - 1;

// Offsets are u32 displacements and object structs stay cache-line friendly
const_assert!(SHM_MAX_SIZE <= u32::MAX as usize);
const_assert_eq!(SHM_MIN_SIZE % CACHE_LINE_SIZE, 0);
const_assert_eq!(DEFAULT_REGISTRY_SIZE % SHM_MIN_SIZE, 0);
const_assert!(OBJECT_NAME_CAPACITY % 8 == 0);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shm_min_size_is_page_size() {
        assert_eq!(SHM_MIN_SIZE, 4096);
    }

    #[test]
    fn test_shm_max_size_fits_offsets() {
        assert!(SHM_MAX_SIZE <= u32::MAX as usize);
    }

    #[test]
    fn test_default_size_is_page_multiple() {
        assert_eq!(DEFAULT_REGISTRY_SIZE % SHM_MIN_SIZE, 0);
        assert!(DEFAULT_REGISTRY_SIZE >= SHM_MIN_SIZE);
    }

    #[test]
    fn test_magic_bytes() {
        assert_eq!(&REGISTRY_MAGIC.to_le_bytes(), b"EVO_REG\0");
    }

    #[test]
    fn test_name_capacity() {
        assert_eq!(OBJECT_NAME_MAX + 1, OBJECT_NAME_CAPACITY);
    }
}
