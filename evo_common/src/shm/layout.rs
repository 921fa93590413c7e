//! Layout fingerprinting for records shared between processes.
//!
//! Every process mapping the registry segment must agree on the exact layout
//! of the root record. The creator stores [`struct_version_hash`] of the root
//! type; attaching processes compare it against their own build and refuse to
//! touch the segment on mismatch.

/// Compile-time version hash for struct compatibility detection.
///
/// Computes a hash from `size_of::<T>()` and `align_of::<T>()`.
/// If the struct layout changes, the hash changes, and attaching processes
/// refuse to use the segment.
///
/// **Known limitation**: Does not detect field reordering within the
/// same total size/alignment. This is acceptable because `#[repr(C)]`
/// structs with explicit padding have deterministic field order.
pub const fn struct_version_hash<T>() -> u32 {
    let size = core::mem::size_of::<T>() as u32;
    let align = core::mem::align_of::<T>() as u32;
    size.wrapping_mul(0x9E3779B9) ^ align.wrapping_mul(0x517CC1B7)
}

/// Combine two layout hashes so a root hash can cover nested records.
pub const fn combine_hashes(a: u32, b: u32) -> u32 {
    a.rotate_left(5) ^ b.wrapping_mul(0x27D4EB2F)
}

/// Round `value` up to the next multiple of `align` (a power of two).
#[inline]
pub const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

/// Round `value` down to a multiple of `align` (a power of two).
#[inline]
pub const fn align_down(value: usize, align: usize) -> usize {
    value & !(align - 1)
}
