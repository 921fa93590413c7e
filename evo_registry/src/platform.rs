//! Platform-specific segment mapping and process helpers

pub mod linux;

pub use linux::{
    LinuxMemoryConfig, attach_segment_mmap, create_anonymous_mmap, create_segment_mmap,
    get_current_pid, is_process_alive, is_valid_segment_name, metadata_path, segment_path,
    validate_segment_name,
};
