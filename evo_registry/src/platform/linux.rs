//! Linux-specific shared memory operations

use crate::error::{RegistryError, RegistryResult};
use evo::shm::consts::{REGISTRY_FILE_PREFIX, SHM_DIR};
use memmap2::{MmapMut, MmapOptions};
use nix::unistd::getpid;
use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::os::unix::fs::OpenOptionsExt;

/// Linux-specific memory mapping configuration
#[derive(Debug, Clone, Copy)]
pub struct LinuxMemoryConfig {
    /// Pre-fault all pages at map time (MAP_POPULATE)
    pub populate: bool,
    /// Pin pages in RAM so the realtime process never takes a major fault
    pub locked: bool,
}

impl Default for LinuxMemoryConfig {
    fn default() -> Self {
        Self {
            populate: true,
            locked: false,
        }
    }
}

/// True if `name` maps to a single file directly under the shm directory
pub fn is_valid_segment_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Fail with `InvalidSegmentName` unless `name` is `[A-Za-z0-9_-]+`
pub fn validate_segment_name(name: &str) -> RegistryResult<()> {
    if !is_valid_segment_name(name) {
        return Err(RegistryError::InvalidSegmentName {
            name: name.to_string(),
        });
    }
    Ok(())
}

/// Path of the named registry segment
pub fn segment_path(name: &str) -> String {
    format!("{}/{}{}", SHM_DIR, REGISTRY_FILE_PREFIX, name)
}

/// Path of the discovery metadata file of a registry segment
pub fn metadata_path(name: &str) -> String {
    format!("{}/{}{}.meta", SHM_DIR, REGISTRY_FILE_PREFIX, name)
}

/// Create a new named segment; fails if one with the same name exists
pub fn create_segment_mmap(
    name: &str,
    size: usize,
    config: &LinuxMemoryConfig,
) -> RegistryResult<MmapMut> {
    validate_segment_name(name)?;
    let path = segment_path(name);
    let file = OpenOptions::new()
        .create_new(true)
        .read(true)
        .write(true)
        .mode(0o600) // Owner read/write only
        .open(&path)
        .map_err(|e| match e.kind() {
            ErrorKind::AlreadyExists => RegistryError::AlreadyExists {
                name: name.to_string(),
            },
            _ => RegistryError::Io { source: e },
        })?;

    // A fresh tmpfs file reads back as zeroes, which the arena relies on
    file.set_len(size as u64)?;

    let mut mmap_options = MmapOptions::new();
    if config.populate {
        mmap_options.populate();
    }
    let mmap = unsafe { mmap_options.map_mut(&file)? };

    if config.locked {
        lock_pages(&mmap)?;
    }

    Ok(mmap)
}

/// Attach to an existing named segment
pub fn attach_segment_mmap(name: &str, config: &LinuxMemoryConfig) -> RegistryResult<MmapMut> {
    validate_segment_name(name)?;
    let path = segment_path(name);
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(&path)
        .map_err(|e| match e.kind() {
            ErrorKind::NotFound => RegistryError::NotFound {
                name: name.to_string(),
            },
            _ => RegistryError::Io { source: e },
        })?;

    let mut mmap_options = MmapOptions::new();
    if config.populate {
        mmap_options.populate();
    }
    let mmap = unsafe { mmap_options.map_mut(&file)? };

    if config.locked {
        lock_pages(&mmap)?;
    }

    Ok(mmap)
}

/// Map private zeroed memory for a single-process registry
pub fn create_anonymous_mmap(size: usize) -> RegistryResult<MmapMut> {
    Ok(MmapOptions::new().len(size).map_anon()?)
}

fn lock_pages(mmap: &MmapMut) -> RegistryResult<()> {
    let result = unsafe { libc::mlock(mmap.as_ptr() as *const libc::c_void, mmap.len()) };
    if result == 0 {
        Ok(())
    } else {
        Err(RegistryError::Io {
            source: std::io::Error::last_os_error(),
        })
    }
}

/// Check if process is alive using kill(pid, 0)
pub fn is_process_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    // Null signal tests for existence without delivering anything
    match kill(Pid::from_raw(pid as i32), None) {
        Ok(_) => true,
        Err(nix::Error::ESRCH) => false, // No such process
        Err(nix::Error::EPERM) => true,  // Exists, owned by someone else
        Err(_) => false,
    }
}

/// Get current process ID
pub fn get_current_pid() -> u32 {
    getpid().as_raw() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_paths() {
        assert_eq!(segment_path("hal"), "/dev/shm/evo_registry_hal");
        assert_eq!(metadata_path("hal"), "/dev/shm/evo_registry_hal.meta");
    }

    #[test]
    fn test_segment_names_stay_in_shm_dir() {
        assert!(is_valid_segment_name("hal"));
        assert!(is_valid_segment_name("evo-hal_2"));
        assert!(!is_valid_segment_name(""));
        assert!(!is_valid_segment_name("../etc/passwd"));
        assert!(!is_valid_segment_name("a/b"));
        assert!(!is_valid_segment_name("a.b"));
    }

    #[test]
    fn test_traversing_names_are_refused_before_open() {
        let config = LinuxMemoryConfig::default();
        assert!(matches!(
            create_segment_mmap("../escape", 4096, &config),
            Err(RegistryError::InvalidSegmentName { .. })
        ));
        assert!(matches!(
            attach_segment_mmap("../escape", &config),
            Err(RegistryError::InvalidSegmentName { .. })
        ));
    }

    #[test]
    fn test_current_process_is_alive() {
        assert!(is_process_alive(get_current_pid()));
    }

    #[test]
    fn test_anonymous_mapping_is_zeroed() {
        let mmap = create_anonymous_mmap(4096).unwrap();
        assert_eq!(mmap.len(), 4096);
        assert!(mmap.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_attach_missing_segment() {
        let name = format!("missing_{}", get_current_pid());
        let result = attach_segment_mmap(&name, &LinuxMemoryConfig::default());
        assert!(matches!(result, Err(RegistryError::NotFound { .. })));
    }
}
