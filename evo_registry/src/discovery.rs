//! Registry discovery through metadata files next to the segments

use crate::error::{RegistryError, RegistryResult};
use crate::platform::{
    is_process_alive, is_valid_segment_name, metadata_path, segment_path, validate_segment_name,
};
use evo::shm::consts::{REGISTRY_FILE_PREFIX, SHM_DIR};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::Path;
use std::time::SystemTime;
use tracing::{debug, info, warn};

/// Metadata the creator of a named registry publishes
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RegistryInfo {
    /// Segment name
    pub name: String,
    /// Arena size in bytes
    pub size: usize,
    /// Identifier stored in the segment root
    pub segment_id: u64,
    /// Process that created the segment
    pub creator_pid: u32,
    /// Root layout fingerprint of the creating build
    pub layout_hash: u32,
    /// Creation timestamp
    pub created_at: SystemTime,
}

impl RegistryInfo {
    /// True while the creating process is running
    pub fn is_creator_alive(&self) -> bool {
        is_process_alive(self.creator_pid)
    }
}

/// Write the metadata file of `info.name`
pub fn write_metadata(info: &RegistryInfo) -> RegistryResult<()> {
    validate_segment_name(&info.name)?;
    let content = serde_json::to_string_pretty(info)?;
    std::fs::write(metadata_path(&info.name), content)?;
    Ok(())
}

/// Read the metadata file of a named registry
pub fn read_metadata(name: &str) -> RegistryResult<RegistryInfo> {
    validate_segment_name(name)?;
    let content = std::fs::read_to_string(metadata_path(name)).map_err(|e| match e.kind() {
        ErrorKind::NotFound => RegistryError::NotFound {
            name: name.to_string(),
        },
        _ => RegistryError::Io { source: e },
    })?;
    Ok(serde_json::from_str(&content)?)
}

/// Remove the segment and metadata files of a named registry. Processes
/// that still map the segment keep a valid mapping.
pub fn remove_registry_files(name: &str) {
    if !is_valid_segment_name(name) {
        warn!(name, "Refusing to remove files of an invalid registry name");
        return;
    }
    for path in [segment_path(name), metadata_path(name)] {
        if let Err(e) = std::fs::remove_file(&path) {
            if e.kind() != ErrorKind::NotFound {
                debug!(path = %path, error = %e, "Failed to remove registry file");
            }
        }
    }
}

/// List every named registry that published metadata, newest first
pub fn list_registries() -> RegistryResult<Vec<RegistryInfo>> {
    let mut registries = Vec::new();

    let shm_dir = Path::new(SHM_DIR);
    if !shm_dir.exists() {
        return Ok(registries);
    }

    for entry in std::fs::read_dir(shm_dir)?.flatten() {
        let Ok(file_name) = entry.file_name().into_string() else {
            continue;
        };
        let Some(name) = file_name
            .strip_prefix(REGISTRY_FILE_PREFIX)
            .and_then(|rest| rest.strip_suffix(".meta"))
        else {
            continue;
        };
        // Segments being created or removed concurrently are skipped
        if let Ok(info) = read_metadata(name) {
            registries.push(info);
        }
    }

    registries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(registries)
}

/// Find a named registry
pub fn find_registry(name: &str) -> RegistryResult<Option<RegistryInfo>> {
    match read_metadata(name) {
        Ok(info) => Ok(Some(info)),
        Err(RegistryError::NotFound { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Remove registries whose creator died without cleaning up. Returns how
/// many were removed.
pub fn cleanup_orphaned_registries() -> RegistryResult<usize> {
    let mut cleaned = 0;
    for info in list_registries()? {
        if !info.is_creator_alive() {
            info!(name = %info.name, pid = info.creator_pid, "Removing orphaned registry");
            remove_registry_files(&info.name);
            cleaned += 1;
        }
    }
    Ok(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::get_current_pid;

    fn info(name: &str, pid: u32) -> RegistryInfo {
        RegistryInfo {
            name: name.to_string(),
            size: 8192,
            segment_id: 11,
            creator_pid: pid,
            layout_hash: 0xABCD,
            created_at: SystemTime::now(),
        }
    }

    #[test]
    fn test_metadata_roundtrip_and_listing() {
        let name = format!("disc_test_{}", get_current_pid());
        let written = info(&name, get_current_pid());
        write_metadata(&written).unwrap();

        assert_eq!(read_metadata(&name).unwrap(), written);
        assert!(written.is_creator_alive());
        assert!(list_registries().unwrap().iter().any(|r| r.name == name));

        remove_registry_files(&name);
        assert!(find_registry(&name).unwrap().is_none());
    }

    #[test]
    fn test_orphans_are_cleaned() {
        let name = format!("disc_orphan_{}", get_current_pid());
        write_metadata(&info(&name, 0x7FFF_FFF0)).unwrap();

        assert!(cleanup_orphaned_registries().unwrap() >= 1);
        assert!(find_registry(&name).unwrap().is_none());
    }

    #[test]
    fn test_missing_metadata_is_not_found() {
        assert!(matches!(
            read_metadata("definitely_not_there"),
            Err(RegistryError::NotFound { .. })
        ));
    }

    #[test]
    fn test_traversing_names_never_touch_files() {
        assert!(matches!(
            read_metadata("../passwd"),
            Err(RegistryError::InvalidSegmentName { .. })
        ));
        assert!(matches!(
            write_metadata(&info("../escape", get_current_pid())),
            Err(RegistryError::InvalidSegmentName { .. })
        ));
        // Logged and ignored
        remove_registry_files("../escape");
    }
}
