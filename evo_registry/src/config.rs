//! Registry settings loaded from the process TOML file
//!
//! ```toml
//! [shared]
//! log_level = "info"
//! service_name = "evo-halcmd"
//!
//! [registry]
//! segment = "hal"
//! size = 262144
//! mode = "create_or_attach"
//! lock_timeout_ms = 500
//! ```

use crate::lock::LockPolicy;
use crate::platform::{LinuxMemoryConfig, is_valid_segment_name};
use evo::config::{ConfigError, SharedConfig, Validate};
use evo::shm::consts::{DEFAULT_REGISTRY_SIZE, SHM_MAX_SIZE, SHM_MIN_SIZE};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How [`crate::Registry::from_config`] obtains its arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AttachMode {
    /// Create the named segment; fail if it exists
    Create,
    /// Attach to an existing named segment
    Attach,
    /// Create, or attach if another process already created it
    #[default]
    CreateOrAttach,
    /// Private memory, single process only
    Anonymous,
}

fn default_segment() -> String {
    "hal".to_string()
}

fn default_size() -> usize {
    DEFAULT_REGISTRY_SIZE
}

fn default_lock_timeout_ms() -> u64 {
    1000
}

fn default_true() -> bool {
    true
}

/// `[registry]` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySettings {
    /// Segment name, mapped at `/dev/shm/evo_registry_<segment>`
    #[serde(default = "default_segment")]
    pub segment: String,

    /// Arena size in bytes
    #[serde(default = "default_size")]
    pub size: usize,

    /// Create/attach behavior
    #[serde(default)]
    pub mode: AttachMode,

    /// Config lock acquisition timeout
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    /// Take over a config lock left behind by a dead process
    #[serde(default = "default_true")]
    pub recover_stale_lock: bool,

    /// Pin the mapping in RAM
    #[serde(default)]
    pub lock_memory: bool,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            segment: default_segment(),
            size: default_size(),
            mode: AttachMode::default(),
            lock_timeout_ms: default_lock_timeout_ms(),
            recover_stale_lock: true,
            lock_memory: false,
        }
    }
}

impl RegistrySettings {
    /// Config lock policy described by these settings
    pub fn lock_policy(&self) -> LockPolicy {
        LockPolicy {
            timeout: Duration::from_millis(self.lock_timeout_ms),
            recover_stale: self.recover_stale_lock,
        }
    }

    /// Mapping options described by these settings
    pub fn memory_config(&self) -> LinuxMemoryConfig {
        LinuxMemoryConfig {
            locked: self.lock_memory,
            ..LinuxMemoryConfig::default()
        }
    }
}

impl Validate for RegistrySettings {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.mode != AttachMode::Anonymous {
            if !is_valid_segment_name(&self.segment) {
                return Err(ConfigError::ValidationError(format!(
                    "registry.segment {:?} must be non-empty [A-Za-z0-9_-]",
                    self.segment
                )));
            }
        }

        if !(SHM_MIN_SIZE..=SHM_MAX_SIZE).contains(&self.size) || self.size % SHM_MIN_SIZE != 0 {
            return Err(ConfigError::ValidationError(format!(
                "registry.size {} must be a multiple of {} between {} and {}",
                self.size, SHM_MIN_SIZE, SHM_MIN_SIZE, SHM_MAX_SIZE
            )));
        }

        if self.lock_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "registry.lock_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Complete configuration of a registry process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Fields common to all EVO processes
    pub shared: SharedConfig,

    /// Registry segment settings
    #[serde(default)]
    pub registry: RegistrySettings,
}

impl Validate for RegistryConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;
        self.registry.validate()
    }
}
