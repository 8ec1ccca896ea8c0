//! Host-level configuration for the rtbox runtime.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{Result, RtboxError};

/// Root configuration, one per runtime installation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Parent of the per-container root directories.
    pub state_root: PathBuf,
    /// Cgroup hierarchy mount point.
    pub cgroup_root: PathBuf,
    /// Directory of the cpu controller below `cgroup_root`.
    pub cpu_controller_dir: String,
    /// Ancestor groups carrying a real-time ledger, relative to the cpu
    /// controller mount, innermost first. Walked after the immediate parent.
    pub rt_ancestors: Vec<PathBuf>,
    /// Whether the container's immediate parent is the first ledger level.
    pub include_parent_ledger: bool,
    /// Lock file serialising ledger read-modify-write cycles across processes.
    pub ledger_lock: PathBuf,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            state_root: PathBuf::from(constants::DEFAULT_STATE_ROOT),
            cgroup_root: PathBuf::from(constants::CGROUP_ROOT),
            cpu_controller_dir: constants::CPU_CONTROLLER_DIR.to_string(),
            rt_ancestors: vec![
                PathBuf::from(constants::KUBEPODS_BESTEFFORT_SLICE),
                PathBuf::from(constants::KUBEPODS_SLICE),
            ],
            include_parent_ledger: true,
            ledger_lock: PathBuf::from(constants::DEFAULT_LEDGER_LOCK),
        }
    }
}

impl RuntimeConfig {
    /// Reads a JSON configuration file. A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(RtboxError::io(path, e)),
        };
        let config = serde_json::from_str(&content)?;
        tracing::debug!(path = %path.display(), "config loaded");
        Ok(config)
    }

    /// Mount point of the cpu controller.
    #[must_use]
    pub fn cpu_mount(&self) -> PathBuf {
        self.cgroup_root.join(&self.cpu_controller_dir)
    }

    /// Absolute directories of the fixed ledger levels, innermost first.
    #[must_use]
    pub fn fixed_ledger_levels(&self) -> Vec<PathBuf> {
        let mount = self.cpu_mount();
        self.rt_ancestors.iter().map(|rel| mount.join(rel)).collect()
    }

    /// Root directory of the container with the given id.
    #[must_use]
    pub fn container_root(&self, id: &str) -> PathBuf {
        self.state_root.join(id)
    }
}
