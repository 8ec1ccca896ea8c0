//! Cgroup resource management.
//!
//! Provides the [`CgroupManager`] interface the runtime drives, its
//! filesystem implementation for the v1 per-controller hierarchy, the CPU
//! controller, and the real-time runtime ledger shared between sibling
//! containers.

pub mod cpu;
pub mod fs;
pub mod ledger;
pub mod lock;
pub mod manager;

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use rtbox_common::error::{Result, RtboxError};
use rtbox_common::types::Resources;

pub use self::manager::FsManager;

/// State of the freezer controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreezerState {
    /// Processes run normally.
    Thawed,
    /// Processes are suspended.
    Frozen,
}

impl FreezerState {
    /// Value written to `freezer.state`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Thawed => "THAWED",
            Self::Frozen => "FROZEN",
        }
    }
}

impl fmt::Display for FreezerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FreezerState {
    type Err = RtboxError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "THAWED" => Ok(Self::Thawed),
            // A group still on its way to FROZEN is treated as frozen.
            "FROZEN" | "FREEZING" => Ok(Self::Frozen),
            other => Err(RtboxError::Config {
                message: format!("unknown freezer state {other:?}"),
            }),
        }
    }
}

/// Owner of the on-disk cgroup subtree of one container.
pub trait CgroupManager: fmt::Debug + Send {
    /// Directory of the container's group, per controller name.
    fn paths(&self) -> BTreeMap<String, PathBuf>;

    /// Creates the groups and places `pid` into them.
    ///
    /// # Errors
    ///
    /// Returns an error if a group cannot be created or configured.
    fn apply(&mut self, pid: i32) -> Result<()>;

    /// Applies new resource limits.
    ///
    /// # Errors
    ///
    /// Returns the first rejected control-file write.
    fn set(&mut self, resources: &Resources) -> Result<()>;

    /// Releases everything the groups hold and removes their directories.
    ///
    /// # Errors
    ///
    /// Returns the first failure; every group is still attempted.
    fn destroy(&mut self) -> Result<()>;

    /// Freezes or thaws every process in the groups.
    ///
    /// # Errors
    ///
    /// Returns an error if no freezer is configured or the write fails.
    fn freeze(&mut self, state: FreezerState) -> Result<()>;

    /// Current freezer state; groups without a freezer are always thawed.
    ///
    /// # Errors
    ///
    /// Returns an error if the freezer state cannot be read.
    fn freezer_state(&self) -> Result<FreezerState>;

    /// Every process id in the container's subtree.
    ///
    /// # Errors
    ///
    /// Returns an error if a membership file cannot be read.
    fn pids(&self) -> Result<Vec<i32>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn freezer_state_parses_kernel_values() {
        assert_eq!("THAWED\n".parse::<FreezerState>().unwrap(), FreezerState::Thawed);
        assert_eq!("FREEZING".parse::<FreezerState>().unwrap(), FreezerState::Frozen);
        assert!("SLUSHY".parse::<FreezerState>().is_err());
        assert_eq!(FreezerState::Frozen.to_string(), "FROZEN");
    }
}
