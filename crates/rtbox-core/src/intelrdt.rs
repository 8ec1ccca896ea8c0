//! Intel RDT (resctrl) group lifecycle.
//!
//! Cache and memory-bandwidth partitioning is configured through a group
//! directory under the resctrl mount. The runtime only needs to tear it
//! down alongside the cgroups.

use std::fmt;
use std::path::{Path, PathBuf};

use rtbox_common::error::Result;

use crate::cgroup::fs::remove_cgroup_dir;

/// Default resctrl mount point.
pub const RESCTRL_ROOT: &str = "/sys/fs/resctrl";

/// Resources held by a container's Intel RDT group.
pub trait IntelRdtManager: fmt::Debug + Send {
    /// Removes the group.
    ///
    /// # Errors
    ///
    /// Returns an error if the group directory cannot be removed.
    fn destroy(&mut self) -> Result<()>;
}

/// A resctrl group directory.
#[derive(Debug, Clone)]
pub struct ResctrlGroup {
    path: PathBuf,
}

impl ResctrlGroup {
    /// Group named after the container below the default mount.
    #[must_use]
    pub fn for_container(id: &str) -> Self {
        Self::new(Path::new(RESCTRL_ROOT).join(id))
    }

    /// Group at an explicit directory.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Group directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl IntelRdtManager for ResctrlGroup {
    fn destroy(&mut self) -> Result<()> {
        remove_cgroup_dir(&self.path)?;
        tracing::info!(path = %self.path.display(), "intel rdt group destroyed");
        Ok(())
    }
}
