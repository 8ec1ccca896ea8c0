//! CPU resource control for the v1 `cpu` controller.
//!
//! Manages `cpu.shares`, `cpu.cfs_period_us`, `cpu.cfs_quota_us`,
//! `cpu.rt_period_us`, and the real-time runtime ledger.

use std::io;
use std::path::Path;
use std::sync::Arc;

use rtbox_common::constants::{
    CFS_PERIOD_FILE, CFS_QUOTA_FILE, CPU_STAT_FILE, RT_PERIOD_FILE, SHARES_FILE,
};
use rtbox_common::error::{Result, RtboxError};
use rtbox_common::types::{Resources, ThrottlingData};

use super::fs::{self, ControlFiles};
use super::ledger::RtBandwidth;

/// The `cpu` controller of one installation.
#[derive(Debug, Clone)]
pub struct CpuGroup {
    files: Arc<dyn ControlFiles>,
    rt: RtBandwidth,
}

impl CpuGroup {
    /// Controller name used as key in cgroup path maps.
    pub const NAME: &'static str = "cpu";

    /// Creates the controller over the given control files and ledger chain.
    pub fn new(files: Arc<dyn ControlFiles>, rt: RtBandwidth) -> Self {
        Self { files, rt }
    }

    /// Real-time ledger propagation used by this controller.
    #[must_use]
    pub const fn rt_bandwidth(&self) -> &RtBandwidth {
        &self.rt
    }

    /// Creates the group at `path`, establishes its real-time budget, then
    /// moves `pid` into it.
    ///
    /// The budget has to exist first: the kernel refuses to move a process
    /// already running under a real-time policy into a group with no
    /// real-time runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created, the real-time
    /// settings are rejected, or the pid cannot be registered.
    pub fn apply(&self, path: &Path, resources: &Resources, pid: i32) -> Result<()> {
        std::fs::create_dir_all(path).map_err(|e| RtboxError::io(path, e))?;
        self.set_rt_sched(path, resources)?;
        fs::write_cgroup_proc(self.files.as_ref(), path, pid)
    }

    /// Writes shares, CFS bandwidth, and real-time settings to `path`.
    ///
    /// # Errors
    ///
    /// Returns [`RtboxError::SharesOutOfRange`] if the kernel stored a
    /// different weight than requested, or the first rejected write.
    pub fn set(&self, path: &Path, resources: &Resources) -> Result<()> {
        if resources.cpu_shares != 0 {
            self.set_shares(path, resources.cpu_shares)?;
        }

        let mut deferred_period = None;
        if resources.cpu_period != 0 {
            let period = resources.cpu_period.to_string();
            match self.files.write_value(path, CFS_PERIOD_FILE, &period) {
                Ok(()) => {}
                // A period smaller than the current one can be rejected
                // because old_quota/new_period exceeds the parent's limit;
                // it goes through once the new quota is in place.
                Err(e) if fs::is_einval(&e) && resources.cpu_quota != 0 => {
                    tracing::debug!(path = %path.display(), period, "cfs period deferred until quota is set");
                    deferred_period = Some(period);
                }
                Err(e) => return Err(e),
            }
        }
        if resources.cpu_quota != 0 {
            self.files
                .write_value(path, CFS_QUOTA_FILE, &resources.cpu_quota.to_string())?;
            if let Some(period) = deferred_period {
                self.files.write_value(path, CFS_PERIOD_FILE, &period)?;
            }
        }

        self.set_rt_sched(path, resources)
    }

    fn set_shares(&self, path: &Path, shares: u64) -> Result<()> {
        self.files
            .write_value(path, SHARES_FILE, &shares.to_string())?;
        let stored = fs::read_u64(self.files.as_ref(), path, SHARES_FILE)?;
        if shares > stored {
            return Err(RtboxError::SharesOutOfRange {
                bound: "maximum",
                value: stored,
            });
        }
        if shares < stored {
            return Err(RtboxError::SharesOutOfRange {
                bound: "minimum",
                value: stored,
            });
        }
        tracing::debug!(shares, "cpu shares set");
        Ok(())
    }

    /// Writes the real-time period and reserves the requested real-time
    /// runtime along the ancestor chain.
    ///
    /// # Errors
    ///
    /// Returns the first rejected write or any ledger error.
    pub fn set_rt_sched(&self, path: &Path, resources: &Resources) -> Result<()> {
        let mut deferred_period = None;
        if resources.cpu_rt_period != 0 {
            let period = resources.cpu_rt_period.to_string();
            match self.files.write_value(path, RT_PERIOD_FILE, &period) {
                Ok(()) => {}
                // rt_period_us and the runtime are inter-dependent; retry the
                // period once the runtime has been established.
                Err(e) if fs::is_einval(&e) && resources.cpu_rt_runtime != 0 => {
                    tracing::debug!(path = %path.display(), period, "rt period deferred until runtime is set");
                    deferred_period = Some(period);
                }
                Err(e) => return Err(e),
            }
        }
        if resources.cpu_rt_runtime != 0 {
            self.rt.reserve(path, resources)?;
            if let Some(period) = deferred_period {
                self.files.write_value(path, RT_PERIOD_FILE, &period)?;
            }
        }
        Ok(())
    }

    /// Withdraws the real-time reservation of the group at `path`.
    ///
    /// # Errors
    ///
    /// Returns any ledger error.
    pub fn release_rt(&self, path: &Path) -> Result<()> {
        self.rt.release(path)
    }

    /// Reads the CFS throttling counters of `path`.
    ///
    /// A missing `cpu.stat` yields zeroed counters: older kernels and
    /// unmounted controllers do not expose it.
    ///
    /// # Errors
    ///
    /// Returns [`RtboxError::Parse`] naming the offending line, or an I/O
    /// error other than absence.
    pub fn get_stats(&self, path: &Path) -> Result<ThrottlingData> {
        let content = match self.files.read(path, CPU_STAT_FILE) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(ThrottlingData::default()),
            Err(e) => return Err(RtboxError::io(path.join(CPU_STAT_FILE), e)),
        };
        let mut stats = ThrottlingData::default();
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            let (key, value) = fs::parse_key_value(line).ok_or_else(|| RtboxError::Parse {
                path: path.to_path_buf(),
                file: CPU_STAT_FILE.to_string(),
                line: line.to_string(),
            })?;
            match key {
                "nr_periods" => stats.periods = value,
                "nr_throttled" => stats.throttled_periods = value,
                "throttled_time" => stats.throttled_time = value,
                _ => {}
            }
        }
        Ok(stats)
    }
}
