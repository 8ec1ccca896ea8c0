//! Domain primitive types used across the rtbox workspace.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::MAX_CPUS;
use crate::error::{Result, RtboxError};

/// Unique identifier for a container instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerId(String);

impl ContainerId {
    /// Creates a new container ID from a string value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a random container ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Externally visible lifecycle status of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Init process exists but the user program has not been started.
    Created,
    /// User program is executing.
    Running,
    /// Processes are frozen.
    Paused,
    /// No live init process.
    Stopped,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Set of CPU core indices, as written to `cpuset.cpus`.
///
/// Accepts the kernel list syntax (`0,2,3`, `0-3`, `0-1,6`) and always
/// renders the canonical comma-separated form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct CpuSet(BTreeSet<u32>);

impl CpuSet {
    /// Builds a set from explicit core indices.
    pub fn from_cores(cores: impl IntoIterator<Item = u32>) -> Self {
        Self(cores.into_iter().collect())
    }

    /// Iterates over the cores in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.0.iter().copied()
    }

    /// Returns whether no core is named.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of cores in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns whether the two sets share no core.
    #[must_use]
    pub fn is_disjoint(&self, other: &Self) -> bool {
        self.0.is_disjoint(&other.0)
    }
}

impl FromStr for CpuSet {
    type Err = RtboxError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |part: &str| RtboxError::Config {
            message: format!("invalid cpuset {s:?}: bad element {part:?}"),
        };
        let mut cores = BTreeSet::new();
        for part in s.trim().split(',').map(str::trim).filter(|p| !p.is_empty()) {
            if let Some((lo, hi)) = part.split_once('-') {
                let lo: u32 = lo.trim().parse().map_err(|_| invalid(part))?;
                let hi: u32 = hi.trim().parse().map_err(|_| invalid(part))?;
                if lo > hi || hi >= MAX_CPUS {
                    return Err(invalid(part));
                }
                cores.extend(lo..=hi);
            } else {
                let core: u32 = part.parse().map_err(|_| invalid(part))?;
                if core >= MAX_CPUS {
                    return Err(invalid(part));
                }
                let _ = cores.insert(core);
            }
        }
        Ok(Self(cores))
    }
}

impl fmt::Display for CpuSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for core in &self.0 {
            if !first {
                f.write_str(",")?;
            }
            write!(f, "{core}")?;
            first = false;
        }
        Ok(())
    }
}

/// CPU limits requested for one container. Zero means "leave untouched".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Resources {
    /// Relative CPU weight (`cpu.shares`).
    pub cpu_shares: u64,
    /// CFS quota in microseconds (`cpu.cfs_quota_us`), `-1` for unlimited.
    pub cpu_quota: i64,
    /// CFS period in microseconds (`cpu.cfs_period_us`).
    pub cpu_period: u64,
    /// Real-time runtime in microseconds.
    pub cpu_rt_runtime: i64,
    /// Real-time period in microseconds (`cpu.rt_period_us`).
    pub cpu_rt_period: u64,
    /// Cores the container may run on, in cpuset list syntax.
    pub cpuset_cpus: String,
}

impl Resources {
    /// Parses [`Resources::cpuset_cpus`].
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the list is malformed.
    pub fn cpuset(&self) -> Result<CpuSet> {
        self.cpuset_cpus.parse()
    }
}

/// CFS throttling counters read from `cpu.stat`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottlingData {
    /// Number of enforcement periods that have elapsed.
    pub periods: u64,
    /// Number of periods in which the group was throttled.
    pub throttled_periods: u64,
    /// Total time the group was throttled, in nanoseconds.
    pub throttled_time: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpuset_parses_list_and_ranges() {
        let set: CpuSet = "0-2, 5,7".parse().unwrap();
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![0, 1, 2, 5, 7]);
        assert_eq!(set.to_string(), "0,1,2,5,7");
    }

    #[test]
    fn cpuset_empty_string_is_empty_set() {
        let set: CpuSet = "".parse().unwrap();
        assert!(set.is_empty());
        assert_eq!(set.to_string(), "");
    }

    #[test]
    fn cpuset_rejects_garbage() {
        assert!("0,x".parse::<CpuSet>().is_err());
        assert!("3-1".parse::<CpuSet>().is_err());
    }

    #[test]
    fn cpuset_rejects_cores_beyond_limit() {
        let err = "0-4294967295".parse::<CpuSet>().unwrap_err();
        assert!(matches!(err, RtboxError::Config { .. }));
        assert!(MAX_CPUS.to_string().parse::<CpuSet>().is_err());
        let last = MAX_CPUS - 1;
        let set: CpuSet = last.to_string().parse().unwrap();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&Status::Paused).unwrap();
        assert_eq!(json, "\"paused\"");
        assert_eq!(Status::Stopped.to_string(), "stopped");
    }

    #[test]
    fn resources_default_requests_nothing() {
        let r = Resources::default();
        assert_eq!(r.cpu_shares, 0);
        assert_eq!(r.cpu_rt_runtime, 0);
        assert!(r.cpuset().unwrap().is_empty());
    }
}
