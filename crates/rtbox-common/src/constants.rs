//! System-wide constants and default paths.

/// Default parent directory of per-container root directories.
pub const DEFAULT_STATE_ROOT: &str = "/run/rtbox";

/// Runtime configuration file read by the `rtbox` binary.
pub const DEFAULT_CONFIG_FILE: &str = "/etc/rtbox/config.json";

/// Default host-wide lock file serialising ledger updates.
pub const DEFAULT_LEDGER_LOCK: &str = "/run/rtbox/rt-ledger.lock";

/// Cgroup hierarchy mount point.
pub const CGROUP_ROOT: &str = "/sys/fs/cgroup";

/// Directory of the v1 `cpu` controller under [`CGROUP_ROOT`].
pub const CPU_CONTROLLER_DIR: &str = "cpu,cpuacct";

/// Cluster-pods level ancestor, relative to the cpu controller mount.
pub const KUBEPODS_SLICE: &str = "kubepods.slice";

/// QoS-class level ancestor, relative to the cpu controller mount.
pub const KUBEPODS_BESTEFFORT_SLICE: &str = "kubepods.slice/kubepods-besteffort.slice";

/// Exclusive upper bound on CPU core indices accepted in a cpuset.
pub const MAX_CPUS: u32 = 8192;

/// Per-core real-time runtime ledger / own-cgroup record.
pub const RT_MULTI_RUNTIME_FILE: &str = "cpu.rt_multi_runtime_us";

/// Real-time period control file.
pub const RT_PERIOD_FILE: &str = "cpu.rt_period_us";

/// Relative weight control file.
pub const SHARES_FILE: &str = "cpu.shares";

/// CFS period control file.
pub const CFS_PERIOD_FILE: &str = "cpu.cfs_period_us";

/// CFS quota control file.
pub const CFS_QUOTA_FILE: &str = "cpu.cfs_quota_us";

/// Throttling counters file.
pub const CPU_STAT_FILE: &str = "cpu.stat";

/// Membership file of a cgroup directory.
pub const CGROUP_PROCS_FILE: &str = "cgroup.procs";

/// Freezer state control file.
pub const FREEZER_STATE_FILE: &str = "freezer.state";

/// Checkpoint image marker inside a container root.
pub const CHECKPOINT_DIR: &str = "checkpoint";

/// Marker present in a container root until the user program is started.
pub const EXEC_FIFO: &str = "exec.fifo";

/// Persisted state file inside a container root.
pub const STATE_FILE: &str = "state.json";

/// OCI runtime-spec version reported in state snapshots.
pub const OCI_VERSION: &str = "1.0.2";

/// Application name used in CLI output and state files.
pub const APP_NAME: &str = "rtbox";
