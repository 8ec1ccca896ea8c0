//! Container processes and signal delivery.

use std::fmt;

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use rtbox_common::error::{Result, RtboxError};
use rtbox_core::cgroup::{CgroupManager, FreezerState};

/// Handle to a container's init process.
pub trait InitProcess: fmt::Debug + Send {
    /// Host pid of the process.
    fn pid(&self) -> i32;

    /// Delivers `signal` to the process.
    ///
    /// # Errors
    ///
    /// Returns an error if the signal cannot be delivered.
    fn signal(&self, signal: Signal) -> Result<()>;

    /// Returns whether the process still exists and is the same process
    /// this handle was created for.
    fn is_alive(&self) -> bool;

    /// Kernel start time of the process, when known.
    fn start_time(&self) -> Option<u64> {
        None
    }
}

/// An init process identified by host pid and kernel start time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostProcess {
    pid: i32,
    start_time: Option<u64>,
}

impl HostProcess {
    /// Tracks `pid`, remembering its start time so a recycled pid is not
    /// mistaken for the original process.
    #[must_use]
    pub fn new(pid: i32) -> Self {
        Self {
            pid,
            start_time: start_time(pid),
        }
    }

    /// Tracks `pid` with a start time recorded earlier.
    #[must_use]
    pub const fn with_start_time(pid: i32, start_time: Option<u64>) -> Self {
        Self { pid, start_time }
    }
}

impl InitProcess for HostProcess {
    fn pid(&self) -> i32 {
        self.pid
    }

    fn signal(&self, signal: Signal) -> Result<()> {
        kill(Pid::from_raw(self.pid), signal).map_err(|errno| RtboxError::Process {
            pid: self.pid,
            message: format!("cannot deliver {signal}: {errno}"),
        })
    }

    fn is_alive(&self) -> bool {
        match kill(Pid::from_raw(self.pid), None) {
            Ok(()) | Err(Errno::EPERM) => {}
            Err(_) => return false,
        }
        match self.start_time {
            Some(expected) => start_time(self.pid) == Some(expected),
            None => true,
        }
    }

    fn start_time(&self) -> Option<u64> {
        self.start_time
    }
}

/// Reads field 22 (`starttime`) of `/proc/<pid>/stat`.
fn start_time(pid: i32) -> Option<u64> {
    let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    // The command name may contain spaces and parentheses; fields resume
    // after the last ')'. starttime is the 20th field from there.
    let rest = &stat[stat.rfind(')')? + 1..];
    rest.split_whitespace().nth(19)?.parse().ok()
}

/// Delivers `signal` to every process in the container's cgroups.
///
/// The groups are frozen while the pid list is read and signalled so no
/// process can fork out of the snapshot; a missing freezer only loses that
/// guarantee. Processes that exit before delivery are ignored.
///
/// # Errors
///
/// Returns the first delivery failure after every pid has been attempted,
/// or an error if the pid list cannot be read.
pub fn signal_all_processes(manager: &mut dyn CgroupManager, signal: Signal) -> Result<()> {
    let frozen = match manager.freeze(FreezerState::Frozen) {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!(error = %e, "signalling without freezing");
            false
        }
    };
    let result = manager.pids().and_then(|pids| {
        let mut first_err = None;
        for pid in pids {
            if pid <= 0 {
                tracing::warn!(pid, "refusing to signal a non-process pid");
                if first_err.is_none() {
                    first_err = Some(RtboxError::Process {
                        pid,
                        message: "not a process id".into(),
                    });
                }
                continue;
            }
            match kill(Pid::from_raw(pid), signal) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(errno) => {
                    tracing::warn!(pid, %signal, %errno, "signal delivery failed");
                    if first_err.is_none() {
                        first_err = Some(RtboxError::Process {
                            pid,
                            message: format!("cannot deliver {signal}: {errno}"),
                        });
                    }
                }
            }
        }
        first_err.map_or(Ok(()), Err)
    });
    if frozen {
        if let Err(e) = manager.freeze(FreezerState::Thawed) {
            tracing::warn!(error = %e, "failed to thaw after signalling");
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    use rtbox_common::types::Resources;

    use super::*;

    #[derive(Debug)]
    struct FixedPids(Vec<i32>);

    impl CgroupManager for FixedPids {
        fn paths(&self) -> BTreeMap<String, PathBuf> {
            BTreeMap::new()
        }
        fn apply(&mut self, _pid: i32) -> Result<()> {
            Ok(())
        }
        fn set(&mut self, _resources: &Resources) -> Result<()> {
            Ok(())
        }
        fn destroy(&mut self) -> Result<()> {
            Ok(())
        }
        fn freeze(&mut self, _state: FreezerState) -> Result<()> {
            Ok(())
        }
        fn freezer_state(&self) -> Result<FreezerState> {
            Ok(FreezerState::Thawed)
        }
        fn pids(&self) -> Result<Vec<i32>> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn own_process_is_alive() {
        let me = HostProcess::new(i32::try_from(std::process::id()).unwrap());
        assert!(me.start_time().is_some());
        assert!(me.is_alive());
    }

    #[test]
    fn changed_start_time_means_recycled_pid() {
        let pid = i32::try_from(std::process::id()).unwrap();
        let real = HostProcess::new(pid);
        let stale = HostProcess::with_start_time(pid, real.start_time().map(|t| t + 1));
        assert!(!stale.is_alive());
    }

    #[test]
    fn reaped_child_is_not_alive() {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let process = HostProcess::new(i32::try_from(child.id()).unwrap());
        let _ = child.wait().unwrap();
        assert!(!process.is_alive());
    }

    #[test]
    fn non_positive_pids_are_never_signalled() {
        // SIGCONT keeps a regression harmless for the test host.
        let err = signal_all_processes(&mut FixedPids(vec![0, -1]), Signal::SIGCONT).unwrap_err();
        assert!(matches!(err, RtboxError::Process { pid: 0, .. }));
    }
}
