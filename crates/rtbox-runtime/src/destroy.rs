//! Terminal teardown shared by every lifecycle state.
//!
//! Every step runs even when an earlier one failed; the first failure among
//! the cleanup steps is what the caller sees.

use std::io;
use std::path::Path;

use nix::sys::signal::Signal;
use rtbox_common::error::{Result, RtboxError};
use rtbox_common::types::Status;
use rtbox_core::cgroup::CgroupManager;
use rtbox_core::intelrdt::IntelRdtManager;
use rtbox_core::namespace::Namespaces;

use crate::hooks::{HookKind, HookRunner};
use crate::oci::OciState;
use crate::process::signal_all_processes;

/// Everything a container holds that teardown must release.
pub struct Teardown<'a> {
    /// Container state directory, removed recursively.
    pub root: &'a Path,
    /// Decides whether stray processes must be killed first.
    pub namespaces: &'a Namespaces,
    /// Cgroups to empty and remove.
    pub cgroups: &'a mut (dyn CgroupManager + 'static),
    /// Intel RDT group, if one was attached.
    pub intel_rdt: Option<&'a mut (dyn IntelRdtManager + 'static)>,
    /// Poststop hook runner.
    pub hooks: Option<&'a (dyn HookRunner + 'static)>,
    /// State handed to poststop hooks.
    pub snapshot: OciState,
}

impl Teardown<'_> {
    /// Kills stray processes, removes cgroups, the RDT group and the root
    /// directory, then runs poststop hooks.
    pub fn run(self) -> Result<()> {
        let Self {
            root,
            namespaces,
            cgroups,
            intel_rdt,
            hooks,
            mut snapshot,
        } = self;

        // Without a private pid namespace nothing dies with init.
        if !namespaces.has_private_pid() {
            if let Err(e) = signal_all_processes(cgroups, Signal::SIGKILL) {
                tracing::warn!(error = %e, "failed to kill container processes");
            }
        }

        let mut first_err = None;
        let mut record = |step: &str, result: Result<()>| {
            if let Err(e) = result {
                tracing::warn!(step, error = %e, "teardown step failed");
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        };

        record("cgroups", cgroups.destroy());
        if let Some(rdt) = intel_rdt {
            record("intel rdt", rdt.destroy());
        }
        record("root", remove_root(root));
        if let Some(hooks) = hooks {
            // Hooks observe the container as already gone.
            snapshot.status = Status::Stopped;
            snapshot.pid = None;
            record("poststop hooks", hooks.run_hooks(HookKind::Poststop, &snapshot));
        }

        first_err.map_or(Ok(()), Err)
    }
}

fn remove_root(root: &Path) -> Result<()> {
    match std::fs::remove_dir_all(root) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(RtboxError::io(root, e)),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    use rtbox_common::types::Resources;
    use rtbox_core::cgroup::FreezerState;

    use super::*;

    type Log = Arc<Mutex<Vec<String>>>;

    #[derive(Debug)]
    struct Recorder {
        log: Log,
        fail_destroy: bool,
    }

    impl CgroupManager for Recorder {
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
            self.log.lock().unwrap().push("cgroups".into());
            if self.fail_destroy {
                return Err(RtboxError::Config {
                    message: "cgroup busy".into(),
                });
            }
            Ok(())
        }
        fn freeze(&mut self, state: FreezerState) -> Result<()> {
            self.log.lock().unwrap().push(format!("freeze {state}"));
            Ok(())
        }
        fn freezer_state(&self) -> Result<FreezerState> {
            Ok(FreezerState::Thawed)
        }
        fn pids(&self) -> Result<Vec<i32>> {
            self.log.lock().unwrap().push("pids".into());
            Ok(Vec::new())
        }
    }

    #[derive(Debug)]
    struct Rdt(Log);

    impl IntelRdtManager for Rdt {
        fn destroy(&mut self) -> Result<()> {
            self.0.lock().unwrap().push("rdt".into());
            Err(RtboxError::Config {
                message: "rdt busy".into(),
            })
        }
    }

    #[derive(Debug)]
    struct Hooks(Log);

    impl HookRunner for Hooks {
        fn run_hooks(&self, kind: HookKind, state: &OciState) -> Result<()> {
            self.0
                .lock()
                .unwrap()
                .push(format!("{kind:?} {} pid={:?}", state.status, state.pid));
            Ok(())
        }
    }

    fn snapshot() -> OciState {
        OciState {
            oci_version: "1.0.2".into(),
            id: "ctr".into(),
            status: Status::Running,
            pid: Some(1),
            bundle: PathBuf::from("/bundle"),
            annotations: BTreeMap::new(),
        }
    }

    #[test]
    fn every_step_runs_and_first_error_wins() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("ctr");
        std::fs::create_dir_all(root.join("checkpoint")).unwrap();
        let log = Log::default();
        let mut cgroups = Recorder {
            log: log.clone(),
            fail_destroy: true,
        };
        let mut rdt = Rdt(log.clone());
        let hooks = Hooks(log.clone());

        let err = Teardown {
            root: &root,
            namespaces: &Namespaces::default(),
            cgroups: &mut cgroups,
            intel_rdt: Some(&mut rdt),
            hooks: Some(&hooks),
            snapshot: snapshot(),
        }
        .run()
        .unwrap_err();

        assert_eq!(err.to_string(), "invalid configuration: cgroup busy");
        assert!(!root.exists());
        assert_eq!(
            *log.lock().unwrap(),
            ["cgroups", "rdt", "Poststop stopped pid=None"]
        );
    }

    #[test]
    fn shared_pid_namespace_kills_processes_first() {
        let dir = tempfile::tempdir().unwrap();
        let log = Log::default();
        let mut cgroups = Recorder {
            log: log.clone(),
            fail_destroy: false,
        };
        Teardown {
            root: &dir.path().join("absent"),
            namespaces: &Namespaces::host(),
            cgroups: &mut cgroups,
            intel_rdt: None,
            hooks: None,
            snapshot: snapshot(),
        }
        .run()
        .unwrap();
        assert_eq!(
            *log.lock().unwrap(),
            ["freeze FROZEN", "pids", "freeze THAWED", "cgroups"]
        );
    }
}
