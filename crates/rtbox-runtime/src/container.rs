//! The container aggregate and its lifecycle operations.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use nix::sys::signal::Signal;
use rtbox_common::constants::{CHECKPOINT_DIR, EXEC_FIFO, OCI_VERSION};
use rtbox_common::error::{Result, RtboxError};
use rtbox_common::types::{ContainerId, Resources, Status};
use rtbox_core::cgroup::{CgroupManager, FreezerState};
use rtbox_core::intelrdt::IntelRdtManager;
use rtbox_core::namespace::Namespaces;
use serde::{Deserialize, Serialize};

use crate::destroy::Teardown;
use crate::hooks::HookRunner;
use crate::oci::{self, OciState, StateEntry};
use crate::process::{HostProcess, InitProcess};
use crate::state::{ContainerState, Verdict};

/// Static configuration of a container, taken from its bundle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    /// Bundle directory.
    pub bundle: PathBuf,
    /// Namespaces the init process lives in.
    pub namespaces: Namespaces,
    /// Resource limits applied to the cgroups.
    pub resources: Resources,
    /// User annotations, passed through to hooks.
    pub annotations: BTreeMap<String, String>,
}

/// A container: configuration, the resources it holds, and exactly one
/// lifecycle state.
#[derive(Debug)]
pub struct Container {
    id: ContainerId,
    root: PathBuf,
    config: ContainerConfig,
    cgroup_manager: Box<dyn CgroupManager>,
    intel_rdt: Option<Box<dyn IntelRdtManager>>,
    init_process: Option<Box<dyn InitProcess>>,
    hooks: Option<Box<dyn HookRunner>>,
    state: ContainerState,
    created_at: String,
}

impl Container {
    /// Creates a container in the `Created` state. `root` is its private
    /// state directory; it is removed on destroy.
    #[must_use]
    pub fn new(
        id: ContainerId,
        root: impl Into<PathBuf>,
        config: ContainerConfig,
        cgroup_manager: Box<dyn CgroupManager>,
    ) -> Self {
        Self {
            id,
            root: root.into(),
            config,
            cgroup_manager,
            intel_rdt: None,
            init_process: None,
            hooks: None,
            state: ContainerState::Created,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Attaches an Intel RDT group, destroyed together with the cgroups.
    #[must_use]
    pub fn with_intel_rdt(mut self, intel_rdt: Box<dyn IntelRdtManager>) -> Self {
        self.intel_rdt = Some(intel_rdt);
        self
    }

    /// Attaches the hook runner used after destroy.
    #[must_use]
    pub fn with_hooks(mut self, hooks: Box<dyn HookRunner>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    /// Rehydrates a container from the state file in `root`.
    ///
    /// The container starts out `Loaded` with the saved status; the first
    /// operation that needs the real state refreshes it from the host.
    ///
    /// # Errors
    ///
    /// Returns an error if no state was saved or the file is unreadable.
    pub fn from_saved(
        root: impl Into<PathBuf>,
        config: ContainerConfig,
        cgroup_manager: Box<dyn CgroupManager>,
    ) -> Result<Self> {
        let root = root.into();
        let entry = oci::load_state(&root)?;
        tracing::info!(id = %entry.id, status = %entry.status, "container loaded");
        Ok(Self {
            id: entry.id,
            root,
            config,
            cgroup_manager,
            intel_rdt: None,
            init_process: entry.pid.map(|pid| {
                Box::new(HostProcess::with_start_time(pid, entry.pid_start_time))
                    as Box<dyn InitProcess>
            }),
            hooks: None,
            state: ContainerState::Loaded {
                status: entry.status,
            },
            created_at: entry.created_at,
        })
    }

    /// Container identifier.
    #[must_use]
    pub const fn id(&self) -> &ContainerId {
        &self.id
    }

    /// Private state directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Static configuration.
    #[must_use]
    pub const fn config(&self) -> &ContainerConfig {
        &self.config
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> &ContainerState {
        &self.state
    }

    /// Externally visible status.
    #[must_use]
    pub const fn status(&self) -> Status {
        self.state.status()
    }

    /// Host pid of the init process, if one is attached.
    #[must_use]
    pub fn init_pid(&self) -> Option<i32> {
        self.init_process.as_ref().map(|p| p.pid())
    }

    /// Cgroup manager owning the container's subtree.
    #[must_use]
    pub fn cgroup_manager(&self) -> &dyn CgroupManager {
        self.cgroup_manager.as_ref()
    }

    /// Moves to `target` if the transition table allows it.
    ///
    /// # Errors
    ///
    /// Returns [`RtboxError::InvalidTransition`] for a move the table does
    /// not list, or [`RtboxError::Running`] when stopping a container whose
    /// init process is still alive.
    pub fn transition(&mut self, target: ContainerState) -> Result<()> {
        match self.state.check_transition(&target, || self.run_type())? {
            Verdict::Replace => {
                tracing::debug!(id = %self.id, from = self.state.name(), to = target.name(), "state changed");
                self.state = target;
            }
            Verdict::Keep => {}
        }
        Ok(())
    }

    /// Liveness as observed on the host.
    #[must_use]
    pub fn run_type(&self) -> Status {
        let Some(init) = &self.init_process else {
            return Status::Stopped;
        };
        if !init.is_alive() {
            return Status::Stopped;
        }
        // The fifo exists until the user program has been started.
        if self.root.join(EXEC_FIFO).exists() {
            return Status::Created;
        }
        Status::Running
    }

    /// Replaces the state with what the host reports.
    ///
    /// # Errors
    ///
    /// Returns an error if the freezer cannot be read or the observed state
    /// is not reachable from the current one.
    pub fn refresh_state(&mut self) -> Result<()> {
        if self.cgroup_manager.freezer_state()? == FreezerState::Frozen {
            return self.transition(ContainerState::Paused);
        }
        let target = match self.run_type() {
            Status::Created => ContainerState::Created,
            Status::Running => ContainerState::Running,
            Status::Paused | Status::Stopped => ContainerState::Stopped,
        };
        self.transition(target)
    }

    /// Tears the container down.
    ///
    /// The state decides whether teardown may proceed: a live running or
    /// paused container is refused, anything else releases every resource
    /// the container holds and ends `Stopped`, even if a cleanup step
    /// failed.
    ///
    /// # Errors
    ///
    /// Returns [`RtboxError::Running`] or [`RtboxError::Paused`] when the
    /// container is still alive, otherwise the first cleanup failure.
    pub fn destroy(&mut self) -> Result<()> {
        match self.state {
            ContainerState::Created => {
                if let Some(init) = &self.init_process {
                    // The process may already be gone.
                    if let Err(e) = init.signal(Signal::SIGKILL) {
                        tracing::debug!(id = %self.id, error = %e, "kill of init process failed");
                    }
                }
                self.teardown()
            }
            ContainerState::Running => {
                if self.run_type() == Status::Running {
                    return Err(RtboxError::Running);
                }
                self.teardown()
            }
            ContainerState::Paused => match self.run_type() {
                Status::Running | Status::Created => Err(RtboxError::Paused),
                Status::Paused | Status::Stopped => {
                    // A frozen group cannot be emptied or removed.
                    self.cgroup_manager.freeze(FreezerState::Thawed)?;
                    self.teardown()
                }
            },
            ContainerState::Stopped => self.teardown(),
            ContainerState::Restored { .. } => {
                let checkpoint = self.root.join(CHECKPOINT_DIR);
                if let Err(e) = std::fs::metadata(&checkpoint) {
                    if e.kind() != io::ErrorKind::NotFound {
                        return Err(RtboxError::io(checkpoint, e));
                    }
                }
                self.teardown()
            }
            ContainerState::Loaded { .. } => {
                self.refresh_state()?;
                self.destroy()
            }
        }
    }

    fn teardown(&mut self) -> Result<()> {
        let snapshot = self.current_oci_state();
        let result = Teardown {
            root: &self.root,
            namespaces: &self.config.namespaces,
            cgroups: self.cgroup_manager.as_mut(),
            intel_rdt: self.intel_rdt.as_deref_mut(),
            hooks: self.hooks.as_deref(),
            snapshot,
        }
        .run();
        self.init_process = None;
        self.state = ContainerState::Stopped;
        match &result {
            Ok(()) => tracing::info!(id = %self.id, "container destroyed"),
            Err(e) => tracing::warn!(id = %self.id, error = %e, "container destroyed with errors"),
        }
        result
    }

    /// Places a freshly spawned init process into the container's cgroups.
    ///
    /// # Errors
    ///
    /// Returns an error if the container is not `Created`, already has an
    /// init process, or the cgroups cannot be applied.
    pub fn attach_init(&mut self, process: Box<dyn InitProcess>) -> Result<()> {
        if self.state != ContainerState::Created || self.init_process.is_some() {
            return Err(self.invalid(Status::Created));
        }
        self.cgroup_manager.apply(process.pid())?;
        tracing::info!(id = %self.id, pid = process.pid(), "init process attached");
        self.init_process = Some(process);
        Ok(())
    }

    /// Lets the init process run the user program.
    ///
    /// # Errors
    ///
    /// Returns an error if there is no init process, the exec fifo cannot be
    /// removed, or the container is not in a startable state.
    pub fn start(&mut self) -> Result<()> {
        let Some(pid) = self.init_pid() else {
            return Err(RtboxError::NotFound {
                kind: "init process",
                id: self.id.to_string(),
            });
        };
        if self.status() != Status::Created {
            return Err(self.invalid(Status::Running));
        }
        let fifo = self.root.join(EXEC_FIFO);
        match std::fs::remove_file(&fifo) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(RtboxError::io(fifo, e)),
        }
        self.transition(ContainerState::Running)?;
        tracing::info!(id = %self.id, pid, "container started");
        Ok(())
    }

    /// Freezes every process of a created or running container.
    ///
    /// # Errors
    ///
    /// Returns an error if the container is neither created nor running, or
    /// the freezer write fails.
    pub fn pause(&mut self) -> Result<()> {
        if matches!(self.state, ContainerState::Loaded { .. }) {
            self.refresh_state()?;
        }
        match self.status() {
            Status::Created | Status::Running => {
                let _ = self
                    .state
                    .check_transition(&ContainerState::Paused, || Status::Running)?;
                self.cgroup_manager.freeze(FreezerState::Frozen)?;
                self.transition(ContainerState::Paused)?;
                tracing::info!(id = %self.id, "container paused");
                Ok(())
            }
            Status::Paused | Status::Stopped => Err(self.invalid(Status::Paused)),
        }
    }

    /// Thaws a paused container.
    ///
    /// # Errors
    ///
    /// Returns an error if the container is not paused or the freezer write
    /// fails.
    pub fn resume(&mut self) -> Result<()> {
        if matches!(self.state, ContainerState::Loaded { .. }) {
            self.refresh_state()?;
        }
        if self.state != ContainerState::Paused {
            return Err(self.invalid(Status::Running));
        }
        self.cgroup_manager.freeze(FreezerState::Thawed)?;
        self.transition(ContainerState::Running)?;
        tracing::info!(id = %self.id, "container resumed");
        Ok(())
    }

    /// Sends `signal` to the init process.
    ///
    /// # Errors
    ///
    /// Returns an error if the init process is gone or delivery fails.
    pub fn signal(&self, signal: Signal) -> Result<()> {
        match &self.init_process {
            Some(init) if self.run_type() != Status::Stopped => init.signal(signal),
            _ => Err(RtboxError::Process {
                pid: self.init_pid().unwrap_or(0),
                message: "container not running".into(),
            }),
        }
    }

    /// Applies new resource limits to a live container.
    ///
    /// # Errors
    ///
    /// Returns an error if the container is stopped or the cgroups reject
    /// the limits.
    pub fn set(&mut self, resources: Resources) -> Result<()> {
        if self.status() == Status::Stopped {
            return Err(RtboxError::Config {
                message: format!("cannot update resources of stopped container {}", self.id),
            });
        }
        self.cgroup_manager.set(&resources)?;
        self.config.resources = resources;
        tracing::info!(id = %self.id, "resources updated");
        Ok(())
    }

    /// Adopts `process` as a container restored from the checkpoint image
    /// in `image_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the container is not stopped or the cgroups
    /// cannot be applied.
    pub fn restore(&mut self, image_dir: PathBuf, process: Box<dyn InitProcess>) -> Result<()> {
        let target = ContainerState::Restored { image_dir };
        let _ = self
            .state
            .check_transition(&target, || Status::Stopped)?;
        if self.state != ContainerState::Stopped && !matches!(self.state, ContainerState::Loaded { .. }) {
            return Err(self.invalid(Status::Running));
        }
        self.cgroup_manager.apply(process.pid())?;
        tracing::info!(id = %self.id, pid = process.pid(), "container restored");
        self.init_process = Some(process);
        self.state = target;
        Ok(())
    }

    /// Persists the container so a later invocation can load it.
    ///
    /// # Errors
    ///
    /// Returns an error if the root directory or state file cannot be
    /// written.
    pub fn save_state(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root).map_err(|e| RtboxError::io(&self.root, e))?;
        let checkpoint_image = match &self.state {
            ContainerState::Restored { image_dir } => Some(image_dir.clone()),
            _ => None,
        };
        oci::save_state(
            &self.root,
            &StateEntry {
                id: self.id.clone(),
                status: self.status(),
                pid: self.init_pid(),
                pid_start_time: self.init_process.as_ref().and_then(|p| p.start_time()),
                checkpoint_image,
                created_at: self.created_at.clone(),
            },
        )
    }

    /// Point-in-time OCI state.
    #[must_use]
    pub fn current_oci_state(&self) -> OciState {
        let status = self.status();
        OciState {
            oci_version: OCI_VERSION.to_string(),
            id: self.id.to_string(),
            status,
            pid: self.init_pid().filter(|_| status != Status::Stopped),
            bundle: self.config.bundle.clone(),
            annotations: self.config.annotations.clone(),
        }
    }

    fn invalid(&self, to: Status) -> RtboxError {
        RtboxError::InvalidTransition {
            from: self.status().to_string(),
            to: to.to_string(),
        }
    }
}
