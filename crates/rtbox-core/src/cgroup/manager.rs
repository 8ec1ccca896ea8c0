//! Filesystem [`CgroupManager`] for the v1 per-controller hierarchy.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rtbox_common::config::RuntimeConfig;
use rtbox_common::constants::{CGROUP_PROCS_FILE, FREEZER_STATE_FILE};
use rtbox_common::error::{Result, RtboxError};
use rtbox_common::types::Resources;

use super::cpu::CpuGroup;
use super::fs::{self, ControlFiles};
use super::{CgroupManager, FreezerState};

/// Freezer controller name.
pub const FREEZER: &str = "freezer";

/// Handle to the cgroups of a specific container.
#[derive(Debug)]
pub struct FsManager {
    paths: BTreeMap<String, PathBuf>,
    cpu: CpuGroup,
    files: Arc<dyn ControlFiles>,
    resources: Resources,
}

impl FsManager {
    /// Places the container's groups at `relative` below each controller's
    /// mount point.
    pub fn new(
        config: &RuntimeConfig,
        relative: &Path,
        controllers: &[&str],
        cpu: CpuGroup,
        files: Arc<dyn ControlFiles>,
        resources: Resources,
    ) -> Self {
        let paths = controllers
            .iter()
            .map(|name| {
                let mount = if *name == CpuGroup::NAME {
                    config.cpu_mount()
                } else {
                    config.cgroup_root.join(name)
                };
                ((*name).to_string(), mount.join(relative))
            })
            .collect();
        Self::with_paths(paths, cpu, files, resources)
    }

    /// Uses explicit group directories, keyed by controller name.
    pub fn with_paths(
        paths: BTreeMap<String, PathBuf>,
        cpu: CpuGroup,
        files: Arc<dyn ControlFiles>,
        resources: Resources,
    ) -> Self {
        Self {
            paths,
            cpu,
            files,
            resources,
        }
    }

    /// Limits most recently applied.
    #[must_use]
    pub const fn resources(&self) -> &Resources {
        &self.resources
    }

    fn freezer_path(&self) -> Result<&Path> {
        self.paths
            .get(FREEZER)
            .map(PathBuf::as_path)
            .ok_or_else(|| RtboxError::Config {
                message: "cannot toggle freezer: cgroups not configured for container".into(),
            })
    }

    fn membership_root(&self) -> Option<&Path> {
        self.paths
            .get(FREEZER)
            .or_else(|| self.paths.get(CpuGroup::NAME))
            .or_else(|| self.paths.values().next())
            .map(PathBuf::as_path)
    }
}

impl CgroupManager for FsManager {
    fn paths(&self) -> BTreeMap<String, PathBuf> {
        self.paths.clone()
    }

    fn apply(&mut self, pid: i32) -> Result<()> {
        for (name, path) in &self.paths {
            if name == CpuGroup::NAME {
                self.cpu.apply(path, &self.resources, pid)?;
            } else {
                std::fs::create_dir_all(path).map_err(|e| RtboxError::io(path, e))?;
                fs::write_cgroup_proc(self.files.as_ref(), path, pid)?;
            }
        }
        tracing::info!(pid, groups = self.paths.len(), "cgroups applied");
        Ok(())
    }

    fn set(&mut self, resources: &Resources) -> Result<()> {
        if let Some(path) = self.paths.get(CpuGroup::NAME) {
            self.cpu.set(path, resources)?;
        }
        self.resources = resources.clone();
        Ok(())
    }

    fn destroy(&mut self) -> Result<()> {
        let mut first_err = None;
        if let Some(path) = self.paths.get(CpuGroup::NAME) {
            if let Err(e) = self.cpu.release_rt(path) {
                tracing::warn!(path = %path.display(), error = %e, "real-time release failed");
                first_err = Some(e);
            }
        }
        for path in self.paths.values() {
            if let Err(e) = fs::remove_cgroup_dir(path) {
                tracing::warn!(path = %path.display(), error = %e, "cgroup removal failed");
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
        tracing::info!(groups = self.paths.len(), "cgroups destroyed");
        first_err.map_or(Ok(()), Err)
    }

    fn freeze(&mut self, state: FreezerState) -> Result<()> {
        let path = self.freezer_path()?;
        self.files
            .write_value(path, FREEZER_STATE_FILE, state.as_str())?;
        tracing::info!(path = %path.display(), %state, "freezer toggled");
        Ok(())
    }

    fn freezer_state(&self) -> Result<FreezerState> {
        let Some(path) = self.paths.get(FREEZER) else {
            return Ok(FreezerState::Thawed);
        };
        match self.files.read(path, FREEZER_STATE_FILE) {
            Ok(content) => content.parse(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(FreezerState::Thawed),
            Err(e) => Err(RtboxError::io(path.join(FREEZER_STATE_FILE), e)),
        }
    }

    fn pids(&self) -> Result<Vec<i32>> {
        let mut pids = Vec::new();
        if let Some(root) = self.membership_root() {
            collect_pids(self.files.as_ref(), root, &mut pids)?;
        }
        pids.sort_unstable();
        pids.dedup();
        Ok(pids)
    }
}

fn collect_pids(files: &dyn ControlFiles, dir: &Path, pids: &mut Vec<i32>) -> Result<()> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(RtboxError::io(dir, e)),
    };
    match files.read(dir, CGROUP_PROCS_FILE) {
        Ok(content) => {
            for line in content.lines().map(str::trim).filter(|l| !l.is_empty()) {
                // 0 and negative values would address process groups when signalled.
                let pid = line.parse::<i32>().ok().filter(|&pid| pid > 0).ok_or_else(|| {
                    RtboxError::Parse {
                        path: dir.to_path_buf(),
                        file: CGROUP_PROCS_FILE.to_string(),
                        line: line.to_string(),
                    }
                })?;
                pids.push(pid);
            }
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(RtboxError::io(dir.join(CGROUP_PROCS_FILE), e)),
    }
    for entry in entries {
        let entry = entry.map_err(|e| RtboxError::io(dir, e))?;
        if entry.file_type().map_err(|e| RtboxError::io(entry.path(), e))?.is_dir() {
            collect_pids(files, &entry.path(), pids)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use rtbox_common::constants::RT_MULTI_RUNTIME_FILE;

    use super::*;
    use crate::cgroup::fs::CgroupFs;
    use crate::cgroup::ledger::RtBandwidth;
    use crate::cgroup::lock::CallerSerialized;

    fn manager(root: &Path, resources: Resources) -> FsManager {
        let config = RuntimeConfig {
            cgroup_root: root.to_path_buf(),
            rt_ancestors: Vec::new(),
            ..RuntimeConfig::default()
        };
        let files: Arc<dyn ControlFiles> = Arc::new(CgroupFs);
        let rt = RtBandwidth::from_config(&config, files.clone(), Arc::new(CallerSerialized));
        let cpu = CpuGroup::new(files.clone(), rt);
        FsManager::new(
            &config,
            Path::new("pod1/ctr"),
            &[CpuGroup::NAME, FREEZER],
            cpu,
            files,
            resources,
        )
    }

    #[test]
    fn paths_follow_controller_mounts() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path(), Resources::default());
        let paths = m.paths();
        assert_eq!(paths["cpu"], dir.path().join("cpu,cpuacct/pod1/ctr"));
        assert_eq!(paths["freezer"], dir.path().join("freezer/pod1/ctr"));
    }

    #[test]
    fn apply_registers_pid_in_every_controller() {
        let dir = tempfile::tempdir().unwrap();
        let mut m = manager(dir.path(), Resources::default());
        m.apply(77).unwrap();
        for path in m.paths().values() {
            assert_eq!(std::fs::read_to_string(path.join("cgroup.procs")).unwrap(), "77");
        }
        assert_eq!(m.pids().unwrap(), vec![77]);
    }

    #[test]
    fn pids_walk_nested_groups() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path(), Resources::default());
        let freezer = &m.paths()["freezer"];
        std::fs::create_dir_all(freezer.join("sub")).unwrap();
        std::fs::write(freezer.join("cgroup.procs"), "10\n11\n").unwrap();
        std::fs::write(freezer.join("sub").join("cgroup.procs"), "12\n").unwrap();
        assert_eq!(m.pids().unwrap(), vec![10, 11, 12]);
    }

    #[test]
    fn pids_reject_non_positive_entries() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path(), Resources::default());
        let freezer = &m.paths()["freezer"];
        std::fs::create_dir_all(freezer).unwrap();
        for bad in ["-1", "0"] {
            std::fs::write(freezer.join("cgroup.procs"), format!("10\n{bad}\n")).unwrap();
            match m.pids().unwrap_err() {
                RtboxError::Parse { line, .. } => assert_eq!(line, bad),
                other => panic!("unexpected error: {other:?}"),
            }
        }
    }

    #[test]
    fn freezer_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut m = manager(dir.path(), Resources::default());
        assert_eq!(m.freezer_state().unwrap(), FreezerState::Thawed);
        m.apply(5).unwrap();
        m.freeze(FreezerState::Frozen).unwrap();
        assert_eq!(m.freezer_state().unwrap(), FreezerState::Frozen);
        m.freeze(FreezerState::Thawed).unwrap();
        assert_eq!(m.freezer_state().unwrap(), FreezerState::Thawed);
    }

    #[test]
    fn freeze_without_freezer_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path(), Resources::default());
        let mut cpu_only = FsManager::with_paths(
            BTreeMap::from([("cpu".to_string(), dir.path().join("cpu"))]),
            m.cpu.clone(),
            Arc::new(CgroupFs),
            Resources::default(),
        );
        assert!(matches!(
            cpu_only.freeze(FreezerState::Frozen),
            Err(RtboxError::Config { .. })
        ));
    }

    #[test]
    fn destroy_releases_reservation_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let pod = dir.path().join("cpu,cpuacct/pod1");
        std::fs::create_dir_all(&pod).unwrap();
        std::fs::write(pod.join(RT_MULTI_RUNTIME_FILE), "0 0\n1 0\n").unwrap();
        let resources = Resources {
            cpu_rt_runtime: 20_000,
            cpuset_cpus: "1".into(),
            ..Resources::default()
        };
        let mut m = manager(dir.path(), resources);
        m.apply(9).unwrap();
        assert_eq!(
            std::fs::read_to_string(pod.join(RT_MULTI_RUNTIME_FILE)).unwrap(),
            "0 0\n1 20000\n"
        );

        m.destroy().unwrap();
        assert_eq!(
            std::fs::read_to_string(pod.join(RT_MULTI_RUNTIME_FILE)).unwrap(),
            "0 0\n1 0\n"
        );
        for path in m.paths().values() {
            assert!(!path.exists());
        }
        m.destroy().unwrap();
    }
}
