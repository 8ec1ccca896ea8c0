//! Per-core real-time runtime ledgers.
//!
//! Every ancestor group that real-time containers live under carries a
//! `cpu.rt_multi_runtime_us` ledger: for each core it tracks, the sum of the
//! real-time runtime reserved on that core by all live descendants.
//!
//! ```text
//! kubepods.slice/                      0 250000
//!                                      1 0
//! +-- kubepods-besteffort.slice/       0 250000
//!     |                                1 0
//!     +-- pod1/                        0 250000
//!         |                            1 0
//!         +-- ctr/                     0 250000      <- own record
//! ```
//!
//! Ancestor ledgers are a flat stream of `<core> <runtime>` pairs, written one
//! pair per line in ascending core order. A container's own group holds a
//! single `<cpuset> <runtime>` record naming what it reserved.
//!
//! Contribution is per named core: a container reserving `R` on cpuset
//! `0,2` adds `R` to entries `0` and `2` of every ancestor ledger and
//! subtracts it again on release. No period normalisation is applied.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rtbox_common::config::RuntimeConfig;
use rtbox_common::constants::RT_MULTI_RUNTIME_FILE;
use rtbox_common::error::{Result, RtboxError};
use rtbox_common::types::{CpuSet, Resources};

use super::fs::ControlFiles;
use super::lock::LedgerLock;

/// Ledger of an ancestor group: runtime reserved per core, in microseconds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RtLedger(BTreeMap<u32, i64>);

impl RtLedger {
    /// Parses ledger content read from `path`.
    ///
    /// # Errors
    ///
    /// Returns [`RtboxError::LedgerCorrupt`] on an odd token count, a
    /// non-integer token, a negative runtime, or a repeated core.
    pub fn parse(content: &str, path: &Path) -> Result<Self> {
        let corrupt = |reason: String| RtboxError::LedgerCorrupt {
            path: path.to_path_buf(),
            reason,
        };
        let tokens: Vec<&str> = content.split_whitespace().collect();
        if tokens.len() % 2 != 0 {
            return Err(corrupt(format!(
                "expected <core> <runtime> pairs, found {} tokens",
                tokens.len()
            )));
        }
        let mut entries = BTreeMap::new();
        for pair in tokens.chunks_exact(2) {
            let core: u32 = pair[0]
                .parse()
                .map_err(|_| corrupt(format!("bad core index {:?}", pair[0])))?;
            let runtime: i64 = pair[1]
                .parse()
                .map_err(|_| corrupt(format!("bad runtime {:?} for core {core}", pair[1])))?;
            if runtime < 0 {
                return Err(corrupt(format!("negative runtime {runtime} for core {core}")));
            }
            if entries.insert(core, runtime).is_some() {
                return Err(corrupt(format!("core {core} listed twice")));
            }
        }
        Ok(Self(entries))
    }

    /// Builds a ledger from explicit entries.
    pub fn from_entries(entries: impl IntoIterator<Item = (u32, i64)>) -> Self {
        Self(entries.into_iter().collect())
    }

    /// Runtime reserved on `core`, if the ledger tracks it.
    #[must_use]
    pub fn get(&self, core: u32) -> Option<i64> {
        self.0.get(&core).copied()
    }

    /// Iterates over `(core, runtime)` entries in core order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, i64)> + '_ {
        self.0.iter().map(|(c, r)| (*c, *r))
    }

    /// Number of tracked cores.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns whether the ledger tracks no core.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Adds `record.runtime` to every core named by the record.
    ///
    /// # Errors
    ///
    /// Returns [`RtboxError::LedgerCorrupt`] if a named core is not tracked
    /// here or the sum overflows. The ledger is unchanged on error.
    pub fn contribute(&mut self, record: &RtRecord, path: &Path) -> Result<()> {
        let mut next = self.0.clone();
        for core in record.cpus.iter() {
            let entry = next.get_mut(&core).ok_or_else(|| untracked(path, core))?;
            *entry = entry
                .checked_add(record.runtime)
                .ok_or_else(|| RtboxError::LedgerCorrupt {
                    path: path.to_path_buf(),
                    reason: format!("runtime overflow on core {core}"),
                })?;
        }
        self.0 = next;
        Ok(())
    }

    /// Subtracts `record.runtime` from every core named by the record,
    /// clamping at zero. Returns whether any entry had to be clamped.
    ///
    /// # Errors
    ///
    /// Returns [`RtboxError::LedgerCorrupt`] if a named core is not tracked.
    /// The ledger is unchanged on error.
    pub fn withdraw(&mut self, record: &RtRecord, path: &Path) -> Result<bool> {
        let mut next = self.0.clone();
        let mut clamped = false;
        for core in record.cpus.iter() {
            let entry = next.get_mut(&core).ok_or_else(|| untracked(path, core))?;
            if *entry < record.runtime {
                clamped = true;
            }
            *entry = entry.saturating_sub(record.runtime).max(0);
        }
        self.0 = next;
        Ok(clamped)
    }
}

fn untracked(path: &Path, core: u32) -> RtboxError {
    RtboxError::LedgerCorrupt {
        path: path.to_path_buf(),
        reason: format!("core {core} is not tracked by this ledger"),
    }
}

impl fmt::Display for RtLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (core, runtime) in &self.0 {
            writeln!(f, "{core} {runtime}")?;
        }
        Ok(())
    }
}

/// A container's own reservation: the cores it runs on and the runtime it
/// reserved on each of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtRecord {
    /// Reserved cores.
    pub cpus: CpuSet,
    /// Runtime reserved per core, in microseconds.
    pub runtime: i64,
}

impl RtRecord {
    /// Builds the record a container with `resources` reserves.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the runtime is not positive or the
    /// cpuset is empty or malformed.
    pub fn from_resources(resources: &Resources) -> Result<Self> {
        if resources.cpu_rt_runtime <= 0 {
            return Err(RtboxError::Config {
                message: format!(
                    "real-time runtime {} cannot be reserved, it must be positive",
                    resources.cpu_rt_runtime
                ),
            });
        }
        let cpus = resources.cpuset()?;
        if cpus.is_empty() {
            return Err(RtboxError::Config {
                message: "real-time runtime requires an explicit cpuset".into(),
            });
        }
        Ok(Self {
            cpus,
            runtime: resources.cpu_rt_runtime,
        })
    }

    /// Parses an own-group record. Empty content means nothing is reserved.
    ///
    /// # Errors
    ///
    /// Returns [`RtboxError::LedgerCorrupt`] if the content is not exactly
    /// `<cpuset> <runtime>`.
    pub fn parse(content: &str, path: &Path) -> Result<Option<Self>> {
        let tokens: Vec<&str> = content.split_whitespace().collect();
        match tokens.as_slice() {
            [] => Ok(None),
            [cpus, runtime] => {
                let corrupt = |reason: String| RtboxError::LedgerCorrupt {
                    path: path.to_path_buf(),
                    reason,
                };
                let cpus: CpuSet = cpus
                    .parse()
                    .map_err(|_| corrupt(format!("bad cpuset {cpus:?}")))?;
                let runtime: i64 = runtime
                    .parse()
                    .map_err(|_| corrupt(format!("bad runtime {runtime:?}")))?;
                Ok(Some(Self { cpus, runtime }))
            }
            _ => Err(RtboxError::LedgerCorrupt {
                path: path.to_path_buf(),
                reason: format!("expected <cpuset> <runtime>, found {} tokens", tokens.len()),
            }),
        }
    }
}

impl fmt::Display for RtRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} {}", self.cpus, self.runtime)
    }
}

/// Propagates real-time reservations of a container up its ancestor chain.
#[derive(Debug, Clone)]
pub struct RtBandwidth {
    files: Arc<dyn ControlFiles>,
    lock: Arc<dyn LedgerLock>,
    include_parent: bool,
    fixed_levels: Vec<PathBuf>,
}

impl RtBandwidth {
    /// Creates a propagator over explicit ancestor levels (innermost first).
    pub fn new(
        files: Arc<dyn ControlFiles>,
        lock: Arc<dyn LedgerLock>,
        include_parent: bool,
        fixed_levels: Vec<PathBuf>,
    ) -> Self {
        Self {
            files,
            lock,
            include_parent,
            fixed_levels,
        }
    }

    /// Creates a propagator using the installation's ancestor levels.
    pub fn from_config(
        config: &RuntimeConfig,
        files: Arc<dyn ControlFiles>,
        lock: Arc<dyn LedgerLock>,
    ) -> Self {
        Self::new(
            files,
            lock,
            config.include_parent_ledger,
            config.fixed_ledger_levels(),
        )
    }

    /// Ledger directories a container at `cgroup` contributes to,
    /// innermost first.
    #[must_use]
    pub fn levels(&self, cgroup: &Path) -> Vec<PathBuf> {
        let mut levels = Vec::with_capacity(self.fixed_levels.len() + 1);
        if self.include_parent {
            if let Some(parent) = cgroup.parent() {
                levels.push(parent.to_path_buf());
            }
        }
        for dir in &self.fixed_levels {
            if !levels.contains(dir) && dir.as_path() != cgroup {
                levels.push(dir.clone());
            }
        }
        levels
    }

    /// Reads and parses the ledger of an ancestor directory.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the ledger cannot be read or
    /// [`RtboxError::LedgerCorrupt`] if it cannot be parsed.
    pub fn read_ledger(&self, dir: &Path) -> Result<RtLedger> {
        let content = self.files.read_value(dir, RT_MULTI_RUNTIME_FILE)?;
        RtLedger::parse(&content, &dir.join(RT_MULTI_RUNTIME_FILE))
    }

    /// Reads the own record of the container group at `cgroup`.
    ///
    /// # Errors
    ///
    /// Returns [`RtboxError::LedgerCorrupt`] for an unparsable record or an
    /// I/O error other than absence.
    pub fn read_record(&self, cgroup: &Path) -> Result<Option<RtRecord>> {
        match self.files.read_value(cgroup, RT_MULTI_RUNTIME_FILE) {
            Ok(content) => RtRecord::parse(&content, &cgroup.join(RT_MULTI_RUNTIME_FILE)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Adds the reservation requested by `resources` to every ancestor
    /// ledger of `cgroup`, then writes the container's own record. A
    /// reservation already recorded for the group is withdrawn in the same
    /// update, so repeated calls replace rather than accumulate.
    ///
    /// Every ancestor ledger is read and validated before anything is
    /// written, so a corrupt ledger at any level leaves all levels and the
    /// own record untouched.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an invalid request,
    /// [`RtboxError::LedgerCorrupt`] for an unusable ledger, or the first
    /// failed read or write.
    pub fn reserve(&self, cgroup: &Path, resources: &Resources) -> Result<()> {
        let record = RtRecord::from_resources(resources)?;
        let levels = self.levels(cgroup);
        self.lock.with_lock(&mut || {
            let previous = self.read_record(cgroup)?;
            let mut updated = Vec::with_capacity(levels.len());
            for dir in &levels {
                let path = dir.join(RT_MULTI_RUNTIME_FILE);
                let mut ledger = self.read_ledger(dir)?;
                if let Some(previous) = &previous {
                    let _ = ledger.withdraw(previous, &path)?;
                }
                ledger.contribute(&record, &path)?;
                updated.push((dir, ledger));
            }
            // Outermost first: a group's budget may not exceed its parent's.
            for (dir, ledger) in updated.iter().rev() {
                self.files
                    .write_value(dir, RT_MULTI_RUNTIME_FILE, &ledger.to_string())?;
            }
            self.files
                .write_value(cgroup, RT_MULTI_RUNTIME_FILE, &record.to_string())
        })?;
        tracing::info!(
            cgroup = %cgroup.display(),
            cpus = %record.cpus,
            runtime = record.runtime,
            levels = levels.len(),
            "real-time runtime reserved"
        );
        Ok(())
    }

    /// Withdraws the reservation recorded in `cgroup` from every ancestor
    /// ledger. A group without a record reserved nothing.
    ///
    /// # Errors
    ///
    /// Returns [`RtboxError::LedgerCorrupt`] for an unusable ledger or
    /// record, or the first failed read or write.
    pub fn release(&self, cgroup: &Path) -> Result<()> {
        let levels = self.levels(cgroup);
        self.lock.with_lock(&mut || {
            let Some(record) = self.read_record(cgroup)? else {
                return Ok(());
            };
            let mut updated = Vec::with_capacity(levels.len());
            for dir in &levels {
                let path = dir.join(RT_MULTI_RUNTIME_FILE);
                let mut ledger = self.read_ledger(dir)?;
                if ledger.withdraw(&record, &path)? {
                    tracing::warn!(
                        ledger = %path.display(),
                        cpus = %record.cpus,
                        runtime = record.runtime,
                        "ledger held less than the released runtime, clamped at zero"
                    );
                }
                updated.push((dir, ledger));
            }
            // Innermost first: a parent may not drop below its children.
            for (dir, ledger) in &updated {
                self.files
                    .write_value(dir, RT_MULTI_RUNTIME_FILE, &ledger.to_string())?;
            }
            if let Err(e) = self.files.write_value(cgroup, RT_MULTI_RUNTIME_FILE, "") {
                tracing::warn!(cgroup = %cgroup.display(), error = %e, "could not clear own record");
            }
            tracing::info!(
                cgroup = %cgroup.display(),
                cpus = %record.cpus,
                runtime = record.runtime,
                "real-time runtime released"
            );
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cgroup::fs::CgroupFs;
    use crate::cgroup::lock::CallerSerialized;

    struct Tree {
        _dir: tempfile::TempDir,
        cluster: PathBuf,
        qos: PathBuf,
        pod: PathBuf,
    }

    impl Tree {
        fn new(cores: u32) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let cluster = dir.path().join("kubepods.slice");
            let qos = cluster.join("kubepods-besteffort.slice");
            let pod = qos.join("pod1");
            std::fs::create_dir_all(&pod).unwrap();
            let empty = RtLedger::from_entries((0..cores).map(|c| (c, 0))).to_string();
            for level in [&cluster, &qos, &pod] {
                std::fs::write(level.join(RT_MULTI_RUNTIME_FILE), &empty).unwrap();
            }
            Self {
                _dir: dir,
                cluster,
                qos,
                pod,
            }
        }

        fn bandwidth(&self) -> RtBandwidth {
            RtBandwidth::new(
                Arc::new(CgroupFs),
                Arc::new(CallerSerialized),
                true,
                vec![self.qos.clone(), self.cluster.clone()],
            )
        }

        fn container(&self, name: &str) -> PathBuf {
            let path = self.pod.join(name);
            std::fs::create_dir_all(&path).unwrap();
            path
        }

        fn ledger(&self, dir: &Path) -> String {
            std::fs::read_to_string(dir.join(RT_MULTI_RUNTIME_FILE)).unwrap()
        }
    }

    fn rt(runtime: i64, cpus: &str) -> Resources {
        Resources {
            cpu_rt_runtime: runtime,
            cpuset_cpus: cpus.into(),
            ..Resources::default()
        }
    }

    #[test]
    fn ledger_parses_pairs_on_one_line_or_many() {
        let path = Path::new("/l");
        let a = RtLedger::parse("0 10 1 20 ", path).unwrap();
        let b = RtLedger::parse("0 10\n1 20\n", path).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.get(1), Some(20));
        assert_eq!(a.to_string(), "0 10\n1 20\n");
    }

    #[test]
    fn ledger_rejects_malformed_content() {
        let path = Path::new("/l");
        for bad in ["0 10 1", "0 x", "a 1", "0 -5", "0 1 0 2"] {
            assert!(
                matches!(RtLedger::parse(bad, path), Err(RtboxError::LedgerCorrupt { .. })),
                "{bad:?} should be corrupt"
            );
        }
    }

    #[test]
    fn contribute_to_untracked_core_leaves_ledger_unchanged() {
        let path = Path::new("/l");
        let mut ledger = RtLedger::from_entries([(0, 5), (1, 5)]);
        let record = RtRecord {
            cpus: CpuSet::from_cores([0, 3]),
            runtime: 10,
        };
        assert!(ledger.contribute(&record, path).is_err());
        assert_eq!(ledger, RtLedger::from_entries([(0, 5), (1, 5)]));
    }

    #[test]
    fn withdraw_clamps_at_zero() {
        let path = Path::new("/l");
        let mut ledger = RtLedger::from_entries([(0, 5), (1, 50)]);
        let record = RtRecord {
            cpus: CpuSet::from_cores([0, 1]),
            runtime: 10,
        };
        assert!(ledger.withdraw(&record, path).unwrap());
        assert_eq!(ledger, RtLedger::from_entries([(0, 0), (1, 40)]));
    }

    #[test]
    fn record_round_trips_canonical_cpuset() {
        let path = Path::new("/r");
        let record = RtRecord::parse("0-2 95000\n", path).unwrap().unwrap();
        assert_eq!(record.to_string(), "0,1,2 95000\n");
        assert_eq!(RtRecord::parse("  \n", path).unwrap(), None);
        assert!(RtRecord::parse("0,1", path).is_err());
    }

    #[test]
    fn record_requires_positive_runtime_and_cpuset() {
        assert!(RtRecord::from_resources(&rt(0, "0")).is_err());
        assert!(RtRecord::from_resources(&rt(-1, "0")).is_err());
        assert!(RtRecord::from_resources(&rt(1000, "")).is_err());
    }

    #[test]
    fn levels_walk_outward_from_pod() {
        let tree = Tree::new(2);
        let ctr = tree.container("ctr");
        assert_eq!(
            tree.bandwidth().levels(&ctr),
            vec![tree.pod.clone(), tree.qos.clone(), tree.cluster.clone()]
        );
    }

    #[test]
    fn reserve_adds_to_every_level_and_writes_own_record() {
        let tree = Tree::new(4);
        let ctr = tree.container("ctr");
        tree.bandwidth().reserve(&ctr, &rt(30_000, "0,2")).unwrap();

        for level in [&tree.pod, &tree.qos, &tree.cluster] {
            assert_eq!(tree.ledger(level), "0 30000\n1 0\n2 30000\n3 0\n");
        }
        assert_eq!(tree.ledger(&ctr), "0,2 30000\n");
    }

    #[test]
    fn repeated_reserve_replaces_previous_reservation() {
        let tree = Tree::new(4);
        let ctr = tree.container("ctr");
        let bw = tree.bandwidth();
        bw.reserve(&ctr, &rt(30_000, "0,2")).unwrap();
        bw.reserve(&ctr, &rt(10_000, "1")).unwrap();

        for level in [&tree.pod, &tree.qos, &tree.cluster] {
            assert_eq!(tree.ledger(level), "0 0\n1 10000\n2 0\n3 0\n");
        }
        assert_eq!(tree.ledger(&ctr), "1 10000\n");
    }

    #[test]
    fn disjoint_reservations_commute() {
        let run = |first: (&str, &str), second: (&str, &str)| {
            let tree = Tree::new(4);
            let bw = tree.bandwidth();
            for (name, cpus) in [first, second] {
                let ctr = tree.container(name);
                bw.reserve(&ctr, &rt(if name == "a" { 10_000 } else { 20_000 }, cpus))
                    .unwrap();
            }
            (tree.ledger(&tree.pod), tree.ledger(&tree.qos), tree.ledger(&tree.cluster))
        };
        let ab = run(("a", "0,1"), ("b", "2,3"));
        let ba = run(("b", "2,3"), ("a", "0,1"));
        assert_eq!(ab, ba);
        assert_eq!(ab.2, "0 10000\n1 10000\n2 20000\n3 20000\n");
    }

    #[test]
    fn corrupt_ancestor_aborts_before_any_write() {
        let tree = Tree::new(2);
        let ctr = tree.container("ctr");
        std::fs::write(tree.qos.join(RT_MULTI_RUNTIME_FILE), "0 0 1").unwrap();

        let err = tree.bandwidth().reserve(&ctr, &rt(5_000, "1")).unwrap_err();
        assert!(matches!(err, RtboxError::LedgerCorrupt { .. }));
        assert_eq!(tree.ledger(&tree.pod), "0 0\n1 0\n");
        assert_eq!(tree.ledger(&tree.cluster), "0 0\n1 0\n");
        assert_eq!(tree.ledger(&tree.qos), "0 0 1");
        assert!(!ctr.join(RT_MULTI_RUNTIME_FILE).exists());
    }

    #[test]
    fn release_undoes_reservation_and_is_idempotent() {
        let tree = Tree::new(2);
        let bw = tree.bandwidth();
        let a = tree.container("a");
        let b = tree.container("b");
        bw.reserve(&a, &rt(10_000, "0")).unwrap();
        bw.reserve(&b, &rt(7_000, "0,1")).unwrap();

        bw.release(&a).unwrap();
        bw.release(&a).unwrap();
        for level in [&tree.pod, &tree.qos, &tree.cluster] {
            assert_eq!(tree.ledger(level), "0 7000\n1 7000\n");
        }
    }

    #[test]
    fn release_without_record_touches_nothing() {
        let tree = Tree::new(2);
        let ctr = tree.container("ctr");
        std::fs::write(tree.pod.join(RT_MULTI_RUNTIME_FILE), "garbage").unwrap();
        tree.bandwidth().release(&ctr).unwrap();
    }
}
