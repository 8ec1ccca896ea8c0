//! `rtbox ledger`: inspect and verify real-time runtime ledgers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Subcommand};
use rtbox_common::config::RuntimeConfig;
use rtbox_common::error::Result;
use rtbox_core::cgroup::fs::{CgroupFs, ControlFiles};
use rtbox_core::cgroup::ledger::RtBandwidth;
use rtbox_core::cgroup::lock::CallerSerialized;
use serde::Serialize;

use crate::output;

/// Arguments for the `ledger` command.
#[derive(Args, Debug)]
pub struct LedgerArgs {
    /// Ledger operation.
    #[command(subcommand)]
    pub command: LedgerCommand,
}

/// Ledger operations.
#[derive(Subcommand, Debug)]
pub enum LedgerCommand {
    /// Print the per-core ledger of an ancestor group.
    Show {
        /// Group directory, absolute or relative to the cpu controller mount.
        dir: PathBuf,
        /// Print the group's own reservation record instead.
        #[arg(long)]
        record: bool,
    },
    /// Verify that each container group's reservation is covered by every
    /// ancestor ledger above it.
    Check {
        /// Container group directories.
        #[arg(required = true)]
        dirs: Vec<PathBuf>,
    },
}

/// A problem found while checking a reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    /// Container group that was checked.
    pub cgroup: PathBuf,
    /// Ancestor level the problem was found at.
    pub level: PathBuf,
    /// What is wrong.
    pub problem: String,
}

/// Executes the `ledger` command.
///
/// # Errors
///
/// Returns an error if a ledger cannot be read, or if `check` finds any
/// reservation that is not covered.
pub fn execute(args: LedgerArgs, config: &RuntimeConfig, json: bool) -> anyhow::Result<()> {
    let files: Arc<dyn ControlFiles> = Arc::new(CgroupFs);
    let rt = RtBandwidth::from_config(config, files, Arc::new(CallerSerialized));
    match args.command {
        LedgerCommand::Show { dir, record } => {
            show(&rt, &super::resolve_cgroup(config, &dir), record, json)
        }
        LedgerCommand::Check { dirs } => {
            let mut findings = Vec::new();
            for dir in &dirs {
                let cgroup = super::resolve_cgroup(config, dir);
                let found = check_reservation(&rt, &cgroup)?;
                if !json {
                    report(&cgroup, &found);
                }
                findings.extend(found);
            }
            if json {
                output::print_json(&findings)?;
            }
            if !findings.is_empty() {
                anyhow::bail!("{} ledger problem(s) found", findings.len());
            }
            Ok(())
        }
    }
}

fn show(rt: &RtBandwidth, dir: &Path, record: bool, json: bool) -> anyhow::Result<()> {
    if record {
        let Some(record) = rt.read_record(dir)? else {
            output::print_line("no reservation");
            return Ok(());
        };
        if json {
            return output::print_json(&serde_json::json!({
                "cpus": record.cpus.to_string(),
                "runtime": record.runtime,
            }));
        }
        output::print_table(
            &["CPUS", "RUNTIME"],
            &[vec![record.cpus.to_string(), record.runtime.to_string()]],
        );
        return Ok(());
    }

    let ledger = rt.read_ledger(dir)?;
    if json {
        let entries: Vec<_> = ledger
            .iter()
            .map(|(core, runtime)| serde_json::json!({ "core": core, "runtime": runtime }))
            .collect();
        return output::print_json(&entries);
    }
    let rows: Vec<Vec<String>> = ledger
        .iter()
        .map(|(core, runtime)| vec![core.to_string(), runtime.to_string()])
        .collect();
    output::print_table(&["CORE", "RUNTIME"], &rows);
    Ok(())
}

fn report(cgroup: &Path, findings: &[Finding]) {
    if findings.is_empty() {
        output::print_line(&format!("{}: ok", cgroup.display()));
    }
    for f in findings {
        output::print_line(&format!(
            "{}: {}: {}",
            cgroup.display(),
            f.level.display(),
            f.problem
        ));
    }
}

/// Compares the reservation recorded in `cgroup` against every ancestor
/// ledger it should have been added to.
///
/// # Errors
///
/// Returns an error only if the own record cannot be read; unusable
/// ancestor ledgers are reported as findings.
pub fn check_reservation(rt: &RtBandwidth, cgroup: &Path) -> Result<Vec<Finding>> {
    let Some(record) = rt.read_record(cgroup)? else {
        return Ok(Vec::new());
    };
    let mut findings = Vec::new();
    for level in rt.levels(cgroup) {
        let mut found = |problem: String| {
            findings.push(Finding {
                cgroup: cgroup.to_path_buf(),
                level: level.clone(),
                problem,
            });
        };
        let ledger = match rt.read_ledger(&level) {
            Ok(ledger) => ledger,
            Err(e) => {
                found(e.to_string());
                continue;
            }
        };
        for core in record.cpus.iter() {
            match ledger.get(core) {
                None => found(format!("core {core} is not tracked")),
                Some(held) if held < record.runtime => found(format!(
                    "core {core} holds {held}, less than the {} reserved",
                    record.runtime
                )),
                Some(_) => {}
            }
        }
    }
    Ok(findings)
}
