//! `rtbox stats`: CFS throttling counters of a cgroup.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use rtbox_common::config::RuntimeConfig;
use rtbox_core::cgroup::cpu::CpuGroup;
use rtbox_core::cgroup::fs::{CgroupFs, ControlFiles};
use rtbox_core::cgroup::ledger::RtBandwidth;
use rtbox_core::cgroup::lock::CallerSerialized;

use crate::output;

/// Arguments for the `stats` command.
#[derive(Args, Debug)]
pub struct StatsArgs {
    /// Cgroup directory, absolute or relative to the cpu controller mount.
    pub cgroup: PathBuf,
}

/// Executes the `stats` command.
///
/// # Errors
///
/// Returns an error if `cpu.stat` exists but cannot be read or parsed.
pub fn execute(args: &StatsArgs, config: &RuntimeConfig, json: bool) -> anyhow::Result<()> {
    let path = super::resolve_cgroup(config, &args.cgroup);
    let files: Arc<dyn ControlFiles> = Arc::new(CgroupFs);
    let rt = RtBandwidth::from_config(config, files.clone(), Arc::new(CallerSerialized));
    let stats = CpuGroup::new(files, rt).get_stats(&path)?;
    tracing::debug!(path = %path.display(), ?stats, "cpu stats read");

    if json {
        return output::print_json(&stats);
    }
    output::print_table(
        &["PERIODS", "THROTTLED", "THROTTLED TIME"],
        &[vec![
            stats.periods.to_string(),
            stats.throttled_periods.to_string(),
            output::format_duration_ns(stats.throttled_time),
        ]],
    );
    Ok(())
}
