//! `rtbox state`: saved state of a container and whether its init process
//! is still alive.

use std::path::{Path, PathBuf};

use clap::Args;
use rtbox_common::config::RuntimeConfig;
use rtbox_runtime::oci::{self, StateEntry};
use rtbox_runtime::process::{HostProcess, InitProcess};
use serde::Serialize;

use crate::output;

/// Arguments for the `state` command.
#[derive(Args, Debug)]
pub struct StateArgs {
    /// Container root directory, or a container id below the state root.
    pub container: PathBuf,
}

#[derive(Debug, Serialize)]
struct Report<'a> {
    #[serde(flatten)]
    entry: &'a StateEntry,
    alive: bool,
}

/// Executes the `state` command.
///
/// # Errors
///
/// Returns an error if no state was saved for the container.
pub fn execute(args: &StateArgs, config: &RuntimeConfig, json: bool) -> anyhow::Result<()> {
    let root = container_root(config, &args.container);
    let entry = oci::load_state(&root)?;
    let alive = entry.pid.is_some_and(|pid| {
        HostProcess::with_start_time(pid, entry.pid_start_time).is_alive()
    });

    if json {
        return output::print_json(&Report {
            entry: &entry,
            alive,
        });
    }
    output::print_table(
        &["ID", "STATUS", "PID", "ALIVE", "CREATED"],
        &[vec![
            entry.id.to_string(),
            entry.status.to_string(),
            entry
                .pid
                .map_or_else(|| "-".to_string(), |pid| pid.to_string()),
            alive.to_string(),
            entry.created_at.clone(),
        ]],
    );
    if let Some(image) = &entry.checkpoint_image {
        output::print_line(&format!("restored from {}", image.display()));
    }
    Ok(())
}

fn container_root(config: &RuntimeConfig, container: &Path) -> PathBuf {
    if container.is_absolute() || container.components().count() > 1 {
        container.to_path_buf()
    } else {
        config.container_root(&container.to_string_lossy())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_id_resolves_below_state_root() {
        let config = RuntimeConfig::default();
        assert_eq!(
            container_root(&config, Path::new("ctr-1")),
            PathBuf::from("/run/rtbox/ctr-1")
        );
        assert_eq!(
            container_root(&config, Path::new("/var/lib/ctr")),
            PathBuf::from("/var/lib/ctr")
        );
    }
}
