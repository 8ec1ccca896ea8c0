//! OCI state snapshots and the persisted per-container state file.
//!
//! The snapshot is what hooks receive on stdin; the state file lets a later
//! runtime invocation rehydrate a container it did not create.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use rtbox_common::constants::STATE_FILE;
use rtbox_common::error::{Result, RtboxError};
use rtbox_common::types::{ContainerId, Status};
use serde::{Deserialize, Serialize};

/// Point-in-time container state in the OCI runtime-spec shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OciState {
    /// Runtime-spec version.
    pub oci_version: String,
    /// Container identifier.
    pub id: String,
    /// Lifecycle status.
    pub status: Status,
    /// Host pid of the init process.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<i32>,
    /// Bundle directory.
    pub bundle: PathBuf,
    /// User annotations.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// Persistent record of a container, stored as `state.json` in its root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateEntry {
    /// Container identifier.
    pub id: ContainerId,
    /// Status at the time of saving.
    pub status: Status,
    /// PID of the init process (if any).
    pub pid: Option<i32>,
    /// Kernel start time of the init process, guarding against pid reuse.
    pub pid_start_time: Option<u64>,
    /// Checkpoint image directory when the container was restored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_image: Option<PathBuf>,
    /// ISO-8601 timestamp of creation.
    pub created_at: String,
}

/// Loads the state file of the container rooted at `root`.
///
/// # Errors
///
/// Returns [`RtboxError::NotFound`] if no state was saved, or an error if
/// the file cannot be read or parsed.
pub fn load_state(root: &Path) -> Result<StateEntry> {
    let path = root.join(STATE_FILE);
    tracing::debug!(path = %path.display(), "loading container state");
    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(RtboxError::NotFound {
                kind: "container state",
                id: root.display().to_string(),
            });
        }
        Err(e) => return Err(RtboxError::io(path, e)),
    };
    Ok(serde_json::from_str(&content)?)
}

/// Persists the state file atomically: written beside the target, then
/// renamed over it.
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub fn save_state(root: &Path, entry: &StateEntry) -> Result<()> {
    let path = root.join(STATE_FILE);
    let tmp = root.join(format!(".{STATE_FILE}.tmp"));
    let json = serde_json::to_vec_pretty(entry)?;
    std::fs::write(&tmp, json).map_err(|e| RtboxError::io(&tmp, e))?;
    std::fs::rename(&tmp, &path).map_err(|e| RtboxError::io(&path, e))?;
    tracing::debug!(path = %path.display(), status = %entry.status, "container state saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> StateEntry {
        StateEntry {
            id: ContainerId::new("ctr-1"),
            status: Status::Running,
            pid: Some(4242),
            pid_start_time: Some(99),
            checkpoint_image: None,
            created_at: "2026-01-01T00:00:00Z".into(),
        }
    }

    #[test]
    fn saved_state_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        save_state(dir.path(), &entry()).unwrap();
        assert_eq!(load_state(dir.path()).unwrap(), entry());
        assert!(!dir.path().join(".state.json.tmp").exists());
    }

    #[test]
    fn missing_state_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_state(dir.path()),
            Err(RtboxError::NotFound { .. })
        ));
    }

    #[test]
    fn oci_state_uses_camel_case_field_names() {
        let state = OciState {
            oci_version: "1.0.2".into(),
            id: "ctr".into(),
            status: Status::Stopped,
            pid: None,
            bundle: PathBuf::from("/bundles/ctr"),
            annotations: BTreeMap::new(),
        };
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["ociVersion"], "1.0.2");
        assert_eq!(json["status"], "stopped");
        assert!(json.get("pid").is_none());
    }
}
