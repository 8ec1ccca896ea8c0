//! Container lifecycle states and the transition table.
//!
//! | From     | Accepted targets                                    |
//! |----------|-----------------------------------------------------|
//! | Stopped  | Running, Restored                                   |
//! | Running  | Stopped (only once the init process is gone), Paused|
//! | Created  | Running, Paused, Stopped                            |
//! | Paused   | Running, Stopped                                    |
//! | Restored | Stopped, Running (accepted, state kept)             |
//! | Loaded   | anything, unchecked                                 |
//!
//! A target of the same kind as the current state is always accepted and
//! changes nothing.

use std::mem;
use std::path::PathBuf;

use rtbox_common::error::{Result, RtboxError};
use rtbox_common::types::Status;

/// Current state of a container. Exactly one is held per container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerState {
    /// Init process exists, user program not started.
    Created,
    /// User program executing.
    Running,
    /// Processes frozen.
    Paused,
    /// Torn down or never started.
    Stopped,
    /// Running from a checkpoint image. Treated as already being in any
    /// running or stopped target until a refresh replaces it.
    Restored {
        /// Directory of the checkpoint image.
        image_dir: PathBuf,
    },
    /// Rehydrated from saved state; accepts whatever live inspection finds.
    Loaded {
        /// Status recorded when the state was saved.
        status: Status,
    },
}

/// Outcome of an accepted transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Verdict {
    /// Replace the current state with the target.
    Replace,
    /// Accept the request but keep the current state.
    Keep,
}

impl ContainerState {
    /// Externally visible status.
    #[must_use]
    pub const fn status(&self) -> Status {
        match self {
            Self::Created => Status::Created,
            Self::Running | Self::Restored { .. } => Status::Running,
            Self::Paused => Status::Paused,
            Self::Stopped => Status::Stopped,
            Self::Loaded { status } => *status,
        }
    }

    /// Name of the variant, for logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
            Self::Restored { .. } => "restored",
            Self::Loaded { .. } => "loaded",
        }
    }

    fn same_kind(&self, other: &Self) -> bool {
        mem::discriminant(self) == mem::discriminant(other)
    }

    /// Decides whether `target` may follow this state. `run_type` reports
    /// the liveness of the init process and is only consulted when leaving
    /// `Running` for `Stopped`.
    pub(crate) fn check_transition(
        &self,
        target: &Self,
        run_type: impl FnOnce() -> Status,
    ) -> Result<Verdict> {
        use ContainerState as S;

        match (self, target) {
            (S::Loaded { .. }, _) => Ok(Verdict::Replace),
            (from, to) if from.same_kind(to) => Ok(Verdict::Keep),
            (S::Stopped, S::Running | S::Restored { .. })
            | (S::Running, S::Paused)
            | (S::Created, S::Running | S::Paused | S::Stopped)
            | (S::Paused, S::Running | S::Stopped) => Ok(Verdict::Replace),
            (S::Running, S::Stopped) => {
                if run_type() == Status::Running {
                    Err(RtboxError::Running)
                } else {
                    Ok(Verdict::Replace)
                }
            }
            (S::Restored { .. }, S::Stopped | S::Running) => Ok(Verdict::Keep),
            (from, to) => Err(RtboxError::InvalidTransition {
                from: from.status().to_string(),
                to: to.status().to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all() -> Vec<ContainerState> {
        vec![
            ContainerState::Created,
            ContainerState::Running,
            ContainerState::Paused,
            ContainerState::Stopped,
            ContainerState::Restored {
                image_dir: PathBuf::from("/ckpt"),
            },
            ContainerState::Loaded {
                status: Status::Running,
            },
        ]
    }

    fn accepted(from: &ContainerState, to: &ContainerState) -> Option<Verdict> {
        use ContainerState as S;
        match (from, to) {
            (S::Loaded { .. }, _) => Some(Verdict::Replace),
            _ if from.name() == to.name() => Some(Verdict::Keep),
            (S::Stopped, S::Running | S::Restored { .. })
            | (S::Running, S::Stopped | S::Paused)
            | (S::Created, S::Running | S::Paused | S::Stopped)
            | (S::Paused, S::Running | S::Stopped) => Some(Verdict::Replace),
            (S::Restored { .. }, S::Stopped | S::Running) => Some(Verdict::Keep),
            _ => None,
        }
    }

    #[test]
    fn every_pair_follows_the_table() {
        for from in all() {
            for to in all() {
                let got = from.check_transition(&to, || Status::Stopped);
                match accepted(&from, &to) {
                    Some(verdict) => assert_eq!(
                        got.unwrap(),
                        verdict,
                        "{} -> {}",
                        from.name(),
                        to.name()
                    ),
                    None => match got {
                        Err(RtboxError::InvalidTransition { from: f, to: t }) => {
                            assert_eq!(f, from.status().to_string());
                            assert_eq!(t, to.status().to_string());
                        }
                        other => panic!("{} -> {}: {other:?}", from.name(), to.name()),
                    },
                }
            }
        }
    }

    #[test]
    fn running_to_stopped_refused_while_process_lives() {
        let err = ContainerState::Running
            .check_transition(&ContainerState::Stopped, || Status::Running)
            .unwrap_err();
        assert!(matches!(err, RtboxError::Running));
    }

    #[test]
    fn liveness_only_consulted_when_leaving_running_for_stopped() {
        let verdict = ContainerState::Created
            .check_transition(&ContainerState::Stopped, || {
                panic!("liveness must not be consulted")
            })
            .unwrap();
        assert_eq!(verdict, Verdict::Replace);
    }

    #[test]
    fn restored_reports_running_and_loaded_reports_wrapped() {
        let restored = ContainerState::Restored {
            image_dir: PathBuf::from("/ckpt"),
        };
        assert_eq!(restored.status(), Status::Running);
        let loaded = ContainerState::Loaded {
            status: Status::Paused,
        };
        assert_eq!(loaded.status(), Status::Paused);
    }

    #[test]
    fn invalid_transition_names_statuses() {
        let err = ContainerState::Paused
            .check_transition(&ContainerState::Created, || Status::Stopped)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid state transition from paused to created"
        );
    }
}
