//! Lifecycle hooks.
//!
//! A hook is an executable run with the container's OCI state as JSON on
//! stdin. The lifecycle core only triggers the poststop set, after a
//! container has been torn down.

use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Read, Write};
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{ChildStderr, Command, Stdio};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use rtbox_common::error::{Result, RtboxError};
use serde::{Deserialize, Serialize};

use crate::oci::OciState;

/// Bytes of hook stderr kept for error messages.
const STDERR_LIMIT: u64 = 4096;

/// How long a failed hook's stderr is awaited after it exits.
const STDERR_GRACE: Duration = Duration::from_secs(1);

/// Point in the lifecycle a hook set belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HookKind {
    /// Before the user program starts, in the runtime namespace.
    Prestart,
    /// After the environment is created, in the runtime namespace.
    CreateRuntime,
    /// After the environment is created, in the container namespace.
    CreateContainer,
    /// Right before the user program is executed.
    StartContainer,
    /// After the user program started.
    Poststart,
    /// After the container has been destroyed.
    Poststop,
}

/// Runs hook sets.
pub trait HookRunner: fmt::Debug + Send {
    /// Runs every hook of `kind`, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Returns [`RtboxError::Hook`] for the first hook that fails.
    fn run_hooks(&self, kind: HookKind, state: &OciState) -> Result<()>;
}

/// One configured hook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hook {
    /// Absolute path of the executable.
    pub path: PathBuf,
    /// Full argv, including argv\[0\].
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Environment as `KEY=VALUE` entries; nothing else is inherited.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,
    /// Seconds after which the hook is killed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

impl Hook {
    /// Runs the hook, feeding `state` on stdin.
    ///
    /// # Errors
    ///
    /// Returns [`RtboxError::Hook`] if the hook cannot be spawned, exits
    /// unsuccessfully, or outlives its timeout.
    pub fn run(&self, state: &[u8]) -> Result<()> {
        let fail = |message: String| RtboxError::Hook {
            path: self.path.clone(),
            message,
        };
        let mut cmd = Command::new(&self.path);
        if let Some((arg0, rest)) = self.args.split_first() {
            let _ = cmd.arg0(arg0).args(rest);
        }
        let _ = cmd
            .env_clear()
            .envs(self.env.iter().filter_map(|kv| kv.split_once('=')))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| fail(format!("spawn: {e}")))?;
        // Drained concurrently so a chatty hook never blocks on a full pipe.
        let (tx, stderr) = mpsc::channel();
        if let Some(pipe) = child.stderr.take() {
            let _ = std::thread::spawn(move || tx.send(drain(pipe)));
        }
        if let Some(mut stdin) = child.stdin.take() {
            // A hook that ignores its input may exit before reading it.
            if let Err(e) = stdin.write_all(state) {
                if e.kind() != io::ErrorKind::BrokenPipe {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(fail(format!("writing state: {e}")));
                }
            }
        }

        let status = match self.timeout {
            None => child.wait().map_err(|e| fail(format!("wait: {e}")))?,
            Some(secs) => {
                let deadline = Instant::now() + Duration::from_secs(secs);
                loop {
                    if let Some(status) = child.try_wait().map_err(|e| fail(format!("wait: {e}")))? {
                        break status;
                    }
                    if Instant::now() >= deadline {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(fail(format!("timed out after {secs}s")));
                    }
                    std::thread::sleep(Duration::from_millis(10));
                }
            }
        };
        if status.success() {
            return Ok(());
        }
        // Descendants of the hook may still hold the pipe open.
        let stderr = stderr.recv_timeout(STDERR_GRACE).unwrap_or_default();
        Err(fail(format!("{status}, stderr: {}", stderr.trim())))
    }
}

/// Reads a hook's stderr to the end, keeping at most [`STDERR_LIMIT`] bytes.
fn drain(mut pipe: ChildStderr) -> String {
    let mut buf = Vec::new();
    let _ = pipe.by_ref().take(STDERR_LIMIT).read_to_end(&mut buf);
    let _ = io::copy(&mut pipe, &mut io::sink());
    String::from_utf8_lossy(&buf).into_owned()
}

/// Hook sets read from configuration, run as external commands.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandHooks(BTreeMap<HookKind, Vec<Hook>>);

impl CommandHooks {
    /// Builds hook sets from explicit entries.
    #[must_use]
    pub const fn new(hooks: BTreeMap<HookKind, Vec<Hook>>) -> Self {
        Self(hooks)
    }

    /// Hooks configured for `kind`.
    #[must_use]
    pub fn get(&self, kind: HookKind) -> &[Hook] {
        self.0.get(&kind).map_or(&[], Vec::as_slice)
    }
}

impl HookRunner for CommandHooks {
    fn run_hooks(&self, kind: HookKind, state: &OciState) -> Result<()> {
        let hooks = self.get(kind);
        if hooks.is_empty() {
            return Ok(());
        }
        let json = serde_json::to_vec(state)?;
        for hook in hooks {
            hook.run(&json)?;
            tracing::debug!(?kind, path = %hook.path.display(), "hook completed");
        }
        Ok(())
    }
}
