//! Namespace configuration of a container.
//!
//! Namespace creation itself happens when the init process is spawned; the
//! lifecycle core only needs to know which namespaces a container holds and
//! whether it joined an existing one by path.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Kind of Linux namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NamespaceKind {
    /// Process ID space.
    Pid,
    /// Mount table.
    Mount,
    /// Network stack.
    Network,
    /// User and group IDs.
    User,
    /// System V IPC and POSIX message queues.
    Ipc,
    /// Hostname and domain name.
    Uts,
    /// Cgroup root view.
    Cgroup,
}

impl fmt::Display for NamespaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pid => "pid",
            Self::Mount => "mount",
            Self::Network => "network",
            Self::User => "user",
            Self::Ipc => "ipc",
            Self::Uts => "uts",
            Self::Cgroup => "cgroup",
        };
        f.write_str(name)
    }
}

/// One namespace: created fresh when `path` is `None`, joined otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace {
    /// Namespace kind.
    #[serde(rename = "type")]
    pub kind: NamespaceKind,
    /// Existing namespace to join, e.g. `/proc/1234/ns/pid`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// Namespaces configured for a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespaces(Vec<Namespace>);

impl Namespaces {
    /// Builds a configuration from explicit entries.
    #[must_use]
    pub const fn new(namespaces: Vec<Namespace>) -> Self {
        Self(namespaces)
    }

    /// A configuration without any namespace: everything shared with the host.
    #[must_use]
    pub const fn host() -> Self {
        Self(Vec::new())
    }

    /// Returns whether a namespace of `kind` is configured.
    #[must_use]
    pub fn contains(&self, kind: NamespaceKind) -> bool {
        self.0.iter().any(|ns| ns.kind == kind)
    }

    /// Path of the existing namespace of `kind` the container joins.
    #[must_use]
    pub fn path_of(&self, kind: NamespaceKind) -> Option<&Path> {
        self.0
            .iter()
            .find(|ns| ns.kind == kind)
            .and_then(|ns| ns.path.as_deref())
    }

    /// Returns whether the container owns a fresh PID namespace, so that its
    /// processes die with its init process.
    #[must_use]
    pub fn has_private_pid(&self) -> bool {
        self.contains(NamespaceKind::Pid) && self.path_of(NamespaceKind::Pid).is_none()
    }
}

impl Default for Namespaces {
    fn default() -> Self {
        Self(
            [
                NamespaceKind::Pid,
                NamespaceKind::Mount,
                NamespaceKind::Network,
                NamespaceKind::Ipc,
                NamespaceKind::Uts,
            ]
            .into_iter()
            .map(|kind| Namespace { kind, path: None })
            .collect(),
        )
    }
}
