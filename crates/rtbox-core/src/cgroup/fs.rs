//! Control-file I/O against a cgroup directory.
//!
//! All reads and writes of named control files go through [`ControlFiles`]
//! so the kernel can be substituted in tests (rejections such as `EINVAL`,
//! read-back values that differ from what was written).

use std::fmt;
use std::io;
use std::path::Path;

use rtbox_common::constants::CGROUP_PROCS_FILE;
use rtbox_common::error::{Result, RtboxError};

/// Read/write access to the control files of cgroup directories.
pub trait ControlFiles: fmt::Debug + Send + Sync {
    /// Reads the whole content of `dir/file`.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error.
    fn read(&self, dir: &Path, file: &str) -> io::Result<String>;

    /// Replaces the content of `dir/file` with `value`.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error, errno included.
    fn write(&self, dir: &Path, file: &str, value: &str) -> io::Result<()>;

    /// Like [`ControlFiles::read`], attaching the file path to the error.
    ///
    /// # Errors
    ///
    /// Returns [`RtboxError::Io`] on failure.
    fn read_value(&self, dir: &Path, file: &str) -> Result<String> {
        self.read(dir, file)
            .map_err(|e| RtboxError::io(dir.join(file), e))
    }

    /// Like [`ControlFiles::write`], attaching the file path to the error.
    ///
    /// # Errors
    ///
    /// Returns [`RtboxError::Io`] on failure.
    fn write_value(&self, dir: &Path, file: &str, value: &str) -> Result<()> {
        self.write(dir, file, value)
            .map_err(|e| RtboxError::io(dir.join(file), e))?;
        tracing::debug!(dir = %dir.display(), file, value, "control file written");
        Ok(())
    }
}

/// [`ControlFiles`] backed by the real filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct CgroupFs;

impl ControlFiles for CgroupFs {
    fn read(&self, dir: &Path, file: &str) -> io::Result<String> {
        std::fs::read_to_string(dir.join(file))
    }

    fn write(&self, dir: &Path, file: &str, value: &str) -> io::Result<()> {
        std::fs::write(dir.join(file), value)
    }
}

/// Returns whether the error is a kernel `EINVAL` rejection.
#[must_use]
pub fn is_einval(err: &RtboxError) -> bool {
    err.raw_os_error() == Some(libc::EINVAL)
}

/// Reads a control file holding a single unsigned integer. `max` maps to
/// [`u64::MAX`].
///
/// # Errors
///
/// Returns an I/O error or [`RtboxError::Parse`] if the content is not a number.
pub fn read_u64(files: &dyn ControlFiles, dir: &Path, file: &str) -> Result<u64> {
    let content = files.read_value(dir, file)?;
    let trimmed = content.trim();
    if trimmed == "max" {
        return Ok(u64::MAX);
    }
    trimmed.parse().map_err(|_| RtboxError::Parse {
        path: dir.to_path_buf(),
        file: file.to_string(),
        line: trimmed.to_string(),
    })
}

/// Splits a `key value` line of a flat-keyed control file.
#[must_use]
pub fn parse_key_value(line: &str) -> Option<(&str, u64)> {
    let mut parts = line.split_whitespace();
    let key = parts.next()?;
    let value = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((key, value))
}

/// Registers `pid` as a member of the cgroup at `dir`.
///
/// # Errors
///
/// Returns an error if writing to `cgroup.procs` fails.
pub fn write_cgroup_proc(files: &dyn ControlFiles, dir: &Path, pid: i32) -> Result<()> {
    if pid <= 0 {
        return Err(RtboxError::Config {
            message: format!("refusing to place pid {pid} into {}", dir.display()),
        });
    }
    files.write_value(dir, CGROUP_PROCS_FILE, &pid.to_string())?;
    tracing::debug!(pid, dir = %dir.display(), "added process to cgroup");
    Ok(())
}

/// Removes a cgroup directory and every child group below it, deepest first.
///
/// Cgroup directories only go away through `rmdir`; a directory that still
/// holds regular files is on an ordinary filesystem and is removed
/// recursively. An absent directory is not an error.
///
/// # Errors
///
/// Returns the first removal failure.
pub fn remove_cgroup_dir(dir: &Path) -> Result<()> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(RtboxError::io(dir, e)),
    };
    for entry in entries {
        let entry = entry.map_err(|e| RtboxError::io(dir, e))?;
        let is_dir = entry
            .file_type()
            .map_err(|e| RtboxError::io(entry.path(), e))?
            .is_dir();
        if is_dir {
            remove_cgroup_dir(&entry.path())?;
        }
    }
    match std::fs::remove_dir(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::DirectoryNotEmpty => {
            std::fs::remove_dir_all(dir).map_err(|e| RtboxError::io(dir, e))
        }
        Err(e) => Err(RtboxError::io(dir, e)),
    }
}
