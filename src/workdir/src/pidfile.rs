// Copyright copydb authors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Pidfile and lock-file liveness checks.
//!
//! A lock file is "held" if it names a pid that is still alive; otherwise
//! any worker may take it over (§4.4 edge cases).

use std::fs;
use std::path::Path;

use copydb_repr::CopydbError;
use nix::sys::signal::kill;
use nix::unistd::Pid;

/// Writes `pid` to `path`, creating parent directories as needed.
pub fn write_pidfile(path: &Path, pid: u32) -> Result<(), CopydbError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, pid.to_string())?;
    Ok(())
}

/// Reads the pid recorded in `path`, if any.
pub fn read_pidfile(path: &Path) -> Result<Option<u32>, CopydbError> {
    match fs::read_to_string(path) {
        Ok(contents) => {
            let pid = contents.trim().parse::<u32>().map_err(|_| {
                CopydbError::data(format!("malformed pidfile {}: {:?}", path.display(), contents))
            })?;
            Ok(Some(pid))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Whether `pid` refers to a currently-running process.
///
/// Sends signal 0, which performs the permission/existence check without
/// actually delivering a signal.
pub fn is_pid_alive(pid: u32) -> bool {
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

/// Checks whether `path` names a pidfile belonging to a live process, and
/// fails with a clear, actionable message if so.
pub fn fail_if_live_pidfile(path: &Path) -> Result<(), CopydbError> {
    if let Some(pid) = read_pidfile(path)? {
        if is_pid_alive(pid) {
            return Err(CopydbError::environmental(format!(
                "work directory is in use by running process {pid} (pidfile {})",
                path.display()
            )));
        }
    }
    Ok(())
}

/// Whether a lock file at `path` can be taken over: either it doesn't
/// exist, or the pid inside it is no longer alive.
pub fn lock_file_is_takeable(path: &Path) -> Result<bool, CopydbError> {
    match read_pidfile(path)? {
        None => Ok(true),
        Some(pid) => Ok(!is_pid_alive(pid)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn round_trips_pid() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pidfile");
        write_pidfile(&path, 4242).unwrap();
        assert_eq!(read_pidfile(&path).unwrap(), Some(4242));
    }

    #[test]
    fn missing_pidfile_reads_as_none() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pidfile");
        assert_eq!(read_pidfile(&path).unwrap(), None);
    }

    #[test]
    fn own_pid_is_always_alive() {
        assert!(is_pid_alive(std::process::id()));
    }

    #[test]
    fn a_pid_far_outside_any_real_range_is_not_alive() {
        // PIDs are bounded well below this on every real system we run on.
        assert!(!is_pid_alive(u32::MAX - 1));
    }

    #[test]
    fn lock_file_with_dead_pid_is_takeable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("table.lock");
        write_pidfile(&path, u32::MAX - 1).unwrap();
        assert!(lock_file_is_takeable(&path).unwrap());
    }

    #[test]
    fn lock_file_with_live_pid_is_not_takeable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("table.lock");
        write_pidfile(&path, std::process::id()).unwrap();
        assert!(!lock_file_is_takeable(&path).unwrap());
    }

    #[test]
    fn missing_lock_file_is_takeable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("table.lock");
        assert!(lock_file_is_takeable(&path).unwrap());
    }
}
