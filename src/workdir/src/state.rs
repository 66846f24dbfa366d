// Copyright copydb authors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! [`WorkDirState`]: the pure classification of an existing work directory,
//! and `initialize_workdir`, which uses it to decide whether a run may
//! proceed (§4.1).

use std::fs;
use std::path::Path;

use copydb_repr::CopydbError;
use tracing::info;

use crate::paths::WorkDirPaths;
use crate::pidfile;

/// Classification of an existing work directory. `all_done` is derived,
/// never stored independently, so the invariant
/// `all_done ⇔ (schema_dump_done ∧ pre_data_restored ∧ post_data_restored ∧
/// tables_done ∧ indexes_done ∧ sequences_done ∧ blobs_done)` holds by
/// construction rather than by discipline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkDirState {
    pub exists: bool,
    pub all_components_present: bool,
    pub schema_dump_done: bool,
    pub pre_data_restored: bool,
    pub post_data_restored: bool,
    pub tables_done: bool,
    pub indexes_done: bool,
    pub sequences_done: bool,
    pub blobs_done: bool,
}

impl WorkDirState {
    pub fn all_done(&self) -> bool {
        self.schema_dump_done
            && self.pre_data_restored
            && self.post_data_restored
            && self.tables_done
            && self.indexes_done
            && self.sequences_done
            && self.blobs_done
    }
}

/// Pure inspection of `paths`: presence of the sentinel done-files drives
/// every state bit. Missing component directories force
/// `all_components_present = false` regardless of which done-files exist,
/// since a done-file with no owning directory cannot be trusted.
pub fn inspect_workdir(paths: &WorkDirPaths) -> WorkDirState {
    let exists = paths.topdir().is_dir();
    if !exists {
        return WorkDirState {
            exists: false,
            all_components_present: false,
            schema_dump_done: false,
            pre_data_restored: false,
            post_data_restored: false,
            tables_done: false,
            indexes_done: false,
            sequences_done: false,
            blobs_done: false,
        };
    }

    let all_components_present = paths.all_dirs().iter().all(|d| d.is_dir());
    let state = WorkDirState {
        exists: true,
        all_components_present,
        schema_dump_done: paths.schema_dump_done_file().is_file(),
        pre_data_restored: paths.pre_data_done_file().is_file(),
        post_data_restored: paths.post_data_done_file().is_file(),
        tables_done: paths.tables_phase_done_file().is_file(),
        indexes_done: paths.indexes_phase_done_file().is_file(),
        sequences_done: paths.sequences_done_file().is_file(),
        blobs_done: paths.blobs_done_file().is_file(),
    };

    if !all_components_present {
        WorkDirState { schema_dump_done: false, ..state }
    } else {
        state
    }
}

/// Applies the §4.1 decision table and, if the run may proceed, writes the
/// pidfile and creates all component directories.
pub fn initialize_workdir(
    paths: &WorkDirPaths,
    restart: bool,
    resume: bool,
) -> Result<WorkDirState, CopydbError> {
    pidfile::fail_if_live_pidfile(&paths.pidfile())?;

    let state = inspect_workdir(paths);

    if restart {
        if state.exists {
            info!(topdir = %paths.topdir().display(), "removing existing work directory for --restart");
            fs::remove_dir_all(paths.topdir())?;
        }
    } else if !state.exists || !state.schema_dump_done {
        // Fresh directory, or one that never got far enough to matter:
        // proceed without requiring --resume.
    } else if resume {
        // Proceed without removing.
    } else if state.all_done() {
        return Err(CopydbError::environmental(format!(
            "work directory {} already holds a completed run; pass --restart to start over",
            paths.topdir().display()
        )));
    } else {
        return Err(CopydbError::environmental(format!(
            "work directory {} holds an in-progress run; pass --resume to continue or --restart to start over",
            paths.topdir().display()
        )));
    }

    for dir in paths.all_dirs() {
        fs::create_dir_all(&dir)?;
        set_private_mode(&dir)?;
    }
    pidfile::write_pidfile(&paths.pidfile(), std::process::id())?;

    Ok(inspect_workdir(paths))
}

/// Writes one of the section done-files §4.4 step 10 calls for: an empty
/// marker whose mere presence `inspect_workdir` treats as "this step
/// doesn't need to run again under `--resume`".
pub fn mark_done(path: &Path) -> Result<(), CopydbError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, "")?;
    Ok(())
}

#[cfg(unix)]
fn set_private_mode(dir: &std::path::Path) -> Result<(), CopydbError> {
    use std::os::unix::fs::PermissionsExt;
    let perms = std::fs::Permissions::from_mode(0o700);
    std::fs::set_permissions(dir, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn set_private_mode(_dir: &std::path::Path) -> Result<(), CopydbError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::tempdir;

    #[test]
    fn fresh_directory_inspects_as_not_done() {
        let dir = tempdir().unwrap();
        let paths = WorkDirPaths::new(Some(dir.path()));
        let state = inspect_workdir(&paths);
        assert!(!state.exists);
        assert!(!state.all_done());
    }

    #[test]
    fn initialize_then_inspect_shows_fresh_directories() {
        let dir = tempdir().unwrap();
        let paths = WorkDirPaths::new(Some(&dir.path().join("run1")));
        let state = initialize_workdir(&paths, false, false).unwrap();
        assert!(state.exists);
        assert!(state.all_components_present);
        assert!(!state.all_done());
    }

    fn mark_all_done(paths: &WorkDirPaths) {
        for f in [
            paths.schema_dump_done_file(),
            paths.pre_data_done_file(),
            paths.post_data_done_file(),
            paths.tables_phase_done_file(),
            paths.indexes_phase_done_file(),
            paths.sequences_done_file(),
            paths.blobs_done_file(),
        ] {
            std::fs::write(&f, "").unwrap();
        }
    }

    #[test]
    fn completed_directory_refuses_without_restart() {
        let dir = tempdir().unwrap();
        let paths = WorkDirPaths::new(Some(&dir.path().join("run1")));
        initialize_workdir(&paths, false, false).unwrap();
        mark_all_done(&paths);

        let err = initialize_workdir(&paths, false, false).unwrap_err();
        assert!(matches!(err, CopydbError::Environmental(_)));
    }

    #[test]
    fn restart_on_completed_directory_recreates_it() {
        let dir = tempdir().unwrap();
        let paths = WorkDirPaths::new(Some(&dir.path().join("run1")));
        initialize_workdir(&paths, false, false).unwrap();
        mark_all_done(&paths);

        let state = initialize_workdir(&paths, true, false).unwrap();
        assert!(!state.all_done());
    }

    #[test]
    fn in_progress_directory_requires_resume_or_restart() {
        let dir = tempdir().unwrap();
        let paths = WorkDirPaths::new(Some(&dir.path().join("run1")));
        initialize_workdir(&paths, false, false).unwrap();
        std::fs::write(paths.schema_dump_done_file(), "").unwrap();

        let err = initialize_workdir(&paths, false, false).unwrap_err();
        assert!(matches!(err, CopydbError::Environmental(_)));

        // --resume proceeds without removing the partial progress.
        let state = initialize_workdir(&paths, false, true).unwrap();
        assert!(state.schema_dump_done);
    }

    #[test]
    fn stale_pidfile_from_a_dead_process_does_not_block_a_restart() {
        let dir = tempdir().unwrap();
        let paths = WorkDirPaths::new(Some(&dir.path().join("run1")));
        std::fs::create_dir_all(dir.path().join("run1")).unwrap();
        crate::pidfile::write_pidfile(&paths.pidfile(), u32::MAX - 1).unwrap();

        // Must not fail just because a pidfile is present.
        let state = initialize_workdir(&paths, false, false).unwrap();
        assert!(state.exists);
    }

    #[test]
    fn missing_component_directory_is_not_schema_dump_done() {
        let dir = tempdir().unwrap();
        let paths = WorkDirPaths::new(Some(dir.path()));
        std::fs::create_dir_all(paths.run_dir()).unwrap();
        std::fs::write(paths.schema_dump_done_file(), "").unwrap();
        // schema/ directory was never created.
        let state = inspect_workdir(&paths);
        assert!(!state.all_components_present);
        assert!(!state.schema_dump_done);
    }

    #[test]
    fn topdir_accessor_matches_constructed_path() {
        let paths = WorkDirPaths::new(Some(Path::new("/tmp/x")));
        assert_eq!(paths.topdir(), Path::new("/tmp/x"));
    }
}
