// Copyright copydb authors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Black-box exercise of a whole run directory's lifecycle: initialize,
//! drive every section done-file through `mark_done`, confirm the
//! `--resume` no-op invariant, then `--restart` and confirm a clean slate.

use copydb_workdir::summary_io::{finish_table, open_table, read_table_summary};
use copydb_workdir::{initialize_workdir, inspect_workdir, mark_done, WorkDirPaths};

#[test]
fn full_run_then_resume_is_a_no_op_then_restart_clears_it() {
    let dir = tempfile::tempdir().unwrap();
    let paths = WorkDirPaths::new(Some(&dir.path().join("run1")));

    let state = initialize_workdir(&paths, false, false).unwrap();
    assert!(state.exists);
    assert!(!state.all_done());

    for f in [
        paths.schema_dump_done_file(),
        paths.pre_data_done_file(),
        paths.post_data_done_file(),
        paths.tables_phase_done_file(),
        paths.indexes_phase_done_file(),
        paths.sequences_done_file(),
        paths.blobs_done_file(),
    ] {
        mark_done(&f).unwrap();
    }

    let state = inspect_workdir(&paths);
    assert!(state.all_done());

    // A completed directory refuses a plain re-run...
    assert!(initialize_workdir(&paths, false, false).is_err());
    // ...but --resume proceeds, and the work is still recorded as done.
    let resumed = initialize_workdir(&paths, false, true).unwrap();
    assert!(resumed.all_done());

    // --restart wipes it back to a fresh, not-done directory.
    let restarted = initialize_workdir(&paths, true, false).unwrap();
    assert!(!restarted.all_done());
    assert!(!paths.schema_dump_done_file().exists());
}

#[test]
fn table_summary_lock_file_survives_through_finish() {
    let dir = tempfile::tempdir().unwrap();
    let paths = WorkDirPaths::new(Some(&dir.path().join("run1")));
    initialize_workdir(&paths, false, false).unwrap();

    let lock_file = paths.table_lock_file(16400, None);
    let done_file = paths.table_done_file(16400, None);
    let (summary, timer) = open_table(&lock_file, std::process::id(), 16400, "public", "events", "COPY (...) TO STDOUT").unwrap();
    assert!(lock_file.exists());

    let finished = finish_table(&done_file, summary, timer).unwrap();
    let read_back = read_table_summary(&done_file).unwrap();
    assert_eq!(read_back.oid, finished.oid);
    assert_eq!(read_back.name, "events");
}
