// Copyright copydb authors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Deterministic path layout for a copydb work directory (§4.1).
//!
//! ```text
//! topdir/
//!   pidfile
//!   snapshot
//!   schema/            dumps + JSON catalog
//!   run/                section done-files
//!   run/tables/         per-table done + index-list files
//!   run/indexes/        per-index done + constraint-done files
//!   cdc/                origin, TLI history, WAL segment size, JSON + SQL
//! ```

use std::env;
use std::path::{Path, PathBuf};

use copydb_repr::Lsn;

/// All paths derived from a single `topdir`, computed once and handed
/// around by value (they're just `PathBuf`s, cheap to clone).
#[derive(Debug, Clone)]
pub struct WorkDirPaths {
    topdir: PathBuf,
}

impl WorkDirPaths {
    /// Builds the path layout rooted at `dir`, or under a temp root if
    /// `dir` is empty.
    pub fn new(dir: Option<&Path>) -> Self {
        let topdir = match dir {
            Some(d) if !d.as_os_str().is_empty() => d.to_path_buf(),
            _ => env::temp_dir().join("copydb"),
        };
        WorkDirPaths { topdir }
    }

    pub fn topdir(&self) -> &Path {
        &self.topdir
    }

    pub fn pidfile(&self) -> PathBuf {
        self.topdir.join("pidfile")
    }

    pub fn snapshot_file(&self) -> PathBuf {
        self.topdir.join("snapshot")
    }

    pub fn schema_dir(&self) -> PathBuf {
        self.topdir.join("schema")
    }

    pub fn schema_dump_done_file(&self) -> PathBuf {
        self.run_dir().join("schema-dump.done")
    }

    pub fn pre_data_done_file(&self) -> PathBuf {
        self.run_dir().join("pre-data.done")
    }

    pub fn post_data_done_file(&self) -> PathBuf {
        self.run_dir().join("post-data.done")
    }

    pub fn sequences_done_file(&self) -> PathBuf {
        self.run_dir().join("sequences.done")
    }

    pub fn blobs_done_file(&self) -> PathBuf {
        self.run_dir().join("blobs.done")
    }

    pub fn tables_phase_done_file(&self) -> PathBuf {
        self.run_dir().join("tables.done")
    }

    pub fn indexes_phase_done_file(&self) -> PathBuf {
        self.run_dir().join("indexes.done")
    }

    pub fn run_dir(&self) -> PathBuf {
        self.topdir.join("run")
    }

    pub fn run_tables_dir(&self) -> PathBuf {
        self.run_dir().join("tables")
    }

    pub fn run_indexes_dir(&self) -> PathBuf {
        self.run_dir().join("indexes")
    }

    /// Falls back to a per-user data home (`$XDG_DATA_HOME`, else
    /// `~/.local/share`) when the caller did not request an explicit
    /// `topdir`, matching the behavior for CDC auxiliary files.
    pub fn cdc_dir(&self, explicit_dir: Option<&Path>) -> PathBuf {
        match explicit_dir {
            Some(d) if !d.as_os_str().is_empty() => d.to_path_buf(),
            _ => {
                let data_home = env::var_os("XDG_DATA_HOME")
                    .map(PathBuf::from)
                    .or_else(|| dirs::data_dir())
                    .unwrap_or_else(env::temp_dir);
                data_home.join("copydb").join("cdc")
            }
        }
    }

    fn table_stem(oid: u32, part: Option<u32>) -> String {
        match part {
            Some(p) => format!("{oid}.{p}"),
            None => oid.to_string(),
        }
    }

    pub fn table_lock_file(&self, oid: u32, part: Option<u32>) -> PathBuf {
        self.run_tables_dir().join(format!("{}.lock", Self::table_stem(oid, part)))
    }

    pub fn table_done_file(&self, oid: u32, part: Option<u32>) -> PathBuf {
        self.run_tables_dir().join(format!("{}.done", Self::table_stem(oid, part)))
    }

    pub fn table_idx_list_file(&self, oid: u32) -> PathBuf {
        self.run_tables_dir().join(format!("{oid}.idx.list"))
    }

    pub fn table_truncate_done_file(&self, oid: u32) -> PathBuf {
        self.run_tables_dir().join(format!("{oid}.truncate.done"))
    }

    pub fn index_lock_file(&self, index_oid: u32) -> PathBuf {
        self.run_indexes_dir().join(format!("{index_oid}.lock"))
    }

    pub fn index_done_file(&self, index_oid: u32) -> PathBuf {
        self.run_indexes_dir().join(format!("{index_oid}.done"))
    }

    pub fn constraint_done_file(&self, index_oid: u32) -> PathBuf {
        self.run_indexes_dir().join(format!("{index_oid}.constraint.done"))
    }

    /// The raw JSON segment file `receive` appends decoded messages to,
    /// rotated by WAL segment number.
    pub fn cdc_json_file(&self, cdc_dir: &Path, segment: u64) -> PathBuf {
        cdc_dir.join(format!("{segment:016x}.json"))
    }

    /// The rendered SQL file `transform` produces from one JSON segment,
    /// named after the first LSN it covers so `apply` can replay them in
    /// order.
    pub fn cdc_sql_file(&self, cdc_dir: &Path, first_lsn: Lsn) -> PathBuf {
        cdc_dir.join(format!("{:016x}.sql", first_lsn.0))
    }

    pub fn cdc_origin_file(&self, cdc_dir: &Path) -> PathBuf {
        cdc_dir.join("origin")
    }

    /// All directories that must exist (mode `0700`) before a run starts.
    pub fn all_dirs(&self) -> Vec<PathBuf> {
        vec![
            self.topdir.clone(),
            self.schema_dir(),
            self.run_dir(),
            self.run_tables_dir(),
            self.run_indexes_dir(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_to_temp_root_when_dir_empty() {
        let paths = WorkDirPaths::new(None);
        assert!(paths.topdir().ends_with("copydb"));
    }

    #[test]
    fn partitioned_table_paths_include_part_number() {
        let paths = WorkDirPaths::new(Some(Path::new("/tmp/run1")));
        assert_eq!(
            paths.table_lock_file(16400, Some(2)),
            PathBuf::from("/tmp/run1/run/tables/16400.2.lock")
        );
        assert_eq!(
            paths.table_lock_file(16400, None),
            PathBuf::from("/tmp/run1/run/tables/16400.lock")
        );
    }

    #[test]
    fn index_and_constraint_done_files_are_distinct() {
        let paths = WorkDirPaths::new(Some(Path::new("/tmp/run1")));
        assert_ne!(paths.index_done_file(99), paths.constraint_done_file(99));
    }
}
