// Copyright copydb authors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! [`CopyPlan`]: the immutable configuration derived once at startup and
//! shared by value across every worker for the remainder of the run.

use std::time::Duration;

use crate::error::CopydbError;

/// Which section(s) of the database a run should act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    All,
    PreData,
    TableData,
    Index,
    Constraints,
    Sequences,
    Blobs,
    PostData,
}

/// The immutable plan for a single `copy-db` invocation.
///
/// Created once at process start from CLI flags and environment variables
/// and never mutated again; every component receives it by shared reference
/// or cheap clone.
#[derive(Debug, Clone)]
pub struct CopyPlan {
    pub source_uri: String,
    pub target_uri: String,
    pub table_jobs: u32,
    pub index_jobs: u32,
    pub vacuum_jobs: u32,
    pub split_threshold_bytes: u64,
    pub section: Section,
    pub restart: bool,
    pub resume: bool,
    pub consistent: bool,
    pub snapshot_id: Option<String>,
    pub fail_fast: bool,
    pub skip_large_objects: bool,
    pub skip_extensions: bool,
    pub follow: bool,
    pub statement_timeout: Option<Duration>,
    pub lock_timeout: Option<Duration>,
}

impl CopyPlan {
    /// Validates the precedence and cross-field constraints called out in
    /// the data model: `restart` wins over `resume`, and `consistent`
    /// requires that we're actually able to hold a snapshot.
    ///
    /// Returns the effective, normalized plan (never both `restart` and
    /// `resume` true) or a [`CopydbError::Configuration`].
    pub fn validate(mut self) -> Result<Self, CopydbError> {
        if self.table_jobs == 0 || self.index_jobs == 0 || self.vacuum_jobs == 0 {
            return Err(CopydbError::configuration(
                "table-jobs, index-jobs, and vacuum-jobs must all be at least 1",
            ));
        }
        if self.source_uri.is_empty() {
            return Err(CopydbError::configuration(
                "missing source URI (pass --source or set PGCOPYDB_SOURCE_PGURI)",
            ));
        }
        if self.target_uri.is_empty() {
            return Err(CopydbError::configuration(
                "missing target URI (pass --target or set PGCOPYDB_TARGET_PGURI)",
            ));
        }
        if self.restart && self.resume {
            // restart > resume in precedence; resume is simply ignored.
            self.resume = false;
        }
        if self.snapshot_id.is_some() && !self.consistent {
            return Err(CopydbError::configuration(
                "--snapshot requires a consistent run (remove --no-consistent)",
            ));
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_plan() -> CopyPlan {
        CopyPlan {
            source_uri: "postgres://source".into(),
            target_uri: "postgres://target".into(),
            table_jobs: 4,
            index_jobs: 2,
            vacuum_jobs: 2,
            split_threshold_bytes: 10 * 1024 * 1024 * 1024,
            section: Section::All,
            restart: false,
            resume: false,
            consistent: true,
            snapshot_id: None,
            fail_fast: true,
            skip_large_objects: false,
            skip_extensions: false,
            follow: false,
            statement_timeout: None,
            lock_timeout: None,
        }
    }

    #[test]
    fn restart_takes_precedence_over_resume() {
        let mut plan = base_plan();
        plan.restart = true;
        plan.resume = true;
        let plan = plan.validate().unwrap();
        assert!(plan.restart);
        assert!(!plan.resume);
    }

    #[test]
    fn zero_jobs_rejected() {
        let mut plan = base_plan();
        plan.table_jobs = 0;
        assert!(plan.validate().is_err());
    }

    #[test]
    fn snapshot_requires_consistent() {
        let mut plan = base_plan();
        plan.consistent = false;
        plan.snapshot_id = Some("00000003-1".into());
        assert!(plan.validate().is_err());
    }

    #[test]
    fn missing_uris_rejected() {
        let mut plan = base_plan();
        plan.source_uri.clear();
        assert!(plan.validate().is_err());
    }
}
