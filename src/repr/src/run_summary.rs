// Copyright copydb authors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The end-of-run report (added): per-step timings plus the aggregated
//! table/index/blobs summaries, rendered as the concluding summary table
//! every long-running phase prints (§7).

use std::fmt;

use crate::summary::{BlobsSummary, IndexSummary, TableSummary};

/// Wall-clock duration of one top-level step, in milliseconds. Kept as a
/// plain struct (rather than a map) because the step set is fixed and the
/// order matters for the printed table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepTimings {
    pub dump_ms: u64,
    pub catalog_queries_ms: u64,
    pub prepare_schema_ms: u64,
    pub copy_ms: u64,
    pub large_objects_ms: u64,
    pub indexes_ms: u64,
    pub finalize_ms: u64,
}

impl StepTimings {
    pub fn total_ms(&self) -> u64 {
        self.dump_ms
            + self.catalog_queries_ms
            + self.prepare_schema_ms
            + self.copy_ms
            + self.large_objects_ms
            + self.indexes_ms
            + self.finalize_ms
    }
}

/// The full end-of-run report: one row per table/index completed plus
/// the blobs record and the step timing breakdown.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub tables: Vec<TableSummary>,
    pub indexes: Vec<IndexSummary>,
    pub blobs: Option<BlobsSummary>,
    pub timings: StepTimings,
    pub errors: Vec<String>,
}

impl RunSummary {
    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    pub fn index_count(&self) -> usize {
        self.indexes.iter().filter(|i| !i.is_constraint).count()
    }

    pub fn constraint_count(&self) -> usize {
        self.indexes.iter().filter(|i| i.is_constraint).count()
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:<24} {:>10} {:>12}", "step", "ms", "")?;
        writeln!(f, "{:<24} {:>10}", "dump schema", self.timings.dump_ms)?;
        writeln!(f, "{:<24} {:>10}", "catalog queries", self.timings.catalog_queries_ms)?;
        writeln!(f, "{:<24} {:>10}", "prepare schema", self.timings.prepare_schema_ms)?;
        writeln!(f, "{:<24} {:>10}", "copy", self.timings.copy_ms)?;
        writeln!(f, "{:<24} {:>10}", "large objects", self.timings.large_objects_ms)?;
        writeln!(f, "{:<24} {:>10}", "indexes", self.timings.indexes_ms)?;
        writeln!(f, "{:<24} {:>10}", "finalize", self.timings.finalize_ms)?;
        writeln!(f, "{:<24} {:>10}", "total", self.timings.total_ms())?;
        writeln!(
            f,
            "tables={} indexes={} constraints={} blobs={}",
            self.table_count(),
            self.index_count(),
            self.constraint_count(),
            self.blobs.as_ref().map(|b| b.count).unwrap_or(0)
        )?;
        if !self.errors.is_empty() {
            writeln!(f, "{} non-fatal error(s):", self.errors.len())?;
            for err in &self.errors {
                writeln!(f, "  - {err}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_ms_sums_every_step() {
        let timings = StepTimings {
            dump_ms: 1,
            catalog_queries_ms: 2,
            prepare_schema_ms: 3,
            copy_ms: 4,
            large_objects_ms: 5,
            indexes_ms: 6,
            finalize_ms: 7,
        };
        assert_eq!(timings.total_ms(), 28);
    }

    #[test]
    fn index_and_constraint_counts_are_disjoint() {
        let mk = |is_constraint: bool| IndexSummary {
            pid: 1,
            oid: 1,
            namespace: "public".into(),
            name: "x".into(),
            start_epoch: 0,
            done_epoch: 0,
            duration_ms: 0,
            command: String::new(),
            is_constraint,
        };
        let summary = RunSummary { indexes: vec![mk(false), mk(false), mk(true)], ..Default::default() };
        assert_eq!(summary.index_count(), 2);
        assert_eq!(summary.constraint_count(), 1);
    }
}
