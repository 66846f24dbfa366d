// Copyright copydb authors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Catalog snapshot types: [`SourceTable`], [`SourceIndex`], and the
//! partition plan used to parallelize `COPY` on a single large table.

use serde::{Deserialize, Serialize};

/// A single non-overlapping range of a table's partition key, used to
/// parallelize `COPY` across several workers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionRange {
    pub part_number: u32,
    pub part_count: u32,
    /// Inclusive lower bound, rendered into `BETWEEN min AND max`.
    pub min: i64,
    /// Inclusive upper bound.
    pub max: i64,
}

impl PartitionRange {
    /// An empty partition (no rows fall in range) is a no-op success, not
    /// an error: this can happen if the catalog was refreshed between
    /// planning and copy and the table shrank.
    pub fn is_empty(&self) -> bool {
        self.min > self.max
    }
}

/// A table discovered on the source, with its (possibly empty) partition
/// plan and the indexes that depend on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceTable {
    pub oid: u32,
    pub namespace: String,
    pub relation: String,
    pub bytes: u64,
    pub row_estimate: i64,
    pub part_key: Option<String>,
    pub parts: Vec<PartitionRange>,
    pub index_list: Vec<SourceIndex>,
}

impl SourceTable {
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.namespace, self.relation)
    }

    /// Whether this table should be partitioned given `split_threshold_bytes`.
    ///
    /// Per the data model invariant: `parts[]` is non-empty iff
    /// `bytes >= split_threshold_bytes && part_key is Some`.
    pub fn should_partition(&self, split_threshold_bytes: u64) -> bool {
        self.bytes >= split_threshold_bytes && self.part_key.is_some()
    }

    /// Validates the partition-plan invariant: the union of `[min, max]`
    /// ranges is sorted, non-overlapping, and (when non-empty) contiguous.
    pub fn validate_partitions(&self) -> bool {
        if self.parts.is_empty() {
            return true;
        }
        let mut sorted: Vec<&PartitionRange> = self.parts.iter().collect();
        sorted.sort_by_key(|p| p.part_number);
        for pair in sorted.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            if a.part_number + 1 != b.part_number {
                return false;
            }
            if a.max >= b.min {
                return false;
            }
        }
        true
    }
}

/// An index (and, optionally, the constraint backed by it) on a source
/// table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceIndex {
    pub index_oid: u32,
    /// `0` means "index without backing constraint".
    pub constraint_oid: u32,
    pub index_namespace: String,
    pub index_relation: String,
    /// The owning table's namespace and name, needed to qualify
    /// `ALTER TABLE` when attaching the index's constraint.
    pub table_namespace: String,
    pub table_relation: String,
    pub constraint_name: Option<String>,
    pub definition: String,
    pub constraint_definition: Option<String>,
}

impl SourceIndex {
    pub fn has_constraint(&self) -> bool {
        self.constraint_oid != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_with_parts(parts: Vec<PartitionRange>) -> SourceTable {
        SourceTable {
            oid: 16400,
            namespace: "public".into(),
            relation: "events".into(),
            bytes: 20 * 1024 * 1024 * 1024,
            row_estimate: 1_000_000,
            part_key: Some("id".into()),
            parts,
            index_list: vec![],
        }
    }

    #[test]
    fn empty_partition_range_is_a_noop() {
        let part = PartitionRange { part_number: 0, part_count: 1, min: 5, max: 4 };
        assert!(part.is_empty());
    }

    #[test]
    fn should_partition_requires_both_size_and_key() {
        let mut t = table_with_parts(vec![]);
        assert!(t.should_partition(10 * 1024 * 1024 * 1024));
        t.part_key = None;
        assert!(!t.should_partition(10 * 1024 * 1024 * 1024));
    }

    #[test]
    fn validates_contiguous_non_overlapping_partitions() {
        let t = table_with_parts(vec![
            PartitionRange { part_number: 0, part_count: 4, min: 0, max: 999 },
            PartitionRange { part_number: 1, part_count: 4, min: 1000, max: 1999 },
            PartitionRange { part_number: 2, part_count: 4, min: 2000, max: 2999 },
            PartitionRange { part_number: 3, part_count: 4, min: 3000, max: i64::MAX },
        ]);
        assert!(t.validate_partitions());
    }

    #[test]
    fn rejects_overlapping_partitions() {
        let t = table_with_parts(vec![
            PartitionRange { part_number: 0, part_count: 2, min: 0, max: 1000 },
            PartitionRange { part_number: 1, part_count: 2, min: 900, max: 2000 },
        ]);
        assert!(!t.validate_partitions());
    }

    #[test]
    fn index_with_zero_constraint_oid_has_no_constraint() {
        let idx = SourceIndex {
            index_oid: 1,
            constraint_oid: 0,
            index_namespace: "public".into(),
            index_relation: "events_pkey".into(),
            table_namespace: "public".into(),
            table_relation: "events".into(),
            constraint_name: None,
            definition: "CREATE UNIQUE INDEX events_pkey ON public.events (id)".into(),
            constraint_definition: None,
        };
        assert!(!idx.has_constraint());
    }
}
