// Copyright copydb authors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! On-disk summary record types. These are the values written and read by
//! `copydb-workdir`'s `open`/`finish` contracts (§4.2); the (de)serialization
//! of the positional text format lives there, not here — this module only
//! defines the shapes and their timing invariant.

/// A per-table progress record, written twice: once by `open` (before
/// `COPY` starts) and once by `finish` (after it completes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSummary {
    pub pid: u32,
    pub oid: u32,
    pub namespace: String,
    pub name: String,
    pub start_epoch: i64,
    pub done_epoch: i64,
    pub duration_ms: u64,
    pub command: String,
}

/// A per-index (or per-constraint) progress record. The boolean
/// discriminator toggles which of `oid`/`name` refers to the index versus
/// the constraint it backs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSummary {
    pub pid: u32,
    pub oid: u32,
    pub namespace: String,
    pub name: String,
    pub start_epoch: i64,
    pub done_epoch: i64,
    pub duration_ms: u64,
    pub command: String,
    /// `true` when this record describes the constraint step
    /// (`ALTER TABLE ... ADD CONSTRAINT ... USING INDEX`) rather than the
    /// `CREATE INDEX` step.
    pub is_constraint: bool,
}

/// The largest value of `BlobsSummary::count` that the on-disk format can
/// represent, preserved from the source's 32-bit field width (see
/// DESIGN.md, Open Question OQ-1).
pub const BLOBS_COUNT_MAX_ON_DISK: u64 = u32::MAX as u64;

/// The large-object copy progress record. Unlike table/index summaries it
/// carries no oid/namespace (large objects are copied as a single batch),
/// only a count and timing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobsSummary {
    pub pid: u32,
    /// In-memory this is 64-bit; on disk it is written as a 32-bit decimal
    /// field, matching the format this was distilled from. Values beyond
    /// [`BLOBS_COUNT_MAX_ON_DISK`] cannot be persisted; see
    /// [`BlobsSummary::checked_count_for_disk`].
    pub count: u64,
    pub duration_ms: u64,
}

impl BlobsSummary {
    /// Returns the count as a value safe to write to the fixed-width
    /// on-disk field, or a `Bug` error if it would overflow 32 bits. A
    /// 2^32 large-object count is not a realistic workload; if it happens,
    /// it is more likely a counting bug than a legitimate database, so we
    /// fail loudly rather than silently truncate.
    pub fn checked_count_for_disk(&self) -> Result<u32, crate::error::CopydbError> {
        u32::try_from(self.count).map_err(|_| {
            crate::error::CopydbError::bug(format!(
                "blobs count {} exceeds the on-disk 32-bit field width",
                self.count
            ))
        })
    }
}

impl TableSummary {
    /// `durationMs ≈ doneEpoch - startEpoch`, per the data-model invariant;
    /// the monotonic timer is authoritative and may diverge slightly from
    /// wall-clock epoch subtraction, so this is an approximate check used
    /// only in tests, not enforced at write time.
    pub fn approximately_consistent(&self, tolerance_ms: u64) -> bool {
        let wall = self.done_epoch.saturating_sub(self.start_epoch).unsigned_abs() as u64;
        wall.abs_diff(self.duration_ms) <= tolerance_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_summary() -> TableSummary {
        TableSummary {
            pid: 4242,
            oid: 16400,
            namespace: "public".into(),
            name: "events".into(),
            start_epoch: 1_000,
            done_epoch: 1_500,
            duration_ms: 500,
            command: "COPY".into(),
        }
    }

    #[test]
    fn duration_matches_epoch_delta() {
        assert!(table_summary().approximately_consistent(0));
    }

    #[test]
    fn duration_tolerates_small_monotonic_drift() {
        let mut s = table_summary();
        s.duration_ms = 510;
        assert!(s.approximately_consistent(50));
        assert!(!s.approximately_consistent(5));
    }

    #[test]
    fn blobs_count_within_u32_round_trips() {
        let summary = BlobsSummary { pid: 1, count: 42, duration_ms: 10 };
        assert_eq!(summary.checked_count_for_disk().unwrap(), 42);
    }

    #[test]
    fn blobs_count_beyond_u32_is_a_bug() {
        let summary = BlobsSummary { pid: 1, count: BLOBS_COUNT_MAX_ON_DISK + 1, duration_ms: 10 };
        assert!(summary.checked_count_for_disk().is_err());
    }
}
