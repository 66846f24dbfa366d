// Copyright copydb authors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The table-data worker: copies one table, or one partition of a table,
//! from the shared snapshot to the target, streaming `COPY` rows without
//! buffering the whole relation in memory.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use deadpool_postgres::Pool;
use futures::{SinkExt, StreamExt};
use tokio_postgres::Client;
use tracing::{debug, info, warn};

use copydb_repr::{CopydbError, PartitionRange, SourceTable};
use copydb_workdir::summary_io::{finish_table, open_table, read_table_summary};
use copydb_workdir::{pidfile, WorkDirPaths};

/// Tracks how many of a partitioned table's parts are still outstanding,
/// so the worker that finishes the *last* part is the one that publishes
/// the table's index list (§4.4 step 4).
pub type RemainingParts = Arc<Mutex<HashMap<u32, u32>>>;

pub fn new_remaining_parts(tables: &[SourceTable]) -> RemainingParts {
    let mut map = HashMap::new();
    for table in tables {
        if !table.parts.is_empty() {
            map.insert(table.oid, table.parts.len() as u32);
        }
    }
    Arc::new(Mutex::new(map))
}

fn copy_out_sql(table: &SourceTable, part: Option<&PartitionRange>) -> String {
    let qualified = table.qualified_name();
    match (part, &table.part_key) {
        (Some(p), Some(key)) if !p.is_empty() => {
            format!("COPY (SELECT * FROM {qualified} WHERE {key} BETWEEN {} AND {}) TO STDOUT BINARY", p.min, p.max)
        }
        _ => format!("COPY {qualified} TO STDOUT BINARY"),
    }
}

fn copy_in_sql(table: &SourceTable) -> String {
    format!("COPY {} FROM STDIN BINARY", table.qualified_name())
}

/// Outcome of copying one table or table-partition.
pub struct TablePartResult {
    pub rows_streamed: bool,
    /// Set when this call completed the last outstanding part of a
    /// partitioned table (or immediately, for an unpartitioned one):
    /// callers use this to decide whether to publish the index work item.
    pub is_last_part: bool,
}

/// Copies one unit of table work (a whole table, or one partition of
/// one), honoring `resume` semantics and the per-unit lock file.
///
/// Returns `Ok(None)` when the unit was already done and `resume` skips
/// it; the orchestrator still treats that as "last part" bookkeeping.
pub async fn copy_table_part(
    source_client: &Client,
    target_pool: &Pool,
    paths: &WorkDirPaths,
    table: &SourceTable,
    part: Option<&PartitionRange>,
    resume: bool,
    remaining: &RemainingParts,
) -> Result<TablePartResult, CopydbError> {
    let part_number = part.map(|p| p.part_number);
    let lock_file = paths.table_lock_file(table.oid, part_number);
    let done_file = paths.table_done_file(table.oid, part_number);

    if resume && done_file.exists() {
        debug!(oid = table.oid, part = part_number, "table part already done, skipping (resume)");
        let _ = read_table_summary(&done_file)?;
        return Ok(TablePartResult { rows_streamed: false, is_last_part: decrement_and_check(remaining, table.oid) });
    }

    if !pidfile::lock_file_is_takeable(&lock_file)? {
        return Err(CopydbError::environmental(format!(
            "table part {}/{:?} is locked by a live process",
            table.oid, part_number
        )));
    }

    if let Some(p) = part {
        if p.is_empty() {
            info!(oid = table.oid, part = p.part_number, "empty partition, no-op success");
            pidfile::write_pidfile(&lock_file, std::process::id())?;
            let (summary, timer) = open_table(&lock_file, std::process::id(), table.oid, &table.namespace, &table.relation, "COPY (empty)")?;
            finish_table(&done_file, summary, timer)?;
            return Ok(TablePartResult { rows_streamed: false, is_last_part: decrement_and_check(remaining, table.oid) });
        }
    }

    pidfile::write_pidfile(&lock_file, std::process::id())?;
    let command = copy_out_sql(table, part);
    let (summary, timer) = open_table(&lock_file, std::process::id(), table.oid, &table.namespace, &table.relation, &command)?;

    let out_stream = source_client
        .copy_out(&command)
        .await
        .map_err(|e| CopydbError::upstream(format!("COPY OUT {}: {e}", table.qualified_name())))?;
    futures::pin_mut!(out_stream);

    let target_client = target_pool.get().await.map_err(|e| CopydbError::upstream(e.to_string()))?;
    let in_sink = target_client
        .copy_in(&copy_in_sql(table))
        .await
        .map_err(|e| CopydbError::upstream(format!("COPY IN {}: {e}", table.qualified_name())))?;
    futures::pin_mut!(in_sink);

    while let Some(chunk) = out_stream.next().await {
        let chunk = chunk.map_err(|e| CopydbError::upstream(format!("reading COPY stream: {e}")))?;
        in_sink.send(chunk).await.map_err(|e| CopydbError::upstream(format!("writing COPY stream: {e}")))?;
    }
    in_sink.close().await.map_err(|e| CopydbError::upstream(format!("finishing COPY IN: {e}")))?;

    finish_table(&done_file, summary, timer)?;
    debug!(oid = table.oid, part = part_number, "table part copied");

    Ok(TablePartResult { rows_streamed: true, is_last_part: decrement_and_check(remaining, table.oid) })
}

/// Decrements the outstanding-part counter for `oid` and reports whether
/// this call observed it reach zero. Tables with no entry (unpartitioned)
/// are always "last part".
fn decrement_and_check(remaining: &RemainingParts, oid: u32) -> bool {
    let mut map = remaining.lock().unwrap_or_else(|poisoned| {
        warn!("remaining-parts map lock poisoned, recovering");
        poisoned.into_inner()
    });
    match map.get_mut(&oid) {
        None => true,
        Some(count) => {
            *count = count.saturating_sub(1);
            *count == 0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(parts: Vec<PartitionRange>) -> SourceTable {
        SourceTable {
            oid: 1,
            namespace: "public".into(),
            relation: "events".into(),
            bytes: 0,
            row_estimate: 0,
            part_key: Some("id".into()),
            parts,
            index_list: vec![],
        }
    }

    #[test]
    fn copy_out_sql_uses_between_for_a_non_empty_part() {
        let t = table(vec![]);
        let part = PartitionRange { part_number: 0, part_count: 2, min: 0, max: 99 };
        let sql = copy_out_sql(&t, Some(&part));
        assert!(sql.contains("BETWEEN 0 AND 99"));
    }

    #[test]
    fn copy_out_sql_is_plain_for_unpartitioned_tables() {
        let t = table(vec![]);
        let sql = copy_out_sql(&t, None);
        assert_eq!(sql, "COPY public.events TO STDOUT BINARY");
    }

    #[test]
    fn unpartitioned_table_is_always_last_part() {
        let remaining = new_remaining_parts(&[table(vec![])]);
        assert!(decrement_and_check(&remaining, 1));
        assert!(decrement_and_check(&remaining, 1));
    }

    #[test]
    fn partitioned_table_is_last_part_only_once_all_parts_report() {
        let parts = vec![
            PartitionRange { part_number: 0, part_count: 2, min: 0, max: 49 },
            PartitionRange { part_number: 1, part_count: 2, min: 50, max: 99 },
        ];
        let remaining = new_remaining_parts(&[table(parts)]);
        assert!(!decrement_and_check(&remaining, 1));
        assert!(decrement_and_check(&remaining, 1));
    }
}
