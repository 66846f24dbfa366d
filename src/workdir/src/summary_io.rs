// Copyright copydb authors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Reading and writing the positional, newline-delimited summary records
//! described in §4.2 and §6. Each record format is strictly positional;
//! readers validate the line count before trusting any field.

use std::fs;
use std::path::Path;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use copydb_repr::{BlobsSummary, CopydbError, IndexSummary, TableSummary};

fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn write_lines(path: &Path, lines: &[String]) -> Result<(), CopydbError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut contents = lines.join("\n");
    contents.push('\n');
    fs::write(path, contents)?;
    Ok(())
}

fn read_lines(path: &Path, min_lines: usize) -> Result<Vec<String>, CopydbError> {
    let contents = fs::read_to_string(path)?;
    let lines: Vec<String> = contents.lines().map(str::to_string).collect();
    if lines.len() < min_lines {
        return Err(CopydbError::data(format!(
            "truncated summary file {}: expected at least {min_lines} lines, found {}",
            path.display(),
            lines.len()
        )));
    }
    Ok(lines)
}

fn parse_field<T: std::str::FromStr>(lines: &[String], idx: usize, path: &Path) -> Result<T, CopydbError> {
    lines
        .get(idx)
        .ok_or_else(|| CopydbError::data(format!("missing field {idx} in {}", path.display())))?
        .parse()
        .map_err(|_| {
            CopydbError::data(format!("malformed field {idx} in {}: {:?}", path.display(), lines.get(idx)))
        })
}

/// Starts timing a table-copy unit of work: persists the in-progress
/// record to `lock_file` and returns the record plus a monotonic timer
/// for [`finish_table`] to use.
pub fn open_table(
    lock_file: &Path,
    pid: u32,
    oid: u32,
    namespace: &str,
    name: &str,
    command: &str,
) -> Result<(TableSummary, Instant), CopydbError> {
    let summary = TableSummary {
        pid,
        oid,
        namespace: namespace.to_string(),
        name: name.to_string(),
        start_epoch: now_epoch_ms(),
        done_epoch: 0,
        duration_ms: 0,
        command: command.to_string(),
    };
    write_table_summary(lock_file, &summary)?;
    Ok((summary, Instant::now()))
}

/// Completes a table-copy unit of work: fills in `done_epoch`/`duration_ms`
/// from `timer` and persists the final record to `done_file`.
pub fn finish_table(done_file: &Path, mut summary: TableSummary, timer: Instant) -> Result<TableSummary, CopydbError> {
    summary.done_epoch = now_epoch_ms();
    summary.duration_ms = timer.elapsed().as_millis() as u64;
    write_table_summary(done_file, &summary)?;
    Ok(summary)
}

pub fn write_table_summary(path: &Path, s: &TableSummary) -> Result<(), CopydbError> {
    write_lines(
        path,
        &[
            s.pid.to_string(),
            s.oid.to_string(),
            s.namespace.clone(),
            s.name.clone(),
            s.start_epoch.to_string(),
            s.done_epoch.to_string(),
            s.duration_ms.to_string(),
            s.command.clone(),
        ],
    )
}

pub fn read_table_summary(path: &Path) -> Result<TableSummary, CopydbError> {
    let lines = read_lines(path, 8)?;
    Ok(TableSummary {
        pid: parse_field(&lines, 0, path)?,
        oid: parse_field(&lines, 1, path)?,
        namespace: lines[2].clone(),
        name: lines[3].clone(),
        start_epoch: parse_field(&lines, 4, path)?,
        done_epoch: parse_field(&lines, 5, path)?,
        duration_ms: parse_field(&lines, 6, path)?,
        command: lines[7].clone(),
    })
}

pub fn write_index_summary(path: &Path, s: &IndexSummary) -> Result<(), CopydbError> {
    write_lines(
        path,
        &[
            s.pid.to_string(),
            s.oid.to_string(),
            s.namespace.clone(),
            s.name.clone(),
            s.start_epoch.to_string(),
            s.done_epoch.to_string(),
            s.duration_ms.to_string(),
            s.command.clone(),
            (s.is_constraint as u8).to_string(),
        ],
    )
}

pub fn read_index_summary(path: &Path) -> Result<IndexSummary, CopydbError> {
    let lines = read_lines(path, 9)?;
    let is_constraint_flag: u8 = parse_field(&lines, 8, path)?;
    Ok(IndexSummary {
        pid: parse_field(&lines, 0, path)?,
        oid: parse_field(&lines, 1, path)?,
        namespace: lines[2].clone(),
        name: lines[3].clone(),
        start_epoch: parse_field(&lines, 4, path)?,
        done_epoch: parse_field(&lines, 5, path)?,
        duration_ms: parse_field(&lines, 6, path)?,
        command: lines[7].clone(),
        is_constraint: is_constraint_flag != 0,
    })
}

pub fn write_blobs_summary(path: &Path, s: &BlobsSummary) -> Result<(), CopydbError> {
    let count = s.checked_count_for_disk()?;
    write_lines(path, &[s.pid.to_string(), count.to_string(), s.duration_ms.to_string()])
}

pub fn read_blobs_summary(path: &Path) -> Result<BlobsSummary, CopydbError> {
    let lines = read_lines(path, 3)?;
    let count: u32 = parse_field(&lines, 1, path)?;
    Ok(BlobsSummary {
        pid: parse_field(&lines, 0, path)?,
        count: count as u64,
        duration_ms: parse_field(&lines, 2, path)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn table_summary_round_trips_byte_exactly_on_non_timer_fields() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("16400.done");
        let (summary, timer) = open_table(&path, 42, 16400, "public", "events", "COPY").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let finished = finish_table(&path, summary, timer).unwrap();

        let read_back = read_table_summary(&path).unwrap();
        assert_eq!(read_back.pid, finished.pid);
        assert_eq!(read_back.oid, finished.oid);
        assert_eq!(read_back.namespace, finished.namespace);
        assert_eq!(read_back.name, finished.name);
        assert_eq!(read_back.command, finished.command);
        assert_eq!(read_back.duration_ms, finished.duration_ms);
    }

    #[test]
    fn truncated_summary_file_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("16400.done");
        std::fs::write(&path, "42\n16400\n").unwrap();
        let err = read_table_summary(&path).unwrap_err();
        assert!(matches!(err, CopydbError::Data(_)));
    }

    #[test]
    fn index_summary_discriminates_index_vs_constraint() {
        let dir = tempdir().unwrap();
        let index_path = dir.path().join("99.done");
        let constraint_path = dir.path().join("99.constraint.done");

        let index = IndexSummary {
            pid: 1,
            oid: 99,
            namespace: "public".into(),
            name: "events_pkey".into(),
            start_epoch: 0,
            done_epoch: 10,
            duration_ms: 10,
            command: "CREATE INDEX".into(),
            is_constraint: false,
        };
        let constraint = IndexSummary { is_constraint: true, command: "ADD CONSTRAINT".into(), ..index.clone() };

        write_index_summary(&index_path, &index).unwrap();
        write_index_summary(&constraint_path, &constraint).unwrap();

        assert!(!read_index_summary(&index_path).unwrap().is_constraint);
        assert!(read_index_summary(&constraint_path).unwrap().is_constraint);
    }

    #[test]
    fn blobs_summary_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("blobs.done");
        let summary = BlobsSummary { pid: 7, count: 123, duration_ms: 456 };
        write_blobs_summary(&path, &summary).unwrap();
        let read_back = read_blobs_summary(&path).unwrap();
        assert_eq!(read_back, summary);
    }

    #[test]
    fn blobs_summary_rejects_counts_beyond_32_bits() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("blobs.done");
        let summary = BlobsSummary { pid: 7, count: u32::MAX as u64 + 1, duration_ms: 1 };
        assert!(write_blobs_summary(&path, &summary).is_err());
    }
}
