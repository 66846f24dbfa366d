// Copyright copydb authors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! `stream apply` (C8, §4.7): replays transformed SQL files against the
//! target in LSN order, gated by the sentinel's `apply_enabled` flag and
//! stopping once `end_lsn` is reached.
//!
//! Crash safety comes from a real replication origin on the target
//! (`pg_replication_origin_xact_setup`/`_advance`): the origin's recorded
//! LSN only moves forward at transaction commit, so a crash mid-file just
//! means replay resumes from the last committed transaction.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tokio::time::sleep;
use tokio_postgres::{Client, NoTls};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use copydb_repr::{CopydbError, Lsn};

const ORIGIN_NAME: &str = "copydb";

pub struct ApplyConfig {
    pub cdc_dir: PathBuf,
    pub poll_interval: Duration,
}

#[derive(Deserialize)]
struct TxnMarker {
    #[allow(dead_code)]
    xid: u32,
    lsn: String,
    #[serde(default)]
    timestamp: String,
}

impl TxnMarker {
    fn lsn(&self) -> Result<Lsn, CopydbError> {
        self.lsn.parse()
    }
}

/// Replays every pending SQL file, waiting on `apply_enabled` and
/// rescanning for new files until either `cancel` fires or the sentinel's
/// end position is reached. Returns whether the end position was reached.
pub async fn apply(
    source_uri: &str,
    target_uri: &str,
    config: ApplyConfig,
    cancel: CancellationToken,
) -> Result<bool, CopydbError> {
    let (sentinel_client, sentinel_conn) = tokio_postgres::connect(source_uri, NoTls)
        .await
        .map_err(|e| CopydbError::upstream(format!("connecting to source for sentinel: {e}")))?;
    tokio::spawn(async move {
        if let Err(e) = sentinel_conn.await {
            warn!(error = %e, "sentinel connection closed with error");
        }
    });

    let (target_client, target_conn) = tokio_postgres::connect(target_uri, NoTls)
        .await
        .map_err(|e| CopydbError::upstream(format!("connecting to target for apply: {e}")))?;
    tokio::spawn(async move {
        if let Err(e) = target_conn.await {
            warn!(error = %e, "target connection closed with error");
        }
    });

    ensure_origin(&target_client).await?;

    loop {
        if cancel.is_cancelled() {
            return Ok(false);
        }

        let sentinel = copydb_sentinel::read(&sentinel_client).await?;
        if !sentinel.apply_enabled {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(false),
                _ = sleep(config.poll_interval) => continue,
            }
        }

        let pending = pending_sql_files(&config.cdc_dir).await?;
        if pending.is_empty() {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(false),
                _ = sleep(config.poll_interval) => continue,
            }
        }

        for path in pending {
            if apply_file(&target_client, &sentinel_client, &path).await? {
                info!(path = %path.display(), "reached end position, stopping apply");
                return Ok(true);
            }
            if cancel.is_cancelled() {
                return Ok(false);
            }
        }
    }
}

/// Creates the origin if it doesn't exist yet and attaches this session
/// to it, so every commit from here on is tracked against it.
async fn ensure_origin(target_client: &Client) -> Result<(), CopydbError> {
    let exists = target_client
        .query_opt("SELECT 1 FROM pg_replication_origin WHERE roname = $1", &[&ORIGIN_NAME])
        .await
        .map_err(|e| CopydbError::upstream(format!("checking replication origin: {e}")))?
        .is_some();
    if !exists {
        target_client
            .execute("SELECT pg_replication_origin_create($1)", &[&ORIGIN_NAME])
            .await
            .map_err(|e| CopydbError::upstream(format!("creating replication origin: {e}")))?;
    }
    target_client
        .batch_execute(&format!("SELECT pg_replication_origin_session_setup('{ORIGIN_NAME}')"))
        .await
        .map_err(|e| CopydbError::upstream(format!("attaching replication origin session: {e}")))?;
    Ok(())
}

async fn pending_sql_files(cdc_dir: &Path) -> Result<Vec<PathBuf>, CopydbError> {
    let mut pending = Vec::new();
    let mut entries = tokio::fs::read_dir(cdc_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("sql") {
            let marker = path.with_extension("sql.applied");
            if !tokio::fs::try_exists(&marker).await? {
                pending.push(path);
            }
        }
    }
    pending.sort();
    Ok(pending)
}

/// Replays one SQL file. Returns `true` if a progress marker in the file
/// advanced `replay_lsn` past the sentinel's `end_lsn`.
async fn apply_file(target_client: &Client, sentinel_client: &Client, path: &Path) -> Result<bool, CopydbError> {
    let content = tokio::fs::read_to_string(path).await?;
    let mut in_txn = false;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(marker) = parse_marker(line, "BEGIN;") {
            target_client
                .batch_execute(line)
                .await
                .map_err(|e| CopydbError::upstream(format!("apply BEGIN: {e}")))?;
            let timestamp = if marker.timestamp.is_empty() { "now()".to_string() } else { quote(&marker.timestamp) };
            target_client
                .batch_execute(&format!(
                    "SELECT pg_replication_origin_xact_setup('{}', {timestamp})",
                    marker.lsn()?
                ))
                .await
                .map_err(|e| CopydbError::upstream(format!("pg_replication_origin_xact_setup: {e}")))?;
            in_txn = true;
            continue;
        }
        if let Some(marker) = parse_marker(line, "COMMIT;") {
            target_client
                .batch_execute(line)
                .await
                .map_err(|e| CopydbError::upstream(format!("apply COMMIT: {e}")))?;
            in_txn = false;
            if advance_replay_lsn(sentinel_client, marker.lsn()?).await? {
                mark_applied(path).await?;
                return Ok(true);
            }
            continue;
        }
        if let Some(lsn) = comment_lsn(line, "-- SWITCH WAL") {
            if advance_replay_lsn(sentinel_client, lsn).await? {
                mark_applied(path).await?;
                return Ok(true);
            }
            continue;
        }
        if line.starts_with("-- KEEPALIVE") {
            if let Some(lsn) = line.split_whitespace().nth(2).and_then(|s| s.parse().ok()) {
                if advance_replay_lsn(sentinel_client, lsn).await? {
                    mark_applied(path).await?;
                    return Ok(true);
                }
            }
            continue;
        }

        target_client
            .batch_execute(line)
            .await
            .map_err(|e| CopydbError::upstream(format!("apply statement failed: {e}")))?;
    }

    if in_txn {
        // A file should never end mid-transaction; leaving it open would
        // block subsequent apply work on this connection.
        target_client
            .batch_execute("COMMIT")
            .await
            .map_err(|e| CopydbError::upstream(format!("closing dangling transaction: {e}")))?;
    }

    mark_applied(path).await?;
    Ok(false)
}

fn parse_marker(line: &str, prefix: &str) -> Option<TxnMarker> {
    let rest = line.strip_prefix(prefix)?;
    let comment = rest.trim().strip_prefix("-- ")?;
    serde_json::from_str(comment).ok()
}

fn comment_lsn(line: &str, prefix: &str) -> Option<Lsn> {
    let rest = line.strip_prefix(prefix)?;
    rest.split_whitespace().last()?.parse().ok()
}

fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

async fn advance_replay_lsn(sentinel_client: &Client, lsn: Lsn) -> Result<bool, CopydbError> {
    copydb_sentinel::set_replay_lsn(sentinel_client, lsn).await?;
    let sentinel = copydb_sentinel::read(sentinel_client).await?;
    Ok(sentinel.reached_end_pos())
}

async fn mark_applied(path: &Path) -> Result<(), CopydbError> {
    let marker = path.with_extension("sql.applied");
    tokio::fs::write(&marker, b"").await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_marker_recovers_xid_and_lsn() {
        let line = crate::encode::render_begin_marker(1, "0/100", "2024-01-01 00:00:00+00");
        let marker = parse_marker(&line, "BEGIN;").unwrap();
        assert_eq!(marker.xid, 1);
        assert_eq!(marker.lsn().unwrap(), Lsn::new(0, 0x100));
    }

    #[test]
    fn commit_marker_recovers_lsn_without_timestamp() {
        let line = crate::encode::render_commit_marker(1, "0/200");
        let marker = parse_marker(&line, "COMMIT;").unwrap();
        assert_eq!(marker.lsn().unwrap(), Lsn::new(0, 0x200));
    }

    #[test]
    fn switch_wal_comment_is_recognized() {
        assert_eq!(comment_lsn("-- SWITCH WAL 0/300", "-- SWITCH WAL"), Some(Lsn::new(0, 0x300)));
    }

    #[test]
    fn non_marker_lines_are_not_matched() {
        assert!(parse_marker("INSERT INTO foo VALUES (1);", "BEGIN;").is_none());
    }
}
