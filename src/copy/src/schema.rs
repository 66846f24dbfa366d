// Copyright copydb authors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Schema dump and restore: shells out to `pg_dump`/`pg_restore` the same
//! way the source tool does, bounded by the held snapshot so the dump
//! sees exactly the rows the table-copy workers will see.

use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::info;

use copydb_repr::CopydbError;

fn pre_data_file(schema_dir: &Path) -> PathBuf {
    schema_dir.join("pre-data.dump")
}

fn post_data_file(schema_dir: &Path) -> PathBuf {
    schema_dir.join("post-data.dump")
}

async fn run(mut cmd: Command, what: &str) -> Result<(), CopydbError> {
    let output = cmd.output().await.map_err(|e| {
        CopydbError::environmental(format!("spawning {what}: {e}"))
    })?;
    if !output.status.success() {
        return Err(CopydbError::upstream(format!(
            "{what} exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(())
}

/// Dumps the pre-data and post-data sections to `schema_dir`, pinned to
/// `snapshot_id` when one is held.
pub async fn dump_schema(source_uri: &str, schema_dir: &Path, snapshot_id: Option<&str>) -> Result<(), CopydbError> {
    tokio::fs::create_dir_all(schema_dir).await?;
    for (section, path) in [("pre-data", pre_data_file(schema_dir)), ("post-data", post_data_file(schema_dir))] {
        info!(section, "dumping schema section");
        let mut cmd = Command::new("pg_dump");
        cmd.arg("--format=custom")
            .arg(format!("--section={section}"))
            .arg("--file")
            .arg(&path)
            .arg("--dbname")
            .arg(source_uri);
        if let Some(id) = snapshot_id {
            cmd.arg("--snapshot").arg(id);
        }
        run(cmd, "pg_dump").await?;
    }
    Ok(())
}

pub async fn restore_pre_data(target_uri: &str, schema_dir: &Path) -> Result<(), CopydbError> {
    info!("restoring pre-data section");
    let mut cmd = Command::new("pg_restore");
    cmd.arg("--section=pre-data").arg("--dbname").arg(target_uri).arg(pre_data_file(schema_dir));
    run(cmd, "pg_restore").await
}

pub async fn restore_post_data(target_uri: &str, schema_dir: &Path) -> Result<(), CopydbError> {
    info!("restoring post-data section");
    let mut cmd = Command::new("pg_restore");
    cmd.arg("--section=post-data").arg("--dbname").arg(target_uri).arg(post_data_file(schema_dir));
    run(cmd, "pg_restore").await
}

/// Dumps only the pre-data section, for the granular `dump pre-data` verb.
pub async fn dump_pre_data(source_uri: &str, schema_dir: &Path, snapshot_id: Option<&str>) -> Result<(), CopydbError> {
    tokio::fs::create_dir_all(schema_dir).await?;
    let mut cmd = Command::new("pg_dump");
    cmd.arg("--format=custom").arg("--section=pre-data").arg("--file").arg(pre_data_file(schema_dir)).arg("--dbname").arg(source_uri);
    if let Some(id) = snapshot_id {
        cmd.arg("--snapshot").arg(id);
    }
    run(cmd, "pg_dump").await
}

/// Dumps only the post-data section, for the granular `dump post-data` verb.
pub async fn dump_post_data(source_uri: &str, schema_dir: &Path, snapshot_id: Option<&str>) -> Result<(), CopydbError> {
    tokio::fs::create_dir_all(schema_dir).await?;
    let mut cmd = Command::new("pg_dump");
    cmd.arg("--format=custom").arg("--section=post-data").arg("--file").arg(post_data_file(schema_dir)).arg("--dbname").arg(source_uri);
    if let Some(id) = snapshot_id {
        cmd.arg("--snapshot").arg(id);
    }
    run(cmd, "pg_dump").await
}

/// `restore parse-list`: prints the archive's table of contents, the same
/// way `pg_restore --list` does, so an operator can inspect what a dump
/// would restore before running it.
pub async fn parse_list(schema_dir: &Path, section: &str) -> Result<String, CopydbError> {
    let path = match section {
        "pre-data" => pre_data_file(schema_dir),
        "post-data" => post_data_file(schema_dir),
        other => return Err(CopydbError::configuration(format!("unknown archive section: {other}"))),
    };
    let output = Command::new("pg_restore")
        .arg("--list")
        .arg(&path)
        .output()
        .await
        .map_err(|e| CopydbError::environmental(format!("spawning pg_restore --list: {e}")))?;
    if !output.status.success() {
        return Err(CopydbError::upstream(format!(
            "pg_restore --list exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dump_file_names_are_stable() {
        let dir = Path::new("/tmp/copydb/schema");
        assert_eq!(pre_data_file(dir), PathBuf::from("/tmp/copydb/schema/pre-data.dump"));
        assert_eq!(post_data_file(dir), PathBuf::from("/tmp/copydb/schema/post-data.dump"));
    }
}
