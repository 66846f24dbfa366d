// Copyright copydb authors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Persists the [`Sentinel`] as a single-row table on the source
//! database, so a `stream sentinel set-endpos` issued from a different
//! invocation of the CLI is visible to a running `stream apply`.

use tokio_postgres::Client;
use tracing::info;

use copydb_repr::{CopydbError, Lsn, Sentinel};

const CREATE_TABLE_SQL: &str = "\
CREATE SCHEMA IF NOT EXISTS copydb; \
CREATE TABLE IF NOT EXISTS copydb.sentinel ( \
    id boolean PRIMARY KEY DEFAULT true CHECK (id), \
    start_lsn text NOT NULL, \
    end_lsn text, \
    replay_lsn text NOT NULL, \
    apply_enabled boolean NOT NULL \
)";

/// Creates the sentinel table (idempotent) and inserts the initial row
/// if none exists yet.
pub async fn init(client: &Client, start_lsn: Lsn) -> Result<(), CopydbError> {
    client.batch_execute(CREATE_TABLE_SQL).await.map_err(|e| CopydbError::upstream(e.to_string()))?;
    let sentinel = Sentinel::new(start_lsn);
    client
        .execute(
            "INSERT INTO copydb.sentinel (id, start_lsn, end_lsn, replay_lsn, apply_enabled) \
             VALUES (true, $1, NULL, $2, $3) ON CONFLICT (id) DO NOTHING",
            &[&sentinel.start_lsn.to_string(), &sentinel.replay_lsn.to_string(), &sentinel.apply_enabled],
        )
        .await
        .map_err(|e| CopydbError::upstream(e.to_string()))?;
    info!(start_lsn = %start_lsn, "sentinel initialized");
    Ok(())
}

pub async fn read(client: &Client) -> Result<Sentinel, CopydbError> {
    let row = client
        .query_one("SELECT start_lsn, end_lsn, replay_lsn, apply_enabled FROM copydb.sentinel WHERE id", &[])
        .await
        .map_err(|e| CopydbError::upstream(format!("reading sentinel: {e}")))?;
    let start_lsn: String = row.get(0);
    let end_lsn: Option<String> = row.get(1);
    let replay_lsn: String = row.get(2);
    let apply_enabled: bool = row.get(3);

    Ok(Sentinel {
        start_lsn: start_lsn.parse()?,
        end_lsn: end_lsn.map(|s| s.parse()).transpose()?,
        replay_lsn: replay_lsn.parse()?,
        apply_enabled,
    })
}

/// Publishes apply's current progress. Called after each keepalive
/// marker (§4.7 step 3).
pub async fn set_replay_lsn(client: &Client, replay_lsn: Lsn) -> Result<(), CopydbError> {
    client
        .execute("UPDATE copydb.sentinel SET replay_lsn = $1 WHERE id", &[&replay_lsn.to_string()])
        .await
        .map_err(|e| CopydbError::upstream(e.to_string()))?;
    Ok(())
}

pub async fn set_end_lsn(client: &Client, end_lsn: Lsn) -> Result<(), CopydbError> {
    client
        .execute("UPDATE copydb.sentinel SET end_lsn = $1 WHERE id", &[&end_lsn.to_string()])
        .await
        .map_err(|e| CopydbError::upstream(e.to_string()))?;
    Ok(())
}

pub async fn set_apply_enabled(client: &Client, enabled: bool) -> Result<(), CopydbError> {
    client
        .execute("UPDATE copydb.sentinel SET apply_enabled = $1 WHERE id", &[&enabled])
        .await
        .map_err(|e| CopydbError::upstream(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_table_sql_is_idempotent_syntax() {
        assert!(CREATE_TABLE_SQL.contains("IF NOT EXISTS"));
    }
}
