// Copyright copydb authors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The large-object (blobs) worker: copies every large object from
//! source to target on a dedicated connection, concurrent with the
//! table-data phase, and writes the `blobs` summary (§4.2, §4.4 step 5).

use std::path::Path;
use std::time::Instant;

use tokio_postgres::Client;
use tracing::{debug, info};

use copydb_repr::{BlobsSummary, CopydbError};
use copydb_workdir::summary_io::write_blobs_summary;

/// Copies every large object visible to `source_client` onto `target_client`,
/// preserving object oids, and records the run in `blobs_done_file`.
pub async fn copy_large_objects(
    source_client: &Client,
    target_client: &Client,
    blobs_done_file: &Path,
) -> Result<BlobsSummary, CopydbError> {
    let started = Instant::now();
    let oids: Vec<u32> = source_client
        .query("SELECT oid FROM pg_largeobject_metadata ORDER BY oid", &[])
        .await
        .map_err(|e| CopydbError::upstream(format!("listing large objects: {e}")))?
        .into_iter()
        .map(|row| row.get::<_, u32>(0))
        .collect();

    info!(count = oids.len(), "copying large objects");
    for oid in &oids {
        let data: Vec<u8> = source_client
            .query_one("SELECT lo_get($1)", &[&(*oid as i64)])
            .await
            .map_err(|e| CopydbError::upstream(format!("reading large object {oid}: {e}")))?
            .get(0);

        target_client
            .execute("SELECT lo_create($1)", &[&(*oid as i64)])
            .await
            .map_err(|e| CopydbError::upstream(format!("creating large object {oid}: {e}")))?;
        target_client
            .execute("SELECT lo_put($1, 0, $2)", &[&(*oid as i64), &data])
            .await
            .map_err(|e| CopydbError::upstream(format!("writing large object {oid}: {e}")))?;
        debug!(oid, bytes = data.len(), "large object copied");
    }

    let summary = BlobsSummary {
        pid: std::process::id(),
        count: oids.len() as u64,
        duration_ms: started.elapsed().as_millis() as u64,
    };
    write_blobs_summary(blobs_done_file, &summary)?;
    Ok(summary)
}
