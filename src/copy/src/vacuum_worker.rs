// Copyright copydb authors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The vacuum worker: runs `VACUUM ANALYZE` on a table once its data and
//! indexes are both in place, so the target's planner statistics are
//! fresh before the run is declared done.

use deadpool_postgres::Pool;
use tracing::debug;

use copydb_repr::{CopydbError, SourceTable};

pub async fn vacuum_analyze(target_pool: &Pool, table: &SourceTable) -> Result<(), CopydbError> {
    let client = target_pool.get().await.map_err(|e| CopydbError::upstream(e.to_string()))?;
    let sql = format!("VACUUM ANALYZE {}", table.qualified_name());
    debug!(oid = table.oid, %sql, "vacuuming table");
    client.batch_execute(&sql).await.map_err(|e| CopydbError::upstream(format!("{sql}: {e}")))
}
