// Copyright copydb authors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Restores sequence positions on the target from the catalog-derived
//! `(namespace, name, last_value)` triples (§4.4 step 8).

use deadpool_postgres::Pool;
use tracing::debug;

use copydb_repr::CopydbError;

pub async fn restore_sequences(target_pool: &Pool, sequences: &[(String, String, i64)]) -> Result<(), CopydbError> {
    let client = target_pool.get().await.map_err(|e| CopydbError::upstream(e.to_string()))?;
    for (namespace, name, last_value) in sequences {
        let sql = format!("SELECT setval('{namespace}.{name}', {last_value}, true)");
        debug!(%namespace, %name, last_value, "restoring sequence");
        client.batch_execute(&sql).await.map_err(|e| CopydbError::upstream(format!("{sql}: {e}")))?;
    }
    Ok(())
}
