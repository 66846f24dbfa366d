// Copyright copydb authors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The index/constraint worker: builds one index and, if it backs a
//! constraint, attaches the constraint using it. A per-table semaphore
//! serializes concurrent index builds on the same table (distinct tables
//! still proceed fully in parallel).

use std::collections::HashMap;
use std::sync::Arc;

use deadpool_postgres::Pool;
use tokio::sync::Semaphore;
use tracing::{debug, info};

use copydb_repr::{CopydbError, SourceIndex};
use copydb_workdir::summary_io::{finish_table, open_table};
use copydb_workdir::{pidfile, WorkDirPaths};

/// One [`Semaphore`] per table oid, each initialized to 1 permit, so that
/// building several indexes on the same table never races (the database
/// would otherwise deadlock or serialize unpredictably); unrelated tables
/// get independent semaphores and proceed concurrently.
pub type IndexSemaphores = Arc<std::sync::Mutex<HashMap<u32, Arc<Semaphore>>>>;

pub fn new_index_semaphores() -> IndexSemaphores {
    Arc::new(std::sync::Mutex::new(HashMap::new()))
}

fn semaphore_for(semaphores: &IndexSemaphores, table_oid: u32) -> Arc<Semaphore> {
    let mut map = semaphores.lock().unwrap();
    map.entry(table_oid).or_insert_with(|| Arc::new(Semaphore::new(1))).clone()
}

/// Builds `index` against `table_oid` and attaches its constraint if it
/// has one. Honors `resume` via the two done files (index, constraint).
pub async fn build_index(
    target_pool: &Pool,
    paths: &WorkDirPaths,
    table_oid: u32,
    index: &SourceIndex,
    resume: bool,
    semaphores: &IndexSemaphores,
) -> Result<(), CopydbError> {
    let lock_file = paths.index_lock_file(index.index_oid);
    let index_done = paths.index_done_file(index.index_oid);
    let constraint_done = paths.constraint_done_file(index.index_oid);

    let sem = semaphore_for(semaphores, table_oid);
    let _permit = sem.acquire().await.map_err(|_| CopydbError::bug("index semaphore closed"))?;

    if !(resume && index_done.exists()) {
        if !pidfile::lock_file_is_takeable(&lock_file)? {
            return Err(CopydbError::environmental(format!("index {} is locked by a live process", index.index_oid)));
        }
        pidfile::write_pidfile(&lock_file, std::process::id())?;
        let (summary, timer) =
            open_table(&lock_file, std::process::id(), index.index_oid, &index.index_namespace, &index.index_relation, &index.definition)?;
        debug!(index_oid = index.index_oid, "creating index");
        execute(target_pool, &index.definition).await?;
        finish_table(&index_done, summary, timer)?;
    } else {
        debug!(index_oid = index.index_oid, "index already built, skipping (resume)");
    }

    if index.has_constraint() {
        if !(resume && constraint_done.exists()) {
            let constraint_def = index.constraint_definition.as_deref().ok_or_else(|| {
                CopydbError::bug(format!("index {} has a constraint oid but no definition", index.index_oid))
            })?;
            let name = index.constraint_name.as_deref().unwrap_or("?");
            let sql = format!(
                "ALTER TABLE {}.{} ADD CONSTRAINT {} {} USING INDEX {}",
                index.table_namespace, index.table_relation, name, constraint_def, index.index_relation
            );
            let (summary, timer) = open_table(
                &lock_file,
                std::process::id(),
                index.constraint_oid,
                &index.index_namespace,
                name,
                &sql,
            )?;
            info!(constraint_oid = index.constraint_oid, "attaching constraint");
            execute(target_pool, &sql).await?;
            finish_table(&constraint_done, summary, timer)?;
        } else {
            debug!(constraint_oid = index.constraint_oid, "constraint already attached, skipping (resume)");
        }
    }

    Ok(())
}

async fn execute(pool: &Pool, sql: &str) -> Result<(), CopydbError> {
    let client = pool.get().await.map_err(|e| CopydbError::upstream(e.to_string()))?;
    client.batch_execute(sql).await.map_err(|e| CopydbError::upstream(format!("{sql}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_table_gets_its_own_semaphore_instance() {
        let semaphores = new_index_semaphores();
        let a = semaphore_for(&semaphores, 1);
        let b = semaphore_for(&semaphores, 2);
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn repeated_lookups_for_the_same_table_share_a_semaphore() {
        let semaphores = new_index_semaphores();
        let a = semaphore_for(&semaphores, 1);
        let a2 = semaphore_for(&semaphores, 1);
        assert!(Arc::ptr_eq(&a, &a2));
    }
}
