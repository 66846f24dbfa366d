// Copyright copydb authors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The parallel copy orchestrator (C5): drives the snapshot manager and
//! catalog client, then runs the ten-step sequence in §4.4 over a bounded
//! pool of async tasks coordinated by queues and semaphores.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use copydb_catalog::CatalogClient;
use copydb_repr::{CopyPlan, CopydbError, RunSummary, SourceTable, StepTimings};
use copydb_snapshot::{SnapshotManager, WorkerPools};
use copydb_workdir::summary_io::read_table_summary;
use copydb_workdir::{mark_done, WorkDirPaths};

use crate::index_worker::{self, new_index_semaphores};
use crate::queues::{IndexWorkItem, VacuumWorkItem, QUEUE_DEPTH};
use crate::table_worker::{self, new_remaining_parts};
use crate::{blobs_worker, schema, sequences, vacuum_worker};

/// Drives one `copy-db` run end to end and returns the assembled
/// [`RunSummary`]. Fatal errors abort the run; with `plan.fail_fast ==
/// false`, per-table/per-index failures are recorded in
/// `RunSummary::errors` instead of aborting their siblings.
pub async fn run(plan: &CopyPlan, paths: &WorkDirPaths, cancel: CancellationToken) -> Result<RunSummary, CopydbError> {
    let mut timings = StepTimings::default();
    let mut errors = Vec::new();

    // --- snapshot + catalog --------------------------------------------
    let mut snapshot = SnapshotManager::new();
    snapshot.prepare(&plan.source_uri, plan.consistent, plan.snapshot_id.as_deref()).await?;

    let started = Instant::now();
    let schema_dump_done = paths.schema_dump_done_file();
    if !(plan.resume && schema_dump_done.exists()) {
        schema::dump_schema(&plan.source_uri, &paths.schema_dir(), snapshot.snapshot_id()).await?;
        mark_done(&schema_dump_done)?;
    } else {
        info!("schema already dumped, skipping (resume)");
    }
    timings.dump_ms = started.elapsed().as_millis() as u64;

    let started = Instant::now();
    let target_pool_cfg = WorkerPools::build(&plan.target_uri, plan.table_jobs as usize, plan.index_jobs as usize, plan.vacuum_jobs as usize)?;

    let catalog_pool = deadpool_postgres::Pool::builder(deadpool_postgres::Manager::from_config(
        plan.source_uri.parse().map_err(|e| CopydbError::configuration(format!("parsing source uri: {e}")))?,
        tokio_postgres::NoTls,
        deadpool_postgres::ManagerConfig { recycling_method: deadpool_postgres::RecyclingMethod::Fast },
    ))
    .max_size(1)
    .build()
    .map_err(|e| CopydbError::configuration(e.to_string()))?;
    let catalog = CatalogClient::new(catalog_pool);
    let tables = catalog.list_tables(plan.split_threshold_bytes).await?;
    let sequences_list = catalog.list_sequences().await?;
    timings.catalog_queries_ms = started.elapsed().as_millis() as u64;

    if !plan.skip_extensions {
        let extensions = catalog.list_extensions().await?;
        info!(count = extensions.len(), "discovered extensions on source");
    }

    if !plan.skip_large_objects {
        let large_object_count = catalog.count_large_objects().await?;
        info!(count = large_object_count, "discovered large objects on source");
    }

    // --- pre-data restore -------------------------------------------------
    let started = Instant::now();
    let pre_data_done = paths.pre_data_done_file();
    if !(plan.resume && pre_data_done.exists()) {
        schema::restore_pre_data(&plan.target_uri, &paths.schema_dir()).await?;
        mark_done(&pre_data_done)?;
    } else {
        info!("pre-data already restored, skipping (resume)");
    }
    timings.prepare_schema_ms = started.elapsed().as_millis() as u64;

    // --- table data + large objects, concurrently -------------------------
    let started = Instant::now();
    let (index_tx, mut index_rx) = mpsc::channel::<IndexWorkItem>(QUEUE_DEPTH);
    let (vacuum_tx, mut vacuum_rx) = mpsc::channel::<VacuumWorkItem>(QUEUE_DEPTH);
    let remaining_parts = new_remaining_parts(&tables);
    let table_semaphore = Arc::new(Semaphore::new(plan.table_jobs as usize));
    let snapshot_handle = snapshot.copy(&plan.source_uri);

    let mut table_tasks: JoinSet<Result<(), CopydbError>> = JoinSet::new();
    for table in tables.clone() {
        let parts: Vec<Option<copydb_repr::PartitionRange>> =
            if table.parts.is_empty() { vec![None] } else { table.parts.iter().cloned().map(Some).collect() };
        for part in parts {
            let semaphore = table_semaphore.clone();
            let cancel = cancel.clone();
            let index_tx = index_tx.clone();
            let vacuum_tx = vacuum_tx.clone();
            let remaining_parts = remaining_parts.clone();
            let source_uri = plan.source_uri.clone();
            let snapshot_handle = snapshot_handle.clone();
            let target_pool = target_pool_cfg.tables.clone();
            let paths = paths.clone();
            let resume = plan.resume;
            let table = table.clone();
            let fail_fast = plan.fail_fast;

            table_tasks.spawn(async move {
                let _permit = tokio::select! {
                    permit = semaphore.acquire_owned() => permit.map_err(|_| CopydbError::bug("table semaphore closed"))?,
                    _ = cancel.cancelled() => return Ok(()),
                };
                let source_client = match &snapshot_handle {
                    Some(handle) => {
                        let (client, _connection_task) = handle.connect().await?;
                        client
                    }
                    None => {
                        let (client, conn) = tokio_postgres::connect(&source_uri, tokio_postgres::NoTls)
                            .await
                            .map_err(|e| CopydbError::upstream(format!("worker connecting to source: {e}")))?;
                        tokio::spawn(async move {
                            if let Err(e) = conn.await {
                                warn!(error = %e, "table worker source connection closed with an error");
                            }
                        });
                        client
                    }
                };

                let result = table_worker::copy_table_part(
                    &source_client,
                    &target_pool,
                    &paths,
                    &table,
                    part.as_ref(),
                    resume,
                    &remaining_parts,
                )
                .await;

                match result {
                    Ok(outcome) => {
                        if outcome.is_last_part {
                            if !table.index_list.is_empty() {
                                write_idx_list_file(&paths.table_idx_list_file(table.oid), &table.index_list)?;
                                let _ = index_tx.send(IndexWorkItem { table: table.clone() }).await;
                            }
                            let _ = vacuum_tx.send(VacuumWorkItem { table }).await;
                        }
                        Ok(())
                    }
                    Err(e) if !fail_fast && !e.is_fatal() => {
                        warn!(error = %e, oid = table.oid, "non-fatal table copy error, continuing");
                        Err(e)
                    }
                    Err(e) => {
                        cancel.cancel();
                        Err(e)
                    }
                }
            });
        }
    }
    drop(index_tx);
    drop(vacuum_tx);

    let blobs_done_file = paths.blobs_done_file();
    let blobs_task = if plan.skip_large_objects {
        None
    } else if plan.resume && blobs_done_file.exists() {
        info!("large objects already copied, skipping (resume)");
        None
    } else {
        let source_uri = plan.source_uri.clone();
        let target_uri = plan.target_uri.clone();
        let blobs_done_file = blobs_done_file.clone();
        Some(tokio::spawn(async move {
            let (source_client, source_conn) = tokio_postgres::connect(&source_uri, tokio_postgres::NoTls)
                .await
                .map_err(|e| CopydbError::upstream(format!("blobs worker connecting to source: {e}")))?;
            let (target_client, target_conn) = tokio_postgres::connect(&target_uri, tokio_postgres::NoTls)
                .await
                .map_err(|e| CopydbError::upstream(format!("blobs worker connecting to target: {e}")))?;
            tokio::spawn(async move {
                let _ = source_conn.await;
            });
            tokio::spawn(async move {
                let _ = target_conn.await;
            });
            blobs_worker::copy_large_objects(&source_client, &target_client, &blobs_done_file).await
        }))
    };

    let index_semaphores = new_index_semaphores();
    let mut index_tasks: JoinSet<Result<(), CopydbError>> = JoinSet::new();
    while let Some(item) = index_rx.recv().await {
        for index in item.table.index_list.clone() {
            let target_pool = target_pool_cfg.indexes.clone();
            let paths = paths.clone();
            let semaphores = index_semaphores.clone();
            let resume = plan.resume;
            let table_oid = item.table.oid;
            index_tasks.spawn(async move {
                index_worker::build_index(&target_pool, &paths, table_oid, &index, resume, &semaphores).await
            });
        }
    }

    let mut vacuum_tasks: JoinSet<Result<(), CopydbError>> = JoinSet::new();
    while let Some(item) = vacuum_rx.recv().await {
        let target_pool = target_pool_cfg.vacuum.clone();
        vacuum_tasks.spawn(async move { vacuum_worker::vacuum_analyze(&target_pool, &item.table).await });
    }

    // Drain every worker pool, recording non-fatal failures rather than
    // letting one table's problem hide the rest of the report.
    drain(&mut table_tasks, &mut errors).await;
    mark_done(&paths.tables_phase_done_file())?;
    drain(&mut index_tasks, &mut errors).await;
    mark_done(&paths.indexes_phase_done_file())?;
    drain(&mut vacuum_tasks, &mut errors).await;

    if let Some(task) = blobs_task {
        match task.await {
            Ok(Ok(_summary)) => {}
            Ok(Err(e)) => errors.push(format!("large objects: {e}")),
            Err(e) => errors.push(format!("large objects task panicked: {e}")),
        }
    }
    timings.copy_ms = started.elapsed().as_millis() as u64;

    // --- sequences + post-data --------------------------------------------
    let started = Instant::now();
    let sequences_done = paths.sequences_done_file();
    if !(plan.resume && sequences_done.exists()) {
        sequences::restore_sequences(&target_pool_cfg.tables, &sequences_list).await?;
        mark_done(&sequences_done)?;
    } else {
        info!("sequences already restored, skipping (resume)");
    }

    let post_data_done = paths.post_data_done_file();
    if !(plan.resume && post_data_done.exists()) {
        schema::restore_post_data(&plan.target_uri, &paths.schema_dir()).await?;
        mark_done(&post_data_done)?;
    } else {
        info!("post-data already restored, skipping (resume)");
    }
    timings.finalize_ms = started.elapsed().as_millis() as u64;

    snapshot.close().await?;

    let mut run_summary = collect_summaries(paths, &tables)?;
    run_summary.timings = timings;
    run_summary.errors = errors;
    Ok(run_summary)
}

/// Records which index oids a table's data copy handed off to the index
/// workers. The `mpsc` channel is what actually drives index building; this
/// file is the on-disk artifact a `--resume` operator can inspect without
/// re-running anything (§4.2's `idxListFile`).
fn write_idx_list_file(path: &std::path::Path, index_list: &[copydb_repr::SourceIndex]) -> Result<(), CopydbError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let contents: String = index_list.iter().map(|i| i.index_oid.to_string()).collect::<Vec<_>>().join("\n");
    std::fs::write(path, contents)?;
    Ok(())
}

async fn drain<T>(tasks: &mut JoinSet<Result<T, CopydbError>>, errors: &mut Vec<String>) {
    while let Some(result) = tasks.join_next().await {
        match result {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                error!(error = %e, "worker task failed");
                errors.push(e.to_string());
            }
            Err(join_err) => {
                error!(error = %join_err, "worker task panicked");
                errors.push(format!("BUG: worker task panicked: {join_err}"));
            }
        }
    }
}

fn collect_summaries(paths: &WorkDirPaths, tables: &[SourceTable]) -> Result<RunSummary, CopydbError> {
    let mut summary = RunSummary::default();
    for table in tables {
        let parts: Vec<Option<u32>> =
            if table.parts.is_empty() { vec![None] } else { table.parts.iter().map(|p| Some(p.part_number)).collect() };
        for part in parts {
            let done_file = paths.table_done_file(table.oid, part);
            if done_file.exists() {
                summary.tables.push(read_table_summary(&done_file)?);
            }
        }
        for index in &table.index_list {
            let done_file = paths.index_done_file(index.index_oid);
            if done_file.exists() {
                summary.indexes.push(copydb_workdir::summary_io::read_index_summary(&done_file)?);
            }
            if index.has_constraint() {
                let constraint_file = paths.constraint_done_file(index.index_oid);
                if constraint_file.exists() {
                    summary.indexes.push(copydb_workdir::summary_io::read_index_summary(&constraint_file)?);
                }
            }
        }
    }
    let blobs_done = paths.blobs_done_file();
    if blobs_done.exists() {
        summary.blobs = Some(copydb_workdir::summary_io::read_blobs_summary(&blobs_done)?);
    }
    Ok(summary)
}
