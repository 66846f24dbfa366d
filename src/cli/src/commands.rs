// Copyright copydb authors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Dispatch from a parsed [`crate::args::Command`] into the component
//! crates. Kept thin on purpose: every real decision (resumability,
//! parallelism, wire formats) lives in the crate that owns it.

use std::path::PathBuf;
use std::time::Duration;

use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use tokio_postgres::NoTls;
use tokio_util::sync::CancellationToken;
use tracing::info;

use copydb_catalog::CatalogClient;
use copydb_repr::{CopyPlan, CopydbError, Lsn, Section};
use copydb_supervisor::Supervisor;
use copydb_workdir::state::initialize_workdir;
use copydb_workdir::WorkDirPaths;

use crate::args::{
    CopyDbArgs, CopyTarget, DumpSection, GlobalArgs, ListTarget, RestoreTarget, SentinelAction, StreamApplyArgs,
    StreamCommand, StreamDirArgs, StreamReceiveArgs, StreamSetupArgs,
};

fn require(value: Option<String>, flag: &str, env: &str) -> Result<String, CopydbError> {
    value.ok_or_else(|| CopydbError::configuration(format!("missing {flag} (pass {flag} or set {env})")))
}

fn single_connection_pool(uri: &str) -> Result<Pool, CopydbError> {
    let pg_config = uri.parse().map_err(|e| CopydbError::configuration(format!("parsing {uri}: {e}")))?;
    let manager = Manager::from_config(pg_config, NoTls, ManagerConfig { recycling_method: RecyclingMethod::Fast });
    Pool::builder(manager).max_size(1).build().map_err(|e| CopydbError::configuration(e.to_string()))
}

fn cdc_dir(paths: &WorkDirPaths, explicit: Option<PathBuf>) -> PathBuf {
    paths.cdc_dir(explicit.as_deref())
}

pub async fn copy_db(global: &GlobalArgs, args: CopyDbArgs, paths: &WorkDirPaths) -> Result<(), CopydbError> {
    let plan = CopyPlan {
        source_uri: require(global.source.clone(), "--source", "PGCOPYDB_SOURCE_PGURI")?,
        target_uri: require(global.target.clone(), "--target", "PGCOPYDB_TARGET_PGURI")?,
        table_jobs: args.table_jobs,
        index_jobs: args.index_jobs,
        vacuum_jobs: args.vacuum_jobs,
        split_threshold_bytes: args.split_tables_larger_than,
        section: Section::All,
        restart: args.restart,
        resume: args.resume,
        consistent: !args.no_consistent,
        snapshot_id: args.snapshot,
        fail_fast: args.fail_fast,
        skip_large_objects: args.skip_large_objects,
        skip_extensions: args.skip_extensions,
        follow: args.follow,
        statement_timeout: None,
        lock_timeout: None,
    }
    .validate()?;

    initialize_workdir(paths, plan.restart, plan.resume)?;

    let supervisor = Supervisor::new();
    let cancel = supervisor.cancel_token();

    let summary = tokio::select! {
        result = copydb_copy::run(&plan, paths, cancel.clone()) => result?,
        _ = supervisor.wait_for_shutdown_signal() => {
            return Err(CopydbError::environmental("run interrupted by shutdown signal"));
        }
    };
    println!("{summary}");

    if plan.follow {
        info!("copy-db finished, starting CDC follower (--follow)");
        let setup = StreamSetupArgs { slot_name: "copydb".to_string(), plugin: crate::args::PluginArg::TestDecoding };
        stream_setup(global, &setup).await?;
        let apply_args = StreamApplyArgs { cdc_dir: None, poll_seconds: 1 };
        let follow_supervisor = Supervisor::new();
        let follow_cancel = follow_supervisor.cancel_token();
        tokio::select! {
            result = stream_replay(global, apply_args, paths, follow_cancel) => result?,
            _ = follow_supervisor.wait_for_shutdown_signal() => {}
        }
    }

    Ok(())
}

pub async fn list(global: &GlobalArgs, target: ListTarget) -> Result<(), CopydbError> {
    let source = require(global.source.clone(), "--source", "PGCOPYDB_SOURCE_PGURI")?;
    let pool = single_connection_pool(&source)?;
    let catalog = CatalogClient::new(pool);

    match target {
        ListTarget::Extensions => {
            for ext in catalog.list_extensions().await? {
                println!("{ext}");
            }
        }
        ListTarget::Tables | ListTarget::Schema => {
            let tables = catalog.list_tables(10 * 1024 * 1024 * 1024).await?;
            for table in tables {
                println!("{:>10} {}.{} ({} bytes)", table.oid, table.namespace, table.relation, table.bytes);
            }
        }
        ListTarget::Indexes => {
            let tables = catalog.list_tables(10 * 1024 * 1024 * 1024).await?;
            for table in tables {
                for index in table.index_list {
                    println!("{:>10} {}.{}", index.index_oid, index.index_namespace, index.index_relation);
                }
            }
        }
        ListTarget::Sequences => {
            for (namespace, name, last_value) in catalog.list_sequences().await? {
                println!("{namespace}.{name} = {last_value}");
            }
        }
    }
    Ok(())
}

pub async fn dump(global: &GlobalArgs, section: DumpSection, paths: &WorkDirPaths) -> Result<(), CopydbError> {
    let source = require(global.source.clone(), "--source", "PGCOPYDB_SOURCE_PGURI")?;
    let schema_dir = paths.schema_dir();
    match section {
        DumpSection::Schema => copydb_copy::schema::dump_schema(&source, &schema_dir, None).await,
        DumpSection::PreData => copydb_copy::schema::dump_pre_data(&source, &schema_dir, None).await,
        DumpSection::PostData => copydb_copy::schema::dump_post_data(&source, &schema_dir, None).await,
    }
}

pub async fn restore(global: &GlobalArgs, target: RestoreTarget, paths: &WorkDirPaths) -> Result<(), CopydbError> {
    let schema_dir = paths.schema_dir();
    match target {
        RestoreTarget::Schema => {
            let target_uri = require(global.target.clone(), "--target", "PGCOPYDB_TARGET_PGURI")?;
            copydb_copy::schema::restore_pre_data(&target_uri, &schema_dir).await?;
            copydb_copy::schema::restore_post_data(&target_uri, &schema_dir).await
        }
        RestoreTarget::PreData => {
            let target_uri = require(global.target.clone(), "--target", "PGCOPYDB_TARGET_PGURI")?;
            copydb_copy::schema::restore_pre_data(&target_uri, &schema_dir).await
        }
        RestoreTarget::PostData => {
            let target_uri = require(global.target.clone(), "--target", "PGCOPYDB_TARGET_PGURI")?;
            copydb_copy::schema::restore_post_data(&target_uri, &schema_dir).await
        }
        RestoreTarget::ParseList => {
            let listing = copydb_copy::schema::parse_list(&schema_dir, "pre-data").await?;
            print!("{listing}");
            Ok(())
        }
    }
}

/// Runs one section of a copy. `table-data`/`indexes`/`constraints`/`data`
/// reuse the full orchestrator sequence (it already performs them as part
/// of one run); `blobs` and `sequences` are cheap enough to run standalone
/// against a single connection pair.
pub async fn copy_section(
    global: &GlobalArgs,
    target: CopyTarget,
    paths: &WorkDirPaths,
) -> Result<(), CopydbError> {
    let source = require(global.source.clone(), "--source", "PGCOPYDB_SOURCE_PGURI")?;
    let target_uri = require(global.target.clone(), "--target", "PGCOPYDB_TARGET_PGURI")?;

    match target {
        CopyTarget::Blobs => {
            let (source_client, source_conn) = tokio_postgres::connect(&source, NoTls)
                .await
                .map_err(|e| CopydbError::upstream(format!("connecting to source: {e}")))?;
            let (target_client, target_conn) = tokio_postgres::connect(&target_uri, NoTls)
                .await
                .map_err(|e| CopydbError::upstream(format!("connecting to target: {e}")))?;
            tokio::spawn(async move {
                let _ = source_conn.await;
            });
            tokio::spawn(async move {
                let _ = target_conn.await;
            });
            let summary =
                copydb_copy::blobs_worker::copy_large_objects(&source_client, &target_client, &paths.blobs_done_file())
                    .await?;
            println!("copied {} large object(s)", summary.count);
            Ok(())
        }
        CopyTarget::Sequences => {
            let pool = single_connection_pool(&target_uri)?;
            let catalog = CatalogClient::new(single_connection_pool(&source)?);
            let sequences = catalog.list_sequences().await?;
            copydb_copy::sequences::restore_sequences(&pool, &sequences).await?;
            println!("restored {} sequence(s)", sequences.len());
            Ok(())
        }
        CopyTarget::Data | CopyTarget::TableData | CopyTarget::Indexes | CopyTarget::Constraints => {
            let plan = CopyPlan {
                source_uri: source,
                target_uri,
                table_jobs: 4,
                index_jobs: 2,
                vacuum_jobs: 2,
                split_threshold_bytes: 10 * 1024 * 1024 * 1024,
                section: Section::All,
                restart: false,
                resume: true,
                consistent: true,
                snapshot_id: None,
                fail_fast: true,
                skip_large_objects: false,
                skip_extensions: false,
                follow: false,
                statement_timeout: None,
                lock_timeout: None,
            }
            .validate()?;
            initialize_workdir(paths, false, true)?;
            let summary = copydb_copy::run(&plan, paths, CancellationToken::new()).await?;
            println!("{summary}");
            Ok(())
        }
    }
}

pub async fn stream(global: &GlobalArgs, command: StreamCommand, paths: &WorkDirPaths) -> Result<(), CopydbError> {
    match command {
        StreamCommand::Setup(args) => stream_setup(global, &args).await,
        StreamCommand::Cleanup => stream_cleanup(global).await,
        StreamCommand::Receive(args) => stream_receive(global, args, paths).await,
        StreamCommand::Prefetch(args) => stream_prefetch(global, args, paths).await,
        StreamCommand::Catchup(args) => {
            let supervisor = Supervisor::new();
            stream_catchup(global, args, paths, supervisor.cancel_token()).await
        }
        StreamCommand::Replay(args) => {
            let supervisor = Supervisor::new();
            stream_replay(global, args, paths, supervisor.cancel_token()).await
        }
        StreamCommand::Transform(args) => stream_transform(args, paths).await,
        StreamCommand::Apply(args) => {
            let supervisor = Supervisor::new();
            stream_apply_once(global, args, paths, supervisor.cancel_token()).await
        }
        StreamCommand::Sentinel { action } => stream_sentinel(global, action).await,
    }
}

async fn connect_source(global: &GlobalArgs) -> Result<(tokio_postgres::Client, String), CopydbError> {
    let source = require(global.source.clone(), "--source", "PGCOPYDB_SOURCE_PGURI")?;
    let (client, conn) = tokio_postgres::connect(&source, NoTls)
        .await
        .map_err(|e| CopydbError::upstream(format!("connecting to source: {e}")))?;
    tokio::spawn(async move {
        let _ = conn.await;
    });
    Ok((client, source))
}

async fn stream_setup(global: &GlobalArgs, args: &StreamSetupArgs) -> Result<(), CopydbError> {
    let (client, _source) = connect_source(global).await?;
    client
        .simple_query(&format!(
            "CREATE_REPLICATION_SLOT \"{}\" LOGICAL {}",
            args.slot_name,
            match args.plugin {
                crate::args::PluginArg::TestDecoding => "test_decoding",
                crate::args::PluginArg::Wal2json => "wal2json",
            }
        ))
        .await
        .ok();
    copydb_sentinel::init(&client, Lsn::ZERO).await?;
    println!("stream setup complete (slot={})", args.slot_name);
    Ok(())
}

async fn stream_cleanup(global: &GlobalArgs) -> Result<(), CopydbError> {
    let (client, _source) = connect_source(global).await?;
    client.batch_execute("DROP TABLE IF EXISTS copydb.sentinel").await.map_err(|e| CopydbError::upstream(e.to_string()))?;
    println!("stream cleanup complete");
    Ok(())
}

async fn stream_receive(global: &GlobalArgs, args: StreamReceiveArgs, paths: &WorkDirPaths) -> Result<(), CopydbError> {
    let source = require(global.source.clone(), "--source", "PGCOPYDB_SOURCE_PGURI")?;
    let supervisor = Supervisor::new();
    let cancel = supervisor.cancel_token();
    let config = copydb_cdc::ReceiveConfig {
        slot_name: args.slot_name,
        plugin: args.plugin.into(),
        wal_seg_size: args.wal_seg_size,
        cdc_dir: cdc_dir(paths, args.cdc_dir),
        keepalive_interval: Duration::from_secs(args.keepalive_seconds),
    };
    tokio::select! {
        result = copydb_cdc::receive(&source, config, cancel.clone()) => result,
        _ = supervisor.wait_for_shutdown_signal() => Ok(()),
    }
}

async fn stream_prefetch(global: &GlobalArgs, args: StreamReceiveArgs, paths: &WorkDirPaths) -> Result<(), CopydbError> {
    let dir = cdc_dir(paths, args.cdc_dir.clone());
    let source = require(global.source.clone(), "--source", "PGCOPYDB_SOURCE_PGURI")?;
    let supervisor = Supervisor::new();
    let cancel = supervisor.cancel_token();
    let config = copydb_cdc::ReceiveConfig {
        slot_name: args.slot_name,
        plugin: args.plugin.into(),
        wal_seg_size: args.wal_seg_size,
        cdc_dir: dir.clone(),
        keepalive_interval: Duration::from_secs(args.keepalive_seconds),
    };
    let receive_cancel = cancel.clone();
    let receiver = tokio::spawn(async move { copydb_cdc::receive(&source, config, receive_cancel).await });

    loop {
        for segment in copydb_cdc::pending_segments(&dir).await? {
            copydb_cdc::transform_segment(paths, &dir, &segment).await?;
        }
        tokio::select! {
            _ = supervisor.wait_for_shutdown_signal() => {
                cancel.cancel();
                break;
            }
            _ = tokio::time::sleep(Duration::from_secs(1)) => continue,
        }
    }
    receiver.await.map_err(copydb_supervisor::join_error_to_bug)?
}

async fn stream_transform(args: StreamDirArgs, paths: &WorkDirPaths) -> Result<(), CopydbError> {
    let dir = cdc_dir(paths, args.cdc_dir);
    for segment in copydb_cdc::pending_segments(&dir).await? {
        if let Some(sql) = copydb_cdc::transform_segment(paths, &dir, &segment).await? {
            println!("transformed {}", sql.display());
        }
    }
    Ok(())
}

async fn stream_apply_once(
    global: &GlobalArgs,
    args: StreamApplyArgs,
    paths: &WorkDirPaths,
    cancel: CancellationToken,
) -> Result<(), CopydbError> {
    let source = require(global.source.clone(), "--source", "PGCOPYDB_SOURCE_PGURI")?;
    let target = require(global.target.clone(), "--target", "PGCOPYDB_TARGET_PGURI")?;
    let config = copydb_cdc::ApplyConfig { cdc_dir: cdc_dir(paths, args.cdc_dir), poll_interval: Duration::from_secs(args.poll_seconds) };
    copydb_cdc::apply(&source, &target, config, cancel).await?;
    Ok(())
}

async fn stream_catchup(
    global: &GlobalArgs,
    args: StreamApplyArgs,
    paths: &WorkDirPaths,
    cancel: CancellationToken,
) -> Result<(), CopydbError> {
    let source = require(global.source.clone(), "--source", "PGCOPYDB_SOURCE_PGURI")?;
    let target = require(global.target.clone(), "--target", "PGCOPYDB_TARGET_PGURI")?;
    let config = copydb_cdc::ApplyConfig { cdc_dir: cdc_dir(paths, args.cdc_dir), poll_interval: Duration::from_secs(args.poll_seconds) };
    let reached_end = copydb_cdc::apply(&source, &target, config, cancel).await?;
    if !reached_end {
        return Err(CopydbError::environmental("catchup stopped before reaching the sentinel end position"));
    }
    Ok(())
}

async fn stream_replay(
    global: &GlobalArgs,
    args: StreamApplyArgs,
    paths: &WorkDirPaths,
    cancel: CancellationToken,
) -> Result<(), CopydbError> {
    let source = require(global.source.clone(), "--source", "PGCOPYDB_SOURCE_PGURI")?;
    let target = require(global.target.clone(), "--target", "PGCOPYDB_TARGET_PGURI")?;
    let config = copydb_cdc::ApplyConfig { cdc_dir: cdc_dir(paths, args.cdc_dir), poll_interval: Duration::from_secs(args.poll_seconds) };
    copydb_cdc::apply(&source, &target, config, cancel).await?;
    Ok(())
}

async fn stream_sentinel(global: &GlobalArgs, action: SentinelAction) -> Result<(), CopydbError> {
    let (client, _source) = connect_source(global).await?;
    match action {
        SentinelAction::Get => {
            let sentinel = copydb_sentinel::read(&client).await?;
            println!(
                "start_lsn={} end_lsn={} replay_lsn={} apply_enabled={}",
                sentinel.start_lsn,
                sentinel.end_lsn.map(|l| l.to_string()).unwrap_or_else(|| "-".to_string()),
                sentinel.replay_lsn,
                sentinel.apply_enabled
            );
        }
        SentinelAction::SetApply { enabled } => {
            copydb_sentinel::set_apply_enabled(&client, enabled).await?;
            println!("apply_enabled={enabled}");
        }
        SentinelAction::SetEndpos { lsn } => {
            let lsn: Lsn = lsn.parse()?;
            copydb_sentinel::set_end_lsn(&client, lsn).await?;
            println!("end_lsn={lsn}");
        }
    }
    Ok(())
}
