// Copyright copydb authors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The verb tree (§6): `copy-db`, `list`, `dump`, `restore`, `copy`, and
//! `stream`, each mirroring the matching section of the specification.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "copydb", version = copydb_build_info::BUILD_INFO.human_version())]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug)]
pub struct GlobalArgs {
    /// Source database connection string.
    #[arg(long, env = "PGCOPYDB_SOURCE_PGURI", global = true)]
    pub source: Option<String>,

    /// Target database connection string.
    #[arg(long, env = "PGCOPYDB_TARGET_PGURI", global = true)]
    pub target: Option<String>,

    /// Work directory; a temp directory is used when unset.
    #[arg(long, env = "PGCOPYDB_DIR", global = true)]
    pub dir: Option<PathBuf>,

    /// Render logs as JSON lines instead of plain text.
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Runs the full schema + data + index + sequence copy in one shot.
    CopyDb(CopyDbArgs),
    /// Lists catalog objects on the source.
    List {
        #[command(subcommand)]
        target: ListTarget,
    },
    /// Dumps one or more schema sections to the work directory.
    Dump {
        #[command(subcommand)]
        section: DumpSection,
    },
    /// Restores one or more schema sections from the work directory.
    Restore {
        #[command(subcommand)]
        target: RestoreTarget,
    },
    /// Copies one section of the data, assuming the schema is already in place.
    Copy {
        #[command(subcommand)]
        target: CopyTarget,
    },
    /// Logical-replication follower: setup, catch-up, and ongoing replay.
    Stream {
        #[command(subcommand)]
        command: StreamCommand,
    },
}

#[derive(Args, Debug)]
pub struct CopyDbArgs {
    #[arg(long, default_value_t = 4)]
    pub table_jobs: u32,
    #[arg(long, default_value_t = 2)]
    pub index_jobs: u32,
    #[arg(long, default_value_t = 2)]
    pub vacuum_jobs: u32,
    /// Tables larger than this many bytes are split into partitions.
    #[arg(long, default_value_t = 10 * 1024 * 1024 * 1024)]
    pub split_tables_larger_than: u64,
    /// Adopt an existing exported snapshot instead of taking a new one.
    #[arg(long)]
    pub snapshot: Option<String>,
    #[arg(long)]
    pub restart: bool,
    #[arg(long)]
    pub resume: bool,
    #[arg(long)]
    pub no_consistent: bool,
    #[arg(long)]
    pub skip_large_objects: bool,
    #[arg(long)]
    pub skip_extensions: bool,
    /// Stop the whole run as soon as any table or index fails.
    #[arg(long, default_value_t = true)]
    pub fail_fast: bool,
    /// After the copy finishes, start the CDC follower instead of exiting.
    #[arg(long)]
    pub follow: bool,
}

#[derive(Subcommand, Debug, Clone, Copy)]
pub enum ListTarget {
    Extensions,
    Tables,
    Indexes,
    Sequences,
    Schema,
}

#[derive(Subcommand, Debug, Clone, Copy)]
pub enum DumpSection {
    Schema,
    PreData,
    PostData,
}

#[derive(Subcommand, Debug, Clone, Copy)]
pub enum RestoreTarget {
    Schema,
    PreData,
    PostData,
    ParseList,
}

#[derive(Subcommand, Debug, Clone, Copy)]
pub enum CopyTarget {
    Data,
    TableData,
    Blobs,
    Sequences,
    Indexes,
    Constraints,
}

#[derive(Subcommand, Debug)]
pub enum StreamCommand {
    /// Creates the replication slot and the sentinel control record.
    Setup(StreamSetupArgs),
    /// Drops the replication slot and the sentinel table.
    Cleanup,
    /// Streams the slot into JSON segment files, without applying them.
    Receive(StreamReceiveArgs),
    /// Prefetches: receive and transform concurrently, up to `end_lsn`.
    Prefetch(StreamReceiveArgs),
    /// Replays already-transformed SQL files into the target until caught up.
    Catchup(StreamApplyArgs),
    /// Applies changes forever, following the source in near-real-time.
    Replay(StreamApplyArgs),
    /// Runs `transform` once over every closed, untransformed segment.
    Transform(StreamDirArgs),
    /// Runs `apply` once, stopping when no file is pending or caught up.
    Apply(StreamApplyArgs),
    /// Reads or mutates the sentinel control record.
    Sentinel {
        #[command(subcommand)]
        action: SentinelAction,
    },
}

#[derive(Args, Debug)]
pub struct StreamDirArgs {
    /// CDC directory; falls back to the XDG data dir when unset.
    #[arg(long)]
    pub cdc_dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct StreamSetupArgs {
    #[arg(long, default_value = "copydb")]
    pub slot_name: String,
    #[arg(long, value_enum, default_value_t = PluginArg::TestDecoding)]
    pub plugin: PluginArg,
}

#[derive(Args, Debug)]
pub struct StreamReceiveArgs {
    #[arg(long, default_value = "copydb")]
    pub slot_name: String,
    #[arg(long, value_enum, default_value_t = PluginArg::TestDecoding)]
    pub plugin: PluginArg,
    #[arg(long, default_value_t = 16 * 1024 * 1024)]
    pub wal_seg_size: u64,
    #[arg(long)]
    pub cdc_dir: Option<PathBuf>,
    #[arg(long, default_value_t = 10)]
    pub keepalive_seconds: u64,
}

#[derive(Args, Debug)]
pub struct StreamApplyArgs {
    #[arg(long)]
    pub cdc_dir: Option<PathBuf>,
    #[arg(long, default_value_t = 1)]
    pub poll_seconds: u64,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum PluginArg {
    TestDecoding,
    Wal2json,
}

impl From<PluginArg> for copydb_cdc::Plugin {
    fn from(p: PluginArg) -> Self {
        match p {
            PluginArg::TestDecoding => copydb_cdc::Plugin::TestDecoding,
            PluginArg::Wal2json => copydb_cdc::Plugin::Wal2Json,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum SentinelAction {
    /// Prints the current sentinel record.
    Get,
    /// Enables or disables `stream apply`.
    SetApply { enabled: bool },
    /// Sets the LSN `stream apply`/`stream replay` should stop at.
    SetEndpos { lsn: String },
}
