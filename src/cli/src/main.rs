// Copyright copydb authors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The `copydb` binary (A3): parses the verb tree and dispatches into
//! the component crates. Tracing and the panic hook are installed before
//! anything else runs so even an argument-parsing bug is logged rather
//! than silently swallowed.

mod args;
mod commands;

use clap::Parser;
use tracing::error;

use args::{Cli, Command};
use copydb_supervisor::{install_panic_hook, install_tracing, LogFormat};
use copydb_workdir::WorkDirPaths;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    install_tracing(if cli.global.json { LogFormat::Json } else { LogFormat::Text });
    install_panic_hook();

    let paths = WorkDirPaths::new(cli.global.dir.as_deref());

    let result = match cli.command {
        Command::CopyDb(args) => commands::copy_db(&cli.global, args, &paths).await,
        Command::List { target } => commands::list(&cli.global, target).await,
        Command::Dump { section } => commands::dump(&cli.global, section, &paths).await,
        Command::Restore { target } => commands::restore(&cli.global, target, &paths).await,
        Command::Copy { target } => commands::copy_section(&cli.global, target, &paths).await,
        Command::Stream { command } => commands::stream(&cli.global, command, &paths).await,
    };

    if let Err(e) = result {
        error!(error = %e, "copydb exiting with an error");
        eprintln!("copydb: {e}");
        std::process::exit(1);
    }
}
