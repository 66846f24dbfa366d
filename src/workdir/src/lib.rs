// Copyright copydb authors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Work directory path layout, state-machine classification, and on-disk
//! summary records (C1, C2).

pub mod paths;
pub mod pidfile;
pub mod state;
pub mod summary_io;

pub use paths::WorkDirPaths;
pub use state::{initialize_workdir, inspect_workdir, mark_done, WorkDirState};
