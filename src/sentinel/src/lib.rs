// Copyright copydb authors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The sentinel control record, persisted on the source database (C9).
//! `RunSummary`, the end-to-end textual report this crate is also
//! responsible for, lives in `copydb-repr` since every component needs
//! to populate it; this crate only owns the sentinel table.

pub mod store;

pub use store::{init, read, set_apply_enabled, set_end_lsn, set_replay_lsn};
