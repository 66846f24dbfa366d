// Copyright copydb authors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The parallel copy orchestrator: schema dump/restore, table-data
//! workers, index/constraint workers, vacuum workers, large objects, and
//! sequences (C5).

pub mod blobs_worker;
pub mod index_worker;
pub mod orchestrator;
pub mod queues;
pub mod schema;
pub mod sequences;
pub mod table_worker;
pub mod vacuum_worker;

pub use orchestrator::run;
