// Copyright copydb authors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Message types posted onto the bounded in-process queues that hand
//! completed tables off to the index and vacuum worker pools.

use copydb_repr::SourceTable;

/// Depth used for both the index and vacuum queues. Bounded so a slow
/// consumer applies backpressure to table-copy producers rather than
/// growing memory without limit.
pub const QUEUE_DEPTH: usize = 64;

/// Posted once a table's indexes are all eligible to build: immediately
/// after COPY for an unpartitioned table, or after the last partition
/// completes for a partitioned one.
#[derive(Debug, Clone)]
pub struct IndexWorkItem {
    pub table: SourceTable,
}

/// Posted once a table's data copy is fully done, regardless of whether
/// it has indexes.
#[derive(Debug, Clone)]
pub struct VacuumWorkItem {
    pub table: SourceTable,
}
