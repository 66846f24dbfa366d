// Copyright copydb authors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Core data types for copydb: the copy plan, catalog snapshot, on-disk
//! summary records, CDC wire types, the sentinel, and the shared error
//! taxonomy. Every other crate in the workspace depends on this one and
//! none of its types touch the network or the filesystem directly.

pub mod catalog;
pub mod cdc;
pub mod error;
pub mod lsn;
pub mod plan;
pub mod run_summary;
pub mod sentinel;
pub mod summary;

pub use catalog::{PartitionRange, SourceIndex, SourceTable};
pub use cdc::{ColumnValue, DecodedValue, LogicalMessage, LogicalTransaction, Statement, TupleData};
pub use error::CopydbError;
pub use lsn::Lsn;
pub use plan::{CopyPlan, Section};
pub use run_summary::{RunSummary, StepTimings};
pub use sentinel::Sentinel;
pub use summary::{BlobsSummary, IndexSummary, TableSummary};
