// Copyright copydb authors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Catalog discovery: tables, indexes, sequences, extensions, and large
//! object counts on the source database, plus partition planning (C4).

pub mod client;
pub mod partition;

pub use client::CatalogClient;
pub use partition::{plan_partitions, should_split};
