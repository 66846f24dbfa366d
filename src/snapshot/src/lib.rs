// Copyright copydb authors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Exports or adopts a consistent source transaction snapshot, shares it
//! across worker connections, and sizes the per-role target connection
//! pools (C3).

pub mod manager;
pub mod pools;

pub use manager::{SnapshotHandle, SnapshotManager, SnapshotState};
pub use pools::WorkerPools;
