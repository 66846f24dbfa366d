// Copyright copydb authors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Logical replication receive/transform/apply pipeline (C6, C7, C8).

pub mod apply;
pub mod encode;
pub mod plugin;
pub mod receive;
pub mod transform;

pub use apply::{apply, ApplyConfig};
pub use plugin::Plugin;
pub use receive::{receive, ReceiveConfig};
pub use transform::{pending_segments, transform_segment};
