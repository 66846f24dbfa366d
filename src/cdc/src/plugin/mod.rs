// Copyright copydb authors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Plugin-agnostic dispatch (§4.5 step 1): each output plugin's raw
//! message is decoded into the same [`LogicalMessage`] the rest of the
//! pipeline understands.

pub mod test_decoding;
pub mod wal2json;

use copydb_repr::{CopydbError, Lsn, LogicalMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plugin {
    TestDecoding,
    Wal2Json,
}

/// Per-connection decode state. `test_decoding` emits `BEGIN`/`COMMIT` and
/// bare row-change lines as separate messages, so the current
/// transaction's xid has to be threaded through by the caller;
/// `wal2json` needs no state since each message is self-contained.
#[derive(Debug, Default)]
pub struct DecodeState {
    current_xid: Option<u32>,
}

impl DecodeState {
    pub fn new() -> Self {
        DecodeState::default()
    }
}

/// Decodes one raw replication message at `lsn` according to `plugin`.
/// `wal2json` messages carry a whole transaction at once and so can
/// expand into several [`LogicalMessage`]s; `test_decoding` always
/// produces exactly one (possibly `None`, for lines it ignores).
pub fn decode(
    plugin: Plugin,
    raw: &str,
    lsn: Lsn,
    state: &mut DecodeState,
) -> Result<Vec<LogicalMessage>, CopydbError> {
    match plugin {
        Plugin::TestDecoding => {
            Ok(test_decoding::parse_line(raw, lsn, &mut state.current_xid)?.into_iter().collect())
        }
        Plugin::Wal2Json => wal2json::parse_transaction(raw, lsn),
    }
}
