// Copyright copydb authors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The [`Sentinel`] control record shared between CDC apply and the
//! operator. `copydb-sentinel` owns reading and writing it; this crate
//! only defines its shape.

use serde::{Deserialize, Serialize};

use crate::lsn::Lsn;

/// A single-row control record holding the start/end LSN window for a CDC
/// run and an apply-enable flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sentinel {
    pub start_lsn: Lsn,
    /// `None` means "no end position set"; apply runs until told otherwise.
    pub end_lsn: Option<Lsn>,
    pub replay_lsn: Lsn,
    pub apply_enabled: bool,
}

impl Sentinel {
    pub fn new(start_lsn: Lsn) -> Self {
        Sentinel { start_lsn, end_lsn: None, replay_lsn: start_lsn, apply_enabled: false }
    }

    /// Whether apply has reached or passed `end_lsn`, per the boundary
    /// rule: an LSN exactly equal to `end_lsn` is included, and apply
    /// stops strictly after processing it.
    pub fn reached_end_pos(&self) -> bool {
        match self.end_lsn {
            Some(end) => self.replay_lsn >= end,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_end_lsn_never_reaches_end() {
        let mut s = Sentinel::new(Lsn::ZERO);
        s.replay_lsn = Lsn::new(0, 1_000_000);
        assert!(!s.reached_end_pos());
    }

    #[test]
    fn reaches_end_pos_exactly_at_boundary() {
        let mut s = Sentinel::new(Lsn::ZERO);
        s.end_lsn = Some(Lsn::new(0, 0x1500));
        s.replay_lsn = Lsn::new(0, 0x1500);
        assert!(s.reached_end_pos());
    }

    #[test]
    fn does_not_reach_end_pos_before_boundary() {
        let mut s = Sentinel::new(Lsn::ZERO);
        s.end_lsn = Some(Lsn::new(0, 0x1500));
        s.replay_lsn = Lsn::new(0, 0x1000);
        assert!(!s.reached_end_pos());
    }
}
