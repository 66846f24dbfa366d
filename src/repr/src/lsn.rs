// Copyright copydb authors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Log sequence numbers in the source's native `X/Y` hex notation.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CopydbError;

/// A monotonic position in the source's write-ahead log.
///
/// Internally a single `u64` (high 32 bits are the `X` segment, low 32 bits
/// are the `Y` offset), matching the wire representation of a Postgres LSN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Lsn(pub u64);

impl Lsn {
    pub const ZERO: Lsn = Lsn(0);

    pub fn new(hi: u32, lo: u32) -> Self {
        Lsn(((hi as u64) << 32) | lo as u64)
    }

    pub fn segment(&self, wal_seg_size: u64) -> u64 {
        self.0 / wal_seg_size
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:X}/{:X}", self.0 >> 32, self.0 & 0xFFFF_FFFF)
    }
}

impl FromStr for Lsn {
    type Err = CopydbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (hi, lo) = s.split_once('/').ok_or_else(|| {
            CopydbError::data(format!("malformed LSN {s:?}: expected \"X/Y\""))
        })?;
        let hi = u32::from_str_radix(hi, 16)
            .map_err(|e| CopydbError::data(format!("malformed LSN {s:?}: {e}")))?;
        let lo = u32::from_str_radix(lo, 16)
            .map_err(|e| CopydbError::data(format!("malformed LSN {s:?}: {e}")))?;
        Ok(Lsn::new(hi, lo))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_display() {
        let lsn = Lsn::new(0x16, 0x2FE3A10);
        let text = lsn.to_string();
        let parsed: Lsn = text.parse().unwrap();
        assert_eq!(lsn, parsed);
    }

    #[test]
    fn orders_numerically_not_lexically() {
        let a: Lsn = "0/A".parse().unwrap();
        let b: Lsn = "0/B".parse().unwrap();
        assert!(a < b);
    }

    #[test]
    fn rejects_missing_slash() {
        let err = "deadbeef".parse::<Lsn>().unwrap_err();
        assert!(matches!(err, CopydbError::Data(_)));
    }

    #[test]
    fn segment_divides_by_wal_size() {
        let lsn = Lsn::new(0, 0x300_0000);
        assert_eq!(lsn.segment(0x100_0000), 3);
    }
}
