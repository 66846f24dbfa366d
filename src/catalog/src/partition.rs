// Copyright copydb authors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Pure partition-plan computation, split out from the catalog client so
//! it can be property-tested without a database.

use copydb_repr::PartitionRange;

/// Splits the inclusive key domain `[min_key, max_key]` into `part_count`
/// contiguous, non-overlapping ranges.
///
/// The data-model invariant this maintains: the union of ranges covers the
/// full key domain and ranges are pairwise non-overlapping and sorted.
/// When `part_count` is larger than the number of distinct keys, trailing
/// parts come back empty (`min > max`), which callers treat as a no-op
/// success rather than an error.
pub fn plan_partitions(min_key: i64, max_key: i64, part_count: u32) -> Vec<PartitionRange> {
    assert!(part_count > 0, "part_count must be at least 1");
    if max_key < min_key {
        // No rows at all: a single empty partition.
        return vec![PartitionRange { part_number: 0, part_count: 1, min: min_key, max: max_key }];
    }

    let span = (max_key as i128) - (min_key as i128) + 1;
    let part_count_i128 = part_count as i128;
    let base = span / part_count_i128;
    let remainder = span % part_count_i128;

    let mut parts = Vec::with_capacity(part_count as usize);
    let mut cursor = min_key as i128;
    for part_number in 0..part_count {
        // Distribute the remainder across the first `remainder` parts so
        // every part differs in size by at most one key.
        let this_span = base + if (part_number as i128) < remainder { 1 } else { 0 };
        let (lo, hi) = if this_span <= 0 {
            (cursor, cursor - 1) // empty
        } else {
            (cursor, cursor + this_span - 1)
        };
        parts.push(PartitionRange {
            part_number,
            part_count,
            min: lo as i64,
            max: hi as i64,
        });
        cursor += this_span.max(0);
    }
    parts
}

/// Whether a table should be split, per §3: `bytes >= split_threshold_bytes
/// && part_key is present`.
pub fn should_split(bytes: u64, split_threshold_bytes: u64, has_part_key: bool) -> bool {
    bytes >= split_threshold_bytes && has_part_key
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn single_partition_covers_whole_domain() {
        let parts = plan_partitions(0, 999, 1);
        assert_eq!(parts, vec![PartitionRange { part_number: 0, part_count: 1, min: 0, max: 999 }]);
    }

    #[test]
    fn even_split_distributes_the_remainder() {
        // 10 keys over 4 parts: sizes 3, 3, 2, 2.
        let parts = plan_partitions(0, 9, 4);
        let sizes: Vec<i64> = parts.iter().map(|p| p.max - p.min + 1).collect();
        assert_eq!(sizes, vec![3, 3, 2, 2]);
    }

    #[test]
    fn more_parts_than_keys_yields_trailing_empty_parts() {
        let parts = plan_partitions(0, 2, 5);
        let empty_count = parts.iter().filter(|p| p.is_empty()).count();
        assert_eq!(empty_count, 2);
    }

    #[test]
    fn empty_domain_is_a_single_empty_partition() {
        let parts = plan_partitions(10, 5, 4);
        assert_eq!(parts.len(), 1);
        assert!(parts[0].is_empty());
    }

    proptest! {
        #[test]
        fn partitions_are_contiguous_non_overlapping_and_cover_the_domain(
            min in -1_000_000i64..1_000_000,
            span in 0i64..1_000_000,
            part_count in 1u32..32,
        ) {
            let max = min + span;
            let parts = plan_partitions(min, max, part_count);

            prop_assert_eq!(parts.len(), part_count as usize);
            prop_assert_eq!(parts[0].min, min);
            prop_assert_eq!(parts.last().unwrap().max, max);

            for pair in parts.windows(2) {
                prop_assert!(pair[0].max < pair[1].min);
                prop_assert_eq!(pair[0].part_number + 1, pair[1].part_number);
            }
        }
    }
}
