//! Splitting a run's requests into submittable chunks.
//!
//! Requests arrive ordered so that all replicates of a prompt are adjacent.
//! A provider's prompt cache only helps when those replicates travel in the
//! same batch, so a replicate group is moved whole to a fresh chunk whenever
//! it does not fit in the current one but fits in an empty one. Groups too
//! large for any chunk are split at the cap.

use std::ops::Range;

/// Size of one planned request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanItem {
    /// Requests sharing a group key are kept together where possible
    pub group: i64,
    /// Serialized size
    pub bytes: usize,
    /// Estimated tokens charged against the rate limit
    pub tokens: u64,
}

/// Ceilings for one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkCaps {
    /// Provider cap on requests per batch
    pub max_requests: usize,
    /// Provider cap on batch payload size
    pub max_bytes: usize,
    /// Tokens-per-minute budget; `None` when the provider self-manages
    pub max_tokens: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default)]
struct Load {
    requests: usize,
    bytes: usize,
    tokens: u64,
}

impl Load {
    fn of(items: &[PlanItem]) -> Self {
        items.iter().fold(Self::default(), |load, item| load.plus(item))
    }

    fn plus(self, item: &PlanItem) -> Self {
        Self {
            requests: self.requests + 1,
            bytes: self.bytes + item.bytes,
            tokens: self.tokens + item.tokens,
        }
    }

    fn merged(self, other: Load) -> Self {
        Self {
            requests: self.requests + other.requests,
            bytes: self.bytes + other.bytes,
            tokens: self.tokens + other.tokens,
        }
    }

    fn fits(&self, caps: &ChunkCaps) -> bool {
        self.requests <= caps.max_requests
            && self.bytes <= caps.max_bytes
            && caps.max_tokens.is_none_or(|max| self.tokens <= max)
    }
}

/// Partition `items` into contiguous chunks that respect `caps`.
///
/// Every item lands in exactly one chunk and order is preserved. An item
/// that alone exceeds a cap gets a chunk of its own; the client's admission
/// check then rejects it instead of the planner dropping it.
pub fn plan_chunks(items: &[PlanItem], caps: &ChunkCaps) -> Vec<Range<usize>> {
    let mut chunks = Vec::new();
    let mut start = 0;
    let mut load = Load::default();

    let mut group_start = 0;
    while group_start < items.len() {
        let key = items[group_start].group;
        let group_end = items[group_start..]
            .iter()
            .position(|item| item.group != key)
            .map_or(items.len(), |offset| group_start + offset);
        let group = Load::of(&items[group_start..group_end]);

        if load.merged(group).fits(caps) {
            load = load.merged(group);
        } else if group.fits(caps) {
            if group_start > start {
                chunks.push(start..group_start);
            }
            start = group_start;
            load = group;
        } else {
            for index in group_start..group_end {
                let next = load.plus(&items[index]);
                if next.fits(caps) || index == start {
                    load = next;
                } else {
                    chunks.push(start..index);
                    start = index;
                    load = Load::default().plus(&items[index]);
                }
            }
        }
        group_start = group_end;
    }

    if start < items.len() {
        chunks.push(start..items.len());
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(groups: &[(i64, usize)]) -> Vec<PlanItem> {
        groups
            .iter()
            .flat_map(|(group, count)| {
                std::iter::repeat_n(
                    PlanItem {
                        group: *group,
                        bytes: 100,
                        tokens: 10,
                    },
                    *count,
                )
            })
            .collect()
    }

    fn caps(max_requests: usize) -> ChunkCaps {
        ChunkCaps {
            max_requests,
            max_bytes: usize::MAX,
            max_tokens: None,
        }
    }

    #[test]
    fn everything_fits_in_one_chunk() {
        let plan = plan_chunks(&items(&[(1, 3), (2, 3)]), &caps(10));
        assert_eq!(plan, vec![0..6]);
    }

    #[test]
    fn replicate_group_moves_whole_to_next_chunk() {
        // 3 + 3 would straddle a cap of 4; the second group starts fresh.
        let plan = plan_chunks(&items(&[(1, 3), (2, 3)]), &caps(4));
        assert_eq!(plan, vec![0..3, 3..6]);
    }

    #[test]
    fn oversized_group_is_split_at_the_cap() {
        let plan = plan_chunks(&items(&[(1, 1), (2, 5)]), &caps(2));
        assert_eq!(plan, vec![0..2, 2..4, 4..6]);
    }

    #[test]
    fn token_budget_bounds_a_chunk() {
        let caps = ChunkCaps {
            max_requests: 100,
            max_bytes: usize::MAX,
            max_tokens: Some(25),
        };
        let plan = plan_chunks(&items(&[(1, 2), (2, 2)]), &caps);
        assert_eq!(plan, vec![0..2, 2..4]);
    }

    #[test]
    fn byte_cap_bounds_a_chunk() {
        let caps = ChunkCaps {
            max_requests: 100,
            max_bytes: 250,
            max_tokens: None,
        };
        let plan = plan_chunks(&items(&[(1, 1), (2, 1), (3, 1)]), &caps);
        assert_eq!(plan, vec![0..2, 2..3]);
    }

    #[test]
    fn single_oversized_item_gets_its_own_chunk() {
        let mut planned = items(&[(1, 1)]);
        planned.push(PlanItem {
            group: 2,
            bytes: 10_000,
            tokens: 1,
        });
        planned.extend(items(&[(3, 1)]));
        let caps = ChunkCaps {
            max_requests: 10,
            max_bytes: 1_000,
            max_tokens: None,
        };
        assert_eq!(plan_chunks(&planned, &caps), vec![0..1, 1..2, 2..3]);
    }

    #[test]
    fn every_item_is_covered_in_order() {
        let planned = items(&[(1, 4), (2, 7), (3, 1), (4, 9)]);
        let plan = plan_chunks(&planned, &caps(5));
        let mut expected_start = 0;
        for chunk in &plan {
            assert_eq!(chunk.start, expected_start);
            assert!(chunk.len() <= 5);
            expected_start = chunk.end;
        }
        assert_eq!(expected_start, planned.len());
    }

    #[test]
    fn empty_input_plans_nothing() {
        assert!(plan_chunks(&[], &caps(3)).is_empty());
    }
}
