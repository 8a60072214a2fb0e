//! Chapter-boundary chunk planner.
//!
//! Partitions the ordered highlight list into [`ChunkPlan`]s. Whole chapters
//! are accumulated until the running count of qualifying highlights (non-empty
//! text) reaches `min_count`; the chunk is then closed and the next one starts
//! at the following chapter.
//!
//! Each chunk's identity comes from its first and last qualifying highlight,
//! so the same input and threshold always yield the same boundaries. The
//! reconciler relies on that.

use crate::models::{ChunkIdentity, ChunkPlan, InputItem};

/// Split items into chunks of at least `min_count` qualifying highlights.
///
/// Items are ordered by `(group_key, sequence_key)` first. The last chunk may
/// fall short of `min_count`. Chapters without qualifying highlights are
/// attached to the chunk that is open when they are reached, or to the final
/// chunk if they trail the input. Returns no chunks if nothing qualifies.
pub fn plan_chunks(items: &[InputItem], min_count: usize) -> Vec<ChunkPlan> {
    let threshold = min_count.max(1);
    let mut ordered: Vec<InputItem> = items.to_vec();
    ordered.sort_by(|a, b| a.order(b));

    let mut plans: Vec<ChunkPlan> = Vec::new();
    let mut current: Vec<InputItem> = Vec::new();
    let mut qualifying = 0usize;

    for group in split_groups(ordered) {
        qualifying += group.iter().filter(|i| i.is_qualifying()).count();
        current.extend(group);

        if qualifying >= threshold {
            if let Some(plan) = make_plan(plans.len() + 1, std::mem::take(&mut current)) {
                plans.push(plan);
            }
            qualifying = 0;
        }
    }

    // Flush remaining
    if !current.is_empty() {
        if qualifying > 0 {
            if let Some(plan) = make_plan(plans.len() + 1, current) {
                plans.push(plan);
            }
        } else if let Some(last) = plans.last_mut() {
            // Trailing chapters with nothing highlighted ride along with the
            // previous chunk; its boundaries stay the same.
            last.members.extend(current);
        }
    }

    plans
}

fn split_groups(items: Vec<InputItem>) -> Vec<Vec<InputItem>> {
    let mut groups: Vec<Vec<InputItem>> = Vec::new();
    for item in items {
        match groups.last_mut() {
            Some(group) if group.first().map(|g| g.group_key) == Some(item.group_key) => {
                group.push(item)
            }
            _ => groups.push(vec![item]),
        }
    }
    groups
}

fn make_plan(ordinal: usize, members: Vec<InputItem>) -> Option<ChunkPlan> {
    let first = members.iter().find(|i| i.is_qualifying())?;
    let last = members.iter().rev().find(|i| i.is_qualifying())?;
    let identity = ChunkIdentity::new(first.key(), last.key());
    Some(ChunkPlan {
        identity,
        ordinal,
        members,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ItemKey, SequenceKey};

    fn item(group: i64, seq: i64, text: &str) -> InputItem {
        InputItem {
            group_key: group,
            sequence_key: SequenceKey::Numeric(seq),
            group_title: Some(format!("Chapter {}", group)),
            text: text.to_string(),
            annotation: None,
        }
    }

    /// Build `count` qualifying items for `group`, sequence keys from `from`.
    fn group(group: i64, from: i64, count: usize) -> Vec<InputItem> {
        (0..count as i64)
            .map(|i| item(group, from + i, &format!("g{} h{}", group, from + i)))
            .collect()
    }

    fn scenario(second_group: usize) -> Vec<InputItem> {
        let mut items = Vec::new();
        items.extend(group(1, 0, 20));
        items.extend(group(2, 0, second_group));
        items.extend(group(3, 0, 25));
        items.extend(group(4, 0, 5));
        items
    }

    #[test]
    fn test_example_scenario() {
        let plans = plan_chunks(&scenario(10), 30);
        assert_eq!(plans.len(), 2);
        assert_eq!(plans[0].group_keys(), vec![1, 2]);
        assert_eq!(plans[0].qualifying_count(), 30);
        assert_eq!(plans[1].group_keys(), vec![3, 4]);
        assert_eq!(plans[1].qualifying_count(), 30);
        assert_eq!(plans[0].identity.start, ItemKey::new(1, SequenceKey::Numeric(0)));
        assert_eq!(plans[0].identity.end, ItemKey::new(2, SequenceKey::Numeric(9)));
    }

    #[test]
    fn test_grown_group_moves_end_boundary_only() {
        let before = plan_chunks(&scenario(10), 30);
        let after = plan_chunks(&scenario(15), 30);
        assert_eq!(after.len(), 2);
        assert_eq!(after[0].start_key(), before[0].start_key());
        assert_ne!(after[0].identity, before[0].identity);
        assert_eq!(after[0].identity.end, ItemKey::new(2, SequenceKey::Numeric(14)));
        assert_eq!(after[1].identity, before[1].identity);
    }

    #[test]
    fn test_last_chunk_may_be_short() {
        let mut items = group(1, 0, 5);
        items.extend(group(2, 0, 2));
        let plans = plan_chunks(&items, 5);
        assert_eq!(plans.len(), 2);
        assert_eq!(plans[1].qualifying_count(), 2);
    }

    #[test]
    fn test_group_without_highlights_joins_open_chunk() {
        let mut items = group(1, 0, 2);
        items.push(item(2, 0, ""));
        items.extend(group(3, 0, 2));
        let plans = plan_chunks(&items, 4);
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].group_keys(), vec![1, 2, 3]);
        assert_eq!(plans[0].members.len(), 5);
    }

    #[test]
    fn test_trailing_empty_groups_attach_to_last_chunk() {
        let mut items = group(1, 0, 3);
        items.push(item(2, 0, "  "));
        items.push(item(3, 0, ""));
        let plans = plan_chunks(&items, 3);
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].members.len(), 5);
        assert_eq!(plans[0].identity.end, ItemKey::new(1, SequenceKey::Numeric(2)));
    }

    #[test]
    fn test_boundaries_skip_non_qualifying_items() {
        let items = vec![item(1, 0, ""), item(1, 1, "a"), item(1, 2, "b"), item(1, 3, "")];
        let plans = plan_chunks(&items, 10);
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].identity.start, ItemKey::new(1, SequenceKey::Numeric(1)));
        assert_eq!(plans[0].identity.end, ItemKey::new(1, SequenceKey::Numeric(2)));
        assert_eq!(plans[0].members.len(), 4);
    }

    #[test]
    fn test_nothing_qualifying_yields_no_chunks() {
        let items = vec![item(1, 0, ""), item(2, 0, "")];
        assert!(plan_chunks(&items, 3).is_empty());
        assert!(plan_chunks(&[], 3).is_empty());
    }

    #[test]
    fn test_ordinals_contiguous_and_sorted_input() {
        let mut items = scenario(10);
        items.reverse();
        let plans = plan_chunks(&items, 10);
        for (i, p) in plans.iter().enumerate() {
            assert_eq!(p.ordinal, i + 1);
        }
        for pair in plans.windows(2) {
            assert!(pair[0].start_key() < pair[1].start_key());
        }
    }

    #[test]
    fn test_deterministic() {
        let items = scenario(12);
        let a = plan_chunks(&items, 17);
        let b = plan_chunks(&items, 17);
        assert_eq!(a, b);
    }
}
