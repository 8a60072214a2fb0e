//! Planner properties over arbitrary highlight lists.

use std::collections::BTreeMap;

use proptest::prelude::*;

use marginalia::chunk::plan_chunks;
use marginalia::models::{InputItem, ItemKey, SequenceKey};

fn arb_items() -> impl Strategy<Value = Vec<InputItem>> {
    prop::collection::vec((1i64..8, 0i64..40, any::<bool>()), 0..120).prop_map(|rows| {
        // One item per (group, sequence) position.
        let unique: BTreeMap<(i64, i64), bool> =
            rows.into_iter().map(|(g, s, q)| ((g, s), q)).collect();
        let mut items: Vec<InputItem> = unique
            .into_iter()
            .map(|((g, s), qualifying)| InputItem {
                group_key: g,
                sequence_key: SequenceKey::Numeric(s),
                group_title: None,
                text: if qualifying { format!("h{}-{}", g, s) } else { String::new() },
                annotation: None,
            })
            .collect();
        // Feed the planner in scrambled order.
        items.reverse();
        items
    })
}

proptest! {
    #[test]
    fn every_item_lands_in_exactly_one_chunk(items in arb_items(), min in 1usize..25) {
        let plans = plan_chunks(&items, min);
        let any_qualifying = items.iter().any(|i| i.is_qualifying());

        if !any_qualifying {
            prop_assert!(plans.is_empty());
            return Ok(());
        }

        let mut expected: Vec<ItemKey> = items.iter().map(|i| i.key()).collect();
        expected.sort();
        let covered: Vec<ItemKey> = plans
            .iter()
            .flat_map(|p| p.members.iter().map(|i| i.key()))
            .collect();
        prop_assert_eq!(covered, expected);
    }

    #[test]
    fn chunks_respect_threshold_and_chapter_boundaries(items in arb_items(), min in 1usize..25) {
        let plans = plan_chunks(&items, min);

        for (idx, plan) in plans.iter().enumerate() {
            prop_assert_eq!(plan.ordinal, idx + 1);
            prop_assert!(plan.qualifying_count() >= 1);
            if idx + 1 < plans.len() {
                prop_assert!(plan.qualifying_count() >= min);
            }

            let first = plan.members.iter().find(|i| i.is_qualifying()).unwrap();
            let last = plan.members.iter().rev().find(|i| i.is_qualifying()).unwrap();
            prop_assert_eq!(&plan.identity.start, &first.key());
            prop_assert_eq!(&plan.identity.end, &last.key());
        }

        // No chapter is split across two chunks.
        for pair in plans.windows(2) {
            let last_group = pair[0].members.last().unwrap().group_key;
            let first_group = pair[1].members.first().unwrap().group_key;
            prop_assert!(last_group < first_group);
        }
    }

    #[test]
    fn planning_is_deterministic(items in arb_items(), min in 1usize..25) {
        let mut shuffled = items.clone();
        shuffled.rotate_left(items.len() / 2);
        prop_assert_eq!(plan_chunks(&items, min), plan_chunks(&shuffled, min));
    }
}
