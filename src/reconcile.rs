//! Plan/store reconciliation.
//!
//! Compares the chunks planned for this run against the persisted
//! [`ChunkStore`] and sorts every plan into exactly one of three buckets:
//!
//! | Outcome | Condition | Generation |
//! |---------|-----------|------------|
//! | reuse   | a record with all four boundary fields equal exists | none |
//! | replace | a record with the same StartKey exists | regenerate, keep `created_at` |
//! | fresh   | nothing matches | generate |
//!
//! Matching always compares typed boundaries; the identity label is never
//! consulted, since two different chunks can share it.
//!
//! Store records that no plan consumed are **obsolete**: their StartKey is
//! gone from the plan (the chunk was absorbed by a neighbour) or they lost a
//! duplicate-StartKey tie-break. Obsolete records are absent from the store
//! produced by [`Reconciliation::apply`].
//!
//! The [`Reconciliation`] value is built once and then handed by value to
//! the generation stage and the store merge.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::driver::JobOutcome;
use crate::models::{ChunkIdentity, ChunkPlan, ChunkRecord, RecordStatus, StartKey};
use crate::sanitize;
use crate::store::ChunkStore;

/// Which exact matches to regenerate anyway.
#[derive(Debug, Clone, Default)]
pub struct Regenerate {
    /// Re-run chunks whose stored record is a failure placeholder.
    pub failed: bool,
    /// Re-run these identities regardless of status.
    pub identities: BTreeSet<String>,
}

impl Regenerate {
    fn selects(&self, record: &ChunkRecord) -> bool {
        (self.failed && record.is_failed()) || self.identities.contains(&record.identity)
    }
}

/// A plan whose StartKey matched a stored record with different boundaries.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplaceInstruction {
    pub plan: ChunkPlan,
    /// The superseded record; only its `created_at` survives.
    pub previous: ChunkRecord,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    /// Carried-forward records with `updated_at` already advanced.
    pub reuse: Vec<ChunkRecord>,
    pub replace: Vec<ReplaceInstruction>,
    pub fresh: Vec<ChunkPlan>,
    pub obsolete: Vec<ChunkRecord>,
    pub now: DateTime<Utc>,
}

pub fn reconcile(plans: &[ChunkPlan], store: &ChunkStore, now: DateTime<Utc>) -> Reconciliation {
    reconcile_with(plans, store, now, &Regenerate::default())
}

pub fn reconcile_with(
    plans: &[ChunkPlan],
    store: &ChunkStore,
    now: DateTime<Utc>,
    regenerate: &Regenerate,
) -> Reconciliation {
    // StartKey -> records in store-iteration order; the first is the match.
    let mut by_start: BTreeMap<&StartKey, Vec<&ChunkRecord>> = BTreeMap::new();
    for record in store.iter() {
        by_start.entry(record.start_key()).or_default().push(record);
    }

    let mut consumed: BTreeSet<ChunkIdentity> = BTreeSet::new();
    let mut reuse = Vec::new();
    let mut replace = Vec::new();
    let mut fresh = Vec::new();

    for plan in plans {
        if let Some(record) = store.get(&plan.identity) {
            consumed.insert(record.chunk_identity());
            if regenerate.selects(record) {
                replace.push(ReplaceInstruction {
                    plan: plan.clone(),
                    previous: record.clone(),
                });
            } else {
                let mut carried = record.clone();
                carried.updated_at = now;
                reuse.push(carried);
            }
            continue;
        }

        let candidate = by_start
            .get(plan.start_key())
            .and_then(|records| {
                records
                    .iter()
                    .find(|r| !consumed.contains(&r.chunk_identity()))
                    .copied()
            });
        match candidate {
            Some(record) => {
                consumed.insert(record.chunk_identity());
                replace.push(ReplaceInstruction {
                    plan: plan.clone(),
                    previous: record.clone(),
                });
            }
            None => fresh.push(plan.clone()),
        }
    }

    let obsolete = store
        .iter()
        .filter(|r| !consumed.contains(&r.chunk_identity()))
        .cloned()
        .collect();

    Reconciliation {
        reuse,
        replace,
        fresh,
        obsolete,
        now,
    }
}

impl Reconciliation {
    /// Plans that need a generation call: replacements first, then fresh.
    pub fn pending(&self) -> Vec<&ChunkPlan> {
        self.replace
            .iter()
            .map(|r| &r.plan)
            .chain(self.fresh.iter())
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.replace.len() + self.fresh.len()
    }

    /// Merge generation outcomes into the store that replaces the old one.
    ///
    /// Outcomes are matched by [`ChunkPlan::job_key`]. Obsolete and
    /// superseded records are dropped. A pending plan with no outcome is
    /// stored as a failure placeholder.
    pub fn apply(self, outcomes: impl IntoIterator<Item = JobOutcome>) -> ChunkStore {
        let mut results: HashMap<String, JobOutcome> =
            outcomes.into_iter().map(|o| (o.key.clone(), o)).collect();
        let now = self.now;

        let mut store = ChunkStore::from_records(self.reuse);

        let pending = self
            .replace
            .into_iter()
            .map(|r| (r.plan, r.previous.created_at))
            .chain(self.fresh.into_iter().map(|plan| (plan, now)));

        for (plan, created_at) in pending {
            let (structured_text, display_text, status) = match results.remove(&plan.job_key()) {
                Some(outcome) => (outcome.structured, outcome.display, outcome.status),
                None => {
                    let (structured, display) = sanitize::failure_placeholder("no result");
                    (structured, display, RecordStatus::Failed)
                }
            };
            store.insert(ChunkRecord {
                identity: plan.key(),
                start: plan.identity.start,
                end: plan.identity.end,
                structured_text,
                display_text,
                status,
                created_at,
                updated_at: now,
            });
        }

        store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::plan_chunks;
    use crate::models::{InputItem, ItemKey, SequenceKey};
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn items(sizes: &[usize]) -> Vec<InputItem> {
        let mut out = Vec::new();
        for (g, size) in sizes.iter().enumerate() {
            for s in 0..*size {
                out.push(InputItem {
                    group_key: g as i64 + 1,
                    sequence_key: SequenceKey::Numeric(s as i64),
                    group_title: None,
                    text: format!("highlight {}", s),
                    annotation: None,
                });
            }
        }
        out
    }

    fn record_for(plan: &ChunkPlan, status: RecordStatus, created: DateTime<Utc>) -> ChunkRecord {
        ChunkRecord {
            identity: plan.key(),
            start: plan.identity.start.clone(),
            end: plan.identity.end.clone(),
            structured_text: format!("## part {}", plan.ordinal),
            display_text: format!("<h2>part {}</h2>", plan.ordinal),
            status,
            created_at: created,
            updated_at: created,
        }
    }

    fn outcome(plan: &ChunkPlan, body: &str) -> JobOutcome {
        JobOutcome {
            key: plan.job_key(),
            structured: body.to_string(),
            display: format!("<p>{}</p>", body),
            status: RecordStatus::Generated,
            attempts: 1,
        }
    }

    fn store_for(plans: &[ChunkPlan], created: DateTime<Utc>) -> ChunkStore {
        ChunkStore::from_records(
            plans
                .iter()
                .map(|p| record_for(p, RecordStatus::Generated, created)),
        )
    }

    #[test]
    fn test_cold_start_everything_fresh() {
        let plans = plan_chunks(&items(&[20, 10, 25, 5]), 30);
        let rec = reconcile(&plans, &ChunkStore::new(), at(100));
        assert_eq!(rec.fresh.len(), 2);
        assert!(rec.reuse.is_empty() && rec.replace.is_empty() && rec.obsolete.is_empty());

        let outcomes: Vec<JobOutcome> = plans.iter().map(|p| outcome(p, "x")).collect();
        let store = rec.apply(outcomes);
        assert_eq!(store.len(), 2);
        for r in store.iter() {
            assert_eq!(r.created_at, at(100));
            assert_eq!(r.updated_at, at(100));
        }
    }

    #[test]
    fn test_unchanged_input_is_all_reuse() {
        let plans = plan_chunks(&items(&[20, 10, 25, 5]), 30);
        let store = store_for(&plans, at(100));

        let rec = reconcile(&plans, &store, at(200));
        assert_eq!(rec.reuse.len(), 2);
        assert_eq!(rec.pending_count(), 0);
        assert!(rec.obsolete.is_empty());

        let next = rec.apply(Vec::new());
        for r in next.iter() {
            let before = store.get(&r.chunk_identity()).unwrap();
            assert_eq!(r.structured_text, before.structured_text);
            assert_eq!(r.created_at, at(100));
            assert_eq!(r.updated_at, at(200));
        }
    }

    #[test]
    fn test_grown_group_replaces_first_chunk_only() {
        let old_plans = plan_chunks(&items(&[20, 10, 25, 5]), 30);
        let store = store_for(&old_plans, at(100));
        let new_plans = plan_chunks(&items(&[20, 15, 25, 5]), 30);

        let rec = reconcile(&new_plans, &store, at(300));
        assert_eq!(rec.replace.len(), 1);
        assert_eq!(rec.reuse.len(), 1);
        assert!(rec.fresh.is_empty());
        assert!(rec.obsolete.is_empty());
        assert_eq!(rec.replace[0].previous.identity, old_plans[0].key());
        assert_eq!(rec.reuse[0].identity, old_plans[1].key());

        let store = rec.apply(vec![outcome(&new_plans[0], "regenerated")]);
        assert_eq!(store.len(), 2);
        assert!(!store.contains(&old_plans[0].identity));
        let replaced = store.get(&new_plans[0].identity).unwrap();
        assert_eq!(replaced.created_at, at(100));
        assert_eq!(replaced.updated_at, at(300));
        assert_eq!(replaced.structured_text, "regenerated");
    }

    #[test]
    fn test_absorbed_chunk_is_obsolete_and_dropped() {
        // Two chunks at threshold 20; raising group 1 past the threshold of a
        // bigger min count makes one chunk swallow the other.
        let old_plans = plan_chunks(&items(&[20, 20]), 20);
        assert_eq!(old_plans.len(), 2);
        let store = store_for(&old_plans, at(100));

        let new_plans = plan_chunks(&items(&[20, 20]), 40);
        assert_eq!(new_plans.len(), 1);

        let rec = reconcile(&new_plans, &store, at(400));
        assert_eq!(rec.replace.len(), 1);
        assert_eq!(rec.obsolete.len(), 1);
        assert_eq!(rec.obsolete[0].identity, old_plans[1].key());

        let store = rec.apply(vec![outcome(&new_plans[0], "merged")]);
        assert_eq!(store.len(), 1);
        assert!(!store.contains(&old_plans[1].identity));
    }

    #[test]
    fn test_duplicate_start_keys_first_wins() {
        let plans = plan_chunks(&items(&[5]), 5);
        let start = plans[0].identity.start.clone();

        let mut a = record_for(&plans[0], RecordStatus::Generated, at(10));
        a.end = ItemKey::new(1, SequenceKey::Numeric(1));
        a.identity = format!("{}-{}", a.start, a.end);
        let mut b = a.clone();
        b.end = ItemKey::new(1, SequenceKey::Numeric(2));
        b.identity = format!("{}-{}", b.start, b.end);
        b.created_at = at(20);
        let store = ChunkStore::from_records(vec![b.clone(), a.clone()]);

        let rec = reconcile(&plans, &store, at(500));
        assert_eq!(rec.replace.len(), 1);
        // End (1, 1) iterates before end (1, 2).
        assert_eq!(rec.replace[0].previous.identity, a.identity);
        assert_eq!(rec.replace[0].previous.start, start);
        assert_eq!(rec.obsolete.len(), 1);
        assert_eq!(rec.obsolete[0].identity, b.identity);
    }

    #[test]
    fn test_exact_match_beats_start_key_match() {
        let plans = plan_chunks(&items(&[5]), 5);
        let exact = record_for(&plans[0], RecordStatus::Generated, at(10));
        let mut stale = exact.clone();
        stale.end = ItemKey::new(1, SequenceKey::Numeric(1));
        stale.identity = format!("{}-{}", stale.start, stale.end);
        let store = ChunkStore::from_records(vec![exact.clone(), stale.clone()]);

        let rec = reconcile(&plans, &store, at(20));
        assert_eq!(rec.reuse.len(), 1);
        assert_eq!(rec.reuse[0].identity, exact.identity);
        assert_eq!(rec.obsolete.len(), 1);
        assert_eq!(rec.obsolete[0].identity, stale.identity);
    }

    #[test]
    fn test_rerun_failed_replaces_against_itself() {
        let plans = plan_chunks(&items(&[5, 5]), 5);
        let store = ChunkStore::from_records(vec![
            record_for(&plans[0], RecordStatus::Failed, at(10)),
            record_for(&plans[1], RecordStatus::Generated, at(10)),
        ]);

        let plain = reconcile(&plans, &store, at(20));
        assert_eq!(plain.reuse.len(), 2);

        let regen = Regenerate {
            failed: true,
            ..Default::default()
        };
        let rec = reconcile_with(&plans, &store, at(20), &regen);
        assert_eq!(rec.reuse.len(), 1);
        assert_eq!(rec.replace.len(), 1);
        assert_eq!(rec.replace[0].previous.identity, plans[0].key());
        assert!(rec.obsolete.is_empty());

        let next = rec.apply(vec![outcome(&plans[0], "second try")]);
        let r = next.get(&plans[0].identity).unwrap();
        assert_eq!(r.status, RecordStatus::Generated);
        assert_eq!(r.created_at, at(10));
    }

    #[test]
    fn test_regenerate_named_identity() {
        let plans = plan_chunks(&items(&[5, 5]), 5);
        let store = store_for(&plans, at(10));
        let regen = Regenerate {
            failed: false,
            identities: [plans[1].key()].into_iter().collect(),
        };
        let rec = reconcile_with(&plans, &store, at(20), &regen);
        assert_eq!(rec.reuse.len(), 1);
        assert_eq!(rec.pending()[0].key(), plans[1].key());
    }

    #[test]
    fn test_missing_outcome_becomes_placeholder() {
        let plans = plan_chunks(&items(&[5]), 5);
        let rec = reconcile(&plans, &ChunkStore::new(), at(1));
        let store = rec.apply(Vec::new());
        let r = store.get(&plans[0].identity).unwrap();
        assert!(r.is_failed());
        assert!(r.display_text.contains("failed"));
    }

    #[test]
    fn test_colliding_labels_do_not_match() {
        let item = |g: i64, seq: &str| InputItem {
            group_key: g,
            sequence_key: SequenceKey::parse(seq).unwrap(),
            group_title: None,
            text: format!("{}:{}", g, seq),
            annotation: None,
        };
        let plans = plan_chunks(&[item(1, "a-2-b"), item(3, "c")], 2);
        assert_eq!(plans.len(), 1);

        let mut stored = record_for(&plans[0], RecordStatus::Generated, at(10));
        stored.start = ItemKey::new(1, SequenceKey::Text("a".into()));
        stored.end = ItemKey::new(2, SequenceKey::Text("b-3-c".into()));
        stored.identity = format!("{}-{}", stored.start, stored.end);
        assert_eq!(stored.identity, plans[0].key());

        let store = ChunkStore::from_records(vec![stored.clone()]);
        let rec = reconcile(&plans, &store, at(20));
        assert!(rec.reuse.is_empty());
        assert!(rec.replace.is_empty());
        assert_eq!(rec.fresh.len(), 1);
        assert_eq!(rec.obsolete.len(), 1);
        assert_eq!(rec.obsolete[0].end, stored.end);

        let next = rec.apply(vec![outcome(&plans[0], "new range")]);
        assert_eq!(next.len(), 1);
        let r = next.get(&plans[0].identity).unwrap();
        assert_eq!(r.structured_text, "new range");
        assert_eq!(r.start, ItemKey::new(1, SequenceKey::Text("a-2-b".into())));
    }
}
