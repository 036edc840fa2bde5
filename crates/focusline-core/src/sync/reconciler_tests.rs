//! Tests for the reconciler module.

#[cfg(test)]
mod tests {
    use super::super::reconciler::*;
    use crate::record::{LocalId, Quote, Record, RecordId, RemoteId, Task};
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use proptest::prelude::*;
    use std::collections::{BTreeMap, HashSet};

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    fn quote(id: RecordId, content: &str, created_offset: i64) -> Record<Quote> {
        let at = base() + Duration::seconds(created_offset);
        Record {
            id,
            owner_id: None,
            created_at: at,
            updated_at: at,
            fields: Quote::new(content),
        }
    }

    fn remote(id: &str) -> RecordId {
        RecordId::Remote(RemoteId::new(id))
    }

    #[test]
    fn empty_inputs_merge_to_empty() {
        let merged: Vec<Record<Task>> = merge(&[], &[]);
        assert!(merged.is_empty());
    }

    #[test]
    fn local_and_remote_both_present_in_stable_order() {
        let local_id = RecordId::Local(LocalId::generate());
        let local = vec![quote(local_id.clone(), "mine", 10)];
        let remote_set = vec![quote(remote("remote_9"), "theirs", 5)];

        let merged = merge_sorted(&local, &remote_set);
        let ids: Vec<_> = merged.iter().map(|r| r.id.clone()).collect();
        assert_eq!(ids, vec![local_id, remote("remote_9")]);
        assert_eq!(merge_sorted(&local, &remote_set), merged);
    }

    #[test]
    fn remote_copy_wins_on_id_collision() {
        let local = vec![quote(remote("remote_9"), "old", 0)];
        let remote_set = vec![quote(remote("remote_9"), "new", 0)];

        let merged = merge(&local, &remote_set);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].fields.content, "new");
    }

    #[test]
    fn equal_timestamps_break_ties_by_id() {
        let records = vec![
            quote(remote("b"), "x", 0),
            quote(remote("a"), "y", 0),
            quote(remote("c"), "z", 1),
        ];
        let sorted = merge_sorted(&[], &records);
        let ids: Vec<_> = sorted.iter().map(|r| r.id.to_string()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn pending_excludes_confirmed_ids() {
        let local_id = RecordId::Local(LocalId::generate());
        let local = vec![
            quote(local_id.clone(), "waiting", 0),
            quote(remote("remote_1"), "stale shadow", 0),
        ];
        let remote_set = vec![quote(remote("remote_1"), "confirmed", 0)];
        let ids: Vec<_> = pending(&local, &remote_set).map(|r| r.id.clone()).collect();
        assert_eq!(ids, vec![local_id]);
    }

    // ── Properties ───────────────────────────────────────────────────

    fn arb_id() -> impl Strategy<Value = RecordId> {
        prop_oneof![
            (0u8..6).prop_map(|n| RecordId::parse(&format!("local_{n}"))),
            (0u8..6).prop_map(|n| RecordId::parse(&format!("remote_{n}"))),
        ]
    }

    fn arb_set() -> impl Strategy<Value = Vec<Record<Quote>>> {
        prop::collection::btree_map(arb_id(), ("[a-z]{0,6}", 0i64..20), 0..8).prop_map(
            |entries: BTreeMap<RecordId, (String, i64)>| {
                entries
                    .into_iter()
                    .map(|(id, (content, offset))| quote(id, &content, offset))
                    .collect()
            },
        )
    }

    proptest! {
        #[test]
        fn merge_is_idempotent(local in arb_set(), remote_set in arb_set()) {
            let once = merge(&local, &remote_set);
            let twice = merge(&once, &remote_set);
            prop_assert_eq!(twice, once);
        }

        #[test]
        fn merge_has_no_duplicate_ids(local in arb_set(), remote_set in arb_set()) {
            let merged = merge(&local, &remote_set);
            let ids: HashSet<_> = merged.iter().map(|r| &r.id).collect();
            prop_assert_eq!(ids.len(), merged.len());
        }

        #[test]
        fn merge_conserves_unconfirmed_local_records(local in arb_set(), remote_set in arb_set()) {
            let merged = merge(&local, &remote_set);
            let remote_ids: HashSet<_> = remote_set.iter().map(|r| &r.id).collect();
            for record in local.iter().filter(|r| !remote_ids.contains(&r.id)) {
                prop_assert!(merged.contains(record));
            }
            for record in &remote_set {
                prop_assert!(merged.contains(record));
            }
        }

        #[test]
        fn sorted_merge_is_newest_first(local in arb_set(), remote_set in arb_set()) {
            let merged = merge_sorted(&local, &remote_set);
            for pair in merged.windows(2) {
                prop_assert!(pair[0].created_at >= pair[1].created_at);
            }
        }
    }
}
