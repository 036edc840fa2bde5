//! Merging local-only records with the remote collection.
//!
//! Remote records are authoritative: once the remote store holds an id, any
//! local shadow of that id is dropped. Everything here is pure and total.

use std::collections::HashSet;

use crate::record::{Entity, Record, RecordId};

/// Union of `remote` and every entry of `local_only` whose id the remote set
/// does not hold. Ids are unique in the result (first occurrence wins within
/// each input). Remote records come first, each group in input order.
pub fn merge<E: Entity>(local_only: &[Record<E>], remote: &[Record<E>]) -> Vec<Record<E>> {
    let mut seen: HashSet<&RecordId> = HashSet::with_capacity(remote.len() + local_only.len());
    let mut merged = Vec::with_capacity(remote.len() + local_only.len());

    for record in remote.iter().chain(local_only) {
        if seen.insert(&record.id) {
            merged.push(record.clone());
        }
    }
    merged
}

/// Order by `created_at` descending; equal timestamps fall back to id so
/// lists never reorder between renders.
pub fn sort_newest_first<E: Entity>(records: &mut [Record<E>]) {
    records.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// [`merge`] followed by [`sort_newest_first`]: the render-ready collection.
pub fn merge_sorted<E: Entity>(local_only: &[Record<E>], remote: &[Record<E>]) -> Vec<Record<E>> {
    let mut merged = merge(local_only, remote);
    sort_newest_first(&mut merged);
    merged
}

/// Records of `local_only` whose ids the remote set does not hold; the
/// pending count behind a "sync local" affordance.
pub fn pending<'a, E: Entity>(
    local_only: &'a [Record<E>],
    remote: &[Record<E>],
) -> impl Iterator<Item = &'a Record<E>> {
    let remote_ids: HashSet<RecordId> = remote.iter().map(|r| r.id.clone()).collect();
    local_only
        .iter()
        .filter(move |record| !remote_ids.contains(&record.id))
}
