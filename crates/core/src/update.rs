//! Index-diff algebra over [`SparseList`].
//!
//! An [`Update`] describes a change to a list as a set of removals and a set
//! of insertions. Removed indexes refer to positions in the list before the
//! update; added indexes refer to positions in the list after it. Removals
//! are applied first (highest index first), then insertions (lowest index
//! first), which makes both index sets independent of each other.
//!
//! Everything here is a pure function of its arguments so the algebra can be
//! tested without a query around it.

use std::collections::HashMap;

use crate::ids::StoreKey;
use crate::sparse_list::SparseList;

/// A normalized list delta.
///
/// `removed_indexes`/`removed_keys` and `added_indexes`/`added_keys` are
/// parallel arrays, each sorted ascending by index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Update {
    pub removed_indexes: Vec<usize>,
    pub removed_keys: Vec<StoreKey>,
    pub added_indexes: Vec<usize>,
    pub added_keys: Vec<StoreKey>,
    /// Anything at or after the first gap may be wrong once this is applied.
    pub truncate_at_first_gap: bool,
    pub total: usize,
    /// The update only describes the list up to and including this key.
    pub up_to: Option<StoreKey>,
}

/// A delta as produced by a client edit or decoded from the server: removed
/// keys without positions, and `(index, key)` insertions in any order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawUpdate {
    pub removed: Vec<StoreKey>,
    pub added: Vec<(usize, StoreKey)>,
    pub total: Option<usize>,
    pub up_to: Option<StoreKey>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied {
        /// Lowest index whose entry may have changed.
        first_change: usize,
        /// Whether any entry moved, so window coverage must be recomputed.
        structural: bool,
    },
    /// The `up_to` key is not in the list; only a full reset can recover.
    NeedsReset,
}

impl Update {
    /// The update that changes nothing on a list of `total` entries.
    pub fn identity(total: usize) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.removed_indexes.is_empty() && self.added_indexes.is_empty()
    }

    /// Same total and same removals and insertions. Flags are not compared.
    pub fn is_equivalent(&self, other: &Update) -> bool {
        self.total == other.total
            && self.added_indexes == other.added_indexes
            && self.added_keys == other.added_keys
            && self.removed_indexes == other.removed_indexes
            && self.removed_keys == other.removed_keys
    }
}

impl RawUpdate {
    pub fn remove(keys: impl IntoIterator<Item = StoreKey>) -> Self {
        Self {
            removed: keys.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn insert(added: impl IntoIterator<Item = (usize, StoreKey)>) -> Self {
        Self {
            added: added.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn with_total(mut self, total: usize) -> Self {
        self.total = Some(total);
        self
    }
}

/// Find the current index of each key in `list`.
///
/// Builds a key → index map only when enough keys are sought for the
/// O(n) build to beat repeated O(n) scans.
pub fn map_indexes(list: &SparseList, keys: &[StoreKey]) -> Vec<Option<usize>> {
    let len = list.materialized_len();
    let threshold = if len == 0 { 1 } else { len.ilog2() as usize + 1 };
    if keys.len() < threshold {
        map_indexes_by_scan(list, keys)
    } else {
        map_indexes_by_lookup(list, keys)
    }
}

pub fn map_indexes_by_scan(list: &SparseList, keys: &[StoreKey]) -> Vec<Option<usize>> {
    keys.iter().map(|key| list.index_of(*key, 0)).collect()
}

pub fn map_indexes_by_lookup(list: &SparseList, keys: &[StoreKey]) -> Vec<Option<usize>> {
    let mut index_of: HashMap<StoreKey, usize> = HashMap::with_capacity(list.materialized_len());
    for (i, entry) in list.entries().iter().enumerate() {
        if let Some(key) = entry {
            // First occurrence wins, matching a forward scan.
            index_of.entry(*key).or_insert(i);
        }
    }
    keys.iter().map(|key| index_of.get(key).copied()).collect()
}

/// Sort two parallel arrays by the first one, keeping pairs together.
pub fn sort_pairs(indexes: &mut Vec<usize>, keys: &mut Vec<StoreKey>) {
    let mut pairs: Vec<(usize, StoreKey)> = indexes.drain(..).zip(keys.drain(..)).collect();
    pairs.sort_by_key(|(index, _)| *index);
    for (index, key) in pairs {
        indexes.push(index);
        keys.push(key);
    }
}

/// Stable merge of two sorted `(index, key)` sequences. On equal indexes the
/// entry from `b` comes first.
pub fn merge_sorted_pairs(
    a_indexes: &[usize],
    b_indexes: &[usize],
    a_keys: &[StoreKey],
    b_keys: &[StoreKey],
) -> (Vec<usize>, Vec<StoreKey>) {
    let total = a_indexes.len() + b_indexes.len();
    let mut indexes = Vec::with_capacity(total);
    let mut keys = Vec::with_capacity(total);
    let (mut i, mut j) = (0, 0);
    while i < a_indexes.len() || j < b_indexes.len() {
        if j >= b_indexes.len() || (i < a_indexes.len() && a_indexes[i] < b_indexes[j]) {
            indexes.push(a_indexes[i]);
            keys.push(a_keys[i]);
            i += 1;
        } else {
            indexes.push(b_indexes[j]);
            keys.push(b_keys[j]);
            j += 1;
        }
    }
    (indexes, keys)
}

/// Convert a raw delta into a normalized [`Update`] against `list`.
pub fn normalize(raw: RawUpdate, list: &SparseList) -> Update {
    let RawUpdate {
        removed,
        mut added,
        total,
        up_to,
    } = raw;

    let mut truncate_at_first_gap = false;
    let mut removed_indexes = Vec::with_capacity(removed.len());
    let mut removed_keys = Vec::with_capacity(removed.len());
    for (index, key) in map_indexes(list, &removed).into_iter().zip(removed) {
        match index {
            Some(index) => {
                removed_indexes.push(index);
                removed_keys.push(key);
            }
            // Not loaded: we can't know where it was, so nothing past the
            // first gap can be trusted.
            None => truncate_at_first_gap = true,
        }
    }
    sort_pairs(&mut removed_indexes, &mut removed_keys);

    added.sort_by_key(|(index, _)| *index);
    let (added_indexes, added_keys) =
        cancel_moves_in_place(&mut removed_indexes, &mut removed_keys, &added);

    let total = total.unwrap_or_else(|| {
        (list.effective_len() + added_indexes.len()).saturating_sub(removed_indexes.len())
    });

    Update {
        removed_indexes,
        removed_keys,
        added_indexes,
        added_keys,
        truncate_at_first_gap,
        total,
        up_to,
    }
}

/// Drop insertions that put a removed key straight back where it was,
/// together with the matching removal. `added` must be sorted by index.
pub fn cancel_moves_in_place(
    removed_indexes: &mut Vec<usize>,
    removed_keys: &mut Vec<StoreKey>,
    added: &[(usize, StoreKey)],
) -> (Vec<usize>, Vec<StoreKey>) {
    let mut added_indexes = Vec::with_capacity(added.len());
    let mut added_keys = Vec::with_capacity(added.len());
    for &(index, key) in added {
        let unmoved = removed_keys.iter().position(|k| *k == key).filter(|&j| {
            (removed_indexes[j] + added_indexes.len()).checked_sub(j) == Some(index)
        });
        match unmoved {
            Some(j) => {
                removed_indexes.remove(j);
                removed_keys.remove(j);
            }
            None => {
                added_indexes.push(index);
                added_keys.push(key);
            }
        }
    }
    (added_indexes, added_keys)
}

/// Apply `update` to `list` in place.
pub fn apply(update: &Update, list: &mut SparseList) -> ApplyOutcome {
    let old_length = list.effective_len();
    let mut first_change = old_length;
    let mut structural = !update.is_empty();

    if let Some(up_to) = update.up_to {
        let Some(index) = list.last_index_of(up_to) else {
            return ApplyOutcome::NeedsReset;
        };
        let keep = index + 1;
        if keep != list.materialized_len() {
            list.truncate(keep);
            structural = true;
            first_change = first_change.min(keep);
        }
    }

    for &index in update.removed_indexes.iter().rev() {
        list.remove_at(index);
        first_change = first_change.min(index);
    }

    if update.truncate_at_first_gap {
        let gap = list.first_gap();
        if gap < list.materialized_len() {
            list.truncate(gap);
            structural = true;
        }
        first_change = first_change.min(gap);
    }

    for (&index, &key) in update.added_indexes.iter().zip(&update.added_keys) {
        list.insert_at(index, key);
        first_change = first_change.min(index);
    }

    list.set_total(Some(update.total));

    ApplyOutcome::Applied {
        first_change,
        structural,
    }
}

/// Re-base one index set across another update.
///
/// `indexes` are positions in the intermediate list. Positions that coincide
/// with one of `cancelled_by` are dropped: the same item was inserted on one
/// side and removed on the other. The rest are shifted out of the
/// intermediate coordinates and merged with `shifted_past`.
fn adjust_indexes(
    indexes: &[usize],
    cancelled_by: &[usize],
    shifted_past: &[usize],
    keys: &[StoreKey],
    shifted_past_keys: &[StoreKey],
) -> (Vec<usize>, Vec<StoreKey>) {
    let mut result_indexes = Vec::with_capacity(indexes.len());
    let mut result_keys = Vec::with_capacity(indexes.len());
    for (&index, &key) in indexes.iter().zip(keys) {
        let position = cancelled_by.partition_point(|&other| other < index);
        if cancelled_by.get(position) == Some(&index) {
            continue;
        }
        let mut index = index - position;
        for &other in shifted_past {
            if index >= other {
                index += 1;
            } else {
                break;
            }
        }
        result_indexes.push(index);
        result_keys.push(key);
    }
    merge_sorted_pairs(shifted_past, &result_indexes, shifted_past_keys, &result_keys)
}

/// The single update equivalent to applying `u1` and then `u2`.
pub fn compose(u1: &Update, u2: &Update) -> Update {
    let (removed_indexes, removed_keys) = adjust_indexes(
        &u2.removed_indexes,
        &u1.added_indexes,
        &u1.removed_indexes,
        &u2.removed_keys,
        &u1.removed_keys,
    );
    let (added_indexes, added_keys) = adjust_indexes(
        &u1.added_indexes,
        &u2.removed_indexes,
        &u2.added_indexes,
        &u1.added_keys,
        &u2.added_keys,
    );
    Update {
        removed_indexes,
        removed_keys,
        added_indexes,
        added_keys,
        truncate_at_first_gap: u1.truncate_at_first_gap || u2.truncate_at_first_gap,
        total: u2.total,
        up_to: u2.up_to,
    }
}

/// Fold a sequence of updates left to right. `None` for an empty slice.
pub fn compose_all(updates: &[Update]) -> Option<Update> {
    let (first, rest) = updates.split_first()?;
    Some(rest.iter().fold(first.clone(), |acc, u| compose(&acc, u)))
}

/// `[u1, u1∘u2, u1∘u2∘u3, ...]`
pub fn compose_prefixes(updates: &[Update]) -> Vec<Update> {
    let mut prefixes: Vec<Update> = Vec::with_capacity(updates.len());
    for update in updates {
        let next = match prefixes.last() {
            Some(prev) => compose(prev, update),
            None => update.clone(),
        };
        prefixes.push(next);
    }
    prefixes
}

/// The update that undoes `u`.
pub fn invert(u: &Update) -> Update {
    Update {
        removed_indexes: u.added_indexes.clone(),
        removed_keys: u.added_keys.clone(),
        added_indexes: u.removed_indexes.clone(),
        added_keys: u.removed_keys.clone(),
        truncate_at_first_gap: false,
        total: (u.total + u.removed_indexes.len()).saturating_sub(u.added_indexes.len()),
        up_to: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys<const N: usize>() -> [StoreKey; N] {
        std::array::from_fn(|_| StoreKey::new())
    }

    fn applied(update: &Update, list: &SparseList) -> SparseList {
        let mut list = list.clone();
        assert!(matches!(apply(update, &mut list), ApplyOutcome::Applied { .. }));
        list
    }

    #[test]
    fn normalize_resolves_and_sorts_removals() {
        let [a, b, c, d] = keys();
        let list = SparseList::from_keys([a, b, c, d]);
        let update = normalize(RawUpdate::remove([d, b]), &list);
        assert_eq!(update.removed_indexes, vec![1, 3]);
        assert_eq!(update.removed_keys, vec![b, d]);
        assert_eq!(update.total, 2);
        assert!(!update.truncate_at_first_gap);
    }

    #[test]
    fn normalize_drops_unknown_removals_and_flags_truncation() {
        let [a, b, unknown] = keys();
        let list = SparseList::from_keys([a, b]);
        let update = normalize(RawUpdate::remove([unknown, a]).with_total(1), &list);
        assert_eq!(update.removed_keys, vec![a]);
        assert!(update.truncate_at_first_gap);
        assert_eq!(update.total, 1);
    }

    #[test]
    fn normalize_cancels_move_in_place() {
        let [a, b, c] = keys();
        let list = SparseList::from_keys([a, b, c]);
        let raw = RawUpdate {
            removed: vec![b],
            added: vec![(1, b)],
            ..RawUpdate::default()
        };
        let update = normalize(raw, &list);
        assert!(update.is_empty());
        assert_eq!(update.total, 3);
    }

    #[test]
    fn normalize_keeps_real_moves() {
        let [a, b, c] = keys();
        let list = SparseList::from_keys([a, b, c]);
        let raw = RawUpdate {
            removed: vec![a],
            added: vec![(2, a)],
            ..RawUpdate::default()
        };
        let update = normalize(raw, &list);
        assert_eq!(update.removed_indexes, vec![0]);
        assert_eq!(update.added_indexes, vec![2]);
        assert_eq!(applied(&update, &list).known_keys(), vec![b, c, a]);
    }

    #[test]
    fn apply_reports_first_change() {
        let [a, b, c, d, x] = keys();
        let list = SparseList::from_keys([a, b, c, d]);
        let update = Update {
            removed_indexes: vec![2],
            removed_keys: vec![c],
            added_indexes: vec![3],
            added_keys: vec![x],
            total: 4,
            ..Update::default()
        };
        let mut out = list.clone();
        let outcome = apply(&update, &mut out);
        assert_eq!(
            outcome,
            ApplyOutcome::Applied {
                first_change: 2,
                structural: true
            }
        );
        assert_eq!(out.known_keys(), vec![a, b, d, x]);
    }

    #[test]
    fn apply_truncates_at_first_gap() {
        let [a, b, c, d] = keys();
        let mut list = SparseList::new();
        list.set(0, a);
        list.set(1, b);
        list.set(3, c);
        list.set(4, d);
        let update = Update {
            removed_indexes: vec![0],
            removed_keys: vec![a],
            truncate_at_first_gap: true,
            total: 4,
            ..Update::default()
        };
        let out = applied(&update, &list);
        assert_eq!(out.entries(), &[Some(b)]);
        assert_eq!(out.total(), Some(4));
    }

    #[test]
    fn apply_up_to_truncates_after_key() {
        let [a, b, c, d] = keys();
        let list = SparseList::from_keys([a, b, c, d]);
        let update = Update {
            total: 4,
            up_to: Some(b),
            ..Update::default()
        };
        let mut out = list.clone();
        assert_eq!(
            apply(&update, &mut out),
            ApplyOutcome::Applied {
                first_change: 2,
                structural: true
            }
        );
        assert_eq!(out.entries(), &[Some(a), Some(b)]);
    }

    #[test]
    fn apply_up_to_missing_needs_reset() {
        let [a, b, gone] = keys();
        let mut list = SparseList::from_keys([a, b]);
        let update = Update {
            total: 2,
            up_to: Some(gone),
            ..Update::default()
        };
        assert_eq!(apply(&update, &mut list), ApplyOutcome::NeedsReset);
        assert_eq!(list.known_keys(), vec![a, b]);
    }

    #[test]
    fn compose_cancels_add_then_remove() {
        let [a, b, x] = keys();
        let list = SparseList::from_keys([a, b]);
        let u1 = normalize(RawUpdate::insert([(1, x)]), &list);
        let mid = applied(&u1, &list);
        let u2 = normalize(RawUpdate::remove([x]), &mid);
        let composed = compose(&u1, &u2);
        assert!(composed.is_empty());
        assert_eq!(composed.total, 2);
    }

    #[test]
    fn compose_rebases_second_removal() {
        let [a, b, c, x] = keys();
        let list = SparseList::from_keys([a, b, c]);
        // [a,b,c] -> [x,a,c] -> [x,a]
        let u1 = Update {
            removed_indexes: vec![1],
            removed_keys: vec![b],
            added_indexes: vec![0],
            added_keys: vec![x],
            total: 3,
            ..Update::default()
        };
        let u2 = Update {
            removed_indexes: vec![2],
            removed_keys: vec![c],
            total: 2,
            ..Update::default()
        };
        let composed = compose(&u1, &u2);
        assert_eq!(composed.removed_indexes, vec![1, 2]);
        assert_eq!(composed.removed_keys, vec![b, c]);
        assert_eq!(composed.added_indexes, vec![0]);
        assert_eq!(applied(&composed, &list).known_keys(), vec![x, a]);
    }

    #[test]
    fn invert_swaps_and_restores_total() {
        let [a, b, c, x] = keys();
        let u = Update {
            removed_indexes: vec![0, 2],
            removed_keys: vec![a, c],
            added_indexes: vec![1],
            added_keys: vec![x],
            total: 2,
            ..Update::default()
        };
        let inv = invert(&u);
        assert_eq!(inv.removed_keys, vec![x]);
        assert_eq!(inv.added_keys, vec![a, c]);
        assert_eq!(inv.total, 3);

        let list = SparseList::from_keys([a, b, c]);
        let after = applied(&u, &list);
        assert_eq!(after.known_keys(), vec![b, x]);
        assert_eq!(applied(&inv, &after), list);
    }

    #[test]
    fn compose_prefixes_chains() {
        let [a, b, c] = keys();
        let list = SparseList::from_keys([a, b, c]);
        let p1 = normalize(RawUpdate::remove([a]), &list);
        let mid = applied(&p1, &list);
        let p2 = normalize(RawUpdate::remove([c]), &mid);
        let prefixes = compose_prefixes(&[p1.clone(), p2.clone()]);
        assert_eq!(prefixes.len(), 2);
        assert!(prefixes[0].is_equivalent(&p1));
        assert!(prefixes[1].is_equivalent(&compose(&p1, &p2)));
        assert_eq!(compose_all(&[p1, p2]), Some(prefixes[1].clone()));
        assert_eq!(compose_all(&[]), None);
    }

    mod properties {
        use super::super::*;
        use proptest::prelude::*;

        #[derive(Debug, Clone)]
        struct Edit {
            removals: Vec<bool>,
            inserts: Vec<usize>,
        }

        fn arb_edit() -> impl Strategy<Value = Edit> {
            (
                prop::collection::vec(any::<bool>(), 0..12),
                prop::collection::vec(any::<usize>(), 0..4),
            )
                .prop_map(|(removals, inserts)| Edit { removals, inserts })
        }

        /// Perform `edit` on `before`, returning the update describing it and
        /// the resulting keys.
        fn build(before: &[StoreKey], edit: &Edit) -> (Update, Vec<StoreKey>) {
            let mut update = Update::default();
            let mut after = Vec::with_capacity(before.len());
            for (i, key) in before.iter().enumerate() {
                if edit.removals.get(i).copied().unwrap_or(false) {
                    update.removed_indexes.push(i);
                    update.removed_keys.push(*key);
                } else {
                    after.push(*key);
                }
            }
            let mut fresh = Vec::new();
            for raw in &edit.inserts {
                let key = StoreKey::new();
                after.insert(raw % (after.len() + 1), key);
                fresh.push(key);
            }
            let mut added: Vec<(usize, StoreKey)> = after
                .iter()
                .enumerate()
                .filter(|(_, k)| fresh.contains(k))
                .map(|(i, k)| (i, *k))
                .collect();
            added.sort_by_key(|(i, _)| *i);
            for (i, k) in added {
                update.added_indexes.push(i);
                update.added_keys.push(k);
            }
            update.total = after.len();
            (update, after)
        }

        fn run(update: &Update, list: &SparseList) -> SparseList {
            let mut list = list.clone();
            let outcome = apply(update, &mut list);
            assert!(matches!(outcome, ApplyOutcome::Applied { .. }));
            list
        }

        proptest! {
            #[test]
            fn prop_compose_with_inverse_is_identity(len in 0usize..12, edit in arb_edit()) {
                let before: Vec<StoreKey> = (0..len).map(|_| StoreKey::new()).collect();
                let list = SparseList::from_keys(before.clone());
                let (u, after) = build(&before, &edit);

                prop_assert_eq!(run(&u, &list).known_keys(), after);
                let round_trip = compose(&u, &invert(&u));
                prop_assert_eq!(run(&round_trip, &list), list);
            }

            #[test]
            fn prop_compose_matches_sequential_apply(
                len in 0usize..12,
                e1 in arb_edit(),
                e2 in arb_edit(),
            ) {
                let before: Vec<StoreKey> = (0..len).map(|_| StoreKey::new()).collect();
                let list = SparseList::from_keys(before.clone());
                let (p1, mid) = build(&before, &e1);
                let (p2, _) = build(&mid, &e2);

                let sequential = run(&p2, &run(&p1, &list));
                let composed = run(&compose(&p1, &p2), &list);
                prop_assert_eq!(composed, sequential);
            }

            #[test]
            fn prop_triple_compose_matches_sequential_apply(
                len in 0usize..10,
                e1 in arb_edit(),
                e2 in arb_edit(),
                e3 in arb_edit(),
            ) {
                let before: Vec<StoreKey> = (0..len).map(|_| StoreKey::new()).collect();
                let list = SparseList::from_keys(before.clone());
                let (p1, s1) = build(&before, &e1);
                let (p2, s2) = build(&s1, &e2);
                let (p3, _) = build(&s2, &e3);

                let sequential = run(&p3, &run(&p2, &run(&p1, &list)));
                let left = compose(&compose(&p1, &p2), &p3);
                let right = compose(&p1, &compose(&p2, &p3));
                prop_assert_eq!(run(&left, &list), sequential.clone());
                prop_assert_eq!(run(&right, &list), sequential);
            }

            #[test]
            fn prop_map_indexes_paths_agree(
                len in 0usize..40,
                picks in prop::collection::vec(any::<usize>(), 0..20),
                strangers in 0usize..3,
            ) {
                let before: Vec<StoreKey> = (0..len).map(|_| StoreKey::new()).collect();
                let list = SparseList::from_keys(before.clone());
                let mut sought: Vec<StoreKey> = if len == 0 {
                    Vec::new()
                } else {
                    picks.iter().map(|p| before[p % len]).collect()
                };
                sought.extend((0..strangers).map(|_| StoreKey::new()));

                let scan = map_indexes_by_scan(&list, &sought);
                prop_assert_eq!(&scan, &map_indexes_by_lookup(&list, &sought));
                prop_assert_eq!(scan, map_indexes(&list, &sought));
            }
        }
    }
}
