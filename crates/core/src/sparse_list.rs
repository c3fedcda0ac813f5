use crate::ids::StoreKey;

/// The locally materialized slice of a server-ordered list.
///
/// Entries are `None` where the key at that position is not yet known. The
/// materialized vector can be shorter than `total`; positions past its end
/// are gaps too.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SparseList {
    keys: Vec<Option<StoreKey>>,
    total: Option<usize>,
}

impl SparseList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a fully known list; `total` is the number of keys.
    pub fn from_keys(keys: impl IntoIterator<Item = StoreKey>) -> Self {
        let keys: Vec<Option<StoreKey>> = keys.into_iter().map(Some).collect();
        let total = Some(keys.len());
        Self { keys, total }
    }

    pub fn total(&self) -> Option<usize> {
        self.total
    }

    pub fn set_total(&mut self, total: Option<usize>) {
        self.total = total;
    }

    /// Length used when the server total is unknown: the materialized length.
    pub fn effective_len(&self) -> usize {
        self.total.unwrap_or(self.keys.len())
    }

    pub fn materialized_len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<StoreKey> {
        self.keys.get(index).copied().flatten()
    }

    pub fn entries(&self) -> &[Option<StoreKey>] {
        &self.keys
    }

    /// Assign a key at `index`, growing the list with gaps if needed.
    pub fn set(&mut self, index: usize, key: StoreKey) {
        if index >= self.keys.len() {
            self.keys.resize(index + 1, None);
        }
        self.keys[index] = Some(key);
    }

    /// Remove the entry at `index`, shifting later entries down. Removing
    /// past the materialized end is a no-op.
    pub fn remove_at(&mut self, index: usize) -> Option<StoreKey> {
        if index < self.keys.len() {
            self.keys.remove(index)
        } else {
            None
        }
    }

    /// Insert a key at `index`, shifting later entries up. Past the end this
    /// is a plain assignment that leaves gaps before it.
    pub fn insert_at(&mut self, index: usize, key: StoreKey) {
        if index >= self.keys.len() {
            self.set(index, key);
        } else {
            self.keys.insert(index, Some(key));
        }
    }

    pub fn truncate(&mut self, len: usize) {
        self.keys.truncate(len);
    }

    /// Index of the first gap, or the materialized length if there is none.
    pub fn first_gap(&self) -> usize {
        self.keys
            .iter()
            .position(|k| k.is_none())
            .unwrap_or(self.keys.len())
    }

    pub fn has_gap_in(&self, start: usize, end: usize) -> bool {
        (start..end).any(|i| self.get(i).is_none())
    }

    pub fn index_of(&self, key: StoreKey, from: usize) -> Option<usize> {
        self.keys
            .iter()
            .enumerate()
            .skip(from)
            .find(|(_, k)| **k == Some(key))
            .map(|(i, _)| i)
    }

    pub fn last_index_of(&self, key: StoreKey) -> Option<usize> {
        self.keys.iter().rposition(|k| *k == Some(key))
    }

    /// Entries in `[start, end)`, with `None` for gaps beyond the
    /// materialized end.
    pub fn slice(&self, start: usize, end: usize) -> Vec<Option<StoreKey>> {
        (start..end).map(|i| self.get(i)).collect()
    }

    /// Known keys in order, skipping gaps.
    pub fn known_keys(&self) -> Vec<StoreKey> {
        self.keys.iter().flatten().copied().collect()
    }

    pub fn clear(&mut self) {
        self.keys.clear();
        self.total = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys<const N: usize>() -> [StoreKey; N] {
        std::array::from_fn(|_| StoreKey::new())
    }

    #[test]
    fn insert_past_end_assigns_with_gaps() {
        let [a, b] = keys();
        let mut list = SparseList::new();
        list.insert_at(3, a);
        assert_eq!(list.entries(), &[None, None, None, Some(a)]);
        assert_eq!(list.first_gap(), 0);

        list.insert_at(0, b);
        assert_eq!(list.entries(), &[Some(b), None, None, None, Some(a)]);
        assert_eq!(list.first_gap(), 1);
    }

    #[test]
    fn remove_past_end_is_noop() {
        let [a, b] = keys();
        let mut list = SparseList::from_keys([a, b]);
        assert_eq!(list.remove_at(5), None);
        assert_eq!(list.remove_at(0), Some(a));
        assert_eq!(list.known_keys(), vec![b]);
    }

    #[test]
    fn index_of_respects_from() {
        let [a, b] = keys();
        let list = SparseList::from_keys([a, b, a]);
        assert_eq!(list.index_of(a, 0), Some(0));
        assert_eq!(list.index_of(a, 1), Some(2));
        assert_eq!(list.last_index_of(a), Some(2));
        assert_eq!(list.index_of(b, 2), None);
    }

    #[test]
    fn slice_pads_unknown_positions() {
        let [a] = keys();
        let mut list = SparseList::new();
        list.set(1, a);
        list.set_total(Some(4));
        assert_eq!(list.slice(0, 4), vec![None, Some(a), None, None]);
        assert!(list.has_gap_in(0, 2));
        assert!(!list.has_gap_in(1, 2));
        assert_eq!(list.effective_len(), 4);
    }
}
