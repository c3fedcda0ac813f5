use std::collections::BTreeMap;

use winlist_core::{
    ids::StateToken,
    packets::{IdListPacket, UpdatePacket},
};

/// An in-process server list. Every mutation produces a new state token and
/// keeps a snapshot so deltas can be computed from any earlier state.
pub struct TestServer {
    sort: String,
    filter: String,
    ids: Vec<String>,
    version: u64,
    snapshots: BTreeMap<StateToken, Vec<String>>,
}

impl TestServer {
    pub fn new(ids: &[&str]) -> Self {
        let mut server = Self {
            sort: String::new(),
            filter: String::new(),
            ids: ids.iter().map(|s| s.to_string()).collect(),
            version: 0,
            snapshots: BTreeMap::new(),
        };
        server.snapshots.insert(server.state(), server.ids.clone());
        server
    }

    /// `n` ids named `m0`, `m1`, ...
    pub fn numbered(n: usize) -> Self {
        let ids: Vec<String> = (0..n).map(|i| format!("m{i}")).collect();
        let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        Self::new(&refs)
    }

    pub fn state(&self) -> StateToken {
        StateToken::new(format!("s{}", self.version))
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.ids.iter().position(|i| i == id)
    }

    /// Drop every snapshot but the current one, so older states can only be
    /// recovered by starting over.
    pub fn forget_history(&mut self) {
        let state = self.state();
        self.snapshots.retain(|s, _| *s == state);
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    pub fn remove(&mut self, id: &str) -> bool {
        let Some(index) = self.index_of(id) else {
            return false;
        };
        self.ids.remove(index);
        self.commit();
        true
    }

    pub fn insert(&mut self, index: usize, id: &str) {
        let index = index.min(self.ids.len());
        self.ids.insert(index, id.to_string());
        self.commit();
    }

    pub fn move_to(&mut self, id: &str, index: usize) -> bool {
        let Some(from) = self.index_of(id) else {
            return false;
        };
        let id = self.ids.remove(from);
        let index = index.min(self.ids.len());
        self.ids.insert(index, id);
        self.commit();
        true
    }

    pub fn replace_all(&mut self, ids: &[&str]) {
        self.ids = ids.iter().map(|s| s.to_string()).collect();
        self.commit();
    }

    fn commit(&mut self) {
        self.version += 1;
        self.snapshots.insert(self.state(), self.ids.clone());
    }

    // ========================================================================
    // Responses
    // ========================================================================

    /// Ids in `[position, position + count)`, clipped to the list.
    pub fn id_list(&self, position: usize, count: usize) -> IdListPacket {
        let start = position.min(self.ids.len());
        let end = (position + count).min(self.ids.len());
        IdListPacket {
            sort: self.sort.clone(),
            filter: self.filter.clone(),
            state: self.state(),
            position: start,
            ids: self.ids[start..end].to_vec(),
            total: self.ids.len(),
        }
    }

    /// Delta from `old` to the current state, or `None` if `old` is unknown.
    pub fn delta_from(&self, old: &StateToken) -> Option<UpdatePacket> {
        let before = self.snapshots.get(old)?;
        let (removed, added) = diff(before, &self.ids);
        Some(UpdatePacket {
            sort: self.sort.clone(),
            filter: self.filter.clone(),
            old_state: old.clone(),
            new_state: self.state(),
            removed,
            added,
            total: self.ids.len(),
            up_to_id: None,
        })
    }
}

/// Removed ids and `(new index, id)` insertions that turn `before` into
/// `after`, keeping the longest common subsequence in place.
fn diff(before: &[String], after: &[String]) -> (Vec<String>, Vec<(usize, String)>) {
    let (n, m) = (before.len(), after.len());
    let mut lcs = vec![vec![0usize; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            lcs[i][j] = if before[i] == after[j] {
                lcs[i + 1][j + 1] + 1
            } else {
                lcs[i + 1][j].max(lcs[i][j + 1])
            };
        }
    }

    let mut removed = Vec::new();
    let mut added = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < n || j < m {
        if i < n && j < m && before[i] == after[j] {
            i += 1;
            j += 1;
        } else if j >= m || (i < n && lcs[i + 1][j] >= lcs[i][j + 1]) {
            removed.push(before[i].clone());
            i += 1;
        } else {
            added.push((j, after[j].clone()));
            j += 1;
        }
    }
    (removed, added)
}
