use winlist_core::ids::QueryId;
use winlist_engine::Source;

/// [`Source`] that only records which queries asked to be fetched. The
/// client drains it when pumping round trips.
#[derive(Debug, Default)]
pub struct TestSource {
    pending: Vec<QueryId>,
    requests: usize,
}

impl TestSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn take_pending(&mut self) -> Vec<QueryId> {
        std::mem::take(&mut self.pending)
    }

    /// Total `fetch_query` calls seen, including duplicates.
    pub fn requests(&self) -> usize {
        self.requests
    }
}

impl Source for TestSource {
    fn fetch_query(&mut self, query: QueryId) -> bool {
        self.requests += 1;
        if !self.pending.contains(&query) {
            self.pending.push(query);
        }
        true
    }
}
