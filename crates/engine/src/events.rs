use winlist_core::ids::StoreKey;

/// Payload of [`QueryEvent::Updated`]: what an applied delta did, for
/// selection and focus tracking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryUpdated {
    pub removed: Vec<StoreKey>,
    pub removed_indexes: Vec<usize>,
    pub added: Vec<StoreKey>,
    pub added_indexes: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryEvent {
    Updated(QueryUpdated),
    /// Entries in `[start, end)` may have changed.
    RangeChanged { start: usize, end: usize },
    IdsLoaded,
    Reset,
}
