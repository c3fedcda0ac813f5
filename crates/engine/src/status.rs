#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryPhase {
    #[default]
    Empty,
    Ready,
}

/// Observable status of a query: a phase plus independent flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueryStatus {
    pub(crate) phase: QueryPhase,
    pub(crate) loading: bool,
    /// The server may have moved on from our state token.
    pub(crate) obsolete: bool,
    /// A preemptive update was applied after the last refresh was issued.
    pub(crate) dirty: bool,
}

impl QueryStatus {
    pub fn phase(&self) -> QueryPhase {
        self.phase
    }

    pub fn is_empty(&self) -> bool {
        self.phase == QueryPhase::Empty
    }

    pub fn is_ready(&self) -> bool {
        self.phase == QueryPhase::Ready
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn is_obsolete(&self) -> bool {
        self.obsolete
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}
